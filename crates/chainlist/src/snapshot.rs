//! Point-in-time chain views.
//!
//! A snapshot pins a version in the clock and captures, per contributing
//! partition, the first and last link of the chain plus its element count as
//! of that version. Iteration resolves every traversed record through the
//! temporal version chain, so concurrent mutations (which fork superseded
//! records instead of rewriting them) never change what an open snapshot
//! observes. Each iteration step takes the shared side of the engine lock,
//! so readers block neither each other nor between steps.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use smallvec::SmallVec;

use chainlist_error::ChainError;
use chainlist_types::{ChainName, PartitionId, VersionSeq};

use crate::arena::LinkIdx;
use crate::link::resolve_at;
use crate::list::{NodeHandle, Shared};

/// One partition's contribution to a snapshot: the chain's boundary links
/// and element count as of the pinned version.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Segment {
    pub partition: PartitionId,
    pub first: LinkIdx,
    pub last: LinkIdx,
    pub count: u64,
}

/// A consistent view of one chain at a pinned version.
///
/// The view stays valid under concurrent mutation until [`close`] is called
/// (or the snapshot is dropped, which closes it). Closing releases the pin
/// and lets the engine reclaim record versions only this snapshot could
/// still observe.
///
/// [`close`]: ChainSnapshot::close
pub struct ChainSnapshot<T> {
    pub(crate) shared: Shared<T>,
    pub(crate) version: VersionSeq,
    pub(crate) chain: ChainName,
    pub(crate) segments: SmallVec<[Segment; 2]>,
    pub(crate) total: u64,
    pub(crate) closed: AtomicBool,
}

impl<T> ChainSnapshot<T> {
    /// The version this snapshot observes.
    #[must_use]
    pub fn version(&self) -> VersionSeq {
        self.version
    }

    /// The chain this snapshot views.
    #[must_use]
    pub fn chain(&self) -> &ChainName {
        &self.chain
    }

    /// Total element count across all captured partitions.
    ///
    /// Exact and O(1): counts are read off the sentinel records at capture
    /// time, inside the same critical section that pins the version.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.assert_open();
        self.total
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Elements in chain order across partitions.
    ///
    /// # Panics
    ///
    /// Panics if the snapshot has been closed.
    pub fn iter(&self) -> SnapshotIter<'_, T> {
        self.assert_open();
        SnapshotIter {
            snapshot: self,
            segment: 0,
            cursor: None,
        }
    }

    /// Node handles in chain order.
    ///
    /// Handles for elements whose node was disposed after this snapshot was
    /// opened report [`NodeHandle::is_disposed`]; the elements themselves
    /// remain reachable through [`iter`](Self::iter).
    pub fn iter_nodes(&self) -> impl Iterator<Item = NodeHandle<T>> + '_ {
        self.assert_open();
        NodeIter {
            snapshot: self,
            segment: 0,
            cursor: None,
        }
    }

    /// The first element, if any.
    #[must_use]
    pub fn first(&self) -> Option<Arc<T>> {
        self.iter().next()
    }

    /// The last element, if any.
    #[must_use]
    pub fn last(&self) -> Option<Arc<T>> {
        self.assert_open();
        let segment = self.segments.last()?;
        let inner = self.shared.read();
        let idx = match resolve_at(&inner.links, segment.last, self.version) {
            Ok(idx) => idx,
            Err(err) => panic!("snapshot resolution failed: {err}"),
        };
        Some(
            inner.links[idx]
                .element
                .clone()
                .unwrap_or_else(|| panic!("payload record at {:?} has no element", idx)),
        )
    }

    /// Release the version pin and reclaim whatever it was holding back.
    ///
    /// Idempotent; also invoked by `Drop`. Every accessor panics once the
    /// snapshot is closed.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut inner = self.shared.write();
        inner.release_snapshot(self.version);
    }

    fn assert_open(&self) {
        assert!(
            !self.closed.load(Ordering::Acquire),
            "{}",
            ChainError::SnapshotClosed {
                version: self.version
            }
        );
    }

    /// Shared walk step for both iterators: resolve the cursor at the
    /// pinned version and yield the visible payload record, hopping to the
    /// next segment at each end sentinel.
    fn step(&self, segment: &mut usize, cursor: &mut Option<LinkIdx>) -> Option<LinkIdx> {
        self.assert_open();
        loop {
            let Some(cur) = *cursor else {
                let seg = self.segments.get(*segment)?;
                *segment += 1;
                *cursor = Some(seg.first);
                continue;
            };
            let inner = self.shared.read();
            let idx = match resolve_at(&inner.links, cur, self.version) {
                Ok(idx) => idx,
                Err(err) => panic!("snapshot resolution failed: {err}"),
            };
            let link = &inner.links[idx];
            if link.owner.is_sentinel() {
                *cursor = None;
                continue;
            }
            *cursor = link.next;
            return Some(idx);
        }
    }
}

impl<T> Drop for ChainSnapshot<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T> std::fmt::Debug for ChainSnapshot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainSnapshot")
            .field("chain", &self.chain)
            .field("version", &self.version)
            .field("size", &self.total)
            .field("segments", &self.segments.len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

/// Iterator over a snapshot's elements.
pub struct SnapshotIter<'a, T> {
    snapshot: &'a ChainSnapshot<T>,
    segment: usize,
    cursor: Option<LinkIdx>,
}

impl<T> Iterator for SnapshotIter<'_, T> {
    type Item = Arc<T>;

    fn next(&mut self) -> Option<Arc<T>> {
        let idx = self
            .snapshot
            .step(&mut self.segment, &mut self.cursor)?;
        let inner = self.snapshot.shared.read();
        Some(
            inner.links[idx]
                .element
                .clone()
                .unwrap_or_else(|| panic!("payload record at {idx:?} has no element")),
        )
    }
}

struct NodeIter<'a, T> {
    snapshot: &'a ChainSnapshot<T>,
    segment: usize,
    cursor: Option<LinkIdx>,
}

impl<T> Iterator for NodeIter<'_, T> {
    type Item = NodeHandle<T>;

    fn next(&mut self) -> Option<NodeHandle<T>> {
        let idx = self
            .snapshot
            .step(&mut self.segment, &mut self.cursor)?;
        let node = {
            let inner = self.snapshot.shared.read();
            inner.links[idx]
                .owner
                .payload()
                .unwrap_or_else(|| panic!("step yielded a sentinel at {idx:?}"))
        };
        Some(NodeHandle::from_parts(
            Arc::clone(&self.snapshot.shared),
            node,
        ))
    }
}
