//! Versioned link records and the temporal version-chain operations.
//!
//! A [`Link`] asserts "node N occupies this position in chain C of
//! partition P as of version V". Its `prev`/`next` handles name a version
//! of the neighboring slots; `older`/`newer` form the temporal chain that
//! snapshot iteration resolves through, so a pointer landing on the wrong
//! version of a slot is corrected by [`resolve_at`] (readers) or [`live`]
//! (mutations). Exactly one link per `(node, chain)` slot is live (has no
//! newer version) at any instant.

use std::sync::Arc;

use chainlist_error::{ChainError, Result};
use chainlist_types::{ChainName, PartitionId, VersionSeq};

use crate::arena::{Arena, LinkIdx, NodeIdx};
use crate::node::Node;
use crate::reclaim::ReclaimQueue;

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

/// Which boundary of a chain a sentinel link marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SentinelEnd {
    Begin,
    End,
}

/// Owner of a link record: a payload node, or the partition itself for the
/// two boundary records of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkOwner {
    Payload(NodeIdx),
    Sentinel(SentinelEnd),
}

impl LinkOwner {
    #[inline]
    pub fn is_sentinel(self) -> bool {
        matches!(self, Self::Sentinel(_))
    }

    #[inline]
    pub fn payload(self) -> Option<NodeIdx> {
        match self {
            Self::Payload(node) => Some(node),
            Self::Sentinel(_) => None,
        }
    }
}

/// One versioned edge record.
#[derive(Debug)]
pub(crate) struct Link<T> {
    pub owner: LinkOwner,
    pub chain: ChainName,
    pub partition: PartitionId,
    /// Cached element so snapshots keep yielding it after the owning node
    /// is disposed. `None` exactly for sentinels.
    pub element: Option<Arc<T>>,
    /// Version this record was created at.
    pub created: VersionSeq,
    /// Version a newer fork superseded this record at, once obsolete.
    pub obsolete_at: Option<VersionSeq>,
    /// Sequence topology at creation time.
    pub prev: Option<LinkIdx>,
    pub next: Option<LinkIdx>,
    /// Temporal chain for the same logical (node, chain) slot.
    pub older: Option<LinkIdx>,
    pub newer: Option<LinkIdx>,
    /// Element count of the chain within its partition; maintained on both
    /// sentinels, zero on payload links.
    pub count: u64,
}

// ---------------------------------------------------------------------------
// MutCx — the borrow bundle every mutation algorithm runs against
// ---------------------------------------------------------------------------

/// Mutable view of the engine state for one splice operation, stamped with
/// the critical section's mutation version.
pub(crate) struct MutCx<'a, T> {
    pub links: &'a mut Arena<Link<T>, LinkIdx>,
    pub nodes: &'a mut Arena<Node<T>, NodeIdx>,
    pub reclaim: &'a mut ReclaimQueue,
    pub version: VersionSeq,
    /// When false, splices mutate in place and removed records are cleared
    /// synchronously; no version needs preserving.
    pub snapshots_open: bool,
}

// ---------------------------------------------------------------------------
// Version-chain operations
// ---------------------------------------------------------------------------

/// Follow `newer` pointers to the live version of a logical slot.
///
/// A topology pointer read out of a superseded record may name another
/// superseded record, so every mutation-path pointer chase goes through
/// here.
pub(crate) fn live<T>(links: &Arena<Link<T>, LinkIdx>, mut idx: LinkIdx) -> LinkIdx {
    while let Some(newer) = links[idx].newer {
        idx = newer;
    }
    idx
}

/// Fork `idx` into a newer version at `cx.version`.
///
/// The new record shares the old one's assignment, cached element, topology
/// pointers, and count; the old record is marked obsolete and enqueued for
/// reclamation. For payload owners the node's head is re-installed here;
/// sentinel owners are re-installed in the partition's endpoint registry by
/// the caller. This is the sole mechanism by which a slot changes shape
/// without changing identity.
pub(crate) fn fork_link<T>(cx: &mut MutCx<'_, T>, idx: LinkIdx) -> LinkIdx {
    let (owner, chain, partition, element, prev, next, count) = {
        let old = &cx.links[idx];
        debug_assert!(old.newer.is_none(), "forking a superseded link");
        (
            old.owner,
            old.chain.clone(),
            old.partition,
            old.element.clone(),
            old.prev,
            old.next,
            old.count,
        )
    };

    let forked = cx.links.alloc(Link {
        owner,
        chain: chain.clone(),
        partition,
        element,
        created: cx.version,
        obsolete_at: None,
        prev,
        next,
        older: Some(idx),
        newer: None,
        count,
    });

    {
        let old = &mut cx.links[idx];
        old.newer = Some(forked);
        old.obsolete_at = Some(cx.version);
    }
    cx.reclaim.push_link(idx, cx.version);

    // Re-point live neighbors at the new version so no live record keeps
    // naming the superseded one past its reclamation. Readers resolving
    // through the redirected pointer walk the temporal chain back to the
    // version their snapshot can see, so visibility is unchanged.
    if let Some(prev) = prev {
        let p = live(cx.links, prev);
        if cx.links[p].next == Some(idx) {
            cx.links[p].next = Some(forked);
        }
    }
    if let Some(next) = next {
        let n = live(cx.links, next);
        if cx.links[n].prev == Some(idx) {
            cx.links[n].prev = Some(forked);
        }
    }

    if let LinkOwner::Payload(node) = owner {
        cx.nodes[node].heads.insert(chain, forked);
    }

    forked
}

/// Resolve the record visible at `pinned` for the logical slot `start`
/// names.
///
/// A neighbor reached through topology pointers may be newer than the
/// snapshot (walk back through `older`) or superseded since the snapshot
/// (walk forward through `newer` while still visible). Failure to land on a
/// visible record means an older version was reclaimed while still needed,
/// which is a reclamation-ordering bug.
pub(crate) fn resolve_at<T>(
    links: &Arena<Link<T>, LinkIdx>,
    start: LinkIdx,
    pinned: VersionSeq,
) -> Result<LinkIdx> {
    let severed = |detail: &str| ChainError::ConsistencyViolation {
        pinned,
        detail: detail.to_owned(),
    };

    let mut cur = start;
    let mut link = links
        .get(cur)
        .ok_or_else(|| severed("resolution entered a reclaimed record"))?;

    if link.created > pinned {
        while link.created > pinned {
            cur = link
                .older
                .ok_or_else(|| severed("temporal chain exhausted above the pinned version"))?;
            link = links
                .get(cur)
                .ok_or_else(|| severed("older version reclaimed while a snapshot could see it"))?;
        }
    } else {
        while let Some(newer) = link.newer {
            let candidate = links
                .get(newer)
                .ok_or_else(|| severed("newer version reclaimed out of order"))?;
            if candidate.created > pinned {
                break;
            }
            cur = newer;
            link = candidate;
        }
    }

    Ok(cur)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload_link(node: NodeIdx, created: u64) -> Link<&'static str> {
        Link {
            owner: LinkOwner::Payload(node),
            chain: ChainName::default(),
            partition: PartitionId::new(0),
            element: Some(Arc::new("x")),
            created: VersionSeq::new(created),
            obsolete_at: None,
            prev: None,
            next: None,
            older: None,
            newer: None,
            count: 0,
        }
    }

    fn scratch() -> (
        Arena<Link<&'static str>, LinkIdx>,
        Arena<Node<&'static str>, NodeIdx>,
        ReclaimQueue,
    ) {
        (Arena::new(), Arena::new(), ReclaimQueue::new())
    }

    #[test]
    fn fork_wires_the_temporal_chain_both_ways() {
        let (mut links, mut nodes, mut reclaim) = scratch();
        let node = nodes.alloc(Node::new(Arc::new("x")));
        let old = links.alloc(payload_link(node, 1));
        nodes[node].heads.insert(ChainName::default(), old);

        let mut cx = MutCx {
            links: &mut links,
            nodes: &mut nodes,
            reclaim: &mut reclaim,
            version: VersionSeq::new(2),
            snapshots_open: true,
        };
        let new = fork_link(&mut cx, old);

        assert_eq!(links[old].newer, Some(new));
        assert_eq!(links[old].obsolete_at, Some(VersionSeq::new(2)));
        assert_eq!(links[new].older, Some(old));
        assert_eq!(links[new].created, VersionSeq::new(2));
        assert_eq!(
            nodes[node].heads.get(&ChainName::default()),
            Some(&new),
            "fork re-installs the node head"
        );
        assert_eq!(reclaim.pending(), 1, "old version enqueued for reclamation");
    }

    #[test]
    fn resolve_walks_back_to_the_pinned_version() {
        let (mut links, mut nodes, mut reclaim) = scratch();
        let node = nodes.alloc(Node::new(Arc::new("x")));
        let v1 = links.alloc(payload_link(node, 1));
        nodes[node].heads.insert(ChainName::default(), v1);

        let mut cx = MutCx {
            links: &mut links,
            nodes: &mut nodes,
            reclaim: &mut reclaim,
            version: VersionSeq::new(3),
            snapshots_open: true,
        };
        let v3 = fork_link(&mut cx, v1);
        cx.version = VersionSeq::new(5);
        let v5 = fork_link(&mut cx, v3);

        // A snapshot at version 4 reaching the newest record resolves to v3.
        assert_eq!(resolve_at(&links, v5, VersionSeq::new(4)).unwrap(), v3);
        // A snapshot at version 1 resolves all the way back.
        assert_eq!(resolve_at(&links, v5, VersionSeq::new(1)).unwrap(), v1);
    }

    #[test]
    fn resolve_walks_forward_while_still_visible() {
        let (mut links, mut nodes, mut reclaim) = scratch();
        let node = nodes.alloc(Node::new(Arc::new("x")));
        let v1 = links.alloc(payload_link(node, 1));
        nodes[node].heads.insert(ChainName::default(), v1);

        let mut cx = MutCx {
            links: &mut links,
            nodes: &mut nodes,
            reclaim: &mut reclaim,
            version: VersionSeq::new(3),
            snapshots_open: true,
        };
        let v3 = fork_link(&mut cx, v1);
        cx.version = VersionSeq::new(7);
        fork_link(&mut cx, v3);

        // From the oldest record, a snapshot at version 5 advances to v3 but
        // not to the version-7 fork.
        assert_eq!(resolve_at(&links, v1, VersionSeq::new(5)).unwrap(), v3);
        // At the exact creation version the record itself is visible.
        assert_eq!(resolve_at(&links, v1, VersionSeq::new(1)).unwrap(), v1);
    }

    #[test]
    fn resolve_reports_a_severed_chain() {
        let (mut links, mut nodes, _reclaim) = scratch();
        let node = nodes.alloc(Node::new(Arc::new("x")));
        let v5 = links.alloc(payload_link(node, 5));
        nodes[node].heads.insert(ChainName::default(), v5);

        let err = resolve_at(&links, v5, VersionSeq::new(2)).unwrap_err();
        assert!(matches!(err, ChainError::ConsistencyViolation { .. }));
    }

    #[test]
    fn live_follows_newer_to_the_head() {
        let (mut links, mut nodes, mut reclaim) = scratch();
        let node = nodes.alloc(Node::new(Arc::new("x")));
        let v1 = links.alloc(payload_link(node, 1));
        nodes[node].heads.insert(ChainName::default(), v1);

        let mut cx = MutCx {
            links: &mut links,
            nodes: &mut nodes,
            reclaim: &mut reclaim,
            version: VersionSeq::new(2),
            snapshots_open: true,
        };
        let v2 = fork_link(&mut cx, v1);

        assert_eq!(live(&links, v1), v2);
        assert_eq!(live(&links, v2), v2);
    }
}
