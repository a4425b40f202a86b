//! Deferred reclamation of superseded link records.
//!
//! Obsolete records are enqueued in obsolescence order, so the queue is
//! sequence-ordered by construction: draining scans from the head and stops
//! at the first entry whose obsolete-at version some open snapshot can still
//! observe. Entries are either a single superseded link or a spliced-out run
//! of links (a polled or cleared chain) released as a unit.

use std::collections::VecDeque;

use chainlist_types::VersionSeq;

use crate::arena::{Arena, LinkIdx};
use crate::link::Link;

enum ReclaimKind {
    /// One superseded link record.
    Link(LinkIdx),
    /// A detached run of payload links, captured live at detach time.
    Run(Vec<LinkIdx>),
}

struct Entry {
    kind: ReclaimKind,
    obsolete_at: VersionSeq,
}

/// Global FIFO of superseded link records awaiting safe release.
pub(crate) struct ReclaimQueue {
    queue: VecDeque<Entry>,
    released_total: u64,
}

impl ReclaimQueue {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            released_total: 0,
        }
    }

    fn push(&mut self, kind: ReclaimKind, obsolete_at: VersionSeq) {
        debug_assert!(
            self.queue.back().is_none_or(|e| e.obsolete_at <= obsolete_at),
            "reclamation queue must stay sequence-ordered"
        );
        self.queue.push_back(Entry { kind, obsolete_at });
    }

    /// Enqueue one superseded link.
    pub fn push_link(&mut self, idx: LinkIdx, obsolete_at: VersionSeq) {
        self.push(ReclaimKind::Link(idx), obsolete_at);
    }

    /// Enqueue a detached run to be released as a unit.
    pub fn push_run(&mut self, run: Vec<LinkIdx>, obsolete_at: VersionSeq) {
        if run.is_empty() {
            return;
        }
        self.push(ReclaimKind::Run(run), obsolete_at);
    }

    /// Release every entry no open snapshot can observe.
    ///
    /// An entry is releasable when its obsolete-at sequence is strictly
    /// below `horizon` (the oldest still-open version); a `None` horizon
    /// releases everything. Returns the number of records cleared.
    pub fn drain<T>(
        &mut self,
        links: &mut Arena<Link<T>, LinkIdx>,
        horizon: Option<VersionSeq>,
    ) -> u64 {
        let mut released = 0_u64;
        while let Some(front) = self.queue.front() {
            if let Some(horizon) = horizon
                && front.obsolete_at >= horizon
            {
                break;
            }
            let entry = self.queue.pop_front().expect("front exists");
            match entry.kind {
                ReclaimKind::Link(idx) => {
                    release_link(links, idx);
                    released += 1;
                }
                ReclaimKind::Run(run) => {
                    for idx in run {
                        release_link(links, idx);
                        released += 1;
                    }
                }
            }
        }
        if released > 0 {
            self.released_total += released;
            tracing::debug!(
                released,
                remaining = self.queue.len(),
                "reclaimed obsolete link records"
            );
        }
        released
    }

    /// Entries currently awaiting release.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Records released over the queue's lifetime.
    #[must_use]
    pub fn released_total(&self) -> u64 {
        self.released_total
    }
}

impl std::fmt::Debug for ReclaimQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReclaimQueue")
            .field("pending", &self.queue.len())
            .field("released_total", &self.released_total)
            .finish()
    }
}

/// Detach `idx` from its temporal chain and return its record to the arena.
///
/// Also used for the synchronous clear path when a link is removed with no
/// snapshot open.
pub(crate) fn release_link<T>(links: &mut Arena<Link<T>, LinkIdx>, idx: LinkIdx) {
    let (older, newer) = {
        let link = &links[idx];
        (link.older, link.newer)
    };
    if let Some(newer) = newer
        && let Some(link) = links.get_mut(newer)
    {
        link.older = None;
    }
    if let Some(older) = older
        && let Some(link) = links.get_mut(older)
    {
        link.newer = None;
    }
    links.free(idx);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::NodeIdx;
    use crate::link::LinkOwner;
    use chainlist_types::{ChainName, PartitionId};
    use std::sync::Arc;

    fn obsolete_link(created: u64, obsolete_at: u64) -> Link<&'static str> {
        Link {
            owner: LinkOwner::Payload(dummy_node()),
            chain: ChainName::default(),
            partition: PartitionId::new(0),
            element: Some(Arc::new("x")),
            created: VersionSeq::new(created),
            obsolete_at: Some(VersionSeq::new(obsolete_at)),
            prev: None,
            next: None,
            older: None,
            newer: None,
            count: 0,
        }
    }

    fn dummy_node() -> NodeIdx {
        use crate::arena::Arena;
        use crate::node::Node;
        let mut nodes: Arena<Node<&'static str>, NodeIdx> = Arena::new();
        nodes.alloc(Node::new(Arc::new("x")))
    }

    #[test]
    fn drain_stops_at_the_horizon() {
        let mut links: Arena<Link<&'static str>, LinkIdx> = Arena::new();
        let mut queue = ReclaimQueue::new();

        let a = links.alloc(obsolete_link(1, 2));
        let b = links.alloc(obsolete_link(2, 3));
        let c = links.alloc(obsolete_link(3, 5));
        queue.push_link(a, VersionSeq::new(2));
        queue.push_link(b, VersionSeq::new(3));
        queue.push_link(c, VersionSeq::new(5));

        // Oldest open snapshot pins version 3: only the version-2 entry may go.
        let released = queue.drain(&mut links, Some(VersionSeq::new(3)));
        assert_eq!(released, 1);
        assert!(links.get(a).is_none());
        assert!(links.get(b).is_some(), "entry at the horizon is retained");
        assert_eq!(queue.pending(), 2);

        // No snapshots left: everything goes.
        let released = queue.drain(&mut links, None);
        assert_eq!(released, 2);
        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.released_total(), 3);
        assert_eq!(links.len(), 0);
    }

    #[test]
    fn run_entries_release_as_a_unit() {
        let mut links: Arena<Link<&'static str>, LinkIdx> = Arena::new();
        let mut queue = ReclaimQueue::new();

        let run: Vec<_> = (0..4).map(|_| links.alloc(obsolete_link(2, 4))).collect();
        queue.push_run(run.clone(), VersionSeq::new(4));

        assert_eq!(queue.drain(&mut links, Some(VersionSeq::new(4))), 0);
        assert_eq!(queue.drain(&mut links, Some(VersionSeq::new(5))), 4);
        for idx in run {
            assert!(links.get(idx).is_none());
        }
    }

    #[test]
    fn release_detaches_temporal_neighbors() {
        let mut links: Arena<Link<&'static str>, LinkIdx> = Arena::new();
        let old = links.alloc(obsolete_link(1, 2));
        let new = links.alloc(obsolete_link(2, 0));
        links[old].newer = Some(new);
        links[new].older = Some(old);

        release_link(&mut links, old);
        assert_eq!(links[new].older, None, "released record must be unhooked");
    }

    #[test]
    fn empty_run_is_not_enqueued() {
        let mut queue = ReclaimQueue::new();
        queue.push_run(Vec::new(), VersionSeq::new(1));
        assert_eq!(queue.pending(), 0);
    }
}
