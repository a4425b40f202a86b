//! Ordered segments and the append/prepend/unlink splice algorithms.
//!
//! A partition owns one `(begin, end)` sentinel pair per chain name ever
//! used within it, created lazily and never removed. The endpoint registry
//! always names the *live* sentinel versions; superseded sentinel versions
//! stay reachable only through snapshots.
//!
//! Fork-on-demand rule: a splice that rewrites a neighbor created before
//! the current mutation version, while at least one snapshot is open, first
//! forks that neighbor so older snapshots keep observing the pre-splice
//! topology through the superseded version. The rule is deliberately
//! asymmetric: unlink forks any stale neighbor (sentinels included), append
//! exempts the begin sentinel (snapshots never resolve through its version
//! chain; they walk forward from the first payload link), and prepend never
//! forks the spliced successor.

use chainlist_types::{ChainName, PartitionId, PartitionName};

use crate::arena::{Arena, LinkIdx, NodeIdx};
use crate::link::{Link, LinkOwner, MutCx, SentinelEnd, fork_link, live};
use crate::reclaim::release_link;

use std::collections::HashMap;

/// The live sentinel pair bounding one chain within a partition.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Endpoints {
    pub begin: LinkIdx,
    pub end: LinkIdx,
}

/// A chain's contents spliced out of the live topology by a polling
/// snapshot or a clear, still reachable for snapshots pinned before the
/// detach version.
pub(crate) struct DetachedRun {
    /// Live payload links of the run, in sequence order.
    pub links: Vec<LinkIdx>,
    /// Owners of those links, for membership uninstall by the caller.
    pub nodes: Vec<NodeIdx>,
}

/// An ordered segment: sentinel registry plus the splice algorithms.
#[derive(Debug)]
pub(crate) struct Partition {
    pub id: PartitionId,
    pub name: PartitionName,
    endpoints: HashMap<ChainName, Endpoints>,
}

impl Partition {
    pub fn new(id: PartitionId, name: PartitionName) -> Self {
        Self {
            id,
            name,
            endpoints: HashMap::new(),
        }
    }

    /// The live sentinel pair for `chain`, if the chain has been used here.
    #[must_use]
    pub fn endpoints(&self, chain: &ChainName) -> Option<Endpoints> {
        self.endpoints.get(chain).copied()
    }

    /// Chain names that have sentinel pairs in this partition.
    pub fn chain_names(&self) -> impl Iterator<Item = &ChainName> {
        self.endpoints.keys()
    }

    /// Element count of `chain` within this partition.
    #[must_use]
    pub fn chain_len<T>(&self, links: &Arena<Link<T>, LinkIdx>, chain: &ChainName) -> u64 {
        self.endpoints(chain)
            .map_or(0, |ends| links[ends.begin].count)
    }

    /// Locate or lazily create the sentinel pair for `chain`.
    fn ensure_endpoints<T>(&mut self, cx: &mut MutCx<'_, T>, chain: &ChainName) -> Endpoints {
        if let Some(ends) = self.endpoints.get(chain) {
            return *ends;
        }

        let begin = cx.links.alloc(Link {
            owner: LinkOwner::Sentinel(SentinelEnd::Begin),
            chain: chain.clone(),
            partition: self.id,
            element: None,
            created: cx.version,
            obsolete_at: None,
            prev: None,
            next: None,
            older: None,
            newer: None,
            count: 0,
        });
        let end = cx.links.alloc(Link {
            owner: LinkOwner::Sentinel(SentinelEnd::End),
            chain: chain.clone(),
            partition: self.id,
            element: None,
            created: cx.version,
            obsolete_at: None,
            prev: Some(begin),
            next: None,
            older: None,
            newer: None,
            count: 0,
        });
        cx.links[begin].next = Some(end);

        let ends = Endpoints { begin, end };
        self.endpoints.insert(chain.clone(), ends);
        tracing::debug!(
            partition = %self.name,
            chain = %chain,
            version = %cx.version,
            "sentinel pair created"
        );
        ends
    }

    /// Re-install a forked sentinel as the live endpoint for its chain.
    fn install_endpoint(&mut self, chain: &ChainName, end_kind: SentinelEnd, idx: LinkIdx) {
        let ends = self
            .endpoints
            .get_mut(chain)
            .expect("forked sentinel belongs to a registered chain");
        match end_kind {
            SentinelEnd::Begin => ends.begin = idx,
            SentinelEnd::End => ends.end = idx,
        }
    }

    /// Fork a stale splice neighbor, re-registering it when it is a
    /// sentinel. Payload head re-install happens inside [`fork_link`].
    fn fork_neighbor<T>(
        &mut self,
        cx: &mut MutCx<'_, T>,
        chain: &ChainName,
        idx: LinkIdx,
    ) -> LinkIdx {
        let forked = fork_link(cx, idx);
        if let LinkOwner::Sentinel(end_kind) = cx.links[forked].owner {
            self.install_endpoint(chain, end_kind, forked);
        }
        forked
    }

    /// Splice a new link for `node` between the end sentinel's predecessor
    /// and the end sentinel.
    pub fn append<T>(
        &mut self,
        cx: &mut MutCx<'_, T>,
        node: NodeIdx,
        chain: &ChainName,
    ) -> LinkIdx {
        let ends = self.ensure_endpoints(cx, chain);
        let mut pred = live(cx.links, cx.links[ends.end].prev.expect("end sentinel bounded"));

        // Fork-on-demand, exempting the begin sentinel: forward iteration
        // starts from the first payload link, never through the begin
        // sentinel's version chain.
        if cx.snapshots_open && pred != ends.begin && cx.links[pred].created < cx.version {
            pred = self.fork_neighbor(cx, chain, pred);
        }

        let element = cx.nodes[node].element.clone();
        debug_assert!(element.is_some(), "appending a disposed node");
        let idx = cx.links.alloc(Link {
            owner: LinkOwner::Payload(node),
            chain: chain.clone(),
            partition: self.id,
            element,
            created: cx.version,
            obsolete_at: None,
            prev: Some(pred),
            next: Some(ends.end),
            older: None,
            newer: None,
            count: 0,
        });
        cx.links[pred].next = Some(idx);
        cx.links[ends.end].prev = Some(idx);
        cx.links[ends.begin].count += 1;
        cx.links[ends.end].count += 1;
        idx
    }

    /// Splice a new link for `node` between the begin sentinel and its
    /// successor. The successor is never forked: forward-iterating
    /// snapshots see the then-current successor from wherever they started.
    pub fn prepend<T>(
        &mut self,
        cx: &mut MutCx<'_, T>,
        node: NodeIdx,
        chain: &ChainName,
    ) -> LinkIdx {
        let ends = self.ensure_endpoints(cx, chain);
        let succ = live(
            cx.links,
            cx.links[ends.begin].next.expect("begin sentinel bounded"),
        );

        let element = cx.nodes[node].element.clone();
        debug_assert!(element.is_some(), "prepending a disposed node");
        let idx = cx.links.alloc(Link {
            owner: LinkOwner::Payload(node),
            chain: chain.clone(),
            partition: self.id,
            element,
            created: cx.version,
            obsolete_at: None,
            prev: Some(ends.begin),
            next: Some(succ),
            older: None,
            newer: None,
            count: 0,
        });
        cx.links[ends.begin].next = Some(idx);
        cx.links[succ].prev = Some(idx);
        cx.links[ends.begin].count += 1;
        cx.links[ends.end].count += 1;
        idx
    }

    /// Splice `link` out of the sequence topology.
    ///
    /// With snapshots open, stale neighbors (sentinels included) are forked
    /// first and the removed record is enqueued; otherwise the splice
    /// mutates in place and the record is cleared synchronously.
    pub fn unlink<T>(&mut self, cx: &mut MutCx<'_, T>, link: LinkIdx) {
        let chain = cx.links[link].chain.clone();
        debug_assert!(
            !cx.links[link].owner.is_sentinel(),
            "sentinels are never unlinked"
        );

        let mut pred = live(cx.links, cx.links[link].prev.expect("payload link bounded"));
        let mut succ = live(cx.links, cx.links[link].next.expect("payload link bounded"));

        if cx.snapshots_open {
            if cx.links[pred].created < cx.version {
                pred = self.fork_neighbor(cx, &chain, pred);
            }
            if cx.links[succ].created < cx.version {
                succ = self.fork_neighbor(cx, &chain, succ);
            }
        }

        cx.links[pred].next = Some(succ);
        cx.links[succ].prev = Some(pred);

        let ends = self.endpoints(&chain).expect("chain has endpoints");
        cx.links[ends.begin].count -= 1;
        cx.links[ends.end].count -= 1;

        cx.links[link].obsolete_at = Some(cx.version);
        if cx.snapshots_open {
            cx.reclaim.push_link(link, cx.version);
        } else {
            release_link(cx.links, link);
        }
    }

    /// Detach the entire chain: fork both sentinels to a fresh, empty
    /// version and hand the old boundary's reachable run to the caller.
    ///
    /// The superseded sentinels and the run are enqueued for reclamation;
    /// snapshots pinned before `cx.version` keep resolving the old
    /// boundary and its captured run. Returns `None` for an absent or
    /// empty chain.
    pub fn detach_chain<T>(
        &mut self,
        cx: &mut MutCx<'_, T>,
        chain: &ChainName,
    ) -> Option<DetachedRun> {
        let ends = self.endpoints(chain)?;
        if cx.links[ends.begin].count == 0 {
            return None;
        }

        // Collect the live run and mark it obsolete.
        let mut run = Vec::new();
        let mut nodes = Vec::new();
        let mut cur = live(
            cx.links,
            cx.links[ends.begin].next.expect("begin sentinel bounded"),
        );
        while let LinkOwner::Payload(node) = cx.links[cur].owner {
            run.push(cur);
            nodes.push(node);
            cx.links[cur].obsolete_at = Some(cx.version);
            cur = live(cx.links, cx.links[cur].next.expect("payload link bounded"));
        }
        debug_assert_eq!(run.len() as u64, cx.links[ends.begin].count);

        // Fork the boundary: the old sentinels (with their captured run)
        // stay for open snapshots, the fresh versions make the chain
        // immediately empty for new readers.
        let new_begin = self.fork_neighbor(cx, chain, ends.begin);
        let new_end = self.fork_neighbor(cx, chain, ends.end);
        {
            let begin = &mut cx.links[new_begin];
            begin.count = 0;
            begin.prev = None;
            begin.next = Some(new_end);
        }
        {
            let end = &mut cx.links[new_end];
            end.count = 0;
            end.prev = Some(new_begin);
            end.next = None;
        }

        cx.reclaim.push_run(run.clone(), cx.version);
        tracing::debug!(
            partition = %self.name,
            chain = %chain,
            drained = run.len(),
            version = %cx.version,
            "chain detached"
        );

        Some(DetachedRun { links: run, nodes })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
