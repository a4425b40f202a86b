//! The collection: exclusive mutation path, snapshot opening, and the
//! public handle types.
//!
//! All structural state lives in one [`Inner`] behind a `parking_lot`
//! read-write lock. Mutations and snapshot open/close take the exclusive
//! side; snapshot iteration takes the shared side per step, so readers
//! block neither each other nor between steps. Observers are dispatched
//! synchronously inside the critical section, with panics caught at the
//! dispatch boundary.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use parking_lot::RwLock;
use smallvec::SmallVec;

use chainlist_error::{ChainError, Result};
use chainlist_observability::{ChainEvent, ChainObserver};
use chainlist_types::{
    ChainName, ChainTarget, InsertMode, NodeId, PartitionId, PartitionName, VersionSeq,
};

use crate::arena::{Arena, LinkIdx, NodeIdx};
use crate::link::{Link, MutCx};
use crate::node::Node;
use crate::partition::Partition;
use crate::reclaim::ReclaimQueue;
use crate::snapshot::{ChainSnapshot, Segment};
use crate::version::VersionClock;

pub(crate) type Shared<T> = Arc<RwLock<Inner<T>>>;

// ---------------------------------------------------------------------------
// Inner — all structural state, guarded by the collection lock
// ---------------------------------------------------------------------------

pub(crate) struct Inner<T> {
    pub(crate) links: Arena<Link<T>, LinkIdx>,
    pub(crate) nodes: Arena<Node<T>, NodeIdx>,
    partitions: Vec<Partition>,
    partition_ids: HashMap<PartitionName, PartitionId>,
    clock: VersionClock,
    reclaim: ReclaimQueue,
    observers: Vec<Arc<dyn ChainObserver>>,
    live_nodes: u64,
    /// Set after a fatal error (sequence exhaustion); every further
    /// mutation is rejected.
    poisoned: bool,
}

impl<T> Inner<T> {
    fn new() -> Self {
        Self {
            links: Arena::new(),
            nodes: Arena::new(),
            partitions: Vec::new(),
            partition_ids: HashMap::new(),
            clock: VersionClock::new(),
            reclaim: ReclaimQueue::new(),
            observers: Vec::new(),
            live_nodes: 0,
            poisoned: false,
        }
    }

    /// The version for the current exclusive critical section.
    fn mutation_version(&mut self) -> Result<VersionSeq> {
        if self.poisoned {
            return Err(ChainError::SequenceExhausted {
                at: self.clock.current(),
            });
        }
        match self.clock.modification_version() {
            Ok(version) => Ok(version),
            Err(err) => {
                self.poisoned = true;
                tracing::error!(%err, "version clock exhausted; collection poisoned");
                Err(err)
            }
        }
    }

    /// Dense id for `name`, creating the partition on first use.
    fn partition_id(&mut self, name: &PartitionName) -> PartitionId {
        if let Some(&id) = self.partition_ids.get(name) {
            return id;
        }
        let id = PartitionId::new(
            u32::try_from(self.partitions.len()).expect("partition registry overflow"),
        );
        self.partitions.push(Partition::new(id, name.clone()));
        self.partition_ids.insert(name.clone(), id);
        tracing::debug!(partition = %name, %id, "partition created");
        id
    }

    /// Split-borrow the state a splice needs alongside the target partition.
    fn mutate(
        &mut self,
        pid: PartitionId,
        version: VersionSeq,
    ) -> (&mut Partition, MutCx<'_, T>) {
        let snapshots_open = self.clock.has_open_snapshots();
        let partition = &mut self.partitions[pid.index()];
        let cx = MutCx {
            links: &mut self.links,
            nodes: &mut self.nodes,
            reclaim: &mut self.reclaim,
            version,
            snapshots_open,
        };
        (partition, cx)
    }

    fn emit(&self, event: &ChainEvent) {
        for observer in &self.observers {
            let result = panic::catch_unwind(AssertUnwindSafe(|| observer.on_event(event)));
            if let Err(payload) = result {
                tracing::error!(
                    panic = panic_message(payload.as_ref()),
                    ?event,
                    "observer panicked; isolated at dispatch boundary"
                );
            }
        }
    }

    /// Install a live link for `node` in the target chain.
    fn link_node(
        &mut self,
        node: NodeIdx,
        target: &ChainTarget,
        mode: InsertMode,
        version: VersionSeq,
    ) -> Result<()> {
        if let Some(existing) = self.nodes[node].live_link(&target.chain) {
            let bound = self.partitions[self.links[existing].partition.index()]
                .name
                .clone();
            return Err(if bound == target.partition {
                ChainError::ChainConflict {
                    chain: target.chain.to_string(),
                    partition: target.partition.to_string(),
                }
            } else {
                ChainError::PartitionConflict {
                    chain: target.chain.to_string(),
                    existing: bound.to_string(),
                    requested: target.partition.to_string(),
                }
            });
        }

        let pid = self.partition_id(&target.partition);
        let link = {
            let (partition, mut cx) = self.mutate(pid, version);
            match mode {
                InsertMode::Append => partition.append(&mut cx, node, &target.chain),
                InsertMode::Prepend => partition.prepend(&mut cx, node, &target.chain),
            }
        };
        self.nodes[node].heads.insert(target.chain.clone(), link);

        self.emit(&ChainEvent::Linked {
            node: node.node_id(),
            chain: target.chain.to_string(),
            partition: target.partition.to_string(),
            mode,
            version,
        });
        Ok(())
    }

    /// Remove `node`'s live link in `chain`, if any. Disposes the node when
    /// its last membership goes (unless pinned by a compound operation).
    fn remove_head(&mut self, node: NodeIdx, chain: &ChainName, version: VersionSeq) -> bool {
        let Some(link) = self.nodes[node].live_link(chain) else {
            return false;
        };
        let pid = self.links[link].partition;
        let partition_name = self.partitions[pid.index()].name.clone();
        {
            let (partition, mut cx) = self.mutate(pid, version);
            partition.unlink(&mut cx, link);
        }
        self.nodes[node].heads.remove(chain);

        self.emit(&ChainEvent::Unlinked {
            node: node.node_id(),
            chain: chain.to_string(),
            partition: partition_name.to_string(),
            version,
        });

        if self.nodes[node].is_disposable() {
            self.dispose(node, version);
        }
        true
    }

    fn dispose(&mut self, node: NodeIdx, version: VersionSeq) {
        let id = node.node_id();
        let record = self.nodes.free(node);
        debug_assert!(record.heads.is_empty(), "disposing a linked node");
        self.live_nodes -= 1;
        self.emit(&ChainEvent::NodeDisposed { node: id, version });
    }

    /// Create a node for `element` and link it into every target.
    ///
    /// Duplicate chains among the targets are rejected before the node is
    /// created, so a failed insert leaves no trace.
    fn insert_one(
        &mut self,
        element: Arc<T>,
        targets: &[ChainTarget],
        mode: InsertMode,
    ) -> Result<NodeIdx> {
        for (i, target) in targets.iter().enumerate() {
            if targets[..i].iter().any(|t| t.chain == target.chain) {
                return Err(ChainError::ChainConflict {
                    chain: target.chain.to_string(),
                    partition: target.partition.to_string(),
                });
            }
        }

        let version = self.mutation_version()?;
        let node = self.nodes.alloc(Node::new(element));
        self.live_nodes += 1;
        self.emit(&ChainEvent::NodeCreated {
            node: node.node_id(),
            version,
        });

        for target in targets {
            // Cannot conflict: the node is fresh and duplicates were
            // rejected above.
            self.link_node(node, target, mode, version)?;
        }
        Ok(node)
    }

    /// Move one membership of `node` from `from` to `to`, evicting any
    /// element already holding the destination membership slot.
    ///
    /// The node is pinned across the compound splice so the intermediate
    /// zero-membership state never triggers disposal.
    fn move_node(
        &mut self,
        node: NodeIdx,
        from: &ChainName,
        to: &ChainTarget,
        mode: InsertMode,
    ) -> Result<()> {
        if self.nodes.get(node).is_none() {
            return Err(ChainError::NodeDisposed);
        }
        let version = self.mutation_version()?;

        self.nodes[node].pins += 1;
        let result = self.move_node_inner(node, from, to, mode, version);
        self.nodes[node].pins -= 1;
        if self.nodes[node].is_disposable() {
            self.dispose(node, version);
        }
        result
    }

    fn move_node_inner(
        &mut self,
        node: NodeIdx,
        from: &ChainName,
        to: &ChainTarget,
        mode: InsertMode,
        version: VersionSeq,
    ) -> Result<()> {
        // An existing membership in the destination chain (including a
        // same-chain reposition) is removed first.
        if self.nodes[node].live_link(&to.chain).is_some() {
            self.remove_head(node, &to.chain, version);
        }
        self.link_node(node, to, mode, version)?;
        if *from != to.chain {
            self.remove_head(node, from, version);
        }
        Ok(())
    }

    /// Pin a snapshot version and capture the chain's per-partition
    /// boundaries and counts as of it.
    fn capture(
        &mut self,
        chain: &ChainName,
        filter: Option<&[PartitionId]>,
    ) -> (VersionSeq, SmallVec<[Segment; 2]>) {
        let version = self.clock.pin_snapshot();
        let mut segments = SmallVec::new();
        for partition in &self.partitions {
            if let Some(filter) = filter
                && !filter.contains(&partition.id)
            {
                continue;
            }
            let Some(ends) = partition.endpoints(chain) else {
                continue;
            };
            let count = self.links[ends.begin].count;
            if count == 0 {
                continue;
            }
            segments.push(Segment {
                partition: partition.id,
                first: self.links[ends.begin].next.expect("begin sentinel bounded"),
                last: self.links[ends.end].prev.expect("end sentinel bounded"),
                count,
            });
        }
        tracing::debug!(%chain, %version, segments = segments.len(), "snapshot opened");
        (version, segments)
    }

    /// Capture like [`capture`](Self::capture), then detach every captured
    /// run from the live topology so the chain is immediately empty for
    /// everyone but this (and older) snapshots.
    fn capture_polling(
        &mut self,
        chain: &ChainName,
        filter: Option<&[PartitionId]>,
    ) -> Result<(VersionSeq, SmallVec<[Segment; 2]>)> {
        let (version, segments) = self.capture(chain, filter);
        if segments.is_empty() {
            return Ok((version, segments));
        }

        // The pin above forces a fresh detach version, strictly newer than
        // everything the snapshot observes.
        let detach_version = match self.mutation_version() {
            Ok(v) => v,
            Err(err) => {
                self.release_snapshot(version);
                return Err(err);
            }
        };
        debug_assert!(detach_version > version);

        for segment in &segments {
            let run = {
                let (partition, mut cx) = self.mutate(segment.partition, detach_version);
                partition
                    .detach_chain(&mut cx, chain)
                    .expect("captured segment is non-empty")
            };
            let partition_name = self.partitions[segment.partition.index()].name.clone();
            for node in run.nodes {
                self.nodes[node].heads.remove(chain);
                self.emit(&ChainEvent::Unlinked {
                    node: node.node_id(),
                    chain: chain.to_string(),
                    partition: partition_name.to_string(),
                    version: detach_version,
                });
                if self.nodes[node].is_disposable() {
                    self.dispose(node, detach_version);
                }
            }
        }
        Ok((version, segments))
    }

    /// Detach every chain of every partition and dispose the nodes whose
    /// last membership goes with them.
    fn clear_all(&mut self) -> Result<u64> {
        let version = self.mutation_version()?;
        let work: Vec<(PartitionId, PartitionName, Vec<ChainName>)> = self
            .partitions
            .iter()
            .map(|p| (p.id, p.name.clone(), p.chain_names().cloned().collect()))
            .collect();

        let mut removed = 0_u64;
        for (pid, partition_name, chains) in work {
            for chain in chains {
                let run = {
                    let (partition, mut cx) = self.mutate(pid, version);
                    partition.detach_chain(&mut cx, &chain)
                };
                let Some(run) = run else { continue };
                removed += run.links.len() as u64;
                for node in run.nodes {
                    self.nodes[node].heads.remove(&chain);
                    self.emit(&ChainEvent::Unlinked {
                        node: node.node_id(),
                        chain: chain.to_string(),
                        partition: partition_name.to_string(),
                        version,
                    });
                    if self.nodes[node].is_disposable() {
                        self.dispose(node, version);
                    }
                }
            }
        }

        if !self.clock.has_open_snapshots() {
            self.reclaim.drain(&mut self.links, None);
        }
        tracing::debug!(removed, %version, "collection cleared");
        Ok(removed)
    }

    /// Detach one snapshot and reclaim whatever only it was holding back.
    pub(crate) fn release_snapshot(&mut self, version: VersionSeq) {
        self.clock.release_snapshot(version);
        let horizon = self.clock.oldest_open();
        self.reclaim.drain(&mut self.links, horizon);
        tracing::debug!(%version, still_open = self.clock.open_snapshots(), "snapshot closed");
    }

    fn chain_len(&self, chain: &ChainName) -> u64 {
        self.partitions
            .iter()
            .map(|p| p.chain_len(&self.links, chain))
            .sum()
    }

    fn partition_filter(&self, names: &[PartitionName]) -> Vec<PartitionId> {
        names
            .iter()
            .filter_map(|name| self.partition_ids.get(name).copied())
            .collect()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

// ---------------------------------------------------------------------------
// ReclaimStats
// ---------------------------------------------------------------------------

/// Point-in-time reclamation and occupancy counters.
#[derive(Debug, Clone, Copy)]
pub struct ReclaimStats {
    /// Reclamation entries waiting on an open snapshot.
    pub pending: usize,
    /// Link records released over the collection's lifetime.
    pub released_total: u64,
    /// Link records currently allocated (live and retained).
    pub link_records: u64,
    /// Link records ever allocated, including freed ones.
    pub link_high_water: u64,
    /// Nodes currently alive (inserted, not yet disposed).
    pub live_nodes: u64,
    /// Snapshots currently open across all generations.
    pub open_snapshots: usize,
}

// ---------------------------------------------------------------------------
// MultiChainList — the public collection handle
// ---------------------------------------------------------------------------

/// A concurrently readable collection whose elements participate in any
/// number of independently ordered, named chains at once.
///
/// Cloning the handle is cheap and shares the collection. Element payloads
/// are handed out as `Arc<T>`, so snapshots keep yielding elements whose
/// nodes were disposed after the snapshot was opened.
pub struct MultiChainList<T> {
    shared: Shared<T>,
}

impl<T> Clone for MultiChainList<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for MultiChainList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for MultiChainList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiChainList").finish_non_exhaustive()
    }
}

impl<T> MultiChainList<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(RwLock::new(Inner::new())),
        }
    }

    /// Register an observer for membership events.
    ///
    /// Observers run synchronously inside the mutation critical section and
    /// must not re-enter the collection's exclusive operations.
    pub fn register_observer(&self, observer: Arc<dyn ChainObserver>) {
        self.shared.write().observers.push(observer);
    }

    /// Insert `element` and link it into every target in one atomic step.
    ///
    /// An empty target slice creates an unlinked node; it stays alive until
    /// it gains and then loses a membership. Duplicate chains among the
    /// targets fail the whole insert up front.
    pub fn insert(
        &self,
        element: T,
        targets: &[ChainTarget],
        mode: InsertMode,
    ) -> Result<NodeHandle<T>> {
        let mut inner = self.shared.write();
        let node = inner.insert_one(Arc::new(element), targets, mode)?;
        Ok(NodeHandle::from_parts(Arc::clone(&self.shared), node))
    }

    /// Insert a batch of elements under one critical section, preserving
    /// iteration order for `Append` (and reversing it for `Prepend`).
    pub fn insert_all<I>(
        &self,
        elements: I,
        targets: &[ChainTarget],
        mode: InsertMode,
    ) -> Result<Vec<NodeHandle<T>>>
    where
        I: IntoIterator<Item = T>,
    {
        let mut inner = self.shared.write();
        let mut handles = Vec::new();
        for element in elements {
            let node = inner.insert_one(Arc::new(element), targets, mode)?;
            handles.push(NodeHandle::from_parts(Arc::clone(&self.shared), node));
        }
        Ok(handles)
    }

    /// Open a consistent view of `chain` across all partitions.
    pub fn snapshot(&self, chain: impl Into<ChainName>) -> ChainSnapshot<T> {
        let chain = chain.into();
        let (version, segments) = self.shared.write().capture(&chain, None);
        self.make_snapshot(chain, version, segments)
    }

    /// Open a consistent view of `chain` restricted to the named
    /// partitions. Unknown partition names contribute nothing.
    pub fn snapshot_filtered(
        &self,
        chain: impl Into<ChainName>,
        partitions: &[PartitionName],
    ) -> ChainSnapshot<T> {
        let chain = chain.into();
        let (version, segments) = {
            let mut inner = self.shared.write();
            let filter = inner.partition_filter(partitions);
            inner.capture(&chain, Some(&filter))
        };
        self.make_snapshot(chain, version, segments)
    }

    /// Open a snapshot of `chain` and atomically detach its contents from
    /// the live collection: a consume-all-pending handoff. New readers and
    /// writers see an empty chain immediately; the returned snapshot is the
    /// sole owner of the detached run, which is reclaimed when snapshots at
    /// or before its version close.
    pub fn polling_snapshot(&self, chain: impl Into<ChainName>) -> Result<ChainSnapshot<T>> {
        let chain = chain.into();
        let (version, segments) = self.shared.write().capture_polling(&chain, None)?;
        Ok(self.make_snapshot(chain, version, segments))
    }

    /// [`polling_snapshot`](Self::polling_snapshot) restricted to the named
    /// partitions; unnamed partitions keep their contents.
    pub fn polling_snapshot_filtered(
        &self,
        chain: impl Into<ChainName>,
        partitions: &[PartitionName],
    ) -> Result<ChainSnapshot<T>> {
        let chain = chain.into();
        let (version, segments) = {
            let mut inner = self.shared.write();
            let filter = inner.partition_filter(partitions);
            inner.capture_polling(&chain, Some(&filter))?
        };
        Ok(self.make_snapshot(chain, version, segments))
    }

    fn make_snapshot(
        &self,
        chain: ChainName,
        version: VersionSeq,
        segments: SmallVec<[Segment; 2]>,
    ) -> ChainSnapshot<T> {
        let total = segments.iter().map(|s| s.count).sum();
        ChainSnapshot {
            shared: Arc::clone(&self.shared),
            version,
            chain,
            segments,
            total,
            closed: AtomicBool::new(false),
        }
    }

    /// Element count of `chain` across all partitions, O(partitions).
    #[must_use]
    pub fn chain_len(&self, chain: impl Into<ChainName>) -> u64 {
        self.shared.read().chain_len(&chain.into())
    }

    /// Nodes currently alive (inserted and not yet disposed).
    #[must_use]
    pub fn live_nodes(&self) -> u64 {
        self.shared.read().live_nodes
    }

    /// Snapshots currently open.
    #[must_use]
    pub fn open_snapshots(&self) -> usize {
        self.shared.read().clock.open_snapshots()
    }

    /// Remove every element from every chain, disposing nodes whose last
    /// membership goes. Open snapshots keep their views; their records are
    /// reclaimed as they close. Returns the number of links removed.
    pub fn clear(&self) -> Result<u64> {
        self.shared.write().clear_all()
    }

    /// Reclamation and occupancy counters.
    #[must_use]
    pub fn reclaim_stats(&self) -> ReclaimStats {
        let inner = self.shared.read();
        ReclaimStats {
            pending: inner.reclaim.pending(),
            released_total: inner.reclaim.released_total(),
            link_records: inner.links.len(),
            link_high_water: inner.links.high_water(),
            live_nodes: inner.live_nodes,
            open_snapshots: inner.clock.open_snapshots(),
        }
    }

    /// Run `f` under the collection's exclusive lock.
    ///
    /// Useful for compound read-modify-write steps that must not interleave
    /// with other writers. Inside the closure, use the [`ExclusiveAccess`]
    /// methods only: calling [`NodeHandle`] or snapshot methods from within
    /// would re-enter the non-reentrant lock and deadlock.
    pub fn compute_exclusive<R>(&self, f: impl FnOnce(&mut ExclusiveAccess<'_, T>) -> R) -> R {
        let mut inner = self.shared.write();
        let mut access = ExclusiveAccess {
            inner: &mut *inner,
            shared: &self.shared,
        };
        f(&mut access)
    }
}

// ---------------------------------------------------------------------------
// NodeHandle
// ---------------------------------------------------------------------------

/// Caller-facing handle to one inserted element.
///
/// Handles are cheap to clone and stay valid after the node is disposed;
/// operations on a disposed handle return [`ChainError::NodeDisposed`]
/// (arena generations guarantee a recycled slot never aliases).
pub struct NodeHandle<T> {
    shared: Shared<T>,
    node: NodeIdx,
    id: NodeId,
}

impl<T> Clone for NodeHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            node: self.node,
            id: self.id,
        }
    }
}

impl<T> std::fmt::Debug for NodeHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandle").field("id", &self.id).finish()
    }
}

impl<T> NodeHandle<T> {
    pub(crate) fn from_parts(shared: Shared<T>, node: NodeIdx) -> Self {
        let id = node.node_id();
        Self { shared, node, id }
    }

    /// Stable identity of this node; never reused across disposals.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The element, or `None` once the node has been disposed.
    #[must_use]
    pub fn element(&self) -> Option<Arc<T>> {
        let inner = self.shared.read();
        inner.nodes.get(self.node).and_then(|n| n.element.clone())
    }

    /// Whether the node's membership count reached zero and it was freed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.shared.read().nodes.get(self.node).is_none()
    }

    /// The node's current `(chain, partition)` assignments, sorted by
    /// chain name. Empty once disposed.
    #[must_use]
    pub fn assignments(&self) -> Vec<ChainTarget> {
        let inner = self.shared.read();
        let Some(node) = inner.nodes.get(self.node) else {
            return Vec::new();
        };
        let mut out: Vec<ChainTarget> = node
            .heads
            .iter()
            .map(|(chain, &link)| ChainTarget {
                chain: chain.clone(),
                partition: inner.partitions[inner.links[link].partition.index()]
                    .name
                    .clone(),
            })
            .collect();
        out.sort_by(|a, b| a.chain.cmp(&b.chain));
        out
    }

    /// Add a membership in the target chain.
    pub fn link_to(&self, target: &ChainTarget, mode: InsertMode) -> Result<()> {
        let mut inner = self.shared.write();
        if inner.nodes.get(self.node).is_none() {
            return Err(ChainError::NodeDisposed);
        }
        let version = inner.mutation_version()?;
        inner.link_node(self.node, target, mode, version)
    }

    /// Remove the membership in `chain`. Returns whether a link was
    /// removed; removing the last membership disposes the node.
    pub fn unlink_from(&self, chain: impl Into<ChainName>) -> Result<bool> {
        let chain = chain.into();
        let mut inner = self.shared.write();
        if inner.nodes.get(self.node).is_none() {
            return Err(ChainError::NodeDisposed);
        }
        let version = inner.mutation_version()?;
        Ok(inner.remove_head(self.node, &chain, version))
    }

    /// Atomically move the membership in `from` to the target chain,
    /// evicting any existing membership in the destination chain. With
    /// `from == to.chain` this repositions the node within its chain.
    pub fn move_to(
        &self,
        from: impl Into<ChainName>,
        to: &ChainTarget,
        mode: InsertMode,
    ) -> Result<()> {
        let from = from.into();
        let mut inner = self.shared.write();
        inner.move_node(self.node, &from, to, mode)
    }
}

// ---------------------------------------------------------------------------
// ExclusiveAccess
// ---------------------------------------------------------------------------

/// Mutation surface handed to [`MultiChainList::compute_exclusive`]
/// closures: the same operations as the public handles, already inside the
/// exclusive critical section.
pub struct ExclusiveAccess<'a, T> {
    inner: &'a mut Inner<T>,
    shared: &'a Shared<T>,
}

impl<T> ExclusiveAccess<'_, T> {
    pub fn insert(
        &mut self,
        element: T,
        targets: &[ChainTarget],
        mode: InsertMode,
    ) -> Result<NodeHandle<T>> {
        let node = self.inner.insert_one(Arc::new(element), targets, mode)?;
        Ok(NodeHandle::from_parts(Arc::clone(self.shared), node))
    }

    pub fn link(
        &mut self,
        handle: &NodeHandle<T>,
        target: &ChainTarget,
        mode: InsertMode,
    ) -> Result<()> {
        if self.inner.nodes.get(handle.node).is_none() {
            return Err(ChainError::NodeDisposed);
        }
        let version = self.inner.mutation_version()?;
        self.inner.link_node(handle.node, target, mode, version)
    }

    pub fn unlink(
        &mut self,
        handle: &NodeHandle<T>,
        chain: impl Into<ChainName>,
    ) -> Result<bool> {
        if self.inner.nodes.get(handle.node).is_none() {
            return Err(ChainError::NodeDisposed);
        }
        let version = self.inner.mutation_version()?;
        Ok(self.inner.remove_head(handle.node, &chain.into(), version))
    }

    pub fn move_node(
        &mut self,
        handle: &NodeHandle<T>,
        from: impl Into<ChainName>,
        to: &ChainTarget,
        mode: InsertMode,
    ) -> Result<()> {
        self.inner.move_node(handle.node, &from.into(), to, mode)
    }

    #[must_use]
    pub fn chain_len(&self, chain: impl Into<ChainName>) -> u64 {
        self.inner.chain_len(&chain.into())
    }

    #[must_use]
    pub fn live_nodes(&self) -> u64 {
        self.inner.live_nodes
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chainlist_observability::MetricsObserver;
    use std::sync::atomic::Ordering;

    fn collect(snapshot: &ChainSnapshot<String>) -> Vec<String> {
        snapshot.iter().map(|e| e.as_ref().clone()).collect()
    }

    fn default_target() -> Vec<ChainTarget> {
        vec![ChainTarget::default_target()]
    }

    #[test]
    fn insert_and_iterate_default_chain() {
        let list = MultiChainList::new();
        for name in ["1", "2", "3"] {
            list.insert(name.to_owned(), &default_target(), InsertMode::Append)
                .unwrap();
        }
        let snap = list.snapshot(ChainName::default());
        assert_eq!(collect(&snap), vec!["1", "2", "3"]);
        assert_eq!(snap.size(), 3);
        assert_eq!(list.live_nodes(), 3);
    }

    #[test]
    fn prepend_reverses_order() {
        let list = MultiChainList::new();
        for name in ["1", "2", "3"] {
            list.insert(name.to_owned(), &default_target(), InsertMode::Prepend)
                .unwrap();
        }
        assert_eq!(
            collect(&list.snapshot(ChainName::default())),
            vec!["3", "2", "1"]
        );
    }

    #[test]
    fn multi_target_insert_joins_every_chain() {
        let list = MultiChainList::new();
        let targets = vec![
            ChainTarget::new("lru", ""),
            ChainTarget::new("by-size", ""),
        ];
        let handle = list
            .insert("a".to_owned(), &targets, InsertMode::Append)
            .unwrap();

        let assignments = handle.assignments();
        assert_eq!(assignments.len(), 2);
        assert_eq!(list.chain_len("lru"), 1);
        assert_eq!(list.chain_len("by-size"), 1);
    }

    #[test]
    fn duplicate_chain_in_targets_fails_before_node_creation() {
        let list: MultiChainList<String> = MultiChainList::new();
        let targets = vec![ChainTarget::new("lru", ""), ChainTarget::new("lru", "")];
        let err = list
            .insert("a".to_owned(), &targets, InsertMode::Append)
            .unwrap_err();
        assert!(matches!(err, ChainError::ChainConflict { .. }));
        assert_eq!(list.live_nodes(), 0, "failed insert leaves no node");
    }

    #[test]
    fn relink_into_occupied_chain_conflicts() {
        let list = MultiChainList::new();
        let handle = list
            .insert("a".to_owned(), &default_target(), InsertMode::Append)
            .unwrap();
        let err = handle
            .link_to(&ChainTarget::default_target(), InsertMode::Append)
            .unwrap_err();
        assert!(matches!(err, ChainError::ChainConflict { .. }));
    }

    #[test]
    fn cross_partition_relink_is_a_partition_conflict() {
        let list = MultiChainList::new();
        let handle = list
            .insert(
                "a".to_owned(),
                &[ChainTarget::new("lru", "hot")],
                InsertMode::Append,
            )
            .unwrap();
        let err = handle
            .link_to(&ChainTarget::new("lru", "cold"), InsertMode::Append)
            .unwrap_err();
        assert!(matches!(err, ChainError::PartitionConflict { .. }));
    }

    #[test]
    fn last_unlink_disposes_the_node() {
        let list = MultiChainList::new();
        let handle = list
            .insert("a".to_owned(), &default_target(), InsertMode::Append)
            .unwrap();
        assert!(handle.unlink_from(ChainName::default()).unwrap());
        assert!(handle.is_disposed());
        assert!(handle.element().is_none());
        assert_eq!(list.live_nodes(), 0);

        // Operations on a disposed handle fail cleanly.
        assert!(matches!(
            handle.unlink_from(ChainName::default()),
            Err(ChainError::NodeDisposed)
        ));
    }

    #[test]
    fn unlink_of_non_member_chain_is_false() {
        let list = MultiChainList::new();
        let handle = list
            .insert("a".to_owned(), &default_target(), InsertMode::Append)
            .unwrap();
        assert!(!handle.unlink_from("other").unwrap());
        assert!(!handle.is_disposed());
    }

    #[test]
    fn membership_in_one_chain_keeps_node_alive() {
        let list = MultiChainList::new();
        let targets = vec![ChainTarget::new("a", ""), ChainTarget::new("b", "")];
        let handle = list
            .insert("x".to_owned(), &targets, InsertMode::Append)
            .unwrap();

        handle.unlink_from("a").unwrap();
        assert!(!handle.is_disposed());
        handle.unlink_from("b").unwrap();
        assert!(handle.is_disposed());
    }

    #[test]
    fn move_between_chains_survives_zero_membership_window() {
        let list = MultiChainList::new();
        let handle = list
            .insert(
                "a".to_owned(),
                &[ChainTarget::new("pending", "")],
                InsertMode::Append,
            )
            .unwrap();

        handle
            .move_to("pending", &ChainTarget::new("active", ""), InsertMode::Append)
            .unwrap();
        assert!(!handle.is_disposed(), "move must not dispose mid-flight");
        assert_eq!(list.chain_len("pending"), 0);
        assert_eq!(list.chain_len("active"), 1);
    }

    #[test]
    fn same_chain_move_repositions() {
        let list = MultiChainList::new();
        let handles: Vec<_> = ["1", "2", "3"]
            .into_iter()
            .map(|name| {
                list.insert(name.to_owned(), &default_target(), InsertMode::Append)
                    .unwrap()
            })
            .collect();

        // Move "1" to the back.
        handles[0]
            .move_to(
                ChainName::default(),
                &ChainTarget::default_target(),
                InsertMode::Append,
            )
            .unwrap();
        assert_eq!(
            collect(&list.snapshot(ChainName::default())),
            vec!["2", "3", "1"]
        );
    }

    #[test]
    fn snapshot_spans_partitions_in_creation_order() {
        let list = MultiChainList::new();
        list.insert(
            "1".to_owned(),
            &[ChainTarget::new("", "p1")],
            InsertMode::Append,
        )
        .unwrap();
        list.insert(
            "5".to_owned(),
            &[ChainTarget::new("", "p2")],
            InsertMode::Append,
        )
        .unwrap();
        list.insert(
            "3".to_owned(),
            &[ChainTarget::new("", "p1")],
            InsertMode::Append,
        )
        .unwrap();
        list.insert(
            "7".to_owned(),
            &[ChainTarget::new("", "p2")],
            InsertMode::Append,
        )
        .unwrap();

        let snap = list.snapshot(ChainName::default());
        assert_eq!(collect(&snap), vec!["1", "3", "5", "7"]);

        let filtered =
            list.snapshot_filtered(ChainName::default(), &[PartitionName::new("p2")]);
        assert_eq!(collect(&filtered), vec!["5", "7"]);
    }

    #[test]
    fn clear_empties_every_chain() {
        let list = MultiChainList::new();
        let targets = vec![ChainTarget::new("a", ""), ChainTarget::new("b", "")];
        for name in ["1", "2"] {
            list.insert(name.to_owned(), &targets, InsertMode::Append)
                .unwrap();
        }

        let removed = list.clear().unwrap();
        assert_eq!(removed, 4, "two elements in two chains each");
        assert_eq!(list.chain_len("a"), 0);
        assert_eq!(list.chain_len("b"), 0);
        assert_eq!(list.live_nodes(), 0);
        assert_eq!(
            list.reclaim_stats().pending,
            0,
            "no snapshots open: cleared records reclaimed immediately"
        );
    }

    #[test]
    fn compute_exclusive_batches_under_one_lock() {
        let list = MultiChainList::new();
        let moved = list.compute_exclusive(|access| {
            let handle = access
                .insert("a".to_owned(), &[ChainTarget::new("in", "")], InsertMode::Append)
                .unwrap();
            access
                .move_node(&handle, "in", &ChainTarget::new("out", ""), InsertMode::Append)
                .unwrap();
            access.chain_len("out")
        });
        assert_eq!(moved, 1);
    }

    #[test]
    fn observers_see_the_membership_lifecycle() {
        let list = MultiChainList::new();
        let observer = Arc::new(MetricsObserver::new(16));
        list.register_observer(observer.clone());

        let handle = list
            .insert("a".to_owned(), &default_target(), InsertMode::Append)
            .unwrap();
        handle.unlink_from(ChainName::default()).unwrap();

        let metrics = observer.metrics();
        assert_eq!(metrics.nodes_created.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.links_installed.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.links_removed.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.nodes_disposed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn panicking_observer_does_not_poison_mutations() {
        struct Exploding;
        impl ChainObserver for Exploding {
            fn on_event(&self, _event: &ChainEvent) {
                panic!("observer bug");
            }
        }

        let list = MultiChainList::new();
        list.register_observer(Arc::new(Exploding));
        let handle = list
            .insert("a".to_owned(), &default_target(), InsertMode::Append)
            .unwrap();
        assert!(!handle.is_disposed());
        assert_eq!(list.chain_len(ChainName::default()), 1);
    }

    #[test]
    fn zero_target_insert_creates_an_unlinked_node() {
        let list = MultiChainList::new();
        let handle = list
            .insert("a".to_owned(), &[], InsertMode::Append)
            .unwrap();
        assert!(!handle.is_disposed());
        assert!(handle.assignments().is_empty());

        // Gaining and losing a membership then disposes it.
        handle
            .link_to(&ChainTarget::default_target(), InsertMode::Append)
            .unwrap();
        handle.unlink_from(ChainName::default()).unwrap();
        assert!(handle.is_disposed());
    }

    #[test]
    fn reclaim_stats_track_retained_records() {
        let list = MultiChainList::new();
        let handles: Vec<_> = ["1", "2"]
            .into_iter()
            .map(|name| {
                list.insert(name.to_owned(), &default_target(), InsertMode::Append)
                    .unwrap()
            })
            .collect();

        let snap = list.snapshot(ChainName::default());
        handles[0].unlink_from(ChainName::default()).unwrap();
        assert!(
            list.reclaim_stats().pending > 0,
            "removal under a snapshot defers reclamation"
        );

        snap.close();
        assert_eq!(list.reclaim_stats().pending, 0);
        assert!(list.reclaim_stats().released_total > 0);
    }
}
