//! A concurrently readable, versioned multi-ordering collection.
//!
//! Elements inserted once participate in any number of independently
//! ordered, named *chains*, each optionally split across named *partitions*
//! (ordered segments concatenated in partition creation order). Readers
//! open [`ChainSnapshot`]s: consistent point-in-time views that stay valid
//! under concurrent mutation. Internally every position is a versioned link
//! record; splices fork superseded records on demand instead of rewriting
//! them, and records are reclaimed once no open snapshot can observe them.
//!
//! ```
//! use chainlist::{ChainTarget, InsertMode, MultiChainList};
//!
//! let list = MultiChainList::new();
//! let targets = [ChainTarget::new("lru", ""), ChainTarget::new("by-size", "")];
//! let node = list.insert("page-1".to_owned(), &targets, InsertMode::Append)?;
//!
//! let snap = list.snapshot("lru");
//! node.unlink_from("lru")?;
//! assert_eq!(snap.size(), 1, "open snapshots keep their view");
//! # Ok::<(), chainlist::ChainError>(())
//! ```

mod arena;
mod link;
mod list;
mod node;
mod partition;
mod reclaim;
mod snapshot;
mod version;

pub use list::{ExclusiveAccess, MultiChainList, NodeHandle, ReclaimStats};
pub use snapshot::{ChainSnapshot, SnapshotIter};

pub use chainlist_error::{ChainError, Result};
pub use chainlist_observability::{
    ChainEvent, ChainMetrics, ChainMetricsSnapshot, ChainObserver, EventRingBuffer,
    MetricsObserver, NoOpObserver,
};
pub use chainlist_types::{
    ChainName, ChainTarget, InsertMode, NodeId, PartitionId, PartitionName, VersionSeq,
};
