//! Error taxonomy for chainlist operations.
//!
//! Structured variants for the caller-visible failure classes; invariant
//! breaks inside the engine (double-free, severed version chains) panic
//! instead of surfacing here, since they signal bugs rather than misuse.

use thiserror::Error;

use chainlist_types::VersionSeq;

/// Primary error type for chainlist operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// A node was inserted a second time into a chain it already occupies.
    ///
    /// Never retried: a node holds at most one position per chain name.
    #[error("chain conflict: node already occupies chain '{chain}' in partition '{partition}'")]
    ChainConflict { chain: String, partition: String },

    /// A chain membership was re-targeted at a different partition than the
    /// node's existing live link for that chain. Rejected before any
    /// structural change; only an explicit move may cross partitions.
    #[error(
        "partition conflict: chain '{chain}' membership is bound to partition \
         '{existing}', cannot relink into '{requested}'"
    )]
    PartitionConflict {
        chain: String,
        existing: String,
        requested: String,
    },

    /// Operation on a node whose membership count already reached zero.
    #[error("node has been disposed")]
    NodeDisposed,

    /// Operation on a snapshot after its explicit close.
    #[error("snapshot at {version} is closed")]
    SnapshotClosed { version: VersionSeq },

    /// The version counter reached its maximum representable value.
    ///
    /// Fatal and unrecoverable: the collection is poisoned and rejects all
    /// further mutations.
    #[error("version sequence exhausted at {at}")]
    SequenceExhausted { at: VersionSeq },

    /// Version resolution walked off the end of a temporal chain without
    /// reaching the snapshot's pinned version. Indicates a
    /// reclamation-ordering bug, not caller misuse.
    #[error("consistency violation resolving version {pinned}: {detail}")]
    ConsistencyViolation {
        pinned: VersionSeq,
        detail: String,
    },
}

/// Convenience alias used across the chainlist crates.
pub type Result<T> = std::result::Result<T, ChainError>;

impl ChainError {
    /// Whether this error poisons the collection (no further use permitted).
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::SequenceExhausted { .. } | Self::ConsistencyViolation { .. }
        )
    }
}
