//! Domain vocabulary for the chainlist versioned multi-ordering collection.
//!
//! Small, dependency-light newtypes shared by every chainlist crate: version
//! sequence numbers, chain/partition names, insertion targets, and the stable
//! node identity handed to observers. The runtime machinery (arenas, links,
//! partitions) lives in the `chainlist` crate and builds on top of these.

use std::fmt;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// VersionSeq
// ---------------------------------------------------------------------------

/// Monotonically increasing mutation sequence number ("version clock").
///
/// Visibility check during snapshot resolution is a single integer
/// comparison: `link.created <= snapshot.version`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct VersionSeq(u64);

impl VersionSeq {
    pub const ZERO: Self = Self(0);

    /// First version issued by a fresh clock.
    pub const FIRST: Self = Self(1);

    /// Largest representable sequence. Reaching it is a fatal exhaustion.
    pub const MAX: Self = Self(u64::MAX);

    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The successor sequence, or `None` when the counter is exhausted.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self.0.checked_add(1) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }
}

impl fmt::Display for VersionSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v#{}", self.get())
    }
}

// ---------------------------------------------------------------------------
// ChainName / PartitionName
// ---------------------------------------------------------------------------

/// Name of an independently ordered sequence within the collection.
///
/// Cheap to clone (shared backing storage); the empty name is the default
/// chain.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChainName(Arc<str>);

impl ChainName {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ChainName {
    fn default() -> Self {
        Self(Arc::from(""))
    }
}

impl From<&str> for ChainName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for ChainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name of an ordered segment of the collection.
///
/// Partitions are created lazily on first use and never removed; chains span
/// partitions in partition creation order. The empty name is the default
/// partition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionName(Arc<str>);

impl PartitionName {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for PartitionName {
    fn default() -> Self {
        Self(Arc::from(""))
    }
}

impl From<&str> for PartitionName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for PartitionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PartitionId
// ---------------------------------------------------------------------------

/// Dense index of a partition in its collection's creation-ordered registry.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct PartitionId(u32);

impl PartitionId {
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p#{}", self.get())
    }
}

// ---------------------------------------------------------------------------
// ChainTarget / InsertMode
// ---------------------------------------------------------------------------

/// One `(chain, partition)` assignment requested for an insertion.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChainTarget {
    pub chain: ChainName,
    pub partition: PartitionName,
}

impl ChainTarget {
    pub fn new(chain: impl Into<ChainName>, partition: impl Into<PartitionName>) -> Self {
        Self {
            chain: chain.into(),
            partition: partition.into(),
        }
    }

    /// Target the default chain of the default partition.
    #[must_use]
    pub fn default_target() -> Self {
        Self {
            chain: ChainName::default(),
            partition: PartitionName::default(),
        }
    }
}

impl From<ChainName> for ChainTarget {
    fn from(chain: ChainName) -> Self {
        Self {
            chain,
            partition: PartitionName::default(),
        }
    }
}

/// Which end of a chain an insertion splices into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum InsertMode {
    /// Splice before the end sentinel.
    Append,
    /// Splice after the begin sentinel.
    Prepend,
}

// ---------------------------------------------------------------------------
// NodeId
// ---------------------------------------------------------------------------

/// Stable identity of an inserted element's container.
///
/// Packs the node's arena slot and generation; a reused slot yields a
/// different `NodeId`, so identities never alias across disposals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(transparent)]
pub struct NodeId(u64);

impl NodeId {
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n#{:x}", self.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_seq_ordering_and_next() {
        let v1 = VersionSeq::new(1);
        let v2 = v1.next().expect("no overflow at 1");
        assert!(v2 > v1);
        assert_eq!(v2.get(), 2);
    }

    #[test]
    fn version_seq_next_exhausts_at_max() {
        assert_eq!(VersionSeq::MAX.next(), None);
    }

    #[test]
    fn chain_name_default_is_empty() {
        assert_eq!(ChainName::default().as_str(), "");
        assert_eq!(ChainName::default(), ChainName::new(""));
    }

    #[test]
    fn chain_names_compare_by_content() {
        assert_eq!(ChainName::new("lru"), ChainName::from("lru"));
        assert_ne!(ChainName::new("lru"), ChainName::new("mru"));
    }

    #[test]
    fn target_from_chain_uses_default_partition() {
        let t = ChainTarget::from(ChainName::new("lru"));
        assert_eq!(t.partition, PartitionName::default());
    }

    #[test]
    fn display_formats() {
        assert_eq!(VersionSeq::new(7).to_string(), "v#7");
        assert_eq!(PartitionId::new(3).to_string(), "p#3");
        assert_eq!(NodeId::new(255).to_string(), "n#ff");
    }
}
