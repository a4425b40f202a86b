//! The version clock: modification versions, snapshot pinning, and the
//! reclamation horizon.
//!
//! The clock keeps one *modification version* (stamped on new link records)
//! and at most one *pinned snapshot version* (the version new snapshots
//! attach to). A new modification version is minted only when the active
//! one has been caught by a pinned snapshot; mutations performed with zero
//! open snapshots coalesce into the still-current modification version.

use std::collections::BTreeMap;

use chainlist_error::{ChainError, Result};
use chainlist_types::VersionSeq;

/// Issues monotonically increasing versions and tracks which of them are
/// pinned by open snapshots.
#[derive(Debug)]
pub(crate) struct VersionClock {
    /// The version stamped on link records created in the current critical
    /// section. Invariant: `modification >= pinned` whenever a pin exists.
    modification: VersionSeq,
    /// The version new snapshots attach to, if any snapshot generation is
    /// currently active.
    pinned: Option<VersionSeq>,
    /// Open-snapshot reference counts, keyed by pinned version. Older
    /// generations stay here until their last snapshot closes.
    open: BTreeMap<VersionSeq, usize>,
}

impl VersionClock {
    pub fn new() -> Self {
        Self {
            modification: VersionSeq::FIRST,
            pinned: None,
            open: BTreeMap::new(),
        }
    }

    /// Start a clock at an arbitrary sequence, for exhaustion tests.
    #[cfg(test)]
    pub fn starting_at(seq: VersionSeq) -> Self {
        Self {
            modification: seq,
            pinned: None,
            open: BTreeMap::new(),
        }
    }

    /// The version to stamp new link records with inside the active
    /// exclusive critical section.
    ///
    /// Mints a successor only when a pinned snapshot has caught up to the
    /// current modification version; otherwise writes keep sharing it.
    pub fn modification_version(&mut self) -> Result<VersionSeq> {
        if let Some(pinned) = self.pinned
            && self.modification <= pinned
        {
            self.modification = self
                .modification
                .next()
                .ok_or(ChainError::SequenceExhausted {
                    at: self.modification,
                })?;
            tracing::debug!(version = %self.modification, "minted modification version");
        }
        Ok(self.modification)
    }

    /// Promote the current modification version to the pinned snapshot
    /// version if needed, and attach one snapshot to it.
    pub fn pin_snapshot(&mut self) -> VersionSeq {
        let pinned = match self.pinned {
            Some(p) if p >= self.modification => p,
            _ => {
                self.pinned = Some(self.modification);
                self.modification
            }
        };
        *self.open.entry(pinned).or_insert(0) += 1;
        pinned
    }

    /// Detach one snapshot from `version`. Clears the pin when the pinned
    /// generation's last snapshot closes.
    pub fn release_snapshot(&mut self, version: VersionSeq) {
        let Some(count) = self.open.get_mut(&version) else {
            debug_assert!(false, "release of version {version} with no open snapshots");
            return;
        };
        *count -= 1;
        if *count == 0 {
            self.open.remove(&version);
            if self.pinned == Some(version) {
                self.pinned = None;
            }
        }
    }

    /// The oldest version still pinned by an open snapshot. Records made
    /// obsolete strictly before this sequence are reclaimable; `None` means
    /// everything queued is reclaimable.
    #[must_use]
    pub fn oldest_open(&self) -> Option<VersionSeq> {
        self.open.keys().next().copied()
    }

    /// Whether any snapshot is currently open.
    #[must_use]
    pub fn has_open_snapshots(&self) -> bool {
        !self.open.is_empty()
    }

    /// The current modification version without minting.
    #[must_use]
    pub fn current(&self) -> VersionSeq {
        self.modification
    }

    /// Open snapshots across all generations.
    #[must_use]
    pub fn open_snapshots(&self) -> usize {
        self.open.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutations_coalesce_without_snapshots() {
        let mut clock = VersionClock::new();
        let v1 = clock.modification_version().unwrap();
        let v2 = clock.modification_version().unwrap();
        assert_eq!(v1, v2, "no snapshot open: writes share one version");
    }

    #[test]
    fn snapshot_pin_forces_next_mutation_to_mint() {
        let mut clock = VersionClock::new();
        let w1 = clock.modification_version().unwrap();
        let s1 = clock.pin_snapshot();
        assert_eq!(w1, s1, "snapshot pins the last mutation version");

        let w2 = clock.modification_version().unwrap();
        assert!(w2 > s1, "mutation after a pin mints a fresh version");
        let w3 = clock.modification_version().unwrap();
        assert_eq!(w2, w3, "further mutations reuse the minted version");
    }

    #[test]
    fn snapshots_without_intervening_mutation_share_a_version() {
        let mut clock = VersionClock::new();
        let s1 = clock.pin_snapshot();
        let s2 = clock.pin_snapshot();
        assert_eq!(s1, s2);
        assert_eq!(clock.open_snapshots(), 2);
    }

    #[test]
    fn mutation_between_snapshots_advances_the_pin() {
        let mut clock = VersionClock::new();
        let s1 = clock.pin_snapshot();
        clock.modification_version().unwrap();
        let s2 = clock.pin_snapshot();
        assert!(s2 > s1);
        assert_eq!(clock.open_snapshots(), 2, "both generations stay open");
        assert_eq!(clock.oldest_open(), Some(s1));
    }

    #[test]
    fn release_clears_pin_and_horizon_in_order() {
        let mut clock = VersionClock::new();
        let s1 = clock.pin_snapshot();
        clock.modification_version().unwrap();
        let s2 = clock.pin_snapshot();

        clock.release_snapshot(s2);
        assert_eq!(clock.oldest_open(), Some(s1));
        assert!(clock.has_open_snapshots());

        clock.release_snapshot(s1);
        assert_eq!(clock.oldest_open(), None);
        assert!(!clock.has_open_snapshots());

        // Pin cleared: the next mutation coalesces again.
        let w = clock.modification_version().unwrap();
        assert_eq!(w, clock.modification_version().unwrap());
    }

    #[test]
    fn mutation_with_closed_snapshots_reuses_version() {
        let mut clock = VersionClock::new();
        let s1 = clock.pin_snapshot();
        clock.release_snapshot(s1);
        let w = clock.modification_version().unwrap();
        assert_eq!(w, s1, "pin cleared: mutation coalesces into the old version");
    }

    #[test]
    fn exhaustion_is_fatal() {
        let mut clock = VersionClock::starting_at(VersionSeq::MAX);
        clock.pin_snapshot();
        let err = clock.modification_version().unwrap_err();
        assert!(matches!(err, ChainError::SequenceExhausted { .. }));
        assert!(err.is_fatal());
    }
}
