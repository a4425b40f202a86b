//! Generation-checked slot arenas for link and node records.
//!
//! All version-chain and topology pointers in the engine are arena handles,
//! never references. A handle embeds the slot's generation at allocation
//! time; freeing a slot bumps its generation, so a retained handle to a
//! released record resolves to `None` instead of aliasing whatever reuses
//! the slot. Ownership of a record moves into the reclamation queue as a
//! handle and back out through [`Arena::free`].

use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

use chainlist_types::NodeId;

/// Records per arena chunk.
const ARENA_CHUNK: usize = 4096;

// ---------------------------------------------------------------------------
// RawIdx and the typed handle wrappers
// ---------------------------------------------------------------------------

/// Untyped arena handle: a global slot number plus the slot generation
/// observed at allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct RawIdx {
    pub slot: u32,
    pub generation: u32,
}

/// Typed handle into an [`Arena`].
pub(crate) trait ArenaIdx: Copy + std::fmt::Debug {
    fn from_raw(raw: RawIdx) -> Self;
    fn raw(self) -> RawIdx;
}

/// Handle to a link record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct LinkIdx(RawIdx);

impl ArenaIdx for LinkIdx {
    #[inline]
    fn from_raw(raw: RawIdx) -> Self {
        Self(raw)
    }

    #[inline]
    fn raw(self) -> RawIdx {
        self.0
    }
}

/// Handle to a node record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeIdx(RawIdx);

impl ArenaIdx for NodeIdx {
    #[inline]
    fn from_raw(raw: RawIdx) -> Self {
        Self(raw)
    }

    #[inline]
    fn raw(self) -> RawIdx {
        self.0
    }
}

impl NodeIdx {
    /// The stable public identity for this node: slot in the high half,
    /// generation in the low half.
    #[inline]
    pub fn node_id(self) -> NodeId {
        let raw = self.raw();
        NodeId::new((u64::from(raw.slot) << 32) | u64::from(raw.generation))
    }
}

// ---------------------------------------------------------------------------
// Arena
// ---------------------------------------------------------------------------

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Chunked slot arena handing out generation-checked handles.
///
/// Single-writer under the collection's exclusive lock; shared readers only
/// call [`Arena::get`]. Freed slots are recycled through a free list with a
/// bumped generation.
pub(crate) struct Arena<T, I: ArenaIdx> {
    chunks: Vec<Vec<Slot<T>>>,
    free_list: Vec<u32>,
    high_water: u64,
    occupied: u64,
    _marker: PhantomData<I>,
}

impl<T, I: ArenaIdx> Arena<T, I> {
    pub fn new() -> Self {
        Self {
            chunks: vec![Vec::with_capacity(ARENA_CHUNK)],
            free_list: Vec::new(),
            high_water: 0,
            occupied: 0,
            _marker: PhantomData,
        }
    }

    fn slot(&self, slot: u32) -> Option<&Slot<T>> {
        let slot = slot as usize;
        self.chunks.get(slot / ARENA_CHUNK)?.get(slot % ARENA_CHUNK)
    }

    fn slot_mut(&mut self, slot: u32) -> Option<&mut Slot<T>> {
        let slot = slot as usize;
        self.chunks
            .get_mut(slot / ARENA_CHUNK)?
            .get_mut(slot % ARENA_CHUNK)
    }

    /// Allocate a slot for `value`, returning its handle.
    pub fn alloc(&mut self, value: T) -> I {
        self.occupied += 1;
        if let Some(slot) = self.free_list.pop() {
            let entry = self.slot_mut(slot).expect("free list entry exists");
            debug_assert!(entry.value.is_none(), "free list entry occupied");
            entry.value = Some(value);
            return I::from_raw(RawIdx {
                slot,
                generation: entry.generation,
            });
        }

        let last = self.chunks.len() - 1;
        if self.chunks[last].len() >= ARENA_CHUNK {
            self.chunks.push(Vec::with_capacity(ARENA_CHUNK));
        }

        let chunk = self.chunks.len() - 1;
        let offset = self.chunks[chunk].len();
        self.chunks[chunk].push(Slot {
            generation: 0,
            value: Some(value),
        });
        self.high_water += 1;

        let slot = u32::try_from(chunk * ARENA_CHUNK + offset).expect("arena slot overflow u32");
        I::from_raw(RawIdx { slot, generation: 0 })
    }

    /// Free the record at `idx`, returning it and bumping the slot
    /// generation so the handle (and any copy of it) goes stale.
    ///
    /// # Panics
    ///
    /// Panics on a stale handle or double-free.
    pub fn free(&mut self, idx: I) -> T {
        let raw = idx.raw();
        let entry = self
            .slot_mut(raw.slot)
            .unwrap_or_else(|| panic!("Arena::free: handle out of range: {idx:?}"));
        assert_eq!(
            entry.generation, raw.generation,
            "Arena::free: stale handle (slot reused): {idx:?}"
        );
        let value = entry
            .value
            .take()
            .unwrap_or_else(|| panic!("Arena::free: double-free of {idx:?}"));
        entry.generation = entry.generation.wrapping_add(1);
        self.free_list.push(raw.slot);
        self.occupied -= 1;
        value
    }

    /// Look up a record by handle. `None` for stale or freed handles.
    #[must_use]
    pub fn get(&self, idx: I) -> Option<&T> {
        let raw = idx.raw();
        let entry = self.slot(raw.slot)?;
        if entry.generation != raw.generation {
            return None;
        }
        entry.value.as_ref()
    }

    /// Look up a record mutably by handle.
    pub fn get_mut(&mut self, idx: I) -> Option<&mut T> {
        let raw = idx.raw();
        let entry = self.slot_mut(raw.slot)?;
        if entry.generation != raw.generation {
            return None;
        }
        entry.value.as_mut()
    }

    /// Records currently allocated.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.occupied
    }

    /// Total records ever allocated, including freed ones.
    #[must_use]
    pub fn high_water(&self) -> u64 {
        self.high_water
    }
}

impl<T, I: ArenaIdx> Default for Arena<T, I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, I: ArenaIdx> Index<I> for Arena<T, I> {
    type Output = T;

    #[track_caller]
    fn index(&self, idx: I) -> &T {
        self.get(idx)
            .unwrap_or_else(|| panic!("stale or vacant arena handle: {idx:?}"))
    }
}

impl<T, I: ArenaIdx> IndexMut<I> for Arena<T, I> {
    #[track_caller]
    fn index_mut(&mut self, idx: I) -> &mut T {
        self.get_mut(idx)
            .unwrap_or_else(|| panic!("stale or vacant arena handle: {idx:?}"))
    }
}

impl<T, I: ArenaIdx> std::fmt::Debug for Arena<T, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("occupied", &self.occupied)
            .field("free_count", &self.free_list.len())
            .field("high_water", &self.high_water)
            .finish_non_exhaustive()
    }
}
