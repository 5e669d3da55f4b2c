//! Collection aliases used throughout the crate.
//!
//! All hashing goes through [`rustc_hash`] (`FxHasher`): keys are internal arena handles,
//! never attacker-controlled, and Fx hashing keeps iteration order reproducible across
//! runs, which the seeded Metropolis chains rely on.

use rustc_hash::{FxBuildHasher, FxHashMap, FxHashSet};
use smallvec::SmallVec;

#[cfg(not(feature = "dense-slotmap"))]
use slotmap::SlotMap;

#[cfg(feature = "dense-slotmap")]
use slotmap::DenseSlotMap;

use crate::core::simplex_store::{CellKey, VertexKey};

/// Compact index type for facet positions within a cell (0..=3 for tetrahedra).
pub type FacetIndex = u8;

// =============================================================================
// STORAGE BACKEND
// =============================================================================

/// Arena backend for vertices and cells.
///
/// - **default**: `DenseSlotMap` (enabled via the default `dense-slotmap` feature)
/// - **--no-default-features**: `SlotMap`
///
/// Not exposed in public signatures; callers go through iterators on
/// [`SimplexStore`](crate::core::simplex_store::SimplexStore).
#[cfg(not(feature = "dense-slotmap"))]
pub type StorageMap<K, V> = SlotMap<K, V>;

#[cfg(feature = "dense-slotmap")]
pub type StorageMap<K, V> = DenseSlotMap<K, V>;

// =============================================================================
// CORE OPTIMIZED TYPES
// =============================================================================

/// `HashMap` keyed with `FxHasher`.
///
/// # Examples
///
/// ```rust
/// use cdt::core::collections::FastHashMap;
///
/// let mut map: FastHashMap<u64, usize> = FastHashMap::default();
/// map.insert(123, 456);
/// assert_eq!(map.get(&123), Some(&456));
/// ```
pub type FastHashMap<K, V> = FxHashMap<K, V>;

/// `HashSet` keyed with `FxHasher`.
pub type FastHashSet<T> = FxHashSet<T>;

/// Build hasher shared by [`FastHashMap`], [`FastHashSet`] and [`IndexPool`].
pub type FastBuildHasher = FxBuildHasher;

/// Small-optimized `Vec`: inline storage for up to `N` elements, heap fallback beyond.
pub type SmallBuffer<T, const N: usize> = SmallVec<[T; N]>;

/// Insertion-ordered set with O(1) positional access and O(1) `swap_remove`.
///
/// The foliation index keeps one pool per cell type, per edge class and for vertices so
/// that a uniformly random candidate can be drawn in constant time.
///
/// # Examples
///
/// ```rust
/// use cdt::core::collections::IndexPool;
///
/// let mut pool: IndexPool<u32> = IndexPool::default();
/// pool.insert(7);
/// pool.insert(9);
/// assert_eq!(pool.get_index(1), Some(&9));
/// pool.swap_remove(&7);
/// assert_eq!(pool.get_index(0), Some(&9));
/// ```
pub type IndexPool<T> = indexmap::IndexSet<T, FastBuildHasher>;

// =============================================================================
// SEMANTIC ALIASES
// =============================================================================

/// Typical upper bound on local neighbourhood sizes (edge links, move cavities).
pub const LOCAL_BUFFER_SIZE: usize = 8;

/// Buffer of cell keys sized for move cavities and edge links.
pub type CellKeyBuffer = SmallBuffer<CellKey, LOCAL_BUFFER_SIZE>;

/// Buffer of vertex keys sized for links and move faces.
pub type VertexKeyBuffer = SmallBuffer<VertexKey, LOCAL_BUFFER_SIZE>;

/// Set of cell keys (vertex stars).
pub type CellKeySet = FastHashSet<CellKey>;

/// Creates a [`FastHashMap`] with at least `capacity` slots.
#[must_use]
pub fn fast_hash_map_with_capacity<K, V>(capacity: usize) -> FastHashMap<K, V> {
    FastHashMap::with_capacity_and_hasher(capacity, FastBuildHasher::default())
}

/// Creates a [`FastHashSet`] with at least `capacity` slots.
#[must_use]
pub fn fast_hash_set_with_capacity<T>(capacity: usize) -> FastHashSet<T> {
    FastHashSet::with_capacity_and_hasher(capacity, FastBuildHasher::default())
}
