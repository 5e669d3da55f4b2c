//! Facet handles and canonical triangle keys.
//!
//! A facet of a tetrahedron is addressed by the cell plus the index of the vertex
//! *opposite* to it, the same convention used for neighbour slots: `neighbors[i]` is the
//! cell across the facet that omits `vertices[i]`.

use crate::core::collections::FacetIndex;
use crate::core::simplex_store::{CellKey, VertexKey};
use serde::{Deserialize, Serialize};
use slotmap::Key;

/// A facet identified by `(cell, opposite vertex index)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FacetHandle {
    cell_key: CellKey,
    facet_index: FacetIndex,
}

impl FacetHandle {
    /// Creates a handle. `facet_index` is not range-checked here; consumers validate it
    /// against the cell.
    #[inline]
    #[must_use]
    pub const fn new(cell_key: CellKey, facet_index: FacetIndex) -> Self {
        Self {
            cell_key,
            facet_index,
        }
    }

    /// The owning cell.
    #[inline]
    #[must_use]
    pub const fn cell_key(&self) -> CellKey {
        self.cell_key
    }

    /// Index of the vertex opposite to this facet.
    #[inline]
    #[must_use]
    pub const fn facet_index(&self) -> FacetIndex {
        self.facet_index
    }
}

/// Canonical, order-independent identifier of a triangle by its three vertices.
///
/// Used as the key of facet maps when rewiring neighbours and when checking whether a
/// move would duplicate an existing face.
///
/// # Examples
///
/// ```rust
/// use cdt::core::facet::TriangleKey;
/// use cdt::core::simplex_store::VertexKey;
/// use slotmap::KeyData;
///
/// let [a, b, c] = [1, 2, 3].map(|i| VertexKey::from(KeyData::from_ffi(i)));
/// assert_eq!(TriangleKey::new([a, b, c]), TriangleKey::new([c, a, b]));
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TriangleKey([VertexKey; 3]);

impl TriangleKey {
    /// Creates a canonical key by sorting the vertices by raw key value.
    #[must_use]
    pub fn new(mut vertices: [VertexKey; 3]) -> Self {
        vertices.sort_unstable_by_key(|v| v.data().as_ffi());
        Self(vertices)
    }

    /// The three vertices in canonical order.
    #[inline]
    #[must_use]
    pub const fn vertices(&self) -> [VertexKey; 3] {
        self.0
    }

    /// Returns `true` if `v` is one of the triangle's corners.
    #[inline]
    #[must_use]
    pub fn contains(&self, v: VertexKey) -> bool {
        self.0.contains(&v)
    }
}
