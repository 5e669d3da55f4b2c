//! Tetrahedral cells and their causal type.
//!
//! Every cell of a foliated 3D complex spans exactly two adjacent timeslices. Its type is
//! the split of its four vertices between the lower and the upper slice:
//!
//! | type  | lower | upper |
//! |-------|-------|-------|
//! | (3,1) | 3     | 1     |
//! | (2,2) | 2     | 2     |
//! | (1,3) | 1     | 3     |

use crate::core::collections::FacetIndex;
use crate::core::edge::EdgeKey;
use crate::core::facet::TriangleKey;
use crate::core::simplex_store::{CellKey, VertexKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dimension of the complexes this crate handles.
pub const DIMENSION: usize = 3;

/// Causal type of a tetrahedron.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CellType {
    /// Three vertices on the lower slice, one on the upper.
    ThreeOne,
    /// Two vertices on each slice.
    TwoTwo,
    /// One vertex on the lower slice, three on the upper.
    OneThree,
}

impl CellType {
    /// All types, in pool order.
    pub const ALL: [Self; 3] = [Self::ThreeOne, Self::TwoTwo, Self::OneThree];

    /// Builds the type from the number of vertices on the lower slice.
    #[must_use]
    pub const fn from_lower_count(lower: usize) -> Option<Self> {
        match lower {
            3 => Some(Self::ThreeOne),
            2 => Some(Self::TwoTwo),
            1 => Some(Self::OneThree),
            _ => None,
        }
    }

    /// Dense index used for per-type arrays.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::ThreeOne => 0,
            Self::TwoTwo => 1,
            Self::OneThree => 2,
        }
    }

    /// `(lower, upper)` vertex counts.
    #[must_use]
    pub const fn split(self) -> (u8, u8) {
        match self {
            Self::ThreeOne => (3, 1),
            Self::TwoTwo => (2, 2),
            Self::OneThree => (1, 3),
        }
    }

    /// Time-reversed type: (3,1) and (1,3) swap, (2,2) is fixed.
    #[must_use]
    pub const fn time_reversed(self) -> Self {
        match self {
            Self::ThreeOne => Self::OneThree,
            Self::TwoTwo => Self::TwoTwo,
            Self::OneThree => Self::ThreeOne,
        }
    }
}

impl fmt::Display for CellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (lower, upper) = self.split();
        write!(f, "({lower},{upper})")
    }
}

/// Classifies four vertex timeslices.
///
/// Returns the cell type and the lower slice, or `None` if the vertices do not span
/// exactly two adjacent slices.
///
/// # Examples
///
/// ```rust
/// use cdt::core::cell::{classify_timeslices, CellType};
///
/// assert_eq!(classify_timeslices([2, 2, 2, 3]), Some((CellType::ThreeOne, 2)));
/// assert_eq!(classify_timeslices([5, 4, 5, 4]), Some((CellType::TwoTwo, 4)));
/// assert_eq!(classify_timeslices([1, 1, 1, 1]), None);
/// assert_eq!(classify_timeslices([1, 2, 3, 3]), None);
/// ```
#[must_use]
pub fn classify_timeslices(slices: [u32; 4]) -> Option<(CellType, u32)> {
    let lower = *slices.iter().min()?;
    let upper = *slices.iter().max()?;
    if upper != lower.checked_add(1)? {
        return None;
    }
    let lower_count = slices.iter().filter(|&&s| s == lower).count();
    CellType::from_lower_count(lower_count).map(|t| (t, lower))
}

/// The six vertex pairs of a tetrahedron, as indices.
pub(crate) const EDGE_INDEX_PAIRS: [(usize, usize); 6] =
    [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)];

/// A tetrahedron with its neighbour slots.
///
/// `neighbors[i]` is the cell sharing the facet opposite `vertices[i]`, or `None` on a
/// boundary facet. Type and lower slice are fixed at insertion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    vertices: [VertexKey; DIMENSION + 1],
    pub(crate) neighbors: [Option<CellKey>; DIMENSION + 1],
    cell_type: CellType,
    lower_slice: u32,
}

impl Cell {
    pub(crate) const fn new(vertices: [VertexKey; 4], cell_type: CellType, lower_slice: u32) -> Self {
        Self {
            vertices,
            neighbors: [None; 4],
            cell_type,
            lower_slice,
        }
    }

    /// The four vertices.
    #[inline]
    #[must_use]
    pub const fn vertices(&self) -> &[VertexKey; 4] {
        &self.vertices
    }

    /// The four neighbour slots.
    #[inline]
    #[must_use]
    pub const fn neighbors(&self) -> &[Option<CellKey>; 4] {
        &self.neighbors
    }

    /// The neighbour across facet `i`, if any.
    #[inline]
    #[must_use]
    pub fn neighbor(&self, i: FacetIndex) -> Option<CellKey> {
        self.neighbors.get(usize::from(i)).copied().flatten()
    }

    /// The causal type.
    #[inline]
    #[must_use]
    pub const fn cell_type(&self) -> CellType {
        self.cell_type
    }

    /// The lower of the two timeslices spanned.
    #[inline]
    #[must_use]
    pub const fn lower_slice(&self) -> u32 {
        self.lower_slice
    }

    /// Returns `true` if `v` is a vertex of this cell.
    #[inline]
    #[must_use]
    pub fn contains_vertex(&self, v: VertexKey) -> bool {
        self.vertices.contains(&v)
    }

    /// Position of `v` in the vertex array.
    #[inline]
    #[must_use]
    pub fn vertex_index(&self, v: VertexKey) -> Option<FacetIndex> {
        self.vertices
            .iter()
            .position(|&x| x == v)
            .and_then(|i| FacetIndex::try_from(i).ok())
    }

    /// Vertices of the facet opposite `vertices[i]`, in vertex-array order.
    #[must_use]
    pub fn facet_vertices(&self, i: FacetIndex) -> [VertexKey; 3] {
        let skip = usize::from(i);
        let mut out = [self.vertices[0]; 3];
        let mut slot = 0;
        for (j, &v) in self.vertices.iter().enumerate() {
            if j != skip && slot < 3 {
                out[slot] = v;
                slot += 1;
            }
        }
        out
    }

    /// Canonical key of the facet opposite `vertices[i]`.
    #[must_use]
    pub fn facet_key(&self, i: FacetIndex) -> TriangleKey {
        TriangleKey::new(self.facet_vertices(i))
    }

    /// Index of the facet whose vertex set equals `triangle`, if this cell has one.
    #[must_use]
    pub fn facet_index_of(&self, triangle: &TriangleKey) -> Option<FacetIndex> {
        let mut opposite = None;
        for (i, &v) in self.vertices.iter().enumerate() {
            if !triangle.contains(v) {
                if opposite.is_some() {
                    return None;
                }
                opposite = Some(i);
            }
        }
        opposite.and_then(|i| FacetIndex::try_from(i).ok())
    }

    /// The six edges.
    pub fn edges(&self) -> impl Iterator<Item = EdgeKey> + '_ {
        EDGE_INDEX_PAIRS
            .iter()
            .map(|&(i, j)| EdgeKey::new(self.vertices[i], self.vertices[j]))
    }

    /// The two vertices not on edge `(a, b)`, in vertex-array order.
    ///
    /// Returns `None` unless both `a` and `b` belong to this cell.
    #[must_use]
    pub fn opposite_edge(&self, a: VertexKey, b: VertexKey) -> Option<(VertexKey, VertexKey)> {
        if !self.contains_vertex(a) || !self.contains_vertex(b) || a == b {
            return None;
        }
        let mut rest = self.vertices.iter().copied().filter(|&v| v != a && v != b);
        Some((rest.next()?, rest.next()?))
    }
}
