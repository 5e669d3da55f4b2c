//! Vertex records stored in the [`SimplexStore`](crate::core::simplex_store::SimplexStore).
//!
//! A CDT vertex carries no coordinates, only the timeslice it lives on. The store also
//! tracks how many cells reference each vertex so that removal of a still-referenced
//! vertex can be refused in O(1).

use serde::{Deserialize, Serialize};

/// A vertex of the foliated complex.
///
/// # Examples
///
/// ```rust
/// use cdt::core::vertex::Vertex;
///
/// let v = Vertex::new(3);
/// assert_eq!(v.timeslice(), 3);
/// assert_eq!(v.incident_cell_count(), 0);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Vertex {
    timeslice: u32,
    /// Number of live cells containing this vertex.
    pub(crate) incident_cells: u32,
}

impl Vertex {
    /// Creates an unreferenced vertex on `timeslice`.
    #[must_use]
    pub const fn new(timeslice: u32) -> Self {
        Self {
            timeslice,
            incident_cells: 0,
        }
    }

    /// The timeslice this vertex belongs to. Immutable for the vertex's lifetime.
    #[inline]
    #[must_use]
    pub const fn timeslice(&self) -> u32 {
        self.timeslice
    }

    /// Number of cells currently containing this vertex.
    #[inline]
    #[must_use]
    pub const fn incident_cell_count(&self) -> u32 {
        self.incident_cells
    }
}
