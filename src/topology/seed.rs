//! Initial complexes.
//!
//! The Metropolis engine never invents a starting configuration; it asks an
//! [`InitialComplexProvider`]. [`SphericalSeed`] is the built-in provider for `S² × I`
//! foliations closed off by a single pole vertex at each end, so the whole complex is a
//! 3-sphere.

use crate::core::simplex_store::ComplexDescription;
use crate::core::triangulation::{IngestError, Triangulation};
use crate::topology::manifold::{BoundaryPolicy, InvariantKind, InvariantViolation};
use serde::{Deserialize, Serialize};

/// Source of the starting configuration of a run.
pub trait InitialComplexProvider {
    /// The complex to ingest.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] if the provider cannot produce a well-formed description.
    fn description(&self) -> Result<ComplexDescription, IngestError>;

    /// Whether the complex may have a boundary.
    fn boundary_policy(&self) -> BoundaryPolicy {
        BoundaryPolicy::Closed
    }

    /// Ingests and validates the description.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::MalformedInitialComplex`] if the description is invalid.
    fn build(&self) -> Result<Triangulation, IngestError> {
        Triangulation::from_description(&self.description()?, self.boundary_policy())
    }
}

impl InitialComplexProvider for ComplexDescription {
    fn description(&self) -> Result<ComplexDescription, IngestError> {
        Ok(self.clone())
    }
}

/// A stored description together with its boundary policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedComplex {
    /// The complex.
    pub description: ComplexDescription,
    /// Whether boundary facets are admissible.
    pub policy: BoundaryPolicy,
}

impl InitialComplexProvider for FixedComplex {
    fn description(&self) -> Result<ComplexDescription, IngestError> {
        Ok(self.description.clone())
    }

    fn boundary_policy(&self) -> BoundaryPolicy {
        self.policy
    }
}

/// Smallest foliated 3-sphere on `timeslices` slices.
///
/// Slices `0` and `T - 1` hold a single pole vertex; every slice in between is the
/// boundary of a tetrahedron (4 vertices, 4 triangles). Adjacent spherical slices are
/// joined by a staircase triangulation of the four triangular prisms, 12 cells per slab;
/// each pole is coned over its neighbouring slice with 4 cells. The seed has
/// `8 + 12 (T - 3)` cells and `2 + 4 (T - 2)` vertices.
///
/// # Examples
///
/// ```rust
/// use cdt::prelude::*;
///
/// let tri = SphericalSeed::new(4).build().unwrap();
/// assert_eq!(tri.counts().cells(), 20);
/// assert_eq!(tri.counts().vertices, 10);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SphericalSeed {
    timeslices: u32,
}

/// Vertices of one spherical slice.
const SLICE_VERTICES: u32 = 4;

/// The four triangles of a tetrahedron boundary, as increasing index triples.
const SLICE_TRIANGLES: [[u32; 3]; 4] = [[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]];

impl SphericalSeed {
    /// Smallest admissible number of slices: two poles and one sphere.
    pub const MIN_TIMESLICES: u32 = 3;

    /// Creates a seed; the slice count is checked when the description is built.
    #[must_use]
    pub const fn new(timeslices: u32) -> Self {
        Self { timeslices }
    }

    /// Number of slices.
    #[must_use]
    pub const fn timeslices(&self) -> u32 {
        self.timeslices
    }

    /// Description index of vertex `m` on spherical slice `s` (`1 <= s <= T - 2`).
    const fn slice_vertex(s: u32, m: u32) -> u32 {
        1 + SLICE_VERTICES * (s - 1) + m
    }
}

impl InitialComplexProvider for SphericalSeed {
    fn description(&self) -> Result<ComplexDescription, IngestError> {
        let t = self.timeslices;
        if t < Self::MIN_TIMESLICES {
            return Err(IngestError::MalformedInitialComplex {
                violation: InvariantViolation::new(
                    InvariantKind::Foliation,
                    format!(
                        "a spherical seed needs at least {} timeslices, got {t}",
                        Self::MIN_TIMESLICES
                    ),
                ),
            });
        }

        let south = 0;
        let north = 1 + SLICE_VERTICES * (t - 2);
        let mut vertex_timeslices = vec![0];
        for s in 1..=(t - 2) {
            vertex_timeslices.extend(std::iter::repeat_n(s, SLICE_VERTICES as usize));
        }
        vertex_timeslices.push(t - 1);

        let mut cells = Vec::with_capacity(8 + 12 * (t as usize - 3));
        for [i, j, k] in SLICE_TRIANGLES {
            let v = |m| Self::slice_vertex(1, m);
            cells.push([south, v(i), v(j), v(k)]);
        }
        for s in 1..(t - 2) {
            let a = |m| Self::slice_vertex(s, m);
            let b = |m| Self::slice_vertex(s + 1, m);
            for [i, j, k] in SLICE_TRIANGLES {
                cells.push([a(i), a(j), a(k), b(k)]);
                cells.push([a(i), a(j), b(j), b(k)]);
                cells.push([a(i), b(i), b(j), b(k)]);
            }
        }
        for [i, j, k] in SLICE_TRIANGLES {
            let v = |m| Self::slice_vertex(t - 2, m);
            cells.push([v(i), v(j), v(k), north]);
        }

        Ok(ComplexDescription {
            timeslices: t,
            vertex_timeslices,
            cells,
        })
    }
}
