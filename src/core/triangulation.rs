//! A validated foliated complex: the arena plus its incremental index.
//!
//! [`Triangulation`] is the unit the move catalog edits and the Metropolis engine owns.
//! It keeps the [`SimplexStore`] and the [`FoliationIndex`] in lockstep; outside the
//! crate both are read-only, so every structural change flows through a move.

use crate::core::edge::EdgeClass;
use crate::core::foliation::{EdgeLink, FoliationIndex, SimplexCounts};
use crate::core::simplex_store::{
    ComplexDescription, SimplexStore, SimplexStoreError, VertexKey,
};
use crate::topology::manifold::{
    BoundaryPolicy, InvariantKind, InvariantViolation, ValidationReport, validation_report,
};
use thiserror::Error;

/// Errors raised while ingesting an initial complex.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum IngestError {
    /// The description does not describe a valid foliated complex.
    #[error("Malformed initial complex: {violation}")]
    MalformedInitialComplex {
        /// The first invariant the description breaks.
        #[source]
        violation: InvariantViolation,
    },
}

impl IngestError {
    fn malformed(kind: InvariantKind, message: impl Into<String>) -> Self {
        Self::MalformedInitialComplex {
            violation: InvariantViolation::new(kind, message),
        }
    }
}

impl From<SimplexStoreError> for IngestError {
    fn from(err: SimplexStoreError) -> Self {
        let kind = match err {
            SimplexStoreError::NonManifoldFacet { .. } => InvariantKind::FacetSharing,
            SimplexStoreError::TimesliceOutOfRange { .. } => InvariantKind::Foliation,
            _ => InvariantKind::CellValidity,
        };
        Self::malformed(kind, err.to_string())
    }
}

/// A foliated 3D simplicial complex with incrementally maintained counts.
#[derive(Clone, Debug)]
pub struct Triangulation {
    store: SimplexStore,
    index: FoliationIndex,
    boundary: BoundaryPolicy,
}

impl Triangulation {
    /// Ingests and validates a complex.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::MalformedInitialComplex`] if the description is empty, has
    /// zero timeslices, contains a degenerate or non-foliated cell, or breaks any
    /// structural invariant under `policy`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cdt::prelude::*;
    ///
    /// // A (3,1) cell glued to a (2,2) cell along a timelike triangle.
    /// let description = ComplexDescription {
    ///     timeslices: 2,
    ///     vertex_timeslices: vec![0, 0, 0, 1, 1],
    ///     cells: vec![[0, 1, 2, 3], [0, 1, 3, 4]],
    /// };
    /// let tri = Triangulation::from_description(&description, BoundaryPolicy::WithBoundary).unwrap();
    /// assert_eq!(tri.counts().cells(), 2);
    /// ```
    pub fn from_description(
        description: &ComplexDescription,
        policy: BoundaryPolicy,
    ) -> Result<Self, IngestError> {
        if description.timeslices == 0 {
            return Err(IngestError::malformed(
                InvariantKind::Foliation,
                "complex has zero timeslices",
            ));
        }
        if description.cells.is_empty() {
            return Err(IngestError::malformed(
                InvariantKind::CellValidity,
                "complex has no cells",
            ));
        }

        let (store, _) = SimplexStore::from_description(description)?;
        let index = FoliationIndex::build(&store)?;
        let triangulation = Self {
            store,
            index,
            boundary: policy,
        };
        triangulation
            .validate()
            .map_err(|violation| IngestError::MalformedInitialComplex { violation })?;

        tracing::debug!(
            "[ingest] accepted complex: T={}, N0={}, N3={}, policy={policy:?}",
            description.timeslices,
            triangulation.store.number_of_vertices(),
            triangulation.store.number_of_cells()
        );
        Ok(triangulation)
    }

    /// Read-only arena.
    #[inline]
    #[must_use]
    pub const fn store(&self) -> &SimplexStore {
        &self.store
    }

    /// Read-only index.
    #[inline]
    #[must_use]
    pub const fn index(&self) -> &FoliationIndex {
        &self.index
    }

    /// Both halves, mutably, for move commits.
    pub(crate) const fn parts_mut(&mut self) -> (&mut SimplexStore, &mut FoliationIndex) {
        (&mut self.store, &mut self.index)
    }

    /// Boundary policy chosen at ingestion.
    #[must_use]
    pub const fn boundary_policy(&self) -> BoundaryPolicy {
        self.boundary
    }

    /// Global simplex counts.
    #[must_use]
    pub fn counts(&self) -> SimplexCounts {
        self.index.counts()
    }

    /// Number of timeslices.
    #[must_use]
    pub const fn timeslices(&self) -> u32 {
        self.store.timeslices()
    }

    /// Number of live cells.
    #[must_use]
    pub fn number_of_cells(&self) -> usize {
        self.store.number_of_cells()
    }

    /// Number of live vertices.
    #[must_use]
    pub fn number_of_vertices(&self) -> usize {
        self.store.number_of_vertices()
    }

    /// The cells around edge `(a, b)` in cyclic order.
    ///
    /// # Errors
    ///
    /// Returns an error if the index and store disagree about a cell.
    pub fn cells_sharing_edge(
        &self,
        a: VertexKey,
        b: VertexKey,
    ) -> Result<EdgeLink, SimplexStoreError> {
        self.index.cells_sharing_edge(&self.store, a, b)
    }

    /// Timelike edges as vertex-key pairs.
    pub fn timelike_edges(&self) -> impl Iterator<Item = (VertexKey, VertexKey)> + '_ {
        self.index
            .edge_pool(EdgeClass::Timelike)
            .iter()
            .map(|e| e.endpoints())
    }

    /// Exports the complex.
    #[must_use]
    pub fn snapshot(&self) -> ComplexDescription {
        self.store.snapshot()
    }

    /// Runs every invariant check, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first [`InvariantViolation`].
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        self.validation_report().into_result()
    }

    /// Runs every invariant check and reports all failures.
    #[must_use]
    pub fn validation_report(&self) -> ValidationReport {
        validation_report(&self.store, &self.index, self.boundary)
    }
}
