//! # Structural and PL-manifold validation of foliated complexes
//!
//! The checks here certify the invariants every configuration must satisfy between moves:
//!
//! 1. **Cell validity**: four distinct vertices spanning two adjacent slices, with the
//!    stored type matching the vertex slices.
//! 2. **Neighbour consistency**: `neighbors[i]` is opposite `vertices[i]`, the relation is
//!    mutual, and the two cells share exactly the facet in question.
//! 3. **Facet degree**: every triangle lies in one or two cells; in a closed complex
//!    exactly two.
//! 4. **Vertex links**: the link of an interior vertex is a triangulated 2-sphere, the
//!    link of a boundary vertex a disk. For surfaces the Euler characteristic plus
//!    boundary component count is decisive (`χ = 2`, no boundary / `χ = 1`, one boundary
//!    circle).
//! 5. **Foliation**: every vertex lies on a slice in `0..T`.
//! 6. **No isolated vertices**.
//! 7. **Index consistency**: the incrementally maintained index equals one rebuilt from
//!    the store.
//!
//! Full validation is O(N); it runs at ingestion and, when enabled, after every move.

use crate::core::cell::classify_timeslices;
use crate::core::collections::{
    FacetIndex, FastHashMap, FastHashSet, SmallBuffer, VertexKeyBuffer,
    fast_hash_map_with_capacity, fast_hash_set_with_capacity,
};
use crate::core::edge::EdgeKey;
use crate::core::facet::TriangleKey;
use crate::core::foliation::FoliationIndex;
use crate::core::simplex_store::{SimplexStore, VertexKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Whether boundary facets are admissible.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoundaryPolicy {
    /// Every facet is shared by exactly two cells.
    #[default]
    Closed,
    /// Facets may lie on a boundary; vertex links on the boundary are disks.
    WithBoundary,
}

/// Classifies the kind of invariant that failed during validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvariantKind {
    /// Per-cell validity (distinct vertices, adjacent slices, stored type).
    CellValidity,
    /// Neighbour mutual-consistency.
    NeighborConsistency,
    /// Facet sharing (1 or 2 cells, exactly 2 when closed).
    FacetSharing,
    /// Vertex link is a 2-sphere (interior) or disk (boundary).
    VertexLink,
    /// Every vertex on a slice in `0..T`.
    Foliation,
    /// Every vertex belongs to at least one cell.
    IsolatedVertex,
    /// Incremental index equals a rebuild.
    IndexConsistency,
}

impl fmt::Display for InvariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CellValidity => "cell validity",
            Self::NeighborConsistency => "neighbour consistency",
            Self::FacetSharing => "facet sharing",
            Self::VertexLink => "vertex link",
            Self::Foliation => "foliation",
            Self::IsolatedVertex => "isolated vertex",
            Self::IndexConsistency => "index consistency",
        };
        f.write_str(name)
    }
}

/// A single invariant violation.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{kind} invariant violated: {message}")]
pub struct InvariantViolation {
    /// The kind of invariant that failed.
    pub kind: InvariantKind,
    /// What was observed.
    pub message: String,
}

impl InvariantViolation {
    /// Creates a violation.
    #[must_use]
    pub fn new(kind: InvariantKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Aggregate report of every failed invariant.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// The violations, in check order.
    pub violations: Vec<InvariantViolation>,
}

impl ValidationReport {
    /// Returns `true` if no violations were recorded.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    /// The first violation, if any, as an error.
    ///
    /// # Errors
    ///
    /// Returns the first recorded [`InvariantViolation`].
    pub fn into_result(self) -> Result<(), InvariantViolation> {
        self.violations.into_iter().next().map_or(Ok(()), Err)
    }
}

/// Runs every check and collects all failures.
#[must_use]
pub fn validation_report(
    store: &SimplexStore,
    index: &FoliationIndex,
    policy: BoundaryPolicy,
) -> ValidationReport {
    let checks = [
        validate_cells(store),
        validate_neighbors(store),
        validate_facet_degree(store, policy),
        validate_foliation(store),
        validate_no_isolated_vertices(store),
        validate_index(store, index),
        validate_vertex_links(store, index),
    ];
    ValidationReport {
        violations: checks.into_iter().filter_map(Result::err).collect(),
    }
}

/// Validates per-cell invariants.
///
/// # Errors
///
/// Returns [`InvariantKind::CellValidity`] on the first malformed cell.
pub fn validate_cells(store: &SimplexStore) -> Result<(), InvariantViolation> {
    for (key, cell) in store.cells() {
        let vertices = cell.vertices();
        let slices = store.cell_timeslices(vertices).map_err(|err| {
            InvariantViolation::new(InvariantKind::CellValidity, format!("cell {key:?}: {err}"))
        })?;
        let distinct: FastHashSet<VertexKey> = vertices.iter().copied().collect();
        if distinct.len() != 4 {
            return Err(InvariantViolation::new(
                InvariantKind::CellValidity,
                format!("cell {key:?} has repeated vertices"),
            ));
        }
        match classify_timeslices(slices) {
            Some((cell_type, lower)) if cell_type == cell.cell_type() && lower == cell.lower_slice() => {}
            Some((cell_type, lower)) => {
                return Err(InvariantViolation::new(
                    InvariantKind::CellValidity,
                    format!(
                        "cell {key:?} stored as {} on slice {} but vertices say {cell_type} on slice {lower}",
                        cell.cell_type(),
                        cell.lower_slice()
                    ),
                ));
            }
            None => {
                return Err(InvariantViolation::new(
                    InvariantKind::CellValidity,
                    format!("cell {key:?} has timeslices {slices:?}"),
                ));
            }
        }
    }
    Ok(())
}

/// Validates that neighbour slots are mutual and share the addressed facet.
///
/// # Errors
///
/// Returns [`InvariantKind::NeighborConsistency`] on the first inconsistent slot.
pub fn validate_neighbors(store: &SimplexStore) -> Result<(), InvariantViolation> {
    for (key, cell) in store.cells() {
        for i in 0..4u8 {
            let Some(neighbor_key) = cell.neighbor(i) else {
                continue;
            };
            let fail = |what: &str| {
                InvariantViolation::new(
                    InvariantKind::NeighborConsistency,
                    format!("cell {key:?} facet {i}: {what} (neighbour {neighbor_key:?})"),
                )
            };
            let neighbor = store
                .cell(neighbor_key)
                .ok_or_else(|| fail("neighbour does not exist"))?;
            let facet = cell.facet_key(i);
            let j = neighbor
                .facet_index_of(&facet)
                .ok_or_else(|| fail("neighbour does not contain the shared facet"))?;
            if neighbor.neighbor(j) != Some(key) {
                return Err(fail("neighbour does not point back"));
            }
            if neighbor.vertices()[usize::from(j)] == cell.vertices()[usize::from(i)] {
                return Err(fail("neighbour is a duplicate of this cell"));
            }
        }
    }
    Ok(())
}

/// Validates facet multiplicities against the boundary policy.
///
/// # Errors
///
/// Returns [`InvariantKind::FacetSharing`] if a triangle lies in more than two cells,
/// if a shared triangle is not linked through neighbour slots, or if a closed complex
/// has a boundary triangle.
pub fn validate_facet_degree(
    store: &SimplexStore,
    policy: BoundaryPolicy,
) -> Result<(), InvariantViolation> {
    type FacetInfo = (crate::core::simplex_store::CellKey, FacetIndex);
    let mut facet_map: FastHashMap<TriangleKey, SmallBuffer<FacetInfo, 2>> =
        fast_hash_map_with_capacity(store.number_of_cells().saturating_mul(2));
    for (key, cell) in store.cells() {
        for i in 0..4u8 {
            facet_map.entry(cell.facet_key(i)).or_default().push((key, i));
        }
    }
    for (facet, owners) in &facet_map {
        match owners.as_slice() {
            [(c, i)] => {
                if policy == BoundaryPolicy::Closed {
                    return Err(InvariantViolation::new(
                        InvariantKind::FacetSharing,
                        format!("closed complex has boundary triangle {facet:?}"),
                    ));
                }
                let has_neighbor = store.cell(*c).and_then(|cell| cell.neighbor(*i)).is_some();
                if has_neighbor {
                    return Err(InvariantViolation::new(
                        InvariantKind::FacetSharing,
                        format!("boundary triangle {facet:?} has a neighbour in cell {c:?}"),
                    ));
                }
            }
            [(c1, i1), (c2, _)] => {
                let linked = store.cell(*c1).and_then(|cell| cell.neighbor(*i1)) == Some(*c2);
                if !linked {
                    return Err(InvariantViolation::new(
                        InvariantKind::FacetSharing,
                        format!("triangle {facet:?} is shared but cells {c1:?} and {c2:?} are not neighbours"),
                    ));
                }
            }
            _ => {
                return Err(InvariantViolation::new(
                    InvariantKind::FacetSharing,
                    format!("triangle {facet:?} belongs to {} cells", owners.len()),
                ));
            }
        }
    }
    Ok(())
}

/// Validates the slice range of every vertex.
///
/// # Errors
///
/// Returns [`InvariantKind::Foliation`] for a vertex outside `0..T`.
pub fn validate_foliation(store: &SimplexStore) -> Result<(), InvariantViolation> {
    let timeslices = store.timeslices();
    for (key, vertex) in store.vertices() {
        if vertex.timeslice() >= timeslices {
            return Err(InvariantViolation::new(
                InvariantKind::Foliation,
                format!(
                    "vertex {key:?} on slice {} but complex has {timeslices} slices",
                    vertex.timeslice()
                ),
            ));
        }
    }
    Ok(())
}

/// Validates that every vertex is used by some cell.
///
/// # Errors
///
/// Returns [`InvariantKind::IsolatedVertex`] for the first unused vertex.
pub fn validate_no_isolated_vertices(store: &SimplexStore) -> Result<(), InvariantViolation> {
    match store
        .vertices()
        .find(|(_, vertex)| vertex.incident_cell_count() == 0)
    {
        Some((key, _)) => Err(InvariantViolation::new(
            InvariantKind::IsolatedVertex,
            format!("vertex {key:?} belongs to no cell"),
        )),
        None => Ok(()),
    }
}

/// Validates the incremental index against a rebuild.
///
/// # Errors
///
/// Returns [`InvariantKind::IndexConsistency`] describing the first difference.
pub fn validate_index(store: &SimplexStore, index: &FoliationIndex) -> Result<(), InvariantViolation> {
    let rebuilt = FoliationIndex::build(store).map_err(|err| {
        InvariantViolation::new(InvariantKind::IndexConsistency, err.to_string())
    })?;
    match index.difference(&rebuilt) {
        Some(message) => Err(InvariantViolation::new(
            InvariantKind::IndexConsistency,
            message,
        )),
        None => Ok(()),
    }
}

/// Validates that every vertex link is a 2-sphere or, on the boundary, a disk.
///
/// # Errors
///
/// Returns [`InvariantKind::VertexLink`] for the first vertex whose link fails.
pub fn validate_vertex_links(
    store: &SimplexStore,
    index: &FoliationIndex,
) -> Result<(), InvariantViolation> {
    for (vertex_key, _) in store.vertices() {
        validate_single_vertex_link(store, index, vertex_key)?;
    }
    Ok(())
}

/// Summary of one vertex link as a triangulated surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkSummary {
    /// Link vertices.
    pub vertices: usize,
    /// Link edges.
    pub edges: usize,
    /// Link triangles.
    pub triangles: usize,
    /// Link edges on exactly one link triangle.
    pub boundary_edges: usize,
    /// Connected components of the boundary.
    pub boundary_components: usize,
    /// Largest number of link triangles on a single link edge.
    pub max_edge_degree: usize,
    /// Whether the link 1-skeleton is connected.
    pub connected: bool,
}

impl LinkSummary {
    /// `V - E + F`.
    #[must_use]
    pub const fn euler_characteristic(&self) -> i64 {
        self.vertices as i64 - self.edges as i64 + self.triangles as i64
    }

    /// A closed, connected surface with `χ = 2`.
    #[must_use]
    pub const fn is_sphere(&self) -> bool {
        self.connected
            && self.max_edge_degree == 2
            && self.boundary_edges == 0
            && self.euler_characteristic() == 2
    }

    /// A connected surface with one boundary circle and `χ = 1`.
    #[must_use]
    pub const fn is_disk(&self) -> bool {
        self.connected
            && self.max_edge_degree <= 2
            && self.boundary_components == 1
            && self.euler_characteristic() == 1
    }
}

/// Computes the link of `vertex_key` as a triangulated surface.
#[must_use]
pub fn vertex_link_summary(
    store: &SimplexStore,
    index: &FoliationIndex,
    vertex_key: VertexKey,
) -> LinkSummary {
    let Some(star) = index.cells_incident_to(vertex_key) else {
        return LinkSummary::default();
    };

    let mut link_triangles: SmallBuffer<[VertexKey; 3], 16> = SmallBuffer::new();
    for &cell_key in star {
        let Some(cell) = store.cell(cell_key) else {
            continue;
        };
        if let Some(i) = cell.vertex_index(vertex_key) {
            link_triangles.push(cell.facet_vertices(i));
        }
    }

    let mut edge_degree: FastHashMap<EdgeKey, usize> =
        fast_hash_map_with_capacity(link_triangles.len().saturating_mul(2));
    let mut link_vertices: FastHashSet<VertexKey> =
        fast_hash_set_with_capacity(link_triangles.len());
    for triangle in &link_triangles {
        link_vertices.extend(triangle.iter().copied());
        for (a, b) in [(0, 1), (0, 2), (1, 2)] {
            *edge_degree
                .entry(EdgeKey::new(triangle[a], triangle[b]))
                .or_insert(0) += 1;
        }
    }

    let boundary: SmallBuffer<EdgeKey, 16> = edge_degree
        .iter()
        .filter(|(_, d)| **d == 1)
        .map(|(e, _)| *e)
        .collect();

    LinkSummary {
        vertices: link_vertices.len(),
        edges: edge_degree.len(),
        triangles: link_triangles.len(),
        boundary_edges: boundary.len(),
        boundary_components: component_count(boundary.iter().copied()),
        max_edge_degree: edge_degree.values().copied().max().unwrap_or(0),
        connected: component_count(edge_degree.keys().copied()) <= 1,
    }
}

fn validate_single_vertex_link(
    store: &SimplexStore,
    index: &FoliationIndex,
    vertex_key: VertexKey,
) -> Result<(), InvariantViolation> {
    let summary = vertex_link_summary(store, index, vertex_key);
    let interior = summary.boundary_edges == 0;
    let ok = if interior {
        summary.is_sphere()
    } else {
        summary.is_disk()
    };
    if ok {
        Ok(())
    } else {
        Err(InvariantViolation::new(
            InvariantKind::VertexLink,
            format!(
                "vertex {vertex_key:?} link is not a {}: {summary:?} (chi = {})",
                if interior { "2-sphere" } else { "disk" },
                summary.euler_characteristic()
            ),
        ))
    }
}

/// Number of connected components of the graph spanned by `edges`.
fn component_count(edges: impl Iterator<Item = EdgeKey>) -> usize {
    let mut adjacency: FastHashMap<VertexKey, VertexKeyBuffer> = FastHashMap::default();
    for edge in edges {
        let (a, b) = edge.endpoints();
        adjacency.entry(a).or_default().push(b);
        adjacency.entry(b).or_default().push(a);
    }

    let mut visited: FastHashSet<VertexKey> = fast_hash_set_with_capacity(adjacency.len());
    let mut components = 0;
    for &start in adjacency.keys() {
        if visited.contains(&start) {
            continue;
        }
        components += 1;
        let mut stack: VertexKeyBuffer = VertexKeyBuffer::new();
        stack.push(start);
        while let Some(v) = stack.pop() {
            if !visited.insert(v) {
                continue;
            }
            if let Some(neighbors) = adjacency.get(&v) {
                stack.extend(neighbors.iter().copied().filter(|n| !visited.contains(n)));
            }
        }
    }
    components
}
