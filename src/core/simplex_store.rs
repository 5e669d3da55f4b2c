//! Arena storage for the vertices and tetrahedra of a foliated complex.
//!
//! # Overview
//!
//! [`SimplexStore`] owns every [`Vertex`] and [`Cell`] in slotmap arenas and hands out
//! stable, generation-checked keys ([`VertexKey`], [`CellKey`]). Cells refer to their
//! vertices and to their up to four face-adjacent neighbours by key only; there are no
//! owning pointers in either direction, so topology edits are plain key rewrites.
//!
//! # Invariants maintained here
//!
//! - a cell's four vertices are distinct, live, and span two adjacent timeslices
//! - `neighbors[i]` is opposite `vertices[i]`
//! - every vertex knows how many cells reference it; a referenced vertex cannot be removed
//! - removing a cell clears the back-pointers of its surviving neighbours
//!
//! Mutual neighbour consistency across a whole move is the caller's responsibility (the
//! move mutators rewire cavities before removing old cells).
//!
//! All mutating methods are `pub(crate)`: outside the crate a store is only changed
//! through the move catalog.

use crate::core::cell::{Cell, CellType, classify_timeslices};
use crate::core::collections::{
    FacetIndex, FastHashMap, SmallBuffer, StorageMap, fast_hash_map_with_capacity,
};
use crate::core::facet::TriangleKey;
use crate::core::vertex::Vertex;
use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use thiserror::Error;

new_key_type! {
    /// Key type for accessing vertices in the storage map.
    ///
    /// Keys are generation-checked: a key to a removed vertex never resolves to a vertex
    /// inserted later into the same slot.
    pub struct VertexKey;
}

new_key_type! {
    /// Key type for accessing cells in the storage map.
    pub struct CellKey;
}

/// Errors raised by arena operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum SimplexStoreError {
    /// A vertex still referenced by cells was asked to be removed.
    #[error("Dangling reference: vertex {vertex_key:?} is still used by {incident_cells} cell(s)")]
    DanglingReference {
        /// The vertex that was asked to be removed.
        vertex_key: VertexKey,
        /// Number of cells still containing it.
        incident_cells: u32,
    },
    /// A cell key did not resolve.
    #[error("Cell {cell_key:?} not found in store")]
    MissingCell {
        /// The unresolved key.
        cell_key: CellKey,
    },
    /// A vertex key did not resolve.
    #[error("Vertex {vertex_key:?} not found in store")]
    MissingVertex {
        /// The unresolved key.
        vertex_key: VertexKey,
    },
    /// A facet index outside `0..4`.
    #[error("Facet index {facet_index} out of range for cell {cell_key:?}")]
    InvalidFacetIndex {
        /// The cell addressed.
        cell_key: CellKey,
        /// The offending index.
        facet_index: FacetIndex,
    },
    /// A cell whose vertices are repeated or do not span two adjacent slices.
    #[error("Degenerate cell {vertices:?}: {message}")]
    DegenerateCell {
        /// The requested vertices.
        vertices: [VertexKey; 4],
        /// What was wrong with them.
        message: String,
    },
    /// A vertex timeslice outside `0..timeslices`.
    #[error("Timeslice {timeslice} out of range (complex has {timeslices} slices)")]
    TimesliceOutOfRange {
        /// The requested slice.
        timeslice: u32,
        /// Number of slices in the complex.
        timeslices: u32,
    },
    /// A triangle shared by more than two cells.
    #[error("Triangle {facet:?} is shared by {cell_count} cells (at most 2 allowed)")]
    NonManifoldFacet {
        /// The over-shared triangle.
        facet: TriangleKey,
        /// How many cells contain it.
        cell_count: usize,
    },
    /// A vertex index in a [`ComplexDescription`] that does not exist.
    #[error("Cell {cell_index} references unknown vertex index {vertex_index}")]
    UnknownVertexIndex {
        /// Position of the cell in the description.
        cell_index: usize,
        /// The out-of-range vertex index.
        vertex_index: u32,
    },
}

/// Plain, key-free description of a complex.
///
/// Vertices are identified by their position in `vertex_timeslices`. This is the format
/// accepted by ingestion, produced by [`SimplexStore::snapshot`], and the one written to
/// disk by callers that want to persist a configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexDescription {
    /// Number of timeslices `T`; every vertex slice must be `< T`.
    pub timeslices: u32,
    /// Timeslice of each vertex, indexed by vertex position.
    pub vertex_timeslices: Vec<u32>,
    /// Each cell as four vertex positions.
    pub cells: Vec<[u32; 4]>,
}

/// Arena of vertices and cells.
#[derive(Clone, Debug)]
pub struct SimplexStore {
    vertices: StorageMap<VertexKey, Vertex>,
    cells: StorageMap<CellKey, Cell>,
    timeslices: u32,
    /// Incremented on every structural modification.
    generation: u64,
}

impl SimplexStore {
    /// Creates an empty store for a complex with `timeslices` slices.
    #[must_use]
    pub fn new(timeslices: u32) -> Self {
        Self {
            vertices: StorageMap::with_key(),
            cells: StorageMap::with_key(),
            timeslices,
            generation: 0,
        }
    }

    /// Builds a store from a description and assigns neighbours from shared facets.
    ///
    /// Returns the store together with the key assigned to each description vertex.
    ///
    /// # Errors
    ///
    /// Returns an error if a vertex slice is out of range, a cell references an unknown
    /// vertex, a cell is degenerate, or a triangle is shared by more than two cells.
    pub fn from_description(
        description: &ComplexDescription,
    ) -> Result<(Self, Vec<VertexKey>), SimplexStoreError> {
        let mut store = Self::new(description.timeslices);
        let keys = description
            .vertex_timeslices
            .iter()
            .map(|&t| store.add_vertex(t))
            .collect::<Result<Vec<_>, _>>()?;

        for (cell_index, cell) in description.cells.iter().enumerate() {
            let mut vertices = [VertexKey::default(); 4];
            for (slot, &vertex_index) in vertices.iter_mut().zip(cell.iter()) {
                *slot = usize::try_from(vertex_index)
                    .ok()
                    .and_then(|i| keys.get(i).copied())
                    .ok_or(SimplexStoreError::UnknownVertexIndex {
                        cell_index,
                        vertex_index,
                    })?;
            }
            store.add_cell(vertices)?;
        }

        store.assign_neighbors()?;
        Ok((store, keys))
    }

    /// Number of timeslices.
    #[inline]
    #[must_use]
    pub const fn timeslices(&self) -> u32 {
        self.timeslices
    }

    /// Structural modification counter.
    #[inline]
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    fn bump_generation(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    /// Number of live vertices.
    #[must_use]
    pub fn number_of_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Number of live cells.
    #[must_use]
    pub fn number_of_cells(&self) -> usize {
        self.cells.len()
    }

    /// Iterates `(key, vertex)` pairs in arena order.
    pub fn vertices(&self) -> impl Iterator<Item = (VertexKey, &Vertex)> {
        self.vertices.iter()
    }

    /// Iterates `(key, cell)` pairs in arena order.
    pub fn cells(&self) -> impl Iterator<Item = (CellKey, &Cell)> {
        self.cells.iter()
    }

    /// Iterates cell keys.
    pub fn cell_keys(&self) -> impl Iterator<Item = CellKey> + '_ {
        self.cells.keys()
    }

    /// Looks up a vertex.
    #[must_use]
    pub fn vertex(&self, key: VertexKey) -> Option<&Vertex> {
        self.vertices.get(key)
    }

    /// Looks up a cell.
    #[must_use]
    pub fn cell(&self, key: CellKey) -> Option<&Cell> {
        self.cells.get(key)
    }

    /// Looks up a cell, reporting a missing key as an error.
    ///
    /// # Errors
    ///
    /// Returns [`SimplexStoreError::MissingCell`] if the key is stale.
    pub fn try_cell(&self, key: CellKey) -> Result<&Cell, SimplexStoreError> {
        self.cells
            .get(key)
            .ok_or(SimplexStoreError::MissingCell { cell_key: key })
    }

    /// Timeslice of a vertex.
    ///
    /// # Errors
    ///
    /// Returns [`SimplexStoreError::MissingVertex`] if the key is stale.
    pub fn timeslice_of(&self, key: VertexKey) -> Result<u32, SimplexStoreError> {
        self.vertices
            .get(key)
            .map(Vertex::timeslice)
            .ok_or(SimplexStoreError::MissingVertex { vertex_key: key })
    }

    /// Returns `true` if the vertex key is live.
    #[must_use]
    pub fn contains_vertex(&self, key: VertexKey) -> bool {
        self.vertices.contains_key(key)
    }

    /// Returns `true` if the cell key is live.
    #[must_use]
    pub fn contains_cell(&self, key: CellKey) -> bool {
        self.cells.contains_key(key)
    }

    /// Timeslices of a cell's four vertices.
    ///
    /// # Errors
    ///
    /// Returns [`SimplexStoreError::MissingVertex`] if any vertex key is stale.
    pub fn cell_timeslices(&self, vertices: &[VertexKey; 4]) -> Result<[u32; 4], SimplexStoreError> {
        let mut slices = [0; 4];
        for (slot, &v) in slices.iter_mut().zip(vertices.iter()) {
            *slot = self.timeslice_of(v)?;
        }
        Ok(slices)
    }

    /// Classifies a prospective cell without inserting it.
    ///
    /// # Errors
    ///
    /// Returns [`SimplexStoreError::DegenerateCell`] for repeated vertices or a slice span
    /// other than two adjacent slices, and [`SimplexStoreError::MissingVertex`] for stale keys.
    pub fn classify(&self, vertices: &[VertexKey; 4]) -> Result<(CellType, u32), SimplexStoreError> {
        for i in 0..4 {
            for j in (i + 1)..4 {
                if vertices[i] == vertices[j] {
                    return Err(SimplexStoreError::DegenerateCell {
                        vertices: *vertices,
                        message: "repeated vertex".to_string(),
                    });
                }
            }
        }
        let slices = self.cell_timeslices(vertices)?;
        classify_timeslices(slices).ok_or_else(|| SimplexStoreError::DegenerateCell {
            vertices: *vertices,
            message: format!("timeslices {slices:?} do not span two adjacent slices"),
        })
    }

    // =========================================================================
    // MUTATION (crate-private)
    // =========================================================================

    /// Inserts an unreferenced vertex.
    pub(crate) fn add_vertex(&mut self, timeslice: u32) -> Result<VertexKey, SimplexStoreError> {
        if timeslice >= self.timeslices {
            return Err(SimplexStoreError::TimesliceOutOfRange {
                timeslice,
                timeslices: self.timeslices,
            });
        }
        let key = self.vertices.insert(Vertex::new(timeslice));
        self.bump_generation();
        Ok(key)
    }

    /// Inserts a cell with empty neighbour slots.
    pub(crate) fn add_cell(&mut self, vertices: [VertexKey; 4]) -> Result<CellKey, SimplexStoreError> {
        let (cell_type, lower_slice) = self.classify(&vertices)?;
        for &v in &vertices {
            if let Some(vertex) = self.vertices.get_mut(v) {
                vertex.incident_cells += 1;
            }
        }
        let key = self.cells.insert(Cell::new(vertices, cell_type, lower_slice));
        self.bump_generation();
        Ok(key)
    }

    /// Removes a cell, releasing its vertex references and clearing neighbour slots
    /// that still point at it.
    pub(crate) fn remove_cell(&mut self, key: CellKey) -> Result<Cell, SimplexStoreError> {
        let cell = self
            .cells
            .remove(key)
            .ok_or(SimplexStoreError::MissingCell { cell_key: key })?;

        for &v in cell.vertices() {
            if let Some(vertex) = self.vertices.get_mut(v) {
                vertex.incident_cells = vertex.incident_cells.saturating_sub(1);
            }
        }
        for neighbor_key in cell.neighbors().iter().flatten() {
            if let Some(neighbor) = self.cells.get_mut(*neighbor_key) {
                for slot in &mut neighbor.neighbors {
                    if *slot == Some(key) {
                        *slot = None;
                    }
                }
            }
        }

        self.bump_generation();
        Ok(cell)
    }

    /// Removes a vertex that no cell references.
    pub(crate) fn remove_vertex(&mut self, key: VertexKey) -> Result<Vertex, SimplexStoreError> {
        let vertex = self
            .vertices
            .get(key)
            .ok_or(SimplexStoreError::MissingVertex { vertex_key: key })?;
        if vertex.incident_cells > 0 {
            return Err(SimplexStoreError::DanglingReference {
                vertex_key: key,
                incident_cells: vertex.incident_cells,
            });
        }
        let removed = self
            .vertices
            .remove(key)
            .ok_or(SimplexStoreError::MissingVertex { vertex_key: key })?;
        self.bump_generation();
        Ok(removed)
    }

    /// Sets one neighbour slot. The reverse slot is not touched.
    pub(crate) fn set_neighbor(
        &mut self,
        cell_key: CellKey,
        facet_index: FacetIndex,
        neighbor: Option<CellKey>,
    ) -> Result<(), SimplexStoreError> {
        if let Some(n) = neighbor.filter(|n| !self.cells.contains_key(*n)) {
            return Err(SimplexStoreError::MissingCell { cell_key: n });
        }
        let cell = self
            .cells
            .get_mut(cell_key)
            .ok_or(SimplexStoreError::MissingCell { cell_key })?;
        let slot = cell
            .neighbors
            .get_mut(usize::from(facet_index))
            .ok_or(SimplexStoreError::InvalidFacetIndex {
                cell_key,
                facet_index,
            })?;
        *slot = neighbor;
        self.bump_generation();
        Ok(())
    }

    /// Recomputes every neighbour slot from shared facets.
    ///
    /// Facets seen once become boundary (`None`) slots.
    pub(crate) fn assign_neighbors(&mut self) -> Result<(), SimplexStoreError> {
        type FacetInfo = (CellKey, FacetIndex);
        let mut facet_map: FastHashMap<TriangleKey, SmallBuffer<FacetInfo, 2>> =
            fast_hash_map_with_capacity(self.cells.len().saturating_mul(4));

        for (cell_key, cell) in &self.cells {
            for i in 0..4 {
                let facet = cell.facet_key(i);
                let entry = facet_map.entry(facet).or_default();
                if entry.len() >= 2 {
                    return Err(SimplexStoreError::NonManifoldFacet {
                        facet,
                        cell_count: entry.len() + 1,
                    });
                }
                entry.push((cell_key, i));
            }
        }

        for cell in self.cells.values_mut() {
            cell.neighbors = [None; 4];
        }
        for infos in facet_map.values() {
            if let [(c1, i1), (c2, i2)] = infos.as_slice() {
                if let Some(cell) = self.cells.get_mut(*c1) {
                    cell.neighbors[usize::from(*i1)] = Some(*c2);
                }
                if let Some(cell) = self.cells.get_mut(*c2) {
                    cell.neighbors[usize::from(*i2)] = Some(*c1);
                }
            }
        }

        self.bump_generation();
        Ok(())
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Index of the facet in `neighbors[i]` that is shared with `cell_key`.
    #[must_use]
    pub fn mirror_facet_index(&self, cell_key: CellKey, i: FacetIndex) -> Option<FacetIndex> {
        let cell = self.cells.get(cell_key)?;
        let neighbor = self.cells.get(cell.neighbor(i)?)?;
        neighbor.facet_index_of(&cell.facet_key(i))
    }

    /// Exports the complex as a key-free description.
    ///
    /// Vertex positions follow arena iteration order.
    #[must_use]
    pub fn snapshot(&self) -> ComplexDescription {
        let mut positions: FastHashMap<VertexKey, u32> =
            fast_hash_map_with_capacity(self.vertices.len());
        let mut vertex_timeslices = Vec::with_capacity(self.vertices.len());
        for (key, vertex) in &self.vertices {
            let position = u32::try_from(vertex_timeslices.len()).unwrap_or(u32::MAX);
            positions.insert(key, position);
            vertex_timeslices.push(vertex.timeslice());
        }
        let cells = self
            .cells
            .values()
            .map(|cell| {
                (*cell.vertices()).map(|v| positions.get(&v).copied().unwrap_or(u32::MAX))
            })
            .collect();
        ComplexDescription {
            timeslices: self.timeslices,
            vertex_timeslices,
            cells,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A (3,1) cell glued to a (2,2) cell along the timelike triangle {a, b, d}.
    fn two_cell_store() -> (SimplexStore, [VertexKey; 5]) {
        let description = ComplexDescription {
            timeslices: 2,
            vertex_timeslices: vec![0, 0, 0, 1, 1],
            cells: vec![[0, 1, 2, 3], [0, 1, 3, 4]],
        };
        let (store, keys) = SimplexStore::from_description(&description).unwrap();
        (store, [keys[0], keys[1], keys[2], keys[3], keys[4]])
    }

    #[test]
    fn test_from_description_assigns_mutual_neighbors() {
        let (store, _) = two_cell_store();
        assert_eq!(store.number_of_vertices(), 5);
        assert_eq!(store.number_of_cells(), 2);

        let keys: Vec<CellKey> = store.cell_keys().collect();
        let (c0, c1) = (keys[0], keys[1]);
        let cell0 = store.cell(c0).unwrap();
        let shared = cell0.neighbors().iter().filter(|n| **n == Some(c1)).count();
        assert_eq!(shared, 1);

        let i = cell0.neighbors().iter().position(|n| *n == Some(c1)).unwrap();
        let j = store.mirror_facet_index(c0, u8::try_from(i).unwrap()).unwrap();
        assert_eq!(store.cell(c1).unwrap().neighbor(j), Some(c0));
    }

    #[test]
    fn test_cell_types_are_classified_on_insert() {
        let (store, _) = two_cell_store();
        let mut types: Vec<CellType> = store.cells().map(|(_, c)| c.cell_type()).collect();
        types.sort();
        assert_eq!(types, vec![CellType::ThreeOne, CellType::TwoTwo]);
    }

    #[test]
    fn test_remove_referenced_vertex_is_dangling_reference() {
        let (mut store, v) = two_cell_store();
        let generation = store.generation();
        let err = store.remove_vertex(v[0]).unwrap_err();
        assert!(matches!(
            err,
            SimplexStoreError::DanglingReference {
                incident_cells: 2,
                ..
            }
        ));
        assert_eq!(store.generation(), generation);
        assert!(store.contains_vertex(v[0]));
    }

    #[test]
    fn test_remove_cell_clears_back_pointers_and_releases_vertices() {
        let (mut store, v) = two_cell_store();
        let keys: Vec<CellKey> = store.cell_keys().collect();
        let removed = store.remove_cell(keys[0]).unwrap();
        assert_eq!(removed.vertices().len(), 4);

        let survivor = store.cell(keys[1]).unwrap();
        assert!(survivor.neighbors().iter().all(Option::is_none));
        // v[2] belonged only to the (3,1) cell.
        assert_eq!(store.vertex(v[2]).unwrap().incident_cell_count(), 0);
        assert!(store.remove_vertex(v[2]).is_ok());
    }

    #[test]
    fn test_add_cell_rejects_degenerate_vertex_sets() {
        let (mut store, v) = two_cell_store();
        assert!(matches!(
            store.add_cell([v[0], v[0], v[1], v[3]]),
            Err(SimplexStoreError::DegenerateCell { .. })
        ));
        let w = store.add_vertex(0).unwrap();
        assert!(matches!(
            store.add_cell([v[0], v[1], v[2], w]),
            Err(SimplexStoreError::DegenerateCell { .. })
        ));
        assert!(matches!(
            store.add_vertex(2),
            Err(SimplexStoreError::TimesliceOutOfRange { .. })
        ));
    }

    #[test]
    fn test_snapshot_reproduces_description_shape() {
        let (store, _) = two_cell_store();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.timeslices, 2);
        assert_eq!(snapshot.vertex_timeslices.len(), 5);
        assert_eq!(snapshot.cells.len(), 2);

        let (rebuilt, _) = SimplexStore::from_description(&snapshot).unwrap();
        assert_eq!(rebuilt.number_of_cells(), 2);
    }

    #[test]
    fn test_unknown_vertex_index_is_reported() {
        let description = ComplexDescription {
            timeslices: 2,
            vertex_timeslices: vec![0, 0, 0, 1],
            cells: vec![[0, 1, 2, 9]],
        };
        assert!(matches!(
            SimplexStore::from_description(&description),
            Err(SimplexStoreError::UnknownVertexIndex {
                cell_index: 0,
                vertex_index: 9
            })
        ));
    }
}
