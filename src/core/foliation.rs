//! Incrementally maintained counts and incidence for a foliated complex.
//!
//! [`FoliationIndex`] answers, in O(1) or O(local), every query the move matchers and
//! the action need:
//!
//! - global counts `N0`, `N1_TL`, `N1_SL`, `N2_SL`, `N3^(3,1)`, `N3^(2,2)`, `N3^(1,3)`
//! - the cells containing a vertex or an edge, and the cyclic order of an edge link
//! - uniform random access into pools of cells by type, edges by class, and vertices
//! - exact site pools: vertices in six cells, timelike edges in three or four cells
//! - per-slice vertex, spacelike edge and spacelike triangle counts, and per-slab cell
//!   counts (the volume profile)
//!
//! The index is updated by the move mutators with the exact set of inserted and removed
//! cells; it is never rebuilt during normal operation. [`FoliationIndex::build`] exists
//! for ingestion and for the debug-time equivalence check.

use crate::core::cell::{Cell, CellType, EDGE_INDEX_PAIRS};
use crate::core::collections::{
    CellKeyBuffer, CellKeySet, FastHashMap, IndexPool, fast_hash_map_with_capacity,
};
use crate::core::edge::{EdgeClass, EdgeKey};
use crate::core::facet::TriangleKey;
use crate::core::simplex_store::{CellKey, SimplexStore, SimplexStoreError, VertexKey};
use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};

/// Global simplex counts of a complex.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SimplexCounts {
    /// `N0`
    pub vertices: u64,
    /// `N1_TL`
    pub timelike_edges: u64,
    /// `N1_SL`
    pub spacelike_edges: u64,
    /// `N2_SL`
    pub spacelike_triangles: u64,
    /// `N3^(3,1)`
    pub cells_31: u64,
    /// `N3^(2,2)`
    pub cells_22: u64,
    /// `N3^(1,3)`
    pub cells_13: u64,
}

impl SimplexCounts {
    /// Total number of tetrahedra `N3`.
    #[must_use]
    pub const fn cells(&self) -> u64 {
        self.cells_31 + self.cells_22 + self.cells_13
    }

    /// Total number of edges `N1`.
    #[must_use]
    pub const fn edges(&self) -> u64 {
        self.timelike_edges + self.spacelike_edges
    }

    /// Count of one cell type.
    #[must_use]
    pub const fn cells_of(&self, cell_type: CellType) -> u64 {
        match cell_type {
            CellType::ThreeOne => self.cells_31,
            CellType::TwoTwo => self.cells_22,
            CellType::OneThree => self.cells_13,
        }
    }

    /// Count of one edge class.
    #[must_use]
    pub const fn edges_of(&self, class: EdgeClass) -> u64 {
        match class {
            EdgeClass::Timelike => self.timelike_edges,
            EdgeClass::Spacelike => self.spacelike_edges,
        }
    }

    /// Applies a delta, saturating at zero.
    #[must_use]
    pub const fn apply(&self, delta: &CountDelta) -> Self {
        Self {
            vertices: self.vertices.saturating_add_signed(delta.vertices),
            timelike_edges: self.timelike_edges.saturating_add_signed(delta.timelike_edges),
            spacelike_edges: self.spacelike_edges.saturating_add_signed(delta.spacelike_edges),
            spacelike_triangles: self
                .spacelike_triangles
                .saturating_add_signed(delta.spacelike_triangles),
            cells_31: self.cells_31.saturating_add_signed(delta.cells_31),
            cells_22: self.cells_22.saturating_add_signed(delta.cells_22),
            cells_13: self.cells_13.saturating_add_signed(delta.cells_13),
        }
    }
}

/// Signed change in [`SimplexCounts`] produced by a move.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CountDelta {
    /// Change in `N0`.
    pub vertices: i64,
    /// Change in `N1_TL`.
    pub timelike_edges: i64,
    /// Change in `N1_SL`.
    pub spacelike_edges: i64,
    /// Change in `N2_SL`.
    pub spacelike_triangles: i64,
    /// Change in `N3^(3,1)`.
    pub cells_31: i64,
    /// Change in `N3^(2,2)`.
    pub cells_22: i64,
    /// Change in `N3^(1,3)`.
    pub cells_13: i64,
}

impl CountDelta {
    /// Change in total `N3`.
    #[must_use]
    pub const fn cells(&self) -> i64 {
        self.cells_31 + self.cells_22 + self.cells_13
    }

    /// Adds `amount` to the entry for `cell_type`.
    pub const fn add_cell(&mut self, cell_type: CellType, amount: i64) {
        match cell_type {
            CellType::ThreeOne => self.cells_31 += amount,
            CellType::TwoTwo => self.cells_22 += amount,
            CellType::OneThree => self.cells_13 += amount,
        }
    }

    /// Adds `amount` to the entry for `class`.
    pub const fn add_edge(&mut self, class: EdgeClass, amount: i64) {
        match class {
            EdgeClass::Timelike => self.timelike_edges += amount,
            EdgeClass::Spacelike => self.spacelike_edges += amount,
        }
    }

    /// The delta of the inverse move.
    #[must_use]
    pub const fn inverse(&self) -> Self {
        Self {
            vertices: -self.vertices,
            timelike_edges: -self.timelike_edges,
            spacelike_edges: -self.spacelike_edges,
            spacelike_triangles: -self.spacelike_triangles,
            cells_31: -self.cells_31,
            cells_22: -self.cells_22,
            cells_13: -self.cells_13,
        }
    }
}

impl Sub for SimplexCounts {
    type Output = CountDelta;

    fn sub(self, rhs: Self) -> CountDelta {
        let diff = |a: u64, b: u64| {
            i64::try_from(a).unwrap_or(i64::MAX) - i64::try_from(b).unwrap_or(i64::MAX)
        };
        CountDelta {
            vertices: diff(self.vertices, rhs.vertices),
            timelike_edges: diff(self.timelike_edges, rhs.timelike_edges),
            spacelike_edges: diff(self.spacelike_edges, rhs.spacelike_edges),
            spacelike_triangles: diff(self.spacelike_triangles, rhs.spacelike_triangles),
            cells_31: diff(self.cells_31, rhs.cells_31),
            cells_22: diff(self.cells_22, rhs.cells_22),
            cells_13: diff(self.cells_13, rhs.cells_13),
        }
    }
}

impl Add<CountDelta> for SimplexCounts {
    type Output = Self;

    fn add(self, rhs: CountDelta) -> Self {
        self.apply(&rhs)
    }
}

/// Instrumentation counters for index maintenance.
///
/// Lets tests assert that a move touched only the cells it created or destroyed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Cells added to the index.
    pub cells_inserted: u64,
    /// Cells removed from the index.
    pub cells_removed: u64,
    /// Vertices added to the index.
    pub vertices_inserted: u64,
    /// Vertices removed from the index.
    pub vertices_removed: u64,
}

impl IndexStats {
    /// Total number of cell index updates.
    #[must_use]
    pub const fn cell_updates(&self) -> u64 {
        self.cells_inserted + self.cells_removed
    }
}

/// Per-slice statistics of one timeslice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceStats {
    /// Vertices on the slice.
    pub vertices: u64,
    /// Spacelike edges on the slice.
    pub spacelike_edges: u64,
    /// Spacelike triangles on the slice.
    pub spacelike_triangles: u64,
}

/// The cells around an edge in cyclic order.
///
/// Consecutive cells share a facet containing the edge. For an interior edge the last
/// cell also shares a facet with the first and `closed` is `true`; on a boundary edge the
/// sequence runs from one boundary facet to the other.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdgeLink {
    /// Cells in cyclic order.
    pub cells: CellKeyBuffer,
    /// Whether the link closes up.
    pub closed: bool,
}

/// Incremental counts, pools and incidence over a [`SimplexStore`].
#[derive(Clone, Debug)]
pub struct FoliationIndex {
    timeslices: u32,
    cell_pools: [IndexPool<CellKey>; 3],
    edge_pools: [IndexPool<EdgeKey>; 2],
    vertex_pool: IndexPool<VertexKey>,
    /// Vertices contained in exactly six cells.
    six_cell_vertices: IndexPool<VertexKey>,
    /// Timelike edges contained in exactly three and exactly four cells.
    timelike_edge_degree_pools: [IndexPool<EdgeKey>; 2],
    edge_cells: FastHashMap<EdgeKey, CellKeyBuffer>,
    vertex_cells: FastHashMap<VertexKey, CellKeySet>,
    /// Spacelike triangle -> number of cells containing it.
    spacelike_triangles: FastHashMap<TriangleKey, u8>,
    slices: Vec<SliceStats>,
    /// Cell counts per slab `[t, t+1]`, indexed by `t` then by cell type.
    slabs: Vec<[u64; 3]>,
    stats: IndexStats,
}

impl FoliationIndex {
    /// Creates an empty index for `timeslices` slices.
    #[must_use]
    pub fn new(timeslices: u32) -> Self {
        let slices = usize::try_from(timeslices).unwrap_or_default();
        Self {
            timeslices,
            cell_pools: Default::default(),
            edge_pools: Default::default(),
            vertex_pool: IndexPool::default(),
            six_cell_vertices: IndexPool::default(),
            timelike_edge_degree_pools: Default::default(),
            edge_cells: FastHashMap::default(),
            vertex_cells: FastHashMap::default(),
            spacelike_triangles: FastHashMap::default(),
            slices: vec![SliceStats::default(); slices],
            slabs: vec![[0; 3]; slices],
            stats: IndexStats::default(),
        }
    }

    /// Builds the index from scratch.
    ///
    /// # Errors
    ///
    /// Returns an error if a cell references a vertex missing from the store.
    pub fn build(store: &SimplexStore) -> Result<Self, SimplexStoreError> {
        let mut index = Self::new(store.timeslices());
        index.edge_cells = fast_hash_map_with_capacity(store.number_of_cells() * 2);
        index.vertex_cells = fast_hash_map_with_capacity(store.number_of_vertices());
        for (key, vertex) in store.vertices() {
            index.insert_vertex(key, vertex.timeslice());
        }
        for (key, cell) in store.cells() {
            let slices = store.cell_timeslices(cell.vertices())?;
            index.insert_cell(key, cell, slices);
        }
        index.stats = IndexStats::default();
        Ok(index)
    }

    // =========================================================================
    // INCREMENTAL UPDATES
    // =========================================================================

    pub(crate) fn insert_vertex(&mut self, key: VertexKey, timeslice: u32) {
        if self.vertex_pool.insert(key) {
            self.vertex_cells.entry(key).or_default();
            if let Some(slice) = self.slice_mut(timeslice) {
                slice.vertices += 1;
            }
            self.stats.vertices_inserted += 1;
        }
    }

    pub(crate) fn remove_vertex(&mut self, key: VertexKey, timeslice: u32) {
        if self.vertex_pool.swap_remove(&key) {
            self.vertex_cells.remove(&key);
            self.six_cell_vertices.swap_remove(&key);
            if let Some(slice) = self.slice_mut(timeslice) {
                slice.vertices = slice.vertices.saturating_sub(1);
            }
            self.stats.vertices_removed += 1;
        }
    }

    /// Registers a cell. `slices` are the timeslices of `cell.vertices()`.
    pub(crate) fn insert_cell(&mut self, key: CellKey, cell: &Cell, slices: [u32; 4]) {
        let vertices = cell.vertices();
        self.cell_pools[cell.cell_type().index()].insert(key);
        if let Some(slab) = self.slab_mut(cell.lower_slice()) {
            slab[cell.cell_type().index()] += 1;
        }
        for &v in vertices {
            let star = self.vertex_cells.entry(v).or_default();
            star.insert(key);
            let degree = star.len();
            self.track_vertex_degree(v, degree);
        }
        for &(i, j) in &EDGE_INDEX_PAIRS {
            let edge = EdgeKey::new(vertices[i], vertices[j]);
            let entry = self.edge_cells.entry(edge).or_default();
            entry.push(key);
            let degree = entry.len();
            if degree == 1 {
                self.register_edge(edge, slices[i], slices[j], 1);
            }
            if EdgeClass::from_timeslices(slices[i], slices[j]) == Some(EdgeClass::Timelike) {
                self.track_timelike_edge_degree(edge, degree);
            }
        }
        for facet in 0..4u8 {
            if let Some(t) = spacelike_facet_slice(slices, facet) {
                let count = self.spacelike_triangles.entry(cell.facet_key(facet)).or_insert(0);
                *count += 1;
                if *count == 1
                    && let Some(slice) = self.slice_mut(t)
                {
                    slice.spacelike_triangles += 1;
                }
            }
        }
        self.stats.cells_inserted += 1;
    }

    /// Unregisters a cell. Must be called with the same data passed to `insert_cell`.
    pub(crate) fn remove_cell(&mut self, key: CellKey, cell: &Cell, slices: [u32; 4]) {
        let vertices = cell.vertices();
        if !self.cell_pools[cell.cell_type().index()].swap_remove(&key) {
            return;
        }
        if let Some(slab) = self.slab_mut(cell.lower_slice()) {
            let count = &mut slab[cell.cell_type().index()];
            *count = count.saturating_sub(1);
        }
        for &v in vertices {
            if let Some(set) = self.vertex_cells.get_mut(&v) {
                set.remove(&key);
                let degree = set.len();
                self.track_vertex_degree(v, degree);
            }
        }
        for &(i, j) in &EDGE_INDEX_PAIRS {
            let edge = EdgeKey::new(vertices[i], vertices[j]);
            let Some(degree) = self.edge_cells.get_mut(&edge).map(|cells| {
                if let Some(pos) = cells.iter().position(|&c| c == key) {
                    cells.swap_remove(pos);
                }
                cells.len()
            }) else {
                continue;
            };
            if EdgeClass::from_timeslices(slices[i], slices[j]) == Some(EdgeClass::Timelike) {
                self.track_timelike_edge_degree(edge, degree);
            }
            if degree == 0 {
                self.edge_cells.remove(&edge);
                self.register_edge(edge, slices[i], slices[j], -1);
            }
        }
        for facet in 0..4u8 {
            if let Some(t) = spacelike_facet_slice(slices, facet) {
                let triangle = cell.facet_key(facet);
                let gone = self.spacelike_triangles.get_mut(&triangle).is_some_and(|count| {
                    *count = count.saturating_sub(1);
                    *count == 0
                });
                if gone {
                    self.spacelike_triangles.remove(&triangle);
                    if let Some(slice) = self.slice_mut(t) {
                        slice.spacelike_triangles = slice.spacelike_triangles.saturating_sub(1);
                    }
                }
            }
        }
        self.stats.cells_removed += 1;
    }

    fn track_vertex_degree(&mut self, v: VertexKey, degree: usize) {
        if degree == 6 {
            self.six_cell_vertices.insert(v);
        } else {
            self.six_cell_vertices.swap_remove(&v);
        }
    }

    fn track_timelike_edge_degree(&mut self, edge: EdgeKey, degree: usize) {
        for (slot, pool) in self.timelike_edge_degree_pools.iter_mut().enumerate() {
            if degree == slot + 3 {
                pool.insert(edge);
            } else {
                pool.swap_remove(&edge);
            }
        }
    }

    fn register_edge(&mut self, edge: EdgeKey, a: u32, b: u32, sign: i8) {
        let Some(class) = EdgeClass::from_timeslices(a, b) else {
            return;
        };
        let pool = &mut self.edge_pools[class.index()];
        if sign > 0 {
            pool.insert(edge);
        } else {
            pool.swap_remove(&edge);
        }
        if class == EdgeClass::Spacelike
            && let Some(slice) = self.slice_mut(a)
        {
            if sign > 0 {
                slice.spacelike_edges += 1;
            } else {
                slice.spacelike_edges = slice.spacelike_edges.saturating_sub(1);
            }
        }
    }

    fn slice_mut(&mut self, t: u32) -> Option<&mut SliceStats> {
        self.slices.get_mut(usize::try_from(t).ok()?)
    }

    fn slab_mut(&mut self, t: u32) -> Option<&mut [u64; 3]> {
        self.slabs.get_mut(usize::try_from(t).ok()?)
    }

    // =========================================================================
    // COUNTS
    // =========================================================================

    /// All global counts.
    #[must_use]
    pub fn counts(&self) -> SimplexCounts {
        SimplexCounts {
            vertices: self.vertex_pool.len() as u64,
            timelike_edges: self.count_edges(EdgeClass::Timelike),
            spacelike_edges: self.count_edges(EdgeClass::Spacelike),
            spacelike_triangles: self.spacelike_triangles.len() as u64,
            cells_31: self.count_cells(CellType::ThreeOne),
            cells_22: self.count_cells(CellType::TwoTwo),
            cells_13: self.count_cells(CellType::OneThree),
        }
    }

    /// Number of cells of one type.
    #[must_use]
    pub fn count_cells(&self, cell_type: CellType) -> u64 {
        self.cell_pools[cell_type.index()].len() as u64
    }

    /// Number of edges of one class.
    #[must_use]
    pub fn count_edges(&self, class: EdgeClass) -> u64 {
        self.edge_pools[class.index()].len() as u64
    }

    /// Number of timeslices.
    #[must_use]
    pub const fn timeslices(&self) -> u32 {
        self.timeslices
    }

    /// Statistics of one slice.
    #[must_use]
    pub fn slice_stats(&self, t: u32) -> Option<SliceStats> {
        self.slices.get(usize::try_from(t).ok()?).copied()
    }

    /// Cells per slab `[t, t+1]`, by type.
    #[must_use]
    pub fn slab_cells(&self, t: u32) -> Option<[u64; 3]> {
        self.slabs.get(usize::try_from(t).ok()?).copied()
    }

    /// Total cell count per slab, indexed by lower slice.
    #[must_use]
    pub fn volume_profile(&self) -> Vec<u64> {
        self.slabs.iter().map(|slab| slab.iter().sum()).collect()
    }

    /// Instrumentation counters since the last build.
    #[must_use]
    pub const fn stats(&self) -> IndexStats {
        self.stats
    }

    // =========================================================================
    // INCIDENCE
    // =========================================================================

    /// The type of a live cell, found through pool membership.
    #[must_use]
    pub fn classify_cell(&self, key: CellKey) -> Option<CellType> {
        CellType::ALL
            .into_iter()
            .find(|t| self.cell_pools[t.index()].contains(&key))
    }

    /// The class of an existing edge `(a, b)`.
    #[must_use]
    pub fn classify_edge(&self, a: VertexKey, b: VertexKey) -> Option<EdgeClass> {
        let edge = EdgeKey::new(a, b);
        EdgeClass::ALL
            .into_iter()
            .find(|c| self.edge_pools[c.index()].contains(&edge))
    }

    /// Cells containing `v`.
    #[must_use]
    pub fn cells_incident_to(&self, v: VertexKey) -> Option<&CellKeySet> {
        self.vertex_cells.get(&v)
    }

    /// Cells containing an edge, in no particular order.
    #[must_use]
    pub fn edge_cells(&self, edge: EdgeKey) -> &[CellKey] {
        self.edge_cells
            .get(&edge)
            .map(|cells| cells.as_slice())
            .unwrap_or(&[])
    }

    /// Returns `true` if some cell contains edge `(a, b)`.
    #[must_use]
    pub fn contains_edge(&self, a: VertexKey, b: VertexKey) -> bool {
        self.edge_cells.contains_key(&EdgeKey::new(a, b))
    }

    /// Returns `true` if some cell contains the triangle `{a, b, c}`.
    #[must_use]
    pub fn contains_triangle(&self, a: VertexKey, b: VertexKey, c: VertexKey) -> bool {
        let Some(star) = self.vertex_cells.get(&c) else {
            return false;
        };
        self.edge_cells(EdgeKey::new(a, b))
            .iter()
            .any(|cell| star.contains(cell))
    }

    /// Number of cells containing a spacelike triangle (0, 1 or 2).
    #[must_use]
    pub fn spacelike_triangle_multiplicity(&self, triangle: &TriangleKey) -> u8 {
        self.spacelike_triangles.get(triangle).copied().unwrap_or(0)
    }

    /// The cells around edge `(a, b)` in cyclic order.
    ///
    /// # Errors
    ///
    /// Returns [`SimplexStoreError::MissingCell`] if the index references a cell that the
    /// store no longer holds.
    pub fn cells_sharing_edge(
        &self,
        store: &SimplexStore,
        a: VertexKey,
        b: VertexKey,
    ) -> Result<EdgeLink, SimplexStoreError> {
        let unordered = self.edge_cells(EdgeKey::new(a, b));
        let Some(&start) = unordered.first() else {
            return Ok(EdgeLink {
                cells: CellKeyBuffer::new(),
                closed: false,
            });
        };
        let limit = unordered.len();

        let start_cell = store.try_cell(start)?;
        let Some((x, y)) = start_cell.opposite_edge(a, b) else {
            return Err(SimplexStoreError::MissingCell { cell_key: start });
        };

        let mut forward = CellKeyBuffer::new();
        forward.push(start);
        let (tail, closed) =
            walk_edge_link(store, a, b, start, neighbor_opposite(start_cell, x), limit)?;
        forward.extend(tail);
        if closed {
            return Ok(EdgeLink {
                cells: forward,
                closed: true,
            });
        }

        let (backward, _) =
            walk_edge_link(store, a, b, start, neighbor_opposite(start_cell, y), limit)?;
        let mut cells: CellKeyBuffer = backward.into_iter().rev().collect();
        cells.extend(forward);
        Ok(EdgeLink {
            cells,
            closed: false,
        })
    }

    // =========================================================================
    // POOLS
    // =========================================================================

    /// Cells of one type, for uniform sampling.
    #[must_use]
    pub fn cell_pool(&self, cell_type: CellType) -> &IndexPool<CellKey> {
        &self.cell_pools[cell_type.index()]
    }

    /// Edges of one class, for uniform sampling.
    #[must_use]
    pub fn edge_pool(&self, class: EdgeClass) -> &IndexPool<EdgeKey> {
        &self.edge_pools[class.index()]
    }

    /// All vertices, for uniform sampling.
    #[must_use]
    pub const fn vertex_pool(&self) -> &IndexPool<VertexKey> {
        &self.vertex_pool
    }

    /// Vertices contained in exactly six cells.
    #[must_use]
    pub const fn six_cell_vertices(&self) -> &IndexPool<VertexKey> {
        &self.six_cell_vertices
    }

    /// Timelike edges contained in exactly `degree` cells, for `degree` 3 or 4.
    ///
    /// Returns `None` for any other degree.
    #[must_use]
    pub fn timelike_edges_of_degree(&self, degree: usize) -> Option<&IndexPool<EdgeKey>> {
        self.timelike_edge_degree_pools.get(degree.checked_sub(3)?)
    }

    // =========================================================================
    // CONSISTENCY
    // =========================================================================

    /// Compares two indices as sets, ignoring pool order and instrumentation.
    ///
    /// Returns a description of the first difference found.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Option<String> {
        if self.counts() != other.counts() {
            return Some(format!(
                "counts differ: {:?} vs {:?}",
                self.counts(),
                other.counts()
            ));
        }
        if self.slices != other.slices {
            return Some("per-slice statistics differ".to_string());
        }
        if self.slabs != other.slabs {
            return Some("per-slab cell counts differ".to_string());
        }
        for t in CellType::ALL {
            let (mine, theirs) = (&self.cell_pools[t.index()], &other.cell_pools[t.index()]);
            if mine.iter().any(|c| !theirs.contains(c)) {
                return Some(format!("{t} cell pools differ"));
            }
        }
        for c in EdgeClass::ALL {
            let (mine, theirs) = (&self.edge_pools[c.index()], &other.edge_pools[c.index()]);
            if mine.iter().any(|e| !theirs.contains(e)) {
                return Some(format!("{c} edge pools differ"));
            }
        }
        if self.vertex_pool.iter().any(|v| !other.vertex_pool.contains(v)) {
            return Some("vertex pools differ".to_string());
        }
        if self.six_cell_vertices.len() != other.six_cell_vertices.len()
            || self
                .six_cell_vertices
                .iter()
                .any(|v| !other.six_cell_vertices.contains(v))
        {
            return Some("six-cell vertex pools differ".to_string());
        }
        for (mine, theirs) in self
            .timelike_edge_degree_pools
            .iter()
            .zip(&other.timelike_edge_degree_pools)
        {
            if mine.len() != theirs.len() || mine.iter().any(|e| !theirs.contains(e)) {
                return Some("timelike edge degree pools differ".to_string());
            }
        }
        for (edge, cells) in &self.edge_cells {
            let theirs = other.edge_cells(*edge);
            if cells.len() != theirs.len() || cells.iter().any(|c| !theirs.contains(c)) {
                return Some(format!("incidence of edge {edge:?} differs"));
            }
        }
        for (v, cells) in &self.vertex_cells {
            if other.vertex_cells.get(v) != Some(cells) {
                return Some(format!("star of vertex {v:?} differs"));
            }
        }
        if self.spacelike_triangles != other.spacelike_triangles {
            return Some("spacelike triangle multiplicities differ".to_string());
        }
        None
    }
}

/// Slice of facet `facet` if all three of its vertices share a slice.
fn spacelike_facet_slice(slices: [u32; 4], facet: u8) -> Option<u32> {
    let skip = usize::from(facet);
    let mut rest = slices
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != skip)
        .map(|(_, &s)| s);
    let first = rest.next()?;
    rest.all(|s| s == first).then_some(first)
}

fn neighbor_opposite(cell: &Cell, v: VertexKey) -> Option<CellKey> {
    cell.vertex_index(v).and_then(|i| cell.neighbor(i))
}

/// Walks around edge `(a, b)` from `start` through `next`, stopping at a boundary facet
/// or when the walk returns to `start`.
fn walk_edge_link(
    store: &SimplexStore,
    a: VertexKey,
    b: VertexKey,
    start: CellKey,
    mut next: Option<CellKey>,
    limit: usize,
) -> Result<(CellKeyBuffer, bool), SimplexStoreError> {
    let mut visited = CellKeyBuffer::new();
    let mut prev = start;
    while let Some(current) = next {
        if current == start {
            return Ok((visited, true));
        }
        if visited.len() >= limit {
            // Neighbour pointers disagree with incidence; stop rather than loop.
            break;
        }
        visited.push(current);
        let cell = store.try_cell(current)?;
        let Some((p, q)) = cell.opposite_edge(a, b) else {
            break;
        };
        let via_p = neighbor_opposite(cell, p);
        next = if via_p == Some(prev) {
            neighbor_opposite(cell, q)
        } else {
            via_p
        };
        prev = current;
    }
    Ok((visited, false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::simplex_store::ComplexDescription;

    fn two_cell_store() -> SimplexStore {
        let description = ComplexDescription {
            timeslices: 2,
            vertex_timeslices: vec![0, 0, 0, 1, 1],
            cells: vec![[0, 1, 2, 3], [0, 1, 3, 4]],
        };
        SimplexStore::from_description(&description).unwrap().0
    }

    #[test]
    fn test_build_counts_two_cell_complex() {
        let store = two_cell_store();
        let index = FoliationIndex::build(&store).unwrap();
        let counts = index.counts();

        assert_eq!(counts.vertices, 5);
        assert_eq!(counts.cells_31, 1);
        assert_eq!(counts.cells_22, 1);
        assert_eq!(counts.cells_13, 0);
        // Spacelike: 01, 02, 12 on slice 0 and 34 on slice 1.
        assert_eq!(counts.spacelike_edges, 4);
        // Timelike: 03, 13, 23, 04, 14.
        assert_eq!(counts.timelike_edges, 5);
        assert_eq!(counts.spacelike_triangles, 1);
        assert_eq!(index.volume_profile(), vec![2, 0]);
        assert_eq!(index.stats(), IndexStats::default());
    }

    #[test]
    fn test_edge_link_of_shared_timelike_edge_is_open() {
        let store = two_cell_store();
        let index = FoliationIndex::build(&store).unwrap();
        let keys: Vec<VertexKey> = store.vertices().map(|(k, _)| k).collect();

        let link = index.cells_sharing_edge(&store, keys[0], keys[3]).unwrap();
        assert_eq!(link.cells.len(), 2);
        assert!(!link.closed);

        let lonely = index.cells_sharing_edge(&store, keys[2], keys[3]).unwrap();
        assert_eq!(lonely.cells.len(), 1);
    }

    #[test]
    fn test_triangle_and_edge_queries() {
        let store = two_cell_store();
        let index = FoliationIndex::build(&store).unwrap();
        let k: Vec<VertexKey> = store.vertices().map(|(k, _)| k).collect();

        assert!(index.contains_edge(k[0], k[4]));
        assert!(!index.contains_edge(k[2], k[4]));
        assert!(index.contains_triangle(k[0], k[1], k[3]));
        assert!(!index.contains_triangle(k[0], k[2], k[4]));
        assert_eq!(index.classify_edge(k[3], k[4]), Some(EdgeClass::Spacelike));
        assert_eq!(index.cells_incident_to(k[0]).map(CellKeySet::len), Some(2));
    }

    #[test]
    fn test_incremental_remove_matches_rebuild() {
        let mut store = two_cell_store();
        let mut index = FoliationIndex::build(&store).unwrap();
        let key = index.cell_pool(CellType::TwoTwo)[0];
        let cell = store.cell(key).unwrap().clone();
        let slices = store.cell_timeslices(cell.vertices()).unwrap();

        index.remove_cell(key, &cell, slices);
        store.remove_cell(key).unwrap();
        let rebuilt = FoliationIndex::build(&store).unwrap();

        assert_eq!(index.difference(&rebuilt), None);
        assert_eq!(index.stats().cells_removed, 1);
        assert_eq!(index.counts().timelike_edges, 3);
    }

    #[test]
    fn test_count_delta_inverse_and_apply() {
        let delta = CountDelta {
            vertices: 1,
            cells_31: 2,
            cells_13: 2,
            ..CountDelta::default()
        };
        let before = SimplexCounts {
            vertices: 5,
            cells_31: 4,
            cells_13: 4,
            ..SimplexCounts::default()
        };
        let after = before + delta;
        assert_eq!(after - before, delta);
        assert_eq!(after.apply(&delta.inverse()), before);
        assert_eq!(delta.cells(), 4);
    }
}
