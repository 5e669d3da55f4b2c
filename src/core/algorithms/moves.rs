//! Foliation-preserving ergodic moves for 3D causal triangulations.
//!
//! Each move replaces a small cavity of cells by another triangulation of the same
//! boundary, so topology and the foliation are preserved:
//!
//! | move  | removes                         | inserts                          | net effect            |
//! |-------|---------------------------------|----------------------------------|-----------------------|
//! | (2,3) | (2,2) + (3,1)/(1,3) on a shared timelike triangle | 3 cells around a new timelike edge | +1 (2,2), +1 `N1_TL` |
//! | (3,2) | 3 cells around a timelike edge  | 2 cells on a new triangle        | inverse of (2,3)      |
//! | (2,6) | (3,1) + (1,3) on a spacelike triangle | 6 cells around a new vertex | +1 vertex, +2 (3,1), +2 (1,3) |
//! | (6,2) | the 6 cells around a vertex     | 2 cells                          | inverse of (2,6)      |
//! | (4,4) | 4 cells around a timelike edge  | 4 cells around a timelike ring diagonal | cell types unchanged |
//!
//! Every move is split into a read-only **matcher** that builds a [`MovePlan`] and a
//! **mutator** that commits it. A plan captures the exact cells to remove, the vertex
//! sets to insert and the resulting [`CountDelta`], so the Metropolis step can compute
//! `ΔS` before touching the store and simply drop the plan on rejection.
//!
//! Commits follow the cavity-rewiring pattern: record the external neighbour across every
//! boundary facet of the removed cells, insert the new cells, match facets among the new
//! cells, attach the remaining ones to the recorded externals, and only then delete the
//! old cells.
//!
//! # References
//! - Ambjørn, Jurkiewicz & Loll (2001), "Nonperturbative 3d Lorentzian quantum
//!   gravity", Phys. Rev. D 64, 044011 (hep-th/0011276)

use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use slotmap::Key;
use std::fmt;
use thiserror::Error;

use crate::core::cell::{CellType, classify_timeslices};
use crate::core::collections::{
    CellKeyBuffer, FacetIndex, FastHashMap, IndexPool, SmallBuffer, VertexKeyBuffer,
    fast_hash_map_with_capacity,
};
use crate::core::edge::{EdgeClass, EdgeKey};
use crate::core::facet::{FacetHandle, TriangleKey};
use crate::core::foliation::CountDelta;
use crate::core::simplex_store::{CellKey, SimplexStore, SimplexStoreError, VertexKey};
use crate::core::triangulation::Triangulation;
use crate::topology::manifold::InvariantViolation;

/// Default number of rejection-sampling draws before falling back to an exhaustive scan.
pub const DEFAULT_MAX_SITE_DRAWS: u32 = 64;

/// The five ergodic moves.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MoveKind {
    /// (2,3): two cells on a timelike triangle become three around a timelike edge.
    TwoThree,
    /// (3,2): inverse of (2,3).
    ThreeTwo,
    /// (2,6): a vertex is inserted into a spacelike triangle.
    TwoSix,
    /// (6,2): inverse of (2,6).
    SixTwo,
    /// (4,4): the timelike edge inside an octahedron is replaced by a timelike ring diagonal.
    FourFour,
}

impl MoveKind {
    /// All moves, in weight-vector order.
    pub const ALL: [Self; 5] = [
        Self::TwoThree,
        Self::ThreeTwo,
        Self::TwoSix,
        Self::SixTwo,
        Self::FourFour,
    ];

    /// Dense index used for per-move arrays.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::TwoThree => 0,
            Self::ThreeTwo => 1,
            Self::TwoSix => 2,
            Self::SixTwo => 3,
            Self::FourFour => 4,
        }
    }

    /// The move that undoes this one.
    #[must_use]
    pub const fn inverse(self) -> Self {
        match self {
            Self::TwoThree => Self::ThreeTwo,
            Self::ThreeTwo => Self::TwoThree,
            Self::TwoSix => Self::SixTwo,
            Self::SixTwo => Self::TwoSix,
            Self::FourFour => Self::FourFour,
        }
    }
}

impl fmt::Display for MoveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::TwoThree => "(2,3)",
            Self::ThreeTwo => "(3,2)",
            Self::TwoSix => "(2,6)",
            Self::SixTwo => "(6,2)",
            Self::FourFour => "(4,4)",
        };
        f.write_str(label)
    }
}

/// Where a move is applied.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MoveSite {
    /// (2,3): a (2,2) cell and the facet it shares with a (3,1) or (1,3) cell.
    TimelikeFacet(FacetHandle),
    /// (3,2): a timelike edge with exactly three incident cells.
    TimelikeEdge(EdgeKey),
    /// (2,6): a (3,1) or (1,3) cell and the index of its apex, i.e. the facet opposite
    /// is the spacelike base triangle.
    SpacelikeFacet(FacetHandle),
    /// (6,2): a vertex with exactly six incident cells.
    Vertex(VertexKey),
    /// (4,4): a timelike edge with four incident cells and the ring diagonal that replaces it.
    EdgeFlip {
        /// The edge removed.
        edge: EdgeKey,
        /// The edge inserted.
        diagonal: EdgeKey,
    },
}

impl MoveSite {
    /// The move this site belongs to.
    #[must_use]
    pub const fn kind(&self) -> MoveKind {
        match self {
            Self::TimelikeFacet(_) => MoveKind::TwoThree,
            Self::TimelikeEdge(_) => MoveKind::ThreeTwo,
            Self::SpacelikeFacet(_) => MoveKind::TwoSix,
            Self::Vertex(_) => MoveKind::SixTwo,
            Self::EdgeFlip { .. } => MoveKind::FourFour,
        }
    }
}

/// Errors raised by matchers and mutators.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum MoveError {
    /// The site does not satisfy the move's preconditions, or no site exists at all.
    #[error("No valid {kind} site: {reason}")]
    NoValidSite {
        /// The move attempted.
        kind: MoveKind,
        /// Which precondition failed.
        reason: &'static str,
    },
    /// The plan was built against an older version of the complex.
    #[error("Stale {kind} plan: built at generation {planned}, complex is at {current}")]
    StalePlan {
        /// The move planned.
        kind: MoveKind,
        /// Store generation when planned.
        planned: u64,
        /// Store generation now.
        current: u64,
    },
    /// An arena operation failed (stale key, dangling vertex reference, ...).
    #[error(transparent)]
    Store(#[from] SimplexStoreError),
    /// Cavity rewiring found the new cells inconsistent with the recorded boundary.
    #[error("Neighbour wiring failed during {kind}: {message}")]
    NeighborWiring {
        /// The move being committed.
        kind: MoveKind,
        /// What did not match.
        message: String,
    },
    /// Post-commit validation failed.
    #[error("{kind} left the complex invalid: {violation}")]
    InvariantViolation {
        /// The move committed.
        kind: MoveKind,
        /// The broken invariant.
        #[source]
        violation: InvariantViolation,
    },
}

impl MoveError {
    /// Returns `true` for [`MoveError::NoValidSite`].
    #[must_use]
    pub const fn is_no_valid_site(&self) -> bool {
        matches!(self, Self::NoValidSite { .. })
    }
}

const fn no_site(kind: MoveKind, reason: &'static str) -> MoveError {
    MoveError::NoValidSite { kind, reason }
}

/// A vertex of a cell to be inserted.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
enum PlannedVertex {
    Existing(VertexKey),
    /// The vertex created by the move itself.
    Inserted,
}

type PlannedCell = [PlannedVertex; 4];

/// A fully checked, not yet committed move.
///
/// Holding a plan does not borrow the complex; committing a plan built against an
/// older generation fails with [`MoveError::StalePlan`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MovePlan {
    site: MoveSite,
    removed_cells: CellKeyBuffer,
    new_cells: SmallBuffer<PlannedCell, 8>,
    inserted_vertex: Option<u32>,
    removed_vertex: Option<VertexKey>,
    delta: CountDelta,
    generation: u64,
}

impl MovePlan {
    /// The move.
    #[must_use]
    pub const fn kind(&self) -> MoveKind {
        self.site.kind()
    }

    /// The site the plan was built for.
    #[must_use]
    pub const fn site(&self) -> &MoveSite {
        &self.site
    }

    /// Change in global counts if committed.
    #[must_use]
    pub const fn delta(&self) -> &CountDelta {
        &self.delta
    }

    /// Cells that will be removed.
    #[must_use]
    pub fn removed_cells(&self) -> &[CellKey] {
        &self.removed_cells
    }

    /// Number of cells that will be inserted.
    #[must_use]
    pub fn new_cell_count(&self) -> usize {
        self.new_cells.len()
    }

    /// Timeslice of the vertex the move inserts, if any.
    #[must_use]
    pub const fn inserted_vertex_timeslice(&self) -> Option<u32> {
        self.inserted_vertex
    }

    /// Vertex the move removes, if any.
    #[must_use]
    pub const fn removed_vertex(&self) -> Option<VertexKey> {
        self.removed_vertex
    }
}

/// Outcome of a committed move.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MoveInfo {
    /// The move.
    pub kind: MoveKind,
    /// Cells removed (keys are now stale).
    pub removed_cells: CellKeyBuffer,
    /// Cells inserted.
    pub new_cells: CellKeyBuffer,
    /// Vertex inserted, for (2,6).
    pub inserted_vertex: Option<VertexKey>,
    /// Vertex removed, for (6,2).
    pub removed_vertex: Option<VertexKey>,
    /// Change in global counts.
    pub delta: CountDelta,
}

/// Matchers, samplers and mutators for the five moves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MoveCatalog {
    max_site_draws: u32,
    validate_moves: bool,
}

impl Default for MoveCatalog {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SITE_DRAWS, cfg!(debug_assertions))
    }
}

impl MoveCatalog {
    /// Creates a catalog.
    ///
    /// `max_site_draws` bounds rejection sampling before the exhaustive fallback;
    /// `validate_moves` runs full validation after every commit.
    #[must_use]
    pub const fn new(max_site_draws: u32, validate_moves: bool) -> Self {
        Self {
            max_site_draws,
            validate_moves,
        }
    }

    /// Whether commits are followed by full validation.
    #[must_use]
    pub const fn validates_moves(&self) -> bool {
        self.validate_moves
    }

    /// Checks a site and builds a plan. Does not modify the complex.
    ///
    /// # Errors
    ///
    /// Returns [`MoveError::NoValidSite`] if the site does not satisfy the move's
    /// preconditions, or [`MoveError::Store`] for stale handles.
    pub fn plan(&self, tri: &Triangulation, site: MoveSite) -> Result<MovePlan, MoveError> {
        match site {
            MoveSite::TimelikeFacet(handle) => plan_two_three(tri, handle),
            MoveSite::TimelikeEdge(edge) => plan_three_two(tri, edge),
            MoveSite::SpacelikeFacet(handle) => plan_two_six(tri, handle),
            MoveSite::Vertex(v) => plan_six_two(tri, v),
            MoveSite::EdgeFlip { edge, diagonal } => plan_four_four(tri, edge, diagonal),
        }
    }

    /// Draws a valid site uniformly among all valid sites of `kind`.
    ///
    /// Candidates are drawn uniformly from the move's pool; a candidate maps to at most
    /// one site and each site to exactly one candidate, so accepting the first valid
    /// draw is uniform. The pools are kept by incidence degree (six-cell vertices,
    /// timelike edges in three or four cells), so nearly every candidate is a site.
    /// After `max_site_draws` misses the remaining choice is made by scanning the pool,
    /// so [`MoveError::NoValidSite`] means no site exists.
    ///
    /// # Errors
    ///
    /// Returns [`MoveError::NoValidSite`] if the complex has no valid site for `kind`.
    pub fn sample_site<R: Rng + ?Sized>(
        &self,
        tri: &Triangulation,
        kind: MoveKind,
        rng: &mut R,
    ) -> Result<MovePlan, MoveError> {
        let candidates = candidate_count(tri, kind);
        if candidates == 0 {
            return Err(no_site(kind, "the candidate pool is empty"));
        }

        for _ in 0..self.max_site_draws {
            let n = rng.random_range(0..candidates);
            if let Some(plan) = self.plan_candidate(tri, kind, n)? {
                return Ok(plan);
            }
        }

        tracing::trace!(
            "[moves] {kind}: {} draws missed, scanning {candidates} candidates",
            self.max_site_draws
        );
        let mut plans = Vec::new();
        for n in 0..candidates {
            if let Some(plan) = self.plan_candidate(tri, kind, n)? {
                plans.push(plan);
            }
        }
        if plans.is_empty() {
            return Err(no_site(kind, "no site satisfies the move preconditions"));
        }
        let chosen = rng.random_range(0..plans.len());
        Ok(plans.swap_remove(chosen))
    }

    /// All valid sites of `kind`, in pool order.
    ///
    /// # Errors
    ///
    /// Returns an error only if the index and store disagree.
    pub fn enumerate_sites(
        &self,
        tri: &Triangulation,
        kind: MoveKind,
    ) -> Result<Vec<MoveSite>, MoveError> {
        let mut sites = Vec::new();
        for n in 0..candidate_count(tri, kind) {
            if let Some(plan) = self.plan_candidate(tri, kind, n)? {
                sites.push(plan.site);
            }
        }
        Ok(sites)
    }

    /// Parallel [`enumerate_sites`](Self::enumerate_sites); same result and order.
    ///
    /// # Errors
    ///
    /// Returns an error only if the index and store disagree.
    pub fn par_enumerate_sites(
        &self,
        tri: &Triangulation,
        kind: MoveKind,
    ) -> Result<Vec<MoveSite>, MoveError> {
        let found: Vec<Option<MovePlan>> = (0..candidate_count(tri, kind))
            .into_par_iter()
            .map(|n| self.plan_candidate(tri, kind, n))
            .collect::<Result<_, _>>()?;
        Ok(found.into_iter().flatten().map(|plan| plan.site).collect())
    }

    /// Commits a plan.
    ///
    /// # Errors
    ///
    /// Returns [`MoveError::StalePlan`] if the complex changed since planning,
    /// [`MoveError::Store`] or [`MoveError::NeighborWiring`] on internal inconsistency,
    /// and [`MoveError::InvariantViolation`] if validation is enabled and fails.
    pub fn apply(&self, tri: &mut Triangulation, plan: &MovePlan) -> Result<MoveInfo, MoveError> {
        let info = commit(tri, plan)?;
        tracing::trace!(
            "[moves] committed {}: -{} +{} cells, delta={:?}",
            info.kind,
            info.removed_cells.len(),
            info.new_cells.len(),
            info.delta
        );
        if self.validate_moves {
            tri.validate()
                .map_err(|violation| MoveError::InvariantViolation {
                    kind: info.kind,
                    violation,
                })?;
        }
        Ok(info)
    }

    /// Plans and commits a move at `site`.
    ///
    /// On [`MoveError::NoValidSite`] the complex is unchanged.
    ///
    /// # Errors
    ///
    /// See [`plan`](Self::plan) and [`apply`](Self::apply).
    pub fn apply_at(&self, tri: &mut Triangulation, site: MoveSite) -> Result<MoveInfo, MoveError> {
        let plan = self.plan(tri, site)?;
        self.apply(tri, &plan)
    }

    /// Samples a site uniformly and commits the move there.
    ///
    /// # Errors
    ///
    /// See [`sample_site`](Self::sample_site) and [`apply`](Self::apply).
    pub fn apply_random<R: Rng + ?Sized>(
        &self,
        tri: &mut Triangulation,
        kind: MoveKind,
        rng: &mut R,
    ) -> Result<MoveInfo, MoveError> {
        let plan = self.sample_site(tri, kind, rng)?;
        self.apply(tri, &plan)
    }

    /// Plans candidate `n`, mapping precondition failures to `None`.
    fn plan_candidate(
        &self,
        tri: &Triangulation,
        kind: MoveKind,
        n: usize,
    ) -> Result<Option<MovePlan>, MoveError> {
        let Some(site) = candidate_site(tri, kind, n)? else {
            return Ok(None);
        };
        match self.plan(tri, site) {
            Ok(plan) => Ok(Some(plan)),
            Err(MoveError::NoValidSite { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

// =============================================================================
// CANDIDATE POOLS
// =============================================================================

/// Number of candidates for `kind`; valid sites are a subset.
fn candidate_count(tri: &Triangulation, kind: MoveKind) -> usize {
    let index = tri.index();
    match kind {
        MoveKind::TwoThree => index.cell_pool(CellType::TwoTwo).len() * 4,
        MoveKind::ThreeTwo => index.timelike_edges_of_degree(3).map_or(0, IndexPool::len),
        MoveKind::TwoSix => index.cell_pool(CellType::ThreeOne).len(),
        MoveKind::SixTwo => index.six_cell_vertices().len(),
        MoveKind::FourFour => index.timelike_edges_of_degree(4).map_or(0, IndexPool::len) * 2,
    }
}

/// The site encoded by candidate `n`, if it is well-formed enough to plan.
fn candidate_site(
    tri: &Triangulation,
    kind: MoveKind,
    n: usize,
) -> Result<Option<MoveSite>, MoveError> {
    let index = tri.index();
    let store = tri.store();
    let site = match kind {
        MoveKind::TwoThree => {
            let Some(&cell) = index.cell_pool(CellType::TwoTwo).get_index(n / 4) else {
                return Ok(None);
            };
            let facet = FacetIndex::try_from(n % 4).unwrap_or_default();
            Some(MoveSite::TimelikeFacet(FacetHandle::new(cell, facet)))
        }
        MoveKind::ThreeTwo => index
            .timelike_edges_of_degree(3)
            .and_then(|pool| pool.get_index(n))
            .map(|&edge| MoveSite::TimelikeEdge(edge)),
        MoveKind::TwoSix => {
            let Some(&cell_key) = index.cell_pool(CellType::ThreeOne).get_index(n) else {
                return Ok(None);
            };
            let cell = store.try_cell(cell_key)?;
            let upper = cell.lower_slice() + 1;
            let mut apex = None;
            for (i, &v) in cell.vertices().iter().enumerate() {
                if store.timeslice_of(v)? == upper {
                    apex = FacetIndex::try_from(i).ok();
                }
            }
            apex.map(|i| MoveSite::SpacelikeFacet(FacetHandle::new(cell_key, i)))
        }
        MoveKind::SixTwo => index
            .six_cell_vertices()
            .get_index(n)
            .map(|&v| MoveSite::Vertex(v)),
        MoveKind::FourFour => {
            let Some(&edge) = index
                .timelike_edges_of_degree(4)
                .and_then(|pool| pool.get_index(n / 2))
            else {
                return Ok(None);
            };
            let (a, b) = edge.endpoints();
            let link = index.cells_sharing_edge(store, a, b)?;
            let Some(ring) = ring_vertices(store, &link.cells, a, b) else {
                return Ok(None);
            };
            let d = n % 2;
            Some(MoveSite::EdgeFlip {
                edge,
                diagonal: EdgeKey::new(ring[d], ring[d + 2]),
            })
        }
    };
    Ok(site)
}

/// Link vertices of a 4-cell edge link in cyclic order: `ring[k]` is shared by cells
/// `k` and `k + 1`.
fn ring_vertices(
    store: &SimplexStore,
    cells: &[CellKey],
    a: VertexKey,
    b: VertexKey,
) -> Option<[VertexKey; 4]> {
    if cells.len() != 4 {
        return None;
    }
    let mut others = [(VertexKey::null(), VertexKey::null()); 4];
    for (slot, &key) in others.iter_mut().zip(cells) {
        *slot = store.cell(key)?.opposite_edge(a, b)?;
    }
    let mut ring = [VertexKey::null(); 4];
    for k in 0..4 {
        let (p, q) = others[k];
        let (r, s) = others[(k + 1) % 4];
        ring[k] = if p == r || p == s {
            p
        } else if q == r || q == s {
            q
        } else {
            return None;
        };
    }
    Some(ring)
}

// =============================================================================
// MATCHERS
// =============================================================================

fn timeslice(store: &SimplexStore, v: VertexKey) -> Result<u32, MoveError> {
    Ok(store.timeslice_of(v)?)
}

fn check_facet_index(cell_key: CellKey, facet_index: FacetIndex) -> Result<(), MoveError> {
    if facet_index < 4 {
        Ok(())
    } else {
        Err(SimplexStoreError::InvalidFacetIndex {
            cell_key,
            facet_index,
        }
        .into())
    }
}

fn plan_two_three(tri: &Triangulation, handle: FacetHandle) -> Result<MovePlan, MoveError> {
    const KIND: MoveKind = MoveKind::TwoThree;
    let store = tri.store();
    let cell_key = handle.cell_key();
    let i = handle.facet_index();
    check_facet_index(cell_key, i)?;
    let cell = store.try_cell(cell_key)?;
    if cell.cell_type() != CellType::TwoTwo {
        return Err(no_site(KIND, "site cell is not a (2,2) cell"));
    }
    let Some(neighbor_key) = cell.neighbor(i) else {
        return Err(no_site(KIND, "facet lies on the boundary"));
    };
    let neighbor = store.try_cell(neighbor_key)?;
    if neighbor.cell_type() == CellType::TwoTwo {
        return Err(no_site(KIND, "neighbour is not a (3,1) or (1,3) cell"));
    }

    let triangle = cell.facet_vertices(i);
    let Some(j) = neighbor.facet_index_of(&TriangleKey::new(triangle)) else {
        return Err(MoveError::NeighborWiring {
            kind: KIND,
            message: format!("neighbour {neighbor_key:?} does not contain facet {i} of {cell_key:?}"),
        });
    };
    let d = cell.vertices()[usize::from(i)];
    let e = neighbor.vertices()[usize::from(j)];
    if EdgeClass::from_timeslices(timeslice(store, d)?, timeslice(store, e)?)
        != Some(EdgeClass::Timelike)
    {
        return Err(no_site(KIND, "opposite vertices are not on adjacent slices"));
    }
    if tri.index().contains_edge(d, e) {
        return Err(no_site(KIND, "the new timelike edge already exists"));
    }

    let new_cells = (0..3)
        .map(|t| existing([d, e, triangle[(t + 1) % 3], triangle[(t + 2) % 3]]))
        .collect();
    finish_plan(
        tri,
        MoveSite::TimelikeFacet(handle),
        [cell_key, neighbor_key].into_iter().collect(),
        new_cells,
        None,
        None,
    )
}

fn plan_three_two(tri: &Triangulation, edge: EdgeKey) -> Result<MovePlan, MoveError> {
    const KIND: MoveKind = MoveKind::ThreeTwo;
    let store = tri.store();
    let index = tri.index();
    let (a, b) = edge.endpoints();
    if index.classify_edge(a, b) != Some(EdgeClass::Timelike) {
        return Err(no_site(KIND, "edge is not a timelike edge of the complex"));
    }
    if index.edge_cells(edge).len() != 3 {
        return Err(no_site(KIND, "edge is not shared by exactly three cells"));
    }
    let link = index.cells_sharing_edge(store, a, b)?;
    if !link.closed {
        return Err(no_site(KIND, "edge lies on the boundary"));
    }

    let mut ring = VertexKeyBuffer::new();
    for &key in &link.cells {
        let cell = store.try_cell(key)?;
        for &v in cell.vertices() {
            if v != a && v != b && !ring.contains(&v) {
                ring.push(v);
            }
        }
    }
    let [x, y, z] = ring.as_slice() else {
        return Err(no_site(KIND, "edge link does not have three vertices"));
    };
    if index.contains_triangle(*x, *y, *z) {
        return Err(no_site(KIND, "the new triangle already exists"));
    }

    finish_plan(
        tri,
        MoveSite::TimelikeEdge(edge),
        link.cells,
        [existing([*x, *y, *z, a]), existing([*x, *y, *z, b])]
            .into_iter()
            .collect(),
        None,
        None,
    )
}

fn plan_two_six(tri: &Triangulation, handle: FacetHandle) -> Result<MovePlan, MoveError> {
    const KIND: MoveKind = MoveKind::TwoSix;
    let store = tri.store();
    let cell_key = handle.cell_key();
    let i = handle.facet_index();
    check_facet_index(cell_key, i)?;
    let cell = store.try_cell(cell_key)?;
    if cell.cell_type() == CellType::TwoTwo {
        return Err(no_site(KIND, "site cell is a (2,2) cell"));
    }

    let base = cell.facet_vertices(i);
    let base_slice = timeslice(store, base[0])?;
    for &v in &base[1..] {
        if timeslice(store, v)? != base_slice {
            return Err(no_site(KIND, "facet is not spacelike"));
        }
    }
    let Some(neighbor_key) = cell.neighbor(i) else {
        return Err(no_site(KIND, "spacelike triangle lies on the boundary"));
    };
    let neighbor = store.try_cell(neighbor_key)?;
    if neighbor.cell_type() != cell.cell_type().time_reversed() {
        return Err(no_site(KIND, "neighbour across the triangle is not the mirrored type"));
    }
    let Some(j) = neighbor.facet_index_of(&TriangleKey::new(base)) else {
        return Err(MoveError::NeighborWiring {
            kind: KIND,
            message: format!("neighbour {neighbor_key:?} does not contain the base of {cell_key:?}"),
        });
    };
    let apex = cell.vertices()[usize::from(i)];
    let opposite_apex = neighbor.vertices()[usize::from(j)];

    let mut new_cells = SmallBuffer::new();
    for t in 0..3 {
        let (p, q) = (base[(t + 1) % 3], base[(t + 2) % 3]);
        for top in [apex, opposite_apex] {
            new_cells.push([
                PlannedVertex::Inserted,
                PlannedVertex::Existing(p),
                PlannedVertex::Existing(q),
                PlannedVertex::Existing(top),
            ]);
        }
    }
    finish_plan(
        tri,
        MoveSite::SpacelikeFacet(handle),
        [cell_key, neighbor_key].into_iter().collect(),
        new_cells,
        Some(base_slice),
        None,
    )
}

fn plan_six_two(tri: &Triangulation, v: VertexKey) -> Result<MovePlan, MoveError> {
    const KIND: MoveKind = MoveKind::SixTwo;
    let store = tri.store();
    let t = timeslice(store, v)?;
    let Some(star) = tri.index().cells_incident_to(v) else {
        return Err(SimplexStoreError::MissingVertex { vertex_key: v }.into());
    };
    if star.len() != 6 {
        return Err(no_site(KIND, "vertex is not incident to exactly six cells"));
    }

    let mut removed = CellKeyBuffer::new();
    let mut same = VertexKeyBuffer::new();
    let mut above = VertexKeyBuffer::new();
    let mut below = VertexKeyBuffer::new();
    for &key in star {
        let cell = store.try_cell(key)?;
        for (i, &w) in cell.vertices().iter().enumerate() {
            if w == v {
                continue;
            }
            // Facets containing `v` must be interior for the star to be a closed ball.
            let facet = FacetIndex::try_from(i).unwrap_or_default();
            if cell.neighbor(facet).is_none() {
                return Err(no_site(KIND, "vertex lies on the boundary"));
            }
            let bucket = match timeslice(store, w)? {
                s if s == t => &mut same,
                s if s == t + 1 => &mut above,
                _ => &mut below,
            };
            if !bucket.contains(&w) {
                bucket.push(w);
            }
        }
        removed.push(key);
    }
    removed.sort_unstable_by_key(|k| k.data().as_ffi());

    let ([a, b, c], [top], [bottom]) = (same.as_slice(), above.as_slice(), below.as_slice()) else {
        return Err(no_site(KIND, "vertex link is not a triangular double pyramid"));
    };
    if tri.index().contains_triangle(*a, *b, *c) {
        return Err(no_site(KIND, "the new spacelike triangle already exists"));
    }

    finish_plan(
        tri,
        MoveSite::Vertex(v),
        removed,
        [existing([*a, *b, *c, *top]), existing([*a, *b, *c, *bottom])]
            .into_iter()
            .collect(),
        None,
        Some(v),
    )
}

fn plan_four_four(
    tri: &Triangulation,
    edge: EdgeKey,
    diagonal: EdgeKey,
) -> Result<MovePlan, MoveError> {
    const KIND: MoveKind = MoveKind::FourFour;
    let store = tri.store();
    let index = tri.index();
    let (a, b) = edge.endpoints();
    if index.classify_edge(a, b) != Some(EdgeClass::Timelike) {
        return Err(no_site(KIND, "edge is not a timelike edge of the complex"));
    }
    if index.edge_cells(edge).len() != 4 {
        return Err(no_site(KIND, "edge is not shared by exactly four cells"));
    }
    let link = index.cells_sharing_edge(store, a, b)?;
    if !link.closed {
        return Err(no_site(KIND, "edge lies on the boundary"));
    }
    let Some(ring) = ring_vertices(store, &link.cells, a, b) else {
        return Err(no_site(KIND, "edge link is not a 4-cycle"));
    };

    let (s, u) = if diagonal == EdgeKey::new(ring[0], ring[2]) {
        (ring[1], ring[3])
    } else if diagonal == EdgeKey::new(ring[1], ring[3]) {
        (ring[0], ring[2])
    } else {
        return Err(no_site(KIND, "diagonal does not cross the edge link"));
    };
    let (q, r) = diagonal.endpoints();
    if EdgeClass::from_timeslices(timeslice(store, q)?, timeslice(store, r)?)
        != Some(EdgeClass::Timelike)
    {
        return Err(no_site(KIND, "diagonal is not timelike"));
    }
    if index.contains_edge(q, r) {
        return Err(no_site(KIND, "the diagonal edge already exists"));
    }

    let plan = finish_plan(
        tri,
        MoveSite::EdgeFlip { edge, diagonal },
        link.cells,
        [
            existing([q, r, s, a]),
            existing([q, r, s, b]),
            existing([q, r, u, a]),
            existing([q, r, u, b]),
        ]
        .into_iter()
        .collect(),
        None,
        None,
    )?;
    let delta = plan.delta();
    if delta.cells_31 != 0 || delta.cells_22 != 0 || delta.cells_13 != 0 {
        return Err(no_site(KIND, "flip would change the cell-type counts"));
    }
    Ok(plan)
}

const fn existing(vertices: [VertexKey; 4]) -> PlannedCell {
    [
        PlannedVertex::Existing(vertices[0]),
        PlannedVertex::Existing(vertices[1]),
        PlannedVertex::Existing(vertices[2]),
        PlannedVertex::Existing(vertices[3]),
    ]
}

/// Key used for the inserted vertex while computing deltas. The null key never
/// resolves, so every simplex containing it counts as new.
fn provisional_key(vertex: PlannedVertex) -> VertexKey {
    match vertex {
        PlannedVertex::Existing(v) => v,
        PlannedVertex::Inserted => VertexKey::null(),
    }
}

/// Classifies the new cells and computes the exact count delta.
fn finish_plan(
    tri: &Triangulation,
    site: MoveSite,
    removed_cells: CellKeyBuffer,
    new_cells: SmallBuffer<PlannedCell, 8>,
    inserted_vertex: Option<u32>,
    removed_vertex: Option<VertexKey>,
) -> Result<MovePlan, MoveError> {
    let kind = site.kind();
    let store = tri.store();
    let index = tri.index();
    let slice_of = |vertex: PlannedVertex| -> Result<u32, MoveError> {
        match vertex {
            PlannedVertex::Existing(v) => timeslice(store, v),
            PlannedVertex::Inserted => inserted_vertex.ok_or_else(|| MoveError::NeighborWiring {
                kind,
                message: "plan references an inserted vertex it does not create".to_string(),
            }),
        }
    };

    let mut delta = CountDelta::default();
    let mut edge_change: FastHashMap<EdgeKey, (i64, EdgeClass)> = fast_hash_map_with_capacity(24);
    let mut triangle_change: FastHashMap<TriangleKey, i64> = fast_hash_map_with_capacity(8);

    let mut tally = |vertices: [VertexKey; 4], slices: [u32; 4], sign: i64| {
        for i in 0..4 {
            for j in (i + 1)..4 {
                if let Some(class) = EdgeClass::from_timeslices(slices[i], slices[j]) {
                    edge_change
                        .entry(EdgeKey::new(vertices[i], vertices[j]))
                        .or_insert((0, class))
                        .0 += sign;
                }
            }
        }
        for skip in 0..4 {
            let mut corners = [VertexKey::null(); 3];
            let mut corner_slices = [0; 3];
            let mut slot = 0;
            for k in (0..4).filter(|&k| k != skip) {
                corners[slot] = vertices[k];
                corner_slices[slot] = slices[k];
                slot += 1;
            }
            if corner_slices[0] == corner_slices[1] && corner_slices[1] == corner_slices[2] {
                *triangle_change.entry(TriangleKey::new(corners)).or_insert(0) += sign;
            }
        }
    };

    for &key in &removed_cells {
        let cell = store.try_cell(key)?;
        let slices = store.cell_timeslices(cell.vertices())?;
        tally(*cell.vertices(), slices, -1);
        delta.add_cell(cell.cell_type(), -1);
    }
    for planned in &new_cells {
        let mut slices = [0; 4];
        for (slot, &vertex) in slices.iter_mut().zip(planned.iter()) {
            *slot = slice_of(vertex)?;
        }
        let Some((cell_type, _)) = classify_timeslices(slices) else {
            return Err(no_site(kind, "a new cell would not span two adjacent slices"));
        };
        tally(planned.map(provisional_key), slices, 1);
        delta.add_cell(cell_type, 1);
    }

    for (edge, (change, class)) in edge_change {
        let before = i64::try_from(index.edge_cells(edge).len()).unwrap_or(i64::MAX);
        let after = before + change;
        if before == 0 && after > 0 {
            delta.add_edge(class, 1);
        } else if before > 0 && after == 0 {
            delta.add_edge(class, -1);
        }
    }
    for (triangle, change) in triangle_change {
        let before = i64::from(index.spacelike_triangle_multiplicity(&triangle));
        let after = before + change;
        if before == 0 && after > 0 {
            delta.spacelike_triangles += 1;
        } else if before > 0 && after == 0 {
            delta.spacelike_triangles -= 1;
        }
    }
    if inserted_vertex.is_some() {
        delta.vertices += 1;
    }
    if removed_vertex.is_some() {
        delta.vertices -= 1;
    }

    Ok(MovePlan {
        site,
        removed_cells,
        new_cells,
        inserted_vertex,
        removed_vertex,
        delta,
        generation: store.generation(),
    })
}

// =============================================================================
// MUTATOR
// =============================================================================

/// External neighbour across a boundary facet of the cavity: `(cell, its facet index)`,
/// or `None` where the cavity touches the complex boundary.
type CavityBoundary = FastHashMap<TriangleKey, Option<(CellKey, FacetIndex)>>;

fn commit(tri: &mut Triangulation, plan: &MovePlan) -> Result<MoveInfo, MoveError> {
    let kind = plan.kind();
    let (store, index) = tri.parts_mut();
    if store.generation() != plan.generation {
        return Err(MoveError::StalePlan {
            kind,
            planned: plan.generation,
            current: store.generation(),
        });
    }

    // Record the cavity boundary before anything changes.
    let mut boundary: CavityBoundary = fast_hash_map_with_capacity(plan.removed_cells.len() * 4);
    let mut removed = Vec::with_capacity(plan.removed_cells.len());
    for &key in &plan.removed_cells {
        let cell = store.try_cell(key)?;
        for i in 0..4u8 {
            let external = match cell.neighbor(i) {
                Some(n) if plan.removed_cells.contains(&n) => continue,
                Some(n) => {
                    let j = store.mirror_facet_index(key, i).ok_or_else(|| {
                        MoveError::NeighborWiring {
                            kind,
                            message: format!("neighbour {n:?} of {key:?} does not share facet {i}"),
                        }
                    })?;
                    Some((n, j))
                }
                None => None,
            };
            boundary.insert(cell.facet_key(i), external);
        }
        removed.push((key, cell.clone(), store.cell_timeslices(cell.vertices())?));
    }
    if let Some(v) = plan.removed_vertex {
        store.timeslice_of(v)?;
    }

    for (key, cell, slices) in &removed {
        index.remove_cell(*key, cell, *slices);
    }

    let inserted_vertex = match plan.inserted_vertex {
        Some(t) => {
            let v = store.add_vertex(t)?;
            index.insert_vertex(v, t);
            Some(v)
        }
        None => None,
    };

    let mut new_keys = CellKeyBuffer::new();
    for planned in &plan.new_cells {
        let mut vertices = [VertexKey::null(); 4];
        for (slot, &vertex) in vertices.iter_mut().zip(planned.iter()) {
            *slot = match vertex {
                PlannedVertex::Existing(v) => v,
                PlannedVertex::Inserted => inserted_vertex.ok_or_else(|| {
                    MoveError::NeighborWiring {
                        kind,
                        message: "plan references an inserted vertex it does not create"
                            .to_string(),
                    }
                })?,
            };
        }
        let key = store.add_cell(vertices)?;
        let slices = store.cell_timeslices(&vertices)?;
        index.insert_cell(key, store.try_cell(key)?, slices);
        new_keys.push(key);
    }

    wire_cavity_neighbors(store, kind, &new_keys, &boundary)?;

    for (key, _, _) in &removed {
        store.remove_cell(*key)?;
    }
    if let Some(v) = plan.removed_vertex {
        let t = store.timeslice_of(v)?;
        index.remove_vertex(v, t);
        store.remove_vertex(v)?;
    }

    Ok(MoveInfo {
        kind,
        removed_cells: plan.removed_cells.clone(),
        new_cells: new_keys,
        inserted_vertex,
        removed_vertex: plan.removed_vertex,
        delta: plan.delta,
    })
}

/// Connects new cells to each other and to the recorded cavity boundary.
///
/// Facets shared by two new cells become mutual neighbours; every other facet must be a
/// recorded boundary facet and is attached to the external cell (or left open).
fn wire_cavity_neighbors(
    store: &mut SimplexStore,
    kind: MoveKind,
    new_cells: &CellKeyBuffer,
    boundary: &CavityBoundary,
) -> Result<(), MoveError> {
    type FacetMap = FastHashMap<TriangleKey, SmallBuffer<(CellKey, FacetIndex), 2>>;
    let mut facet_map: FacetMap = fast_hash_map_with_capacity(new_cells.len() * 4);
    for &key in new_cells {
        let cell = store.try_cell(key)?;
        for i in 0..4u8 {
            facet_map.entry(cell.facet_key(i)).or_default().push((key, i));
        }
    }

    let mut matched_boundary = 0usize;
    for (facet, owners) in &facet_map {
        match owners.as_slice() {
            [(c1, i1), (c2, i2)] => {
                store.set_neighbor(*c1, *i1, Some(*c2))?;
                store.set_neighbor(*c2, *i2, Some(*c1))?;
            }
            [(c, i)] => {
                let Some(external) = boundary.get(facet) else {
                    return Err(MoveError::NeighborWiring {
                        kind,
                        message: format!("facet {facet:?} of new cell {c:?} is not on the cavity boundary"),
                    });
                };
                matched_boundary += 1;
                match *external {
                    Some((n, j)) => {
                        store.set_neighbor(*c, *i, Some(n))?;
                        store.set_neighbor(n, j, Some(*c))?;
                    }
                    None => store.set_neighbor(*c, *i, None)?,
                }
            }
            _ => {
                return Err(MoveError::NeighborWiring {
                    kind,
                    message: format!("facet {facet:?} is shared by {} new cells", owners.len()),
                });
            }
        }
    }

    if matched_boundary != boundary.len() {
        return Err(MoveError::NeighborWiring {
            kind,
            message: format!(
                "new cells cover {matched_boundary} of {} cavity boundary facets",
                boundary.len()
            ),
        });
    }
    Ok(())
}
