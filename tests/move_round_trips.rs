//! Integration tests for inverse move pairs on closed spherical complexes.
//!
//! Each test applies a move and then its inverse at the matching site and checks that
//! the complex returns to the same vertex sets, cell sets and counts:
//! - (2,3) followed by (3,2) on the new timelike edge
//! - (2,6) followed by (6,2) on the inserted vertex
//! - (4,4) followed by the (4,4) that swaps the diagonal back

use cdt::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::BTreeSet;

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Vertex sets of all cells, order-independent.
fn cell_sets(tri: &Triangulation) -> BTreeSet<[VertexKey; 4]> {
    tri.store()
        .cells()
        .map(|(_, cell)| {
            let mut vertices = *cell.vertices();
            vertices.sort_unstable();
            vertices
        })
        .collect()
}

fn vertex_set(tri: &Triangulation) -> BTreeSet<VertexKey> {
    tri.store().vertices().map(|(key, _)| key).collect()
}

/// A spherical complex grown a little so every move has sites.
fn grown_sphere(seed: u64) -> Triangulation {
    grown_sphere_to(seed, 160)
}

fn grown_sphere_to(seed: u64, target: u64) -> Triangulation {
    let mut tri = SphericalSeed::new(5).build().unwrap();
    let mut rng = StdRng::seed_from_u64(seed);
    grow_to_target(&mut tri, &MoveCatalog::new(32, false), target, &mut rng).unwrap();
    tri
}

#[test]
fn two_three_then_three_two_restores_complex() {
    init_tracing();
    let mut tri = grown_sphere(1);
    let catalog = MoveCatalog::new(DEFAULT_MAX_SITE_DRAWS, true);
    let (cells, vertices, counts) = (cell_sets(&tri), vertex_set(&tri), tri.counts());

    let mut rng = StdRng::seed_from_u64(11);
    let forward = catalog
        .apply_random(&mut tri, MoveKind::TwoThree, &mut rng)
        .unwrap();
    assert_eq!(forward.new_cells.len(), 3);

    // The three new cells share exactly the new timelike edge.
    let mut shared: Option<BTreeSet<VertexKey>> = None;
    for &key in &forward.new_cells {
        let here: BTreeSet<_> = tri.store().cell(key).unwrap().vertices().iter().copied().collect();
        shared = Some(match shared {
            None => here,
            Some(acc) => acc.intersection(&here).copied().collect(),
        });
    }
    let shared: Vec<_> = shared.unwrap().into_iter().collect();
    assert_eq!(shared.len(), 2);
    let edge = EdgeKey::new(shared[0], shared[1]);
    assert_eq!(tri.index().classify_edge(shared[0], shared[1]), Some(EdgeClass::Timelike));

    let backward = catalog
        .apply_at(&mut tri, MoveSite::TimelikeEdge(edge))
        .unwrap();
    assert_eq!(backward.delta, forward.delta.inverse());
    assert_eq!(tri.counts(), counts);
    assert_eq!(cell_sets(&tri), cells);
    assert_eq!(vertex_set(&tri), vertices);
    assert!(tri.validate().is_ok());
}

#[test]
fn two_six_then_six_two_restores_complex() {
    init_tracing();
    let mut tri = grown_sphere(2);
    let catalog = MoveCatalog::new(DEFAULT_MAX_SITE_DRAWS, true);
    let (cells, vertices, counts) = (cell_sets(&tri), vertex_set(&tri), tri.counts());

    let mut rng = StdRng::seed_from_u64(5);
    let forward = catalog
        .apply_random(&mut tri, MoveKind::TwoSix, &mut rng)
        .unwrap();
    let v = forward.inserted_vertex.unwrap();
    assert_eq!(forward.new_cells.len(), 6);
    assert_eq!(tri.index().cells_incident_to(v).unwrap().len(), 6);
    assert_eq!(tri.counts().vertices, counts.vertices + 1);

    let backward = catalog.apply_at(&mut tri, MoveSite::Vertex(v)).unwrap();
    assert_eq!(backward.removed_vertex, Some(v));
    assert!(!tri.store().contains_vertex(v));
    assert_eq!(tri.counts(), counts);
    assert_eq!(cell_sets(&tri), cells);
    assert_eq!(vertex_set(&tri), vertices);
    assert!(tri.validate().is_ok());
}

#[test]
fn four_four_twice_restores_complex() {
    init_tracing();
    let catalog = MoveCatalog::new(DEFAULT_MAX_SITE_DRAWS, true);

    let mut found = None;
    for seed in 0..16 {
        let tri = grown_sphere_to(100 + seed, 800);
        let sites = catalog.enumerate_sites(&tri, MoveKind::FourFour).unwrap();
        if let Some(&site) = sites.first() {
            found = Some((tri, site));
            break;
        }
    }
    let (mut tri, site) = found.expect("some grown sphere has a (4,4) site");
    let MoveSite::EdgeFlip { edge, diagonal } = site else {
        panic!("(4,4) enumerated a {site:?}");
    };
    let (a, b) = edge.endpoints();
    assert_eq!(tri.index().classify_edge(a, b), Some(EdgeClass::Timelike));
    let (cells, vertices, counts) = (cell_sets(&tri), vertex_set(&tri), tri.counts());

    let forward = catalog.apply_at(&mut tri, site).unwrap();
    assert_eq!(forward.new_cells.len(), 4);
    assert_eq!(tri.counts(), counts);
    let (c, d) = diagonal.endpoints();
    assert!(!tri.index().contains_edge(a, b));
    assert_eq!(tri.index().classify_edge(c, d), Some(EdgeClass::Timelike));

    catalog
        .apply_at(
            &mut tri,
            MoveSite::EdgeFlip {
                edge: diagonal,
                diagonal: edge,
            },
        )
        .unwrap();
    assert_eq!(tri.counts(), counts);
    assert_eq!(cell_sets(&tri), cells);
    assert_eq!(vertex_set(&tri), vertices);
    assert!(tri.validate().is_ok());
}

#[test]
fn inverse_moves_have_opposite_action_deltas() {
    init_tracing();
    let mut tri = grown_sphere(3);
    let catalog = MoveCatalog::new(DEFAULT_MAX_SITE_DRAWS, false);
    let action = LinearAction {
        spacelike_edges: 0.4,
        ..LinearAction::ajl(1.2, 0.7)
    };
    let mut rng = StdRng::seed_from_u64(9);

    let plan = catalog.sample_site(&tri, MoveKind::TwoSix, &mut rng).unwrap();
    let before = tri.counts();
    let forward = action.delta_action(MoveKind::TwoSix, &before, plan.delta());
    let info = catalog.apply(&mut tri, &plan).unwrap();

    let back_plan = catalog
        .plan(&tri, MoveSite::Vertex(info.inserted_vertex.unwrap()))
        .unwrap();
    let backward = action.delta_action(MoveKind::SixTwo, &tri.counts(), back_plan.delta());
    approx::assert_relative_eq!(forward, -backward, epsilon = 1e-12);
    approx::assert_relative_eq!(
        forward,
        action.evaluate(&tri.counts()) - action.evaluate(&before),
        epsilon = 1e-9
    );
}
