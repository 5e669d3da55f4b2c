//! End-to-end tests on the smallest foliated complex: a (3,1) cell glued to a (2,2)
//! cell along a timelike triangle.
//!
//! These tests cover:
//! - Ingestion and the counts of the open pair
//! - A single (2,3) move and the index updates it performs
//! - Rejection of malformed descriptions
//! - Failed matches leaving the complex untouched

use cdt::prelude::*;

fn description() -> ComplexDescription {
    ComplexDescription {
        timeslices: 2,
        vertex_timeslices: vec![0, 0, 0, 1, 1],
        cells: vec![[0, 1, 2, 3], [0, 1, 3, 4]],
    }
}

fn open_pair() -> Triangulation {
    Triangulation::from_description(&description(), BoundaryPolicy::WithBoundary).unwrap()
}

#[test]
fn open_pair_counts() {
    let tri = open_pair();
    let counts = tri.counts();
    assert_eq!(counts.vertices, 5);
    assert_eq!(counts.cells_31, 1);
    assert_eq!(counts.cells_22, 1);
    assert_eq!(counts.cells_13, 0);
    assert_eq!(counts.timelike_edges, 5);
    assert_eq!(counts.spacelike_edges, 4);
    assert_eq!(counts.spacelike_triangles, 1);
    assert_eq!(tri.index().volume_profile(), vec![2, 0]);
    assert_eq!(tri.index().slice_stats(0).unwrap().vertices, 3);
    assert_eq!(tri.index().slice_stats(1).unwrap().spacelike_edges, 1);
}

#[test]
fn two_three_updates_only_the_touched_cells() {
    let mut tri = open_pair();
    let catalog = MoveCatalog::new(DEFAULT_MAX_SITE_DRAWS, true);
    assert_eq!(tri.index().stats(), IndexStats::default());

    let sites = catalog.enumerate_sites(&tri, MoveKind::TwoThree).unwrap();
    assert_eq!(sites.len(), 1);
    let info = catalog.apply_at(&mut tri, sites[0]).unwrap();

    let stats = tri.index().stats();
    assert_eq!(stats.cells_removed, 2);
    assert_eq!(stats.cells_inserted, 3);
    assert_eq!(stats.cell_updates(), 5);
    assert_eq!(stats.vertices_inserted, 0);
    assert_eq!(stats.vertices_removed, 0);

    assert_eq!(info.removed_cells.len(), 2);
    assert_eq!(tri.counts().cells(), 3);
    assert_eq!(tri.counts().cells_22, 2);
    assert_eq!(tri.counts().timelike_edges, 6);
    assert_eq!(
        FoliationIndex::build(tri.store()).unwrap().counts(),
        tri.counts()
    );
    assert!(tri.validate().is_ok());
}

#[test]
fn six_two_on_low_degree_vertex_is_no_valid_site() {
    let mut tri = open_pair();
    let catalog = MoveCatalog::default();
    let snapshot = tri.snapshot();
    let counts = tri.counts();
    let generation = tri.store().generation();

    let vertices: Vec<VertexKey> = tri.store().vertices().map(|(key, _)| key).collect();
    for v in vertices {
        let err = catalog.apply_at(&mut tri, MoveSite::Vertex(v)).unwrap_err();
        assert!(
            matches!(err, MoveError::NoValidSite { kind: MoveKind::SixTwo, .. }),
            "{err:?}"
        );
    }
    assert_eq!(tri.counts(), counts);
    assert_eq!(tri.snapshot(), snapshot);
    assert_eq!(tri.store().generation(), generation);
}

#[test]
fn malformed_descriptions_are_rejected() {
    let cases = [
        // Vertex index out of range.
        ComplexDescription {
            cells: vec![[0, 1, 2, 7]],
            ..description()
        },
        // All four vertices on one slice.
        ComplexDescription {
            timeslices: 2,
            vertex_timeslices: vec![0, 0, 0, 0],
            cells: vec![[0, 1, 2, 3]],
        },
        // Repeated vertex.
        ComplexDescription {
            cells: vec![[0, 0, 2, 3]],
            ..description()
        },
        // Timeslice beyond the foliation.
        ComplexDescription {
            timeslices: 2,
            vertex_timeslices: vec![0, 0, 0, 5],
            cells: vec![[0, 1, 2, 3]],
        },
        // Zero timeslices.
        ComplexDescription {
            timeslices: 0,
            ..description()
        },
    ];
    for case in &cases {
        let result = Triangulation::from_description(case, BoundaryPolicy::WithBoundary);
        assert!(
            matches!(result, Err(IngestError::MalformedInitialComplex { .. })),
            "{case:?} was accepted"
        );
    }
}

#[test]
fn three_cells_on_one_triangle_are_rejected() {
    let description = ComplexDescription {
        timeslices: 2,
        vertex_timeslices: vec![0, 0, 0, 1, 1, 1],
        cells: vec![[0, 1, 2, 3], [0, 1, 2, 4], [0, 1, 2, 5]],
    };
    let err = Triangulation::from_description(&description, BoundaryPolicy::WithBoundary)
        .unwrap_err();
    match err {
        IngestError::MalformedInitialComplex { violation } => {
            assert_eq!(violation.kind, InvariantKind::FacetSharing);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn snapshot_round_trips_through_ingestion() {
    let tri = SphericalSeed::new(4).build().unwrap();
    let again = Triangulation::from_description(&tri.snapshot(), BoundaryPolicy::Closed).unwrap();
    assert_eq!(again.counts(), tri.counts());
    assert_eq!(again.index().volume_profile(), tri.index().volume_profile());

    let json = serde_json::to_string(&tri.snapshot()).unwrap();
    let parsed: ComplexDescription = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, tri.snapshot());
}
