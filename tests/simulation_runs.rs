//! End-to-end runs through [`simulate`] and the engine API.
//!
//! These tests cover:
//! - Reproducibility from a fixed seed
//! - Accept-all runs
//! - Pass observers, checkpoints and cancellation
//! - Configuration validation and serialisation

use cdt::prelude::*;
use std::ops::ControlFlow;

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

fn config(seed: u64) -> SimulationConfig {
    SimulationConfigBuilder::default()
        .timeslices(4)
        .target_simplices(100)
        .passes(3)
        .couplings(Couplings {
            k: 1.0,
            lambda: 0.9,
            alpha: 0.6,
        })
        .rng_seed(seed)
        .validate_moves(true)
        .build()
        .unwrap()
}

#[test]
fn fixed_seed_runs_are_identical() {
    init_tracing();
    let a = simulate(&config(77), &SphericalSeed::new(4)).unwrap();
    let b = simulate(&config(77), &SphericalSeed::new(4)).unwrap();
    assert_eq!(a.seed, 77);
    assert_eq!(a.summary, b.summary);
    assert_eq!(a.stats, b.stats);
    assert_eq!(a.triangulation.snapshot(), b.triangulation.snapshot());
    assert_eq!(a.passes_completed, 3);
}

#[test]
fn accept_all_run_is_deterministic_and_never_rejects() {
    init_tracing();
    let run = || {
        simulate_with(
            &config(5),
            &SphericalSeed::new(4),
            AcceptAll,
            &mut NoopObserver,
            &CancellationToken::new(),
        )
        .unwrap()
    };
    let (a, b) = (run(), run());
    assert_eq!(a.summary, b.summary);
    for kind in MoveKind::ALL {
        assert_eq!(a.stats.tally(kind).rejected, 0);
    }
    assert_eq!(
        a.summary.accepted_moves_per_type.iter().sum::<u64>(),
        a.stats.accepted()
    );
    assert!(a.triangulation.validate().is_ok());
}

#[test]
fn summary_matches_final_complex() {
    let result = simulate(&config(3), &SphericalSeed::new(4)).unwrap();
    let counts = result.triangulation.counts();
    let summary = &result.summary;
    assert_eq!(summary.total_cells, counts.cells());
    assert_eq!(summary.total_vertices, counts.vertices);
    assert_eq!(summary.n3_31 + summary.n3_22 + summary.n3_13, summary.total_cells);
    assert_eq!(summary.n1_tl, counts.timelike_edges);
    assert_eq!(summary.n1_sl, counts.spacelike_edges);
    assert_eq!(summary.volume_profile.iter().sum::<u64>(), summary.total_cells);
    assert_eq!(summary.volume_profile.len(), 4);

    let json = serde_json::to_value(summary).unwrap();
    assert_eq!(json["total_cells"], serde_json::json!(summary.total_cells));
    assert!(json["volume_profile"].is_array());
}

#[test]
fn observer_sees_every_pass_and_can_checkpoint() {
    let mut checkpoints = Vec::new();
    let mut observer = |report: &PassReport, tri: &Triangulation| {
        assert_eq!(report.counts, tri.counts());
        assert_eq!(report.stats.attempted(), report.scheduled);
        checkpoints.push(tri.snapshot());
        ControlFlow::Continue(())
    };
    let result = simulate_with(
        &config(12),
        &SphericalSeed::new(4),
        LinearAction::ajl(1.0, 0.9),
        &mut observer,
        &CancellationToken::new(),
    )
    .unwrap();
    assert_eq!(checkpoints.len(), 3);
    assert_eq!(checkpoints.last(), Some(&result.triangulation.snapshot()));

    // A checkpoint is a valid starting point for a new run.
    let restored = FixedComplex {
        description: checkpoints[0].clone(),
        policy: BoundaryPolicy::Closed,
    };
    assert!(restored.build().unwrap().validate().is_ok());
}

#[test]
fn cancellation_from_observer_stops_the_run() {
    let cancel = CancellationToken::new();
    let handle = cancel.clone();
    let mut observer = |report: &PassReport, _tri: &Triangulation| {
        if report.pass == 0 {
            handle.cancel();
        }
        ControlFlow::Continue(())
    };
    let config = SimulationConfig {
        passes: 10,
        ..config(8)
    };
    let result = simulate_with(
        &config,
        &SphericalSeed::new(4),
        LinearAction::ajl(1.0, 0.9),
        &mut observer,
        &cancel,
    )
    .unwrap();
    assert_eq!(result.passes_completed, 1);
}

#[test]
fn invalid_configurations_fail_before_any_move() {
    let bad_alpha = SimulationConfig {
        couplings: Couplings {
            alpha: 0.1,
            ..Couplings::default()
        },
        ..config(1)
    };
    assert!(matches!(
        simulate(&bad_alpha, &SphericalSeed::new(4)),
        Err(SimulationError::Config(ConfigError::AlphaTooSmall { .. }))
    ));

    let toroidal = SimulationConfig {
        topology: TopologyKind::Toroidal,
        ..config(1)
    };
    assert!(matches!(
        simulate(&toroidal, &SphericalSeed::new(4)),
        Err(SimulationError::Config(ConfigError::UnsupportedTopology { .. }))
    ));
}

#[test]
fn malformed_provider_fails_with_ingest_error() {
    let provider = ComplexDescription {
        timeslices: 4,
        vertex_timeslices: vec![0, 0, 0, 3],
        cells: vec![[0, 1, 2, 3]],
    };
    assert!(matches!(
        simulate(&config(1), &provider),
        Err(SimulationError::Ingest(IngestError::MalformedInitialComplex { .. }))
    ));
}

#[test]
fn config_round_trips_through_json() {
    let config = config(99);
    let json = serde_json::to_string_pretty(&config).unwrap();
    let parsed: SimulationConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, config);
}

#[test]
fn two_slice_provider_runs_end_to_end() {
    init_tracing();
    let pair = FixedComplex {
        description: ComplexDescription {
            timeslices: 2,
            vertex_timeslices: vec![0, 0, 0, 1, 1],
            cells: vec![[0, 1, 2, 3], [0, 1, 3, 4]],
        },
        policy: BoundaryPolicy::WithBoundary,
    };
    let config = SimulationConfig {
        timeslices: 2,
        target_simplices: 2,
        passes: 1,
        ..config(21)
    };
    let result = simulate_with(
        &config,
        &pair,
        LinearAction::ajl(1.0, 0.9),
        &mut NoopObserver,
        &CancellationToken::new(),
    )
    .unwrap();
    assert_eq!(result.passes_completed, 1);
    assert_eq!(result.stats.attempted(), 2);
    assert_eq!(result.summary.volume_profile.len(), 2);
    assert!(result.triangulation.validate().is_ok());

    // The spherical seed still needs a pole on each side of a spatial sphere.
    assert!(matches!(
        simulate(&config, &SphericalSeed::new(2)),
        Err(SimulationError::Ingest(IngestError::MalformedInitialComplex { .. }))
    ));
}
