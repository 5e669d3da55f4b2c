//! Property-based tests for the structural invariants of sampled complexes.
//! - Every accepted move leaves a valid closed complex
//! - Incremental counts agree with a rebuild from the store
//! - Committed deltas equal the planned deltas

use cdt::prelude::*;
use proptest::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;

fn coupling() -> impl Strategy<Value = f64> {
    (-2.0..2.0).prop_filter("must be finite", |x: &f64| x.is_finite())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn prop_chain_preserves_invariants(
        seed in any::<u64>(),
        k0 in coupling(),
        k3 in coupling(),
        timeslices in 3u32..6,
    ) {
        let tri = SphericalSeed::new(timeslices).build().unwrap();
        let context = SimulationContext::new(seed, &MoveWeights::uniform(), MoveCatalog::new(16, true))
            .unwrap();
        let mut engine = MetropolisEngine::new(tri, LinearAction::ajl(k0, k3), context);
        for _ in 0..120 {
            engine.attempt().unwrap();
            // Keep chains with a runaway volume bounded.
            if engine.triangulation().counts().cells() > 600 {
                break;
            }
        }

        let tri = engine.triangulation();
        prop_assert!(tri.validate().is_ok());
        let rebuilt = FoliationIndex::build(tri.store()).unwrap();
        prop_assert_eq!(rebuilt.counts(), tri.counts());
        prop_assert!(rebuilt.difference(tri.index()).is_none());

        // Poles never gain vertices.
        prop_assert_eq!(tri.index().slice_stats(0).unwrap().vertices, 1);
        prop_assert_eq!(tri.index().slice_stats(timeslices - 1).unwrap().vertices, 1);
        prop_assert_eq!(tri.number_of_cells() as u64, tri.counts().cells());
    }

    #[test]
    fn prop_committed_delta_matches_plan(seed in any::<u64>(), kind_index in 0usize..5) {
        let kind = MoveKind::ALL[kind_index];
        let mut tri = SphericalSeed::new(4).build().unwrap();
        let catalog = MoveCatalog::new(DEFAULT_MAX_SITE_DRAWS, true);
        let mut rng = StdRng::seed_from_u64(seed);
        grow_to_target(&mut tri, &catalog, 80, &mut rng).unwrap();

        match catalog.sample_site(&tri, kind, &mut rng) {
            Ok(plan) => {
                let before = tri.counts();
                let info = catalog.apply(&mut tri, &plan).unwrap();
                prop_assert_eq!(&info.delta, plan.delta());
                prop_assert_eq!(tri.counts(), before + *plan.delta());
                prop_assert_eq!(info.removed_cells.len(), plan.removed_cells().len());
                prop_assert_eq!(info.new_cells.len(), plan.new_cell_count());
            }
            Err(err) => prop_assert!(err.is_no_valid_site(), "{err:?}"),
        }
    }
}
