//! Independent chains run in parallel.
//!
//! Each chain owns its complex and its RNG; nothing is shared between them, so the
//! results are identical to running the chains one after another.

use crate::simulation::config::SimulationConfig;
use crate::simulation::metropolis::{SimulationError, SimulationResult, simulate};
use crate::topology::seed::InitialComplexProvider;
use rayon::prelude::*;

/// `chains` copies of `base`, chain `i` seeded with `base_seed + i`.
#[must_use]
pub fn chain_configs(base: &SimulationConfig, chains: usize, base_seed: u64) -> Vec<SimulationConfig> {
    (0..chains as u64)
        .map(|i| SimulationConfig {
            rng_seed: Some(base_seed.wrapping_add(i)),
            ..base.clone()
        })
        .collect()
}

/// Runs one chain per configuration on the rayon pool, every chain starting from the
/// complex `provider` builds.
///
/// Results are in input order.
///
/// # Examples
///
/// ```rust
/// use cdt::prelude::*;
///
/// let base = SimulationConfigBuilder::default()
///     .timeslices(3)
///     .target_simplices(30)
///     .passes(1)
///     .build()
///     .unwrap();
/// let results = run_chains_parallel(&chain_configs(&base, 3, 100), &SphericalSeed::new(3));
/// assert_eq!(results.len(), 3);
/// assert!(results.iter().all(Result::is_ok));
/// ```
#[must_use]
pub fn run_chains_parallel<P>(
    configs: &[SimulationConfig],
    provider: &P,
) -> Vec<Result<SimulationResult, SimulationError>>
where
    P: InitialComplexProvider + Sync + ?Sized,
{
    tracing::info!("[ensemble] running {} chains", configs.len());
    configs
        .par_iter()
        .map(|config| simulate(config, provider))
        .collect()
}
