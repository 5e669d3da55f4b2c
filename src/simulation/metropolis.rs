//! Metropolis-Hastings sampling over foliated triangulations.
//!
//! One *attempt* draws a move kind by [`MoveWeights`], samples a site uniformly among
//! the valid sites of that kind, evaluates `ΔS` from the plan's count delta and accepts
//! with probability `min(1, e^{-ΔS})`. One *pass* makes as many attempts as the complex
//! had cells at the start of the pass.
//!
//! An attempt whose move has no valid site is counted as used and recorded in
//! [`MoveTally::no_site`](crate::simulation::statistics::MoveTally::no_site); no other
//! move is drawn in its place.
//!
//! A chain is strictly sequential. Independent chains run in parallel through
//! [`run_chains_parallel`](crate::simulation::ensemble::run_chains_parallel).

use crate::core::algorithms::moves::{MoveCatalog, MoveError, MoveKind};
use crate::core::triangulation::{IngestError, Triangulation};
use crate::simulation::action::{Action, CouplingMap, DirectCouplingMap};
use crate::simulation::config::{ConfigError, MoveWeights, SimulationConfig};
use crate::simulation::growth::{GrowthError, grow_to_target};
use crate::simulation::statistics::{AttemptOutcome, PassReport, RunStats, SummaryStatistics};
use crate::topology::seed::InitialComplexProvider;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Errors that end a run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SimulationError {
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The initial complex is malformed.
    #[error(transparent)]
    Ingest(#[from] IngestError),
    /// A move failed for a reason other than a missing site.
    #[error(transparent)]
    Move(#[from] MoveError),
    /// Growth to the target volume could not proceed.
    #[error(transparent)]
    Growth(#[from] GrowthError),
}

/// Cooperative cancellation flag, checked between attempts.
///
/// Clones share the flag.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// A fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Called after every pass with the pass report and the current complex.
///
/// This is the checkpoint hook: the complex is consistent and may be snapshotted.
/// Returning [`ControlFlow::Break`] stops the run after this pass.
pub trait PassObserver {
    /// Observes one finished pass.
    fn on_pass(&mut self, report: &PassReport, tri: &Triangulation) -> ControlFlow<()>;
}

impl<F> PassObserver for F
where
    F: FnMut(&PassReport, &Triangulation) -> ControlFlow<()>,
{
    fn on_pass(&mut self, report: &PassReport, tri: &Triangulation) -> ControlFlow<()> {
        self(report, tri)
    }
}

/// Observer that never stops the run.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl PassObserver for NoopObserver {
    fn on_pass(&mut self, _report: &PassReport, _tri: &Triangulation) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }
}

/// Per-chain state that is not the complex: RNG, move selection and tallies.
#[derive(Clone, Debug)]
pub struct SimulationContext {
    rng: StdRng,
    seed: u64,
    catalog: MoveCatalog,
    move_picker: WeightedIndex<f64>,
    stats: RunStats,
}

impl SimulationContext {
    /// Creates a context.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidMoveWeights`] if `weights` cannot be sampled.
    pub fn new(seed: u64, weights: &MoveWeights, catalog: MoveCatalog) -> Result<Self, ConfigError> {
        let move_picker = WeightedIndex::new(weights.as_array()).map_err(|err| {
            ConfigError::InvalidMoveWeights {
                message: err.to_string(),
            }
        })?;
        Ok(Self {
            rng: StdRng::seed_from_u64(seed),
            seed,
            catalog,
            move_picker,
            stats: RunStats::default(),
        })
    }

    /// Seed the RNG started from.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// The move catalog.
    #[must_use]
    pub const fn catalog(&self) -> &MoveCatalog {
        &self.catalog
    }

    /// Tallies since creation.
    #[must_use]
    pub const fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// The chain's RNG.
    pub const fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    fn pick_move(&mut self) -> MoveKind {
        MoveKind::ALL[self.move_picker.sample(&mut self.rng)]
    }
}

/// The seed of `config`, or a fresh one from the thread RNG.
#[must_use]
pub fn resolve_seed(config: &SimulationConfig) -> u64 {
    config.rng_seed.unwrap_or_else(|| {
        let seed = rand::rng().random();
        tracing::info!("[metropolis] no rng_seed configured, using {seed}");
        seed
    })
}

/// One Markov chain: a complex, an action and a [`SimulationContext`].
#[derive(Debug)]
pub struct MetropolisEngine<A: Action> {
    triangulation: Triangulation,
    action: A,
    context: SimulationContext,
    passes_completed: u32,
}

impl<A: Action> MetropolisEngine<A> {
    /// Creates an engine from parts.
    #[must_use]
    pub const fn new(triangulation: Triangulation, action: A, context: SimulationContext) -> Self {
        Self {
            triangulation,
            action,
            context,
            passes_completed: 0,
        }
    }

    /// Creates an engine using the weights, catalog settings and seed of `config`.
    ///
    /// Only the fields the engine reads are checked; [`simulate`] validates the whole
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidMoveWeights`] for unusable weights.
    pub fn from_config(
        triangulation: Triangulation,
        action: A,
        config: &SimulationConfig,
    ) -> Result<Self, ConfigError> {
        let catalog = MoveCatalog::new(config.max_site_draws, config.validate_moves);
        let context = SimulationContext::new(resolve_seed(config), &config.move_weights, catalog)?;
        Ok(Self::new(triangulation, action, context))
    }

    /// The current complex.
    #[must_use]
    pub const fn triangulation(&self) -> &Triangulation {
        &self.triangulation
    }

    /// The action.
    #[must_use]
    pub const fn action(&self) -> &A {
        &self.action
    }

    /// RNG, catalog and tallies.
    #[must_use]
    pub const fn context(&self) -> &SimulationContext {
        &self.context
    }

    /// Tallies since creation.
    #[must_use]
    pub const fn stats(&self) -> &RunStats {
        &self.context.stats
    }

    /// Passes finished so far.
    #[must_use]
    pub const fn passes_completed(&self) -> u32 {
        self.passes_completed
    }

    /// `S` at the current counts.
    #[must_use]
    pub fn action_value(&self) -> f64 {
        self.action.evaluate(&self.triangulation.counts())
    }

    /// Grows the complex with volume-increasing moves until it has `target` cells.
    ///
    /// Uses the chain's own RNG, so the run stays reproducible from its seed.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::Growth`] if no volume-increasing move applies, or
    /// [`SimulationError::Move`] if a commit fails.
    pub fn grow_to(&mut self, target: u64) -> Result<u64, SimulationError> {
        let catalog = self.context.catalog;
        let moves = grow_to_target(&mut self.triangulation, &catalog, target, &mut self.context.rng)?;
        Ok(moves)
    }

    /// One attempt with a weighted random move.
    ///
    /// # Errors
    ///
    /// See [`attempt_move`](Self::attempt_move).
    pub fn attempt(&mut self) -> Result<AttemptOutcome, SimulationError> {
        let kind = self.context.pick_move();
        self.attempt_move(kind)
    }

    /// One attempt of `kind`.
    ///
    /// A missing site is an outcome, not an error. The complex is unchanged unless the
    /// outcome is [`AttemptOutcome::Accepted`].
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::Move`] if committing the accepted move fails, including
    /// post-commit validation when enabled.
    pub fn attempt_move(&mut self, kind: MoveKind) -> Result<AttemptOutcome, SimulationError> {
        let outcome = self.try_move(kind)?;
        self.context.stats.record(kind, outcome);
        Ok(outcome)
    }

    fn try_move(&mut self, kind: MoveKind) -> Result<AttemptOutcome, SimulationError> {
        let plan = match self
            .context
            .catalog
            .sample_site(&self.triangulation, kind, &mut self.context.rng)
        {
            Ok(plan) => plan,
            Err(err) if err.is_no_valid_site() => {
                tracing::trace!("[metropolis] {kind}: {err}");
                return Ok(AttemptOutcome::NoSite);
            }
            Err(err) => return Err(err.into()),
        };

        let before = self.triangulation.counts();
        let delta_s = self.action.delta_action(kind, &before, plan.delta());
        let u: f64 = self.context.rng.random();
        if u >= (-delta_s).exp().min(1.0) {
            return Ok(AttemptOutcome::Rejected);
        }

        self.context
            .catalog
            .apply(&mut self.triangulation, &plan)
            .inspect_err(|err| {
                if matches!(err, MoveError::InvariantViolation { .. }) {
                    tracing::warn!("[metropolis] {kind} broke an invariant: {err}");
                }
            })?;
        Ok(AttemptOutcome::Accepted)
    }

    /// One pass of `N3` attempts, `N3` read at the start of the pass.
    ///
    /// Cancellation is checked before every attempt; a cancelled pass is reported with
    /// `interrupted` set and does not count as completed.
    ///
    /// # Errors
    ///
    /// See [`attempt`](Self::attempt).
    pub fn run_pass(&mut self, cancel: &CancellationToken) -> Result<PassReport, SimulationError> {
        let scheduled = self.triangulation.counts().cells();
        let start = self.context.stats;
        let mut interrupted = false;
        for _ in 0..scheduled {
            if cancel.is_cancelled() {
                interrupted = true;
                break;
            }
            self.attempt()?;
        }

        let report = PassReport {
            pass: self.passes_completed,
            scheduled,
            stats: self.context.stats.since(&start),
            counts: self.triangulation.counts(),
            action: self.action_value(),
            interrupted,
        };
        if !interrupted {
            self.passes_completed += 1;
        }
        tracing::debug!(
            "[metropolis] pass {}: {}/{} accepted, N0={}, N3={}, S={:.4}",
            report.pass,
            report.stats.accepted(),
            report.stats.attempted(),
            report.counts.vertices,
            report.counts.cells(),
            report.action
        );
        Ok(report)
    }

    /// Runs up to `passes` passes, calling `observer` after each one.
    ///
    /// Stops early on cancellation or when the observer breaks. Returns the number of
    /// passes completed by this call.
    ///
    /// # Errors
    ///
    /// See [`attempt`](Self::attempt).
    pub fn run<O: PassObserver + ?Sized>(
        &mut self,
        passes: u32,
        observer: &mut O,
        cancel: &CancellationToken,
    ) -> Result<u32, SimulationError> {
        let first = self.passes_completed;
        for _ in 0..passes {
            let report = self.run_pass(cancel)?;
            if report.interrupted {
                tracing::info!("[metropolis] cancelled during pass {}", report.pass);
                break;
            }
            if observer.on_pass(&report, &self.triangulation).is_break() {
                tracing::info!("[metropolis] observer stopped the run after pass {}", report.pass);
                break;
            }
        }
        Ok(self.passes_completed - first)
    }

    /// Consumes the engine.
    #[must_use]
    pub fn finish(self) -> SimulationResult {
        let summary = SummaryStatistics::new(&self.triangulation, &self.context.stats);
        SimulationResult {
            triangulation: self.triangulation,
            summary,
            stats: self.context.stats,
            seed: self.context.seed,
            passes_completed: self.passes_completed,
        }
    }
}

/// Final state of a run.
#[derive(Clone, Debug)]
pub struct SimulationResult {
    /// The final complex.
    pub triangulation: Triangulation,
    /// Observables of the final complex.
    pub summary: SummaryStatistics,
    /// Tallies over all passes.
    pub stats: RunStats,
    /// Seed the run started from.
    pub seed: u64,
    /// Passes finished.
    pub passes_completed: u32,
}

/// Validates `config`, ingests the provider's complex, grows it to the target volume and
/// runs `config.passes` passes of the action given by [`DirectCouplingMap`].
///
/// # Errors
///
/// Returns [`SimulationError`] for invalid configuration, a malformed initial complex,
/// stalled growth, or a failed commit.
///
/// # Examples
///
/// ```rust
/// use cdt::prelude::*;
///
/// let config = SimulationConfigBuilder::default()
///     .timeslices(3)
///     .target_simplices(40)
///     .passes(2)
///     .rng_seed(7)
///     .build()
///     .unwrap();
/// let result = simulate(&config, &SphericalSeed::new(3)).unwrap();
/// assert_eq!(result.passes_completed, 2);
/// assert!(result.triangulation.validate().is_ok());
/// ```
pub fn simulate<P: InitialComplexProvider + ?Sized>(
    config: &SimulationConfig,
    provider: &P,
) -> Result<SimulationResult, SimulationError> {
    let action = DirectCouplingMap.action(&config.couplings);
    simulate_with(config, provider, action, &mut NoopObserver, &CancellationToken::new())
}

/// [`simulate`] with an explicit action, observer and cancellation token.
///
/// # Errors
///
/// See [`simulate`].
pub fn simulate_with<P, A, O>(
    config: &SimulationConfig,
    provider: &P,
    action: A,
    observer: &mut O,
    cancel: &CancellationToken,
) -> Result<SimulationResult, SimulationError>
where
    P: InitialComplexProvider + ?Sized,
    A: Action,
    O: PassObserver + ?Sized,
{
    config.validate()?;
    let triangulation = provider.build()?;
    if triangulation.timeslices() != config.timeslices {
        tracing::warn!(
            "[metropolis] provider built {} timeslices, config asks for {}",
            triangulation.timeslices(),
            config.timeslices
        );
    }

    let mut engine = MetropolisEngine::from_config(triangulation, action, config)?;
    tracing::info!(
        "[metropolis] start: seed={}, T={}, target N3={}, passes={}",
        engine.context().seed(),
        config.timeslices,
        config.target_simplices,
        config.passes
    );

    let grown = engine.grow_to(config.target_simplices)?;
    tracing::debug!(
        "[metropolis] growth: {grown} moves, N3={}",
        engine.triangulation().number_of_cells()
    );

    engine.run(config.passes, observer, cancel)?;
    let result = engine.finish();
    tracing::info!(
        "[metropolis] done: {} passes, N0={}, N3={}",
        result.passes_completed,
        result.summary.total_vertices,
        result.summary.total_cells
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::simplex_store::ComplexDescription;
    use crate::simulation::action::{AcceptAll, LinearAction};
    use crate::topology::manifold::BoundaryPolicy;
    use crate::topology::seed::SphericalSeed;

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

    fn engine<A: Action>(action: A, seed: u64) -> MetropolisEngine<A> {
        let tri = SphericalSeed::new(4).build().unwrap();
        let context =
            SimulationContext::new(seed, &MoveWeights::uniform(), MoveCatalog::new(16, true)).unwrap();
        MetropolisEngine::new(tri, action, context)
    }

    #[test]
    fn test_pass_schedules_n3_attempts() {
        init_tracing();
        let mut engine = engine(LinearAction::ajl(1.0, 1.0), 5);
        let n3 = engine.triangulation().counts().cells();
        let report = engine.run_pass(&CancellationToken::new()).unwrap();
        assert_eq!(report.scheduled, n3);
        assert_eq!(report.stats.attempted(), n3);
        assert_eq!(engine.passes_completed(), 1);
        assert!(engine.triangulation().validate().is_ok());
    }

    #[test]
    fn test_accept_all_never_rejects() {
        init_tracing();
        let mut engine = engine(AcceptAll, 9);
        engine.run(3, &mut NoopObserver, &CancellationToken::new()).unwrap();
        let stats = engine.stats();
        for kind in MoveKind::ALL {
            assert_eq!(stats.tally(kind).rejected, 0, "{kind}");
        }
        assert!(stats.accepted() > 0);
    }

    #[test]
    fn test_same_seed_same_chain() {
        let run = |seed| {
            let mut engine = engine(LinearAction::ajl(0.5, 0.9), seed);
            engine.run(2, &mut NoopObserver, &CancellationToken::new()).unwrap();
            engine.finish()
        };
        let (a, b) = (run(11), run(11));
        assert_eq!(a.summary, b.summary);
        assert_eq!(a.stats, b.stats);
        assert_eq!(a.triangulation.snapshot(), b.triangulation.snapshot());
    }

    #[test]
    fn test_cancelled_token_stops_before_first_attempt() {
        let mut engine = engine(AcceptAll, 1);
        let cancel = CancellationToken::new();
        cancel.clone().cancel();
        let before = engine.triangulation().snapshot();
        let passes = engine.run(5, &mut NoopObserver, &cancel).unwrap();
        assert_eq!(passes, 0);
        assert_eq!(engine.stats().attempted(), 0);
        assert_eq!(engine.triangulation().snapshot(), before);
    }

    #[test]
    fn test_observer_can_stop_the_run() {
        let mut engine = engine(LinearAction::ajl(1.0, 1.0), 2);
        let mut seen = Vec::new();
        let mut observer = |report: &PassReport, tri: &Triangulation| {
            seen.push((report.pass, tri.counts()));
            if report.pass == 1 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        };
        let passes = engine.run(10, &mut observer, &CancellationToken::new()).unwrap();
        assert_eq!(passes, 2);
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_no_site_attempts_are_counted() {
        // Only (6,2) is ever drawn; the open pair has no vertex of degree six.
        let description = ComplexDescription {
            timeslices: 2,
            vertex_timeslices: vec![0, 0, 0, 1, 1],
            cells: vec![[0, 1, 2, 3], [0, 1, 3, 4]],
        };
        let tri =
            Triangulation::from_description(&description, BoundaryPolicy::WithBoundary).unwrap();
        let weights = MoveWeights {
            two_three: 0.0,
            three_two: 0.0,
            two_six: 0.0,
            six_two: 1.0,
            four_four: 0.0,
        };
        let context = SimulationContext::new(3, &weights, MoveCatalog::new(4, true)).unwrap();
        let mut engine = MetropolisEngine::new(tri, AcceptAll, context);
        let before = engine.triangulation().snapshot();
        let report = engine.run_pass(&CancellationToken::new()).unwrap();
        assert_eq!(report.stats.tally(MoveKind::SixTwo).no_site, 2);
        assert_eq!(engine.triangulation().snapshot(), before);
    }

    #[test]
    fn test_simulate_rejects_invalid_config() {
        let config = crate::simulation::config::SimulationConfigBuilder::default()
            .timeslices(1)
            .target_simplices(10)
            .build()
            .unwrap();
        assert!(matches!(
            simulate(&config, &SphericalSeed::new(1)),
            Err(SimulationError::Config(_))
        ));
    }
}
