//! Move bookkeeping and end-of-run summaries.

use crate::core::algorithms::moves::MoveKind;
use crate::core::foliation::SimplexCounts;
use crate::core::triangulation::Triangulation;
use serde::{Deserialize, Serialize};

/// What happened to one attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttemptOutcome {
    /// The move was committed.
    Accepted,
    /// A site was found but the Metropolis test failed.
    Rejected,
    /// No valid site existed for the drawn move; the attempt still counts.
    NoSite,
}

/// Tallies for one move kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveTally {
    /// Attempts that drew this move.
    pub attempted: u64,
    /// Committed moves.
    pub accepted: u64,
    /// Moves that failed the Metropolis test.
    pub rejected: u64,
    /// Attempts that found no site.
    pub no_site: u64,
}

impl MoveTally {
    /// `accepted / attempted`, or `0.0` before any attempt.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn acceptance_rate(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            self.accepted as f64 / self.attempted as f64
        }
    }
}

/// Per-move tallies of a run or a pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    tallies: [MoveTally; 5],
}

impl RunStats {
    /// Records one attempt.
    pub const fn record(&mut self, kind: MoveKind, outcome: AttemptOutcome) {
        let tally = &mut self.tallies[kind.index()];
        tally.attempted += 1;
        match outcome {
            AttemptOutcome::Accepted => tally.accepted += 1,
            AttemptOutcome::Rejected => tally.rejected += 1,
            AttemptOutcome::NoSite => tally.no_site += 1,
        }
    }

    /// Tally of one move.
    #[must_use]
    pub const fn tally(&self, kind: MoveKind) -> MoveTally {
        self.tallies[kind.index()]
    }

    /// Attempts over all moves.
    #[must_use]
    pub fn attempted(&self) -> u64 {
        self.tallies.iter().map(|t| t.attempted).sum()
    }

    /// Committed moves over all kinds.
    #[must_use]
    pub fn accepted(&self) -> u64 {
        self.tallies.iter().map(|t| t.accepted).sum()
    }

    /// Committed moves per kind, in [`MoveKind::ALL`] order.
    #[must_use]
    pub fn accepted_per_kind(&self) -> [u64; 5] {
        self.tallies.map(|t| t.accepted)
    }

    /// Tallies recorded since `earlier`, an older copy of `self`.
    #[must_use]
    pub fn since(&self, earlier: &Self) -> Self {
        let mut diff = *self;
        for (d, e) in diff.tallies.iter_mut().zip(earlier.tallies.iter()) {
            d.attempted = d.attempted.saturating_sub(e.attempted);
            d.accepted = d.accepted.saturating_sub(e.accepted);
            d.rejected = d.rejected.saturating_sub(e.rejected);
            d.no_site = d.no_site.saturating_sub(e.no_site);
        }
        diff
    }

    /// Adds another set of tallies into this one.
    pub fn merge(&mut self, other: &Self) {
        for (mine, theirs) in self.tallies.iter_mut().zip(other.tallies.iter()) {
            mine.attempted += theirs.attempted;
            mine.accepted += theirs.accepted;
            mine.rejected += theirs.rejected;
            mine.no_site += theirs.no_site;
        }
    }
}

/// Result of one Metropolis pass, handed to a
/// [`PassObserver`](crate::simulation::metropolis::PassObserver).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PassReport {
    /// Zero-based pass number.
    pub pass: u32,
    /// Attempts scheduled for the pass (`N3` at its start).
    pub scheduled: u64,
    /// Tallies of this pass only.
    pub stats: RunStats,
    /// Counts at the end of the pass.
    pub counts: SimplexCounts,
    /// Action at the end of the pass.
    pub action: f64,
    /// Whether cancellation cut the pass short.
    pub interrupted: bool,
}

/// End-of-run observables.
///
/// # Examples
///
/// ```rust
/// use cdt::prelude::*;
///
/// let tri = SphericalSeed::new(3).build().unwrap();
/// let summary = SummaryStatistics::new(&tri, &RunStats::default());
/// assert_eq!(summary.total_cells, 8);
/// assert_eq!(summary.volume_profile, vec![4, 4, 0]);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryStatistics {
    /// `N3^(3,1)`
    pub n3_31: u64,
    /// `N3^(2,2)`
    pub n3_22: u64,
    /// `N3^(1,3)`
    pub n3_13: u64,
    /// `N1_TL`
    pub n1_tl: u64,
    /// `N1_SL`
    pub n1_sl: u64,
    /// `N2_SL`
    pub n2_sl: u64,
    /// `N3`
    pub total_cells: u64,
    /// `N0`
    pub total_vertices: u64,
    /// Committed moves per kind, in [`MoveKind::ALL`] order.
    pub accepted_moves_per_type: [u64; 5],
    /// Cells per slab `[t, t+1]`.
    pub volume_profile: Vec<u64>,
}

impl SummaryStatistics {
    /// Reads the observables off a complex.
    #[must_use]
    pub fn new(tri: &Triangulation, stats: &RunStats) -> Self {
        let counts = tri.counts();
        Self {
            n3_31: counts.cells_31,
            n3_22: counts.cells_22,
            n3_13: counts.cells_13,
            n1_tl: counts.timelike_edges,
            n1_sl: counts.spacelike_edges,
            n2_sl: counts.spacelike_triangles,
            total_cells: counts.cells(),
            total_vertices: counts.vertices,
            accepted_moves_per_type: stats.accepted_per_kind(),
            volume_profile: tri.index().volume_profile(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_record_and_merge() {
        let mut a = RunStats::default();
        a.record(MoveKind::TwoThree, AttemptOutcome::Accepted);
        a.record(MoveKind::TwoThree, AttemptOutcome::Rejected);
        a.record(MoveKind::SixTwo, AttemptOutcome::NoSite);

        let mut b = RunStats::default();
        b.record(MoveKind::TwoThree, AttemptOutcome::Accepted);
        b.merge(&a);

        let tally = b.tally(MoveKind::TwoThree);
        assert_eq!(tally.attempted, 3);
        assert_eq!(tally.accepted, 2);
        assert_eq!(tally.rejected, 1);
        assert_eq!(b.tally(MoveKind::SixTwo).no_site, 1);
        assert_eq!(b.attempted(), 4);
        assert_eq!(b.accepted_per_kind(), [2, 0, 0, 0, 0]);
        assert_relative_eq!(tally.acceptance_rate(), 2.0 / 3.0);
        assert_relative_eq!(MoveTally::default().acceptance_rate(), 0.0);
        assert_eq!(b.since(&a).tally(MoveKind::TwoThree).accepted, 1);
        assert_eq!(b.since(&a).attempted(), 1);
    }
}
