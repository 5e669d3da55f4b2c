//! Discretised actions and their move deltas.
//!
//! An [`Action`] is a function of the global [`SimplexCounts`]. Because every move
//! changes those counts by a small, exactly known [`CountDelta`], `ΔS` for a proposed move
//! is computed in O(1) from the plan alone.
//!
//! The bare 3D CDT action (Ambjørn, Jurkiewicz & Loll, Phys. Rev. D 64 (2001) 044011,
//! hep-th/0011276) is linear in the counts:
//!
//! ```text
//! S = -k0 * N0 + k3 * N3
//! ```
//!
//! [`LinearAction`] generalises this to arbitrary coefficients on every tracked count.
//! How user-facing couplings `(k, λ, α)` map onto coefficients is a convention, captured
//! by the [`CouplingMap`] trait.

use crate::core::algorithms::moves::MoveKind;
use crate::core::foliation::{CountDelta, SimplexCounts};
use crate::simulation::config::Couplings;
use serde::{Deserialize, Serialize};

/// A discretised action `S(counts)`.
///
/// Implementations must be pure: equal counts give equal values.
pub trait Action: Send + Sync {
    /// `S` at the given counts.
    fn evaluate(&self, counts: &SimplexCounts) -> f64;

    /// `ΔS` for a move taking `before` to `before + delta`.
    ///
    /// The default evaluates the action twice; linear actions override it with a dot
    /// product.
    fn delta_action(&self, kind: MoveKind, before: &SimplexCounts, delta: &CountDelta) -> f64 {
        let _ = kind;
        self.evaluate(&before.apply(delta)) - self.evaluate(before)
    }
}

/// Action linear in the simplex counts.
///
/// # Examples
///
/// ```rust
/// use cdt::prelude::*;
/// use approx::assert_relative_eq;
///
/// let action = LinearAction::ajl(1.0, 0.75);
/// let counts = SimplexCounts { vertices: 10, cells_31: 8, cells_13: 8, ..Default::default() };
/// assert_relative_eq!(action.evaluate(&counts), -10.0 + 0.75 * 16.0);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LinearAction {
    /// Coefficient of `N0`.
    pub vertices: f64,
    /// Coefficient of `N1_TL`.
    pub timelike_edges: f64,
    /// Coefficient of `N1_SL`.
    pub spacelike_edges: f64,
    /// Coefficient of `N2_SL`.
    pub spacelike_triangles: f64,
    /// Coefficient of `N3^(3,1)`.
    pub cells_31: f64,
    /// Coefficient of `N3^(2,2)`.
    pub cells_22: f64,
    /// Coefficient of `N3^(1,3)`.
    pub cells_13: f64,
}

impl LinearAction {
    /// `S = -k0 N0 + k3 N3`.
    #[must_use]
    pub const fn ajl(k0: f64, k3: f64) -> Self {
        Self {
            vertices: -k0,
            timelike_edges: 0.0,
            spacelike_edges: 0.0,
            spacelike_triangles: 0.0,
            cells_31: k3,
            cells_22: k3,
            cells_13: k3,
        }
    }

    fn dot(&self, n: [f64; 7]) -> f64 {
        self.vertices * n[0]
            + self.timelike_edges * n[1]
            + self.spacelike_edges * n[2]
            + self.spacelike_triangles * n[3]
            + self.cells_31 * n[4]
            + self.cells_22 * n[5]
            + self.cells_13 * n[6]
    }
}

impl Action for LinearAction {
    #[allow(clippy::cast_precision_loss)]
    fn evaluate(&self, c: &SimplexCounts) -> f64 {
        self.dot([
            c.vertices as f64,
            c.timelike_edges as f64,
            c.spacelike_edges as f64,
            c.spacelike_triangles as f64,
            c.cells_31 as f64,
            c.cells_22 as f64,
            c.cells_13 as f64,
        ])
    }

    #[allow(clippy::cast_precision_loss)]
    fn delta_action(&self, _kind: MoveKind, _before: &SimplexCounts, d: &CountDelta) -> f64 {
        self.dot([
            d.vertices as f64,
            d.timelike_edges as f64,
            d.spacelike_edges as f64,
            d.spacelike_triangles as f64,
            d.cells_31 as f64,
            d.cells_22 as f64,
            d.cells_13 as f64,
        ])
    }
}

/// Accepts every move: `ΔS = -∞`, so `min(1, e^{-ΔS}) = 1`.
///
/// Useful for growth phases and for exercising the move machinery deterministically.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AcceptAll;

impl Action for AcceptAll {
    fn evaluate(&self, _counts: &SimplexCounts) -> f64 {
        0.0
    }

    fn delta_action(&self, _kind: MoveKind, _before: &SimplexCounts, _delta: &CountDelta) -> f64 {
        f64::NEG_INFINITY
    }
}

/// Maps user-facing couplings onto an action.
pub trait CouplingMap {
    /// The action for `couplings`.
    fn action(&self, couplings: &Couplings) -> LinearAction;
}

/// Reads `k` as `k0` and `λ` as `k3`; `α` only constrains admissible configurations
/// through config validation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DirectCouplingMap;

impl CouplingMap for DirectCouplingMap {
    fn action(&self, couplings: &Couplings) -> LinearAction {
        LinearAction::ajl(couplings.k, couplings.lambda)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_linear_delta_matches_difference_of_evaluations() {
        let action = LinearAction {
            spacelike_edges: 0.3,
            timelike_edges: -0.2,
            ..LinearAction::ajl(1.1, 0.7)
        };
        let before = SimplexCounts {
            vertices: 40,
            timelike_edges: 100,
            spacelike_edges: 60,
            spacelike_triangles: 40,
            cells_31: 30,
            cells_22: 20,
            cells_13: 30,
        };
        let delta = CountDelta {
            vertices: 1,
            spacelike_edges: 3,
            timelike_edges: 2,
            spacelike_triangles: 2,
            cells_31: 2,
            cells_13: 2,
            ..CountDelta::default()
        };
        let direct = action.delta_action(MoveKind::TwoSix, &before, &delta);
        let via_evaluate = action.evaluate(&before.apply(&delta)) - action.evaluate(&before);
        assert_relative_eq!(direct, via_evaluate, epsilon = 1e-12);
    }

    #[test]
    fn test_inverse_moves_have_opposite_delta() {
        let action = LinearAction::ajl(0.9, 1.3);
        let before = SimplexCounts::default();
        let delta = CountDelta {
            timelike_edges: 1,
            cells_22: 1,
            ..CountDelta::default()
        };
        let forward = action.delta_action(MoveKind::TwoThree, &before, &delta);
        let backward = action.delta_action(MoveKind::ThreeTwo, &before, &delta.inverse());
        assert_relative_eq!(forward, -backward);
    }

    #[test]
    fn test_accept_all_is_minus_infinity() {
        let delta = AcceptAll.delta_action(
            MoveKind::FourFour,
            &SimplexCounts::default(),
            &CountDelta::default(),
        );
        assert!(delta.is_infinite() && delta.is_sign_negative());
    }

    #[test]
    fn test_direct_coupling_map() {
        let couplings = Couplings {
            k: 2.0,
            lambda: 0.5,
            alpha: 0.6,
        };
        let action = DirectCouplingMap.action(&couplings);
        assert_relative_eq!(action.vertices, -2.0);
        assert_relative_eq!(action.cells_22, 0.5);
    }
}
