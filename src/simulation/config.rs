//! Run configuration.
//!
//! [`SimulationConfig`] is plain data: constructible with [`SimulationConfigBuilder`],
//! serialisable with serde, and checked once by [`SimulationConfig::validate`] before a
//! run starts.
//!
//! # Examples
//!
//! ```rust
//! use cdt::prelude::*;
//!
//! let config = SimulationConfigBuilder::default()
//!     .timeslices(4)
//!     .target_simplices(200)
//!     .passes(5)
//!     .couplings(Couplings { k: 1.0, lambda: 0.75, alpha: 0.6 })
//!     .rng_seed(42)
//!     .build()
//!     .unwrap();
//! assert!(config.validate().is_ok());
//! ```

use crate::core::algorithms::moves::{DEFAULT_MAX_SITE_DRAWS, MoveKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Smallest admissible `|α|` in three dimensions.
pub const MIN_ABS_ALPHA: f64 = 0.5;

/// Smallest admissible `timeslices`. Providers may require more; [`SphericalSeed`]
/// needs [`SphericalSeed::MIN_TIMESLICES`].
///
/// [`SphericalSeed`]: crate::topology::seed::SphericalSeed
/// [`SphericalSeed::MIN_TIMESLICES`]: crate::topology::seed::SphericalSeed::MIN_TIMESLICES
pub const MIN_TIMESLICES: u32 = 1;

/// Errors from [`SimulationConfig::validate`].
#[derive(Clone, Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum ConfigError {
    /// Fewer than [`MIN_TIMESLICES`] timeslices.
    #[error("{topology:?} topology needs at least {minimum} timeslices, got {timeslices}")]
    TooFewTimeslices {
        /// Requested topology.
        topology: TopologyKind,
        /// Requested slice count.
        timeslices: u32,
        /// Smallest admissible slice count.
        minimum: u32,
    },
    /// `target_simplices` is zero.
    #[error("target_simplices must be positive")]
    ZeroTargetSimplices,
    /// A coupling is NaN or infinite.
    #[error("coupling {name} must be finite, got {value}")]
    NonFiniteCoupling {
        /// Coupling name.
        name: &'static str,
        /// Offending value.
        value: f64,
    },
    /// `|α|` below [`MIN_ABS_ALPHA`].
    #[error("|alpha| must be at least {MIN_ABS_ALPHA} in 3D, got {alpha}")]
    AlphaTooSmall {
        /// Offending value.
        alpha: f64,
    },
    /// The topology has no seed provider.
    #[error("{topology:?} topology is not supported")]
    UnsupportedTopology {
        /// Requested topology.
        topology: TopologyKind,
    },
    /// Move weights are negative, non-finite, or all zero.
    #[error("invalid move weights: {message}")]
    InvalidMoveWeights {
        /// What was wrong.
        message: String,
    },
}

/// Spatial topology of the foliation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TopologyKind {
    /// `S³`: spherical slices capped by poles.
    #[default]
    Spherical,
    /// `T³`; accepted by the format, rejected by validation.
    Toroidal,
}

/// Couplings of the discretised action.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Couplings {
    /// Inverse gravitational coupling.
    pub k: f64,
    /// Cosmological constant.
    pub lambda: f64,
    /// Timelike/spacelike length-squared ratio.
    pub alpha: f64,
}

impl Default for Couplings {
    fn default() -> Self {
        Self {
            k: 1.0,
            lambda: 1.0,
            alpha: 0.6,
        }
    }
}

/// Relative proposal frequency of each move.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MoveWeights {
    /// (2,3)
    pub two_three: f64,
    /// (3,2)
    pub three_two: f64,
    /// (2,6)
    pub two_six: f64,
    /// (6,2)
    pub six_two: f64,
    /// (4,4)
    pub four_four: f64,
}

impl Default for MoveWeights {
    fn default() -> Self {
        Self::uniform()
    }
}

impl MoveWeights {
    /// Equal weight on every move.
    #[must_use]
    pub const fn uniform() -> Self {
        Self {
            two_three: 1.0,
            three_two: 1.0,
            two_six: 1.0,
            six_two: 1.0,
            four_four: 1.0,
        }
    }

    /// Weight of one move.
    #[must_use]
    pub const fn weight(&self, kind: MoveKind) -> f64 {
        match kind {
            MoveKind::TwoThree => self.two_three,
            MoveKind::ThreeTwo => self.three_two,
            MoveKind::TwoSix => self.two_six,
            MoveKind::SixTwo => self.six_two,
            MoveKind::FourFour => self.four_four,
        }
    }

    /// Weights in [`MoveKind::ALL`] order.
    #[must_use]
    pub fn as_array(&self) -> [f64; 5] {
        MoveKind::ALL.map(|kind| self.weight(kind))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let weights = self.as_array();
        if let Some(kind) = MoveKind::ALL
            .into_iter()
            .find(|k| !weights[k.index()].is_finite() || weights[k.index()] < 0.0)
        {
            return Err(ConfigError::InvalidMoveWeights {
                message: format!("{kind} weight is {}", self.weight(kind)),
            });
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err(ConfigError::InvalidMoveWeights {
                message: "all weights are zero".to_string(),
            });
        }
        Ok(())
    }
}

fn default_validate_moves() -> bool {
    cfg!(debug_assertions)
}

const fn default_max_site_draws() -> u32 {
    DEFAULT_MAX_SITE_DRAWS
}

/// Everything a run needs besides the initial complex and the action.
#[derive(Builder, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Spatial topology.
    #[builder(default)]
    #[serde(default)]
    pub topology: TopologyKind,
    /// Number of timeslices `T`. The provider's complex decides the foliation actually
    /// used.
    pub timeslices: u32,
    /// Cell count the seed is grown to before sampling.
    pub target_simplices: u64,
    /// Metropolis passes; each pass makes as many attempts as there were cells at its start.
    #[builder(default)]
    #[serde(default)]
    pub passes: u32,
    /// Action couplings.
    #[builder(default)]
    #[serde(default)]
    pub couplings: Couplings,
    /// Move proposal weights.
    #[builder(default)]
    #[serde(default)]
    pub move_weights: MoveWeights,
    /// Seed for the chain's RNG; drawn from entropy when absent.
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub rng_seed: Option<u64>,
    /// Run full validation after every committed move.
    #[builder(default = "cfg!(debug_assertions)")]
    #[serde(default = "default_validate_moves")]
    pub validate_moves: bool,
    /// Rejection-sampling draws per site request before the exhaustive fallback.
    #[builder(default = "DEFAULT_MAX_SITE_DRAWS")]
    #[serde(default = "default_max_site_draws")]
    pub max_site_draws: u32,
}

impl SimulationConfig {
    /// Checks every field.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topology != TopologyKind::Spherical {
            return Err(ConfigError::UnsupportedTopology {
                topology: self.topology,
            });
        }
        if self.timeslices < MIN_TIMESLICES {
            return Err(ConfigError::TooFewTimeslices {
                topology: self.topology,
                timeslices: self.timeslices,
                minimum: MIN_TIMESLICES,
            });
        }
        if self.target_simplices == 0 {
            return Err(ConfigError::ZeroTargetSimplices);
        }
        for (name, value) in [
            ("k", self.couplings.k),
            ("lambda", self.couplings.lambda),
            ("alpha", self.couplings.alpha),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::NonFiniteCoupling { name, value });
            }
        }
        if self.couplings.alpha.abs() < MIN_ABS_ALPHA {
            return Err(ConfigError::AlphaTooSmall {
                alpha: self.couplings.alpha,
            });
        }
        self.move_weights.validate()
    }
}
