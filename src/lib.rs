//! # cdt
//!
//! Causal dynamical triangulations in three dimensions: foliated simplicial complexes,
//! the five ergodic moves that preserve their topology and foliation, and a
//! Metropolis-Hastings engine that samples them under a discretised Einstein-Hilbert
//! action.
//!
//! # Features
//!
//! - Arena storage of vertices and tetrahedra with generational keys ([`slotmap`])
//! - Incrementally maintained simplex counts, incidence and volume profile
//! - (2,3), (3,2), (2,6), (6,2) and (4,4) moves split into read-only plans and commits
//! - O(1) action deltas from the count change of a plan
//! - Uniform site sampling, reproducible from a single seed
//! - Independent chains in parallel with [rayon](https://docs.rs/rayon)
//! - Configuration with [serde](https://serde.rs) and a builder
//!
//! # Basic Usage
//!
//! ```rust
//! use cdt::prelude::*;
//!
//! let config = SimulationConfigBuilder::default()
//!     .timeslices(4)
//!     .target_simplices(120)
//!     .passes(3)
//!     .couplings(Couplings { k: 1.0, lambda: 0.8, alpha: 0.6 })
//!     .rng_seed(2024)
//!     .build()
//!     .unwrap();
//!
//! let result = simulate(&config, &SphericalSeed::new(config.timeslices)).unwrap();
//!
//! assert!(result.summary.total_cells >= 1);
//! assert_eq!(result.summary.volume_profile.len(), 4);
//! assert!(result.triangulation.validate().is_ok());
//! ```
//!
//! # Moves by hand
//!
//! Every move is planned before it is committed. A plan knows exactly how the simplex
//! counts will change, so the action difference is available without touching the
//! complex:
//!
//! ```rust
//! use cdt::prelude::*;
//! use rand::SeedableRng;
//!
//! let mut tri = SphericalSeed::new(4).build().unwrap();
//! let catalog = MoveCatalog::default();
//! let mut rng = rand::rngs::StdRng::seed_from_u64(3);
//!
//! let plan = catalog.sample_site(&tri, MoveKind::TwoSix, &mut rng).unwrap();
//! assert_eq!(plan.delta().vertices, 1);
//! assert_eq!(plan.delta().cells(), 4);
//!
//! let before = tri.counts();
//! catalog.apply(&mut tri, &plan).unwrap();
//! assert_eq!(tri.counts(), before + *plan.delta());
//! ```
//!
//! # References
//!
//! - J. Ambjørn, J. Jurkiewicz and R. Loll, "Dynamically triangulating Lorentzian
//!   quantum gravity", Nucl. Phys. B 610 (2001) 347, hep-th/0105267
//! - J. Ambjørn, J. Jurkiewicz and R. Loll, "Nonperturbative 3d Lorentzian quantum
//!   gravity", Phys. Rev. D 64 (2001) 044011, hep-th/0011276

// Forbid unsafe code throughout the entire crate
#![forbid(unsafe_code)]

#[macro_use]
extern crate derive_builder;

/// Storage, incidence and moves of foliated complexes.
pub mod core {
    /// Operations that edit a complex
    pub mod algorithms {
        /// The five ergodic moves
        pub mod moves;
    }
    pub mod cell;
    /// Collection aliases used throughout the crate
    pub mod collections;
    pub mod edge;
    pub mod facet;
    pub mod foliation;
    pub mod simplex_store;
    pub mod triangulation;
    pub mod vertex;

    pub use cell::*;
    pub use edge::*;
    pub use facet::*;
    pub use foliation::*;
    pub use simplex_store::*;
    pub use triangulation::*;
    pub use vertex::*;
}

/// Structural validation and initial complexes.
pub mod topology {
    /// Manifold and foliation invariants
    pub mod manifold;
    /// Providers of starting configurations
    pub mod seed;

    pub use manifold::*;
    pub use seed::*;
}

/// Actions, configuration and Monte Carlo sampling.
pub mod simulation {
    pub mod action;
    pub mod config;
    /// Parallel independent chains
    pub mod ensemble;
    pub mod growth;
    pub mod metropolis;
    pub mod statistics;

    pub use action::*;
    pub use config::*;
    pub use ensemble::*;
    pub use growth::*;
    pub use metropolis::*;
    pub use statistics::*;
}

/// A prelude module that re-exports commonly used types.
pub mod prelude {
    pub use crate::core::{
        algorithms::moves::*, cell::*, edge::*, facet::*, foliation::*, simplex_store::*,
        triangulation::*, vertex::*,
    };

    pub use crate::core::collections::{
        FastHashMap, FastHashSet, SmallBuffer, fast_hash_map_with_capacity,
        fast_hash_set_with_capacity,
    };

    pub use crate::simulation::{
        action::*, config::*, ensemble::*, growth::*, metropolis::*, statistics::*,
    };

    pub use crate::topology::{manifold::*, seed::*};
}

/// The function `is_normal` checks that structs implement `auto` traits.
/// Traits are checked at compile time, so this function is only used for
/// testing.
#[must_use]
pub const fn is_normal<T: Sized + Send + Sync + Unpin>() -> bool {
    true
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::{
        core::{cell::Cell, simplex_store::SimplexStore, triangulation::Triangulation},
        is_normal,
        simulation::{action::LinearAction, metropolis::MetropolisEngine},
    };

    #[test]
    fn normal_types() {
        assert!(is_normal::<Cell>());
        assert!(is_normal::<SimplexStore>());
        assert!(is_normal::<Triangulation>());
        assert!(is_normal::<MetropolisEngine<LinearAction>>());
    }

    #[test]
    fn test_prelude_exports() {
        use crate::prelude::*;

        let mut map: FastHashMap<u64, usize> = fast_hash_map_with_capacity(4);
        map.insert(1, 2);
        assert_eq!(map.get(&1), Some(&2));

        let mut buffer: SmallBuffer<MoveKind, 5> = SmallBuffer::new();
        buffer.extend(MoveKind::ALL);
        assert_eq!(buffer.len(), 5);

        let tri = SphericalSeed::new(3).build().unwrap();
        assert_eq!(tri.counts().cells_of(CellType::TwoTwo), 0);
        assert_eq!(DIMENSION, 3);
    }
}
