//! Growing a seed complex to the target volume.
//!
//! Seeds are tiny; before sampling starts the complex is inflated with the two
//! volume-increasing moves, (2,6) and (2,3), each drawn with equal probability and
//! applied at a uniformly sampled site. Both preserve topology and foliation, so the
//! grown complex is a valid starting point for any chain.

use crate::core::algorithms::moves::{MoveCatalog, MoveError, MoveKind};
use crate::core::triangulation::Triangulation;
use rand::Rng;
use thiserror::Error;

/// Moves used for growth.
pub const GROWTH_MOVES: [MoveKind; 2] = [MoveKind::TwoSix, MoveKind::TwoThree];

/// Errors from [`grow_to_target`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum GrowthError {
    /// Neither growth move has a valid site.
    #[error("growth stalled at {cells} cells, target is {target}")]
    Stalled {
        /// Cells when growth stopped.
        cells: u64,
        /// Requested cell count.
        target: u64,
    },
    /// A commit failed.
    #[error(transparent)]
    Move(#[from] MoveError),
}

/// Applies random growth moves until `tri` has at least `target` cells.
///
/// Returns the number of moves applied; a complex already at the target is untouched.
///
/// # Errors
///
/// Returns [`GrowthError::Stalled`] if neither (2,6) nor (2,3) applies anywhere, or
/// [`GrowthError::Move`] if a commit fails.
///
/// # Examples
///
/// ```rust
/// use cdt::prelude::*;
/// use rand::SeedableRng;
///
/// let mut tri = SphericalSeed::new(3).build().unwrap();
/// let mut rng = rand::rngs::StdRng::seed_from_u64(1);
/// grow_to_target(&mut tri, &MoveCatalog::default(), 50, &mut rng).unwrap();
/// assert!(tri.counts().cells() >= 50);
/// ```
pub fn grow_to_target<R: Rng + ?Sized>(
    tri: &mut Triangulation,
    catalog: &MoveCatalog,
    target: u64,
    rng: &mut R,
) -> Result<u64, GrowthError> {
    let mut moves = 0;
    while tri.counts().cells() < target {
        let first = rng.random_range(0..GROWTH_MOVES.len());
        let mut applied = false;
        for offset in 0..GROWTH_MOVES.len() {
            let kind = GROWTH_MOVES[(first + offset) % GROWTH_MOVES.len()];
            match catalog.apply_random(tri, kind, rng) {
                Ok(_) => {
                    applied = true;
                    break;
                }
                Err(err) if err.is_no_valid_site() => {}
                Err(err) => return Err(err.into()),
            }
        }
        if !applied {
            return Err(GrowthError::Stalled {
                cells: tri.counts().cells(),
                target,
            });
        }
        moves += 1;
    }
    tracing::debug!(
        "[growth] reached N3={} (target {target}) after {moves} moves",
        tri.counts().cells()
    );
    Ok(moves)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::simplex_store::ComplexDescription;
    use crate::topology::manifold::BoundaryPolicy;
    use crate::topology::seed::{InitialComplexProvider, SphericalSeed};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_growth_reaches_target_and_keeps_foliation() {
        let mut tri = SphericalSeed::new(5).build().unwrap();
        let before = tri.counts();
        let mut rng = StdRng::seed_from_u64(17);
        let moves = grow_to_target(&mut tri, &MoveCatalog::new(32, false), 200, &mut rng).unwrap();
        assert!(moves > 0);
        assert!(tri.counts().cells() >= 200);
        assert!(tri.counts().vertices >= before.vertices);
        assert_eq!(tri.timeslices(), 5);
        // Poles stay single vertices.
        assert_eq!(tri.index().slice_stats(0).unwrap().vertices, 1);
        assert_eq!(tri.index().slice_stats(4).unwrap().vertices, 1);
        assert!(tri.validate().is_ok());
    }

    #[test]
    fn test_growth_at_target_is_a_no_op() {
        let mut tri = SphericalSeed::new(3).build().unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(
            grow_to_target(&mut tri, &MoveCatalog::default(), 8, &mut rng).unwrap(),
            0
        );
    }

    #[test]
    fn test_lone_cell_cannot_grow() {
        let description = ComplexDescription {
            timeslices: 2,
            vertex_timeslices: vec![0, 0, 0, 1],
            cells: vec![[0, 1, 2, 3]],
        };
        let mut tri =
            Triangulation::from_description(&description, BoundaryPolicy::WithBoundary).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(
            grow_to_target(&mut tri, &MoveCatalog::default(), 5, &mut rng),
            Err(GrowthError::Stalled {
                cells: 1,
                target: 5
            })
        );
    }
}
