//! Cross-validation fold assignment.
//!
//! Folds are assigned per class: presences and absences each get their own
//! seeded shuffle followed by round-robin slicing, so every fold holds
//! either ⌊n/k⌋ or ⌈n/k⌉ points of each class. Stratification is therefore
//! a property of the caller splitting by class, not of this function.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FoldError {
    #[error("fold count must be at least 2, got {0}")]
    TooFewFolds(usize),

    #[error("cannot split {points} points into {folds} folds")]
    TooFewPoints { points: usize, folds: usize },
}

/// Assign fold ids `1..=k` to `n` points: seeded shuffle, then round-robin
/// over the shuffled order. The returned vector is indexed by point.
pub fn assign_folds(n: usize, k: usize, seed: u64) -> Result<Vec<u32>, FoldError> {
    if k < 2 {
        return Err(FoldError::TooFewFolds(k));
    }
    if n < k {
        return Err(FoldError::TooFewPoints {
            points: n,
            folds: k,
        });
    }

    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);

    let mut folds = vec![0u32; n];
    for (position, &point) in order.iter().enumerate() {
        folds[point] = (position % k) as u32 + 1;
    }
    Ok(folds)
}
