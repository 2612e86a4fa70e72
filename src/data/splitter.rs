// ============================================================
// Layer 4 — Train/Validation Splitter
// ============================================================
// Each streamed batch is split into a training part (one Adam
// step) and a held-out validation part (metrics only).
//
// Membership is a property of the (user, item) pair, not of the
// batch: a pair draws one uniform number from an RNG seeded by
//
//   run_seed, user_id, item_id
//
// and is held out when that number falls below the validation
// fraction. The same pairs are therefore held out in every epoch,
// after a resume, and whatever the batch size, so validation
// examples are never trained on.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::domain::rating::RatingExample;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationSplit {
    fraction: f64,
    seed:     u64,
}

impl ValidationSplit {
    pub fn new(fraction: f64, seed: u64) -> Self {
        Self { fraction: fraction.clamp(0.0, 1.0), seed }
    }

    /// Whether the pair (`user_id`, `item_id`) belongs to the validation set.
    pub fn holds_out(&self, user_id: i64, item_id: i64) -> bool {
        if self.fraction <= 0.0 {
            return false;
        }
        let pair_seed = self.seed
            ^ (user_id as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
            ^ (item_id as u64).rotate_left(29).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        StdRng::seed_from_u64(pair_seed).gen::<f64>() < self.fraction
    }

    /// Split `encoded` (one entry per example of `batch`, same order)
    /// into (train, validation).
    pub fn split<T>(&self, batch: &[RatingExample], encoded: Vec<T>) -> (Vec<T>, Vec<T>) {
        debug_assert_eq!(batch.len(), encoded.len());

        let (mut train, mut val) = (Vec::with_capacity(encoded.len()), Vec::new());
        for (ex, item) in batch.iter().zip(encoded) {
            if self.holds_out(ex.user_id, ex.item_id) {
                val.push(item);
            } else {
                train.push(item);
            }
        }

        tracing::trace!("Batch split: {} training, {} validation", train.len(), val.len());
        (train, val)
    }
}
