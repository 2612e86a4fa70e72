// ============================================================
// Layer 4 — Rating Batcher
// ============================================================
// Stacks encoded examples into the tensors the two-tower model
// consumes. By the time an example reaches the batcher its ids
// have been mapped to dense indices and its features extracted:
//
//   Input:  N EncodedExamples
//   Output: RatingBatch with
//             user_indices  [N, 1]  Int
//             item_indices  [N, 1]  Int
//             user_features [N, F]
//             item_features [N, F]
//             targets       [N, 1]  (0–10 scale)
//
// Feature rows are flattened into one Vec and reshaped, the same
// way token sequences are stacked for a sequence model.

use burn::prelude::*;

use crate::data::features::FeatureVector;
use crate::domain::genre::FEATURE_DIM;

/// One example ready for tensor conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedExample {
    pub user_index:    usize,
    pub item_index:    usize,
    pub user_features: FeatureVector,
    pub item_features: FeatureVector,
    /// Target on the model scale; ignored at inference.
    pub target:        f32,
}

// ─── RatingBatch ──────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct RatingBatch<B: Backend> {
    pub user_indices:  Tensor<B, 2, Int>,
    pub item_indices:  Tensor<B, 2, Int>,
    pub user_features: Tensor<B, 2>,
    pub item_features: Tensor<B, 2>,
    pub targets:       Tensor<B, 2>,
}

// ─── RatingBatcher ────────────────────────────────────────────────────────────
#[derive(Clone, Debug)]
pub struct RatingBatcher<B: Backend> {
    device: B::Device,
}

impl<B: Backend> RatingBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    /// Stack `items` into one batch. `items` must not be empty.
    pub fn batch(&self, items: &[EncodedExample]) -> RatingBatch<B> {
        let n = items.len();

        let users: Vec<i32> = items.iter().map(|e| e.user_index as i32).collect();
        let goods: Vec<i32> = items.iter().map(|e| e.item_index as i32).collect();

        let user_flat: Vec<f32> = items
            .iter()
            .flat_map(|e| e.user_features.as_slice().iter().copied())
            .collect();
        let item_flat: Vec<f32> = items
            .iter()
            .flat_map(|e| e.item_features.as_slice().iter().copied())
            .collect();
        let targets: Vec<f32> = items.iter().map(|e| e.target).collect();

        RatingBatch {
            user_indices: Tensor::<B, 1, Int>::from_ints(users.as_slice(), &self.device)
                .reshape([n, 1]),
            item_indices: Tensor::<B, 1, Int>::from_ints(goods.as_slice(), &self.device)
                .reshape([n, 1]),
            user_features: Tensor::<B, 1>::from_floats(user_flat.as_slice(), &self.device)
                .reshape([n, FEATURE_DIM]),
            item_features: Tensor::<B, 1>::from_floats(item_flat.as_slice(), &self.device)
                .reshape([n, FEATURE_DIM]),
            targets: Tensor::<B, 1>::from_floats(targets.as_slice(), &self.device)
                .reshape([n, 1]),
        }
    }
}
