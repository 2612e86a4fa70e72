// ============================================================
// Layer 5 — Two-Tower Rating Model
// ============================================================
//
//   user index ─► Embedding ─┐
//                            ├─ concat ─► Linear ─► ReLU ─► Linear ─► u
//   user features ───────────┘
//
//   item index ─► Embedding ─┐
//                            ├─ concat ─► Linear ─► ReLU ─► Linear ─► v
//   item features ───────────┘
//
//   merge(u, v):
//     dot   → Σ u·v
//     dense → concat(u, v) ─► Linear ─► ReLU ─► Linear
//
//   rating = sigmoid(merge) × 10
//
// The sigmoid keeps every prediction inside the 0–10 target range
// without any post-hoc clamping during training.

use std::fmt;
use std::str::FromStr;

use burn::{
    nn::{
        loss::{MseLoss, Reduction},
        Embedding, EmbeddingConfig,
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation::{relu, sigmoid},
};
use serde::{Deserialize, Serialize};

use crate::data::batcher::RatingBatch;
use crate::domain::genre::FEATURE_DIM;
use crate::domain::rating::MODEL_RATING_MAX;

// ─── TowerMerge ───────────────────────────────────────────────────────────────
/// How the two tower outputs are combined into one score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TowerMerge {
    Dot,
    Dense,
}

impl fmt::Display for TowerMerge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TowerMerge::Dot   => "dot",
            TowerMerge::Dense => "dense",
        })
    }
}

impl FromStr for TowerMerge {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dot"   => Ok(TowerMerge::Dot),
            "dense" => Ok(TowerMerge::Dense),
            other   => Err(format!("unknown tower merge '{other}' (expected dot or dense)")),
        }
    }
}

// ─── Config ───────────────────────────────────────────────────────────────────
// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize.
#[derive(Config, Debug)]
pub struct TwoTowerConfig {
    /// Rows of the user embedding table
    pub num_users: usize,
    /// Rows of the item embedding table
    pub num_items: usize,
    #[config(default = 32)]
    pub embedding_dim: usize,
    #[config(default = 64)]
    pub hidden_dim: usize,
    #[config(default = 32)]
    pub repr_dim: usize,
    #[config(default = "TowerMerge::Dense")]
    pub merge: TowerMerge,
}

impl TwoTowerConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> TwoTowerModel<B> {
        let user_tower = self.build_tower(self.num_users, device);
        let item_tower = self.build_tower(self.num_items, device);

        let (head_hidden, head_output) = match self.merge {
            TowerMerge::Dot => (None, None),
            TowerMerge::Dense => (
                Some(LinearConfig::new(2 * self.repr_dim, self.hidden_dim).init(device)),
                Some(LinearConfig::new(self.hidden_dim, 1).init(device)),
            ),
        };

        TwoTowerModel { user_tower, item_tower, head_hidden, head_output }
    }

    fn build_tower<B: Backend>(&self, rows: usize, device: &B::Device) -> Tower<B> {
        Tower {
            embedding: EmbeddingConfig::new(rows, self.embedding_dim).init(device),
            hidden:    LinearConfig::new(self.embedding_dim + FEATURE_DIM, self.hidden_dim).init(device),
            output:    LinearConfig::new(self.hidden_dim, self.repr_dim).init(device),
        }
    }

    /// Reject shapes the model cannot be built with.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.num_users > 0 && self.num_items > 0, "embedding tables must have at least one row");
        anyhow::ensure!(
            self.embedding_dim > 0 && self.hidden_dim > 0 && self.repr_dim > 0,
            "embedding_dim, hidden_dim and repr_dim must be positive"
        );
        Ok(())
    }
}

// ─── Tower ────────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct Tower<B: Backend> {
    pub embedding: Embedding<B>,
    pub hidden:    Linear<B>,
    pub output:    Linear<B>,
}

impl<B: Backend> Tower<B> {
    /// indices: [batch, 1], features: [batch, F] → [batch, repr_dim]
    pub fn forward(&self, indices: Tensor<B, 2, Int>, features: Tensor<B, 2>) -> Tensor<B, 2> {
        let [batch_size, _] = indices.dims();
        let embedded = self.embedding.forward(indices); // [batch, 1, embedding_dim]
        let [_, _, dim] = embedded.dims();
        let embedded = embedded.reshape([batch_size, dim]);

        let x = Tensor::cat(vec![embedded, features], 1);
        self.output.forward(relu(self.hidden.forward(x)))
    }
}

// ─── Model ────────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct TwoTowerModel<B: Backend> {
    pub user_tower:  Tower<B>,
    pub item_tower:  Tower<B>,
    /// Present only for the dense merge
    pub head_hidden: Option<Linear<B>>,
    pub head_output: Option<Linear<B>>,
}

impl<B: Backend> TwoTowerModel<B> {
    /// Predicted ratings on the 0–10 scale, shape [batch, 1].
    pub fn forward(
        &self,
        user_indices:  Tensor<B, 2, Int>,
        user_features: Tensor<B, 2>,
        item_indices:  Tensor<B, 2, Int>,
        item_features: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        let u = self.user_tower.forward(user_indices, user_features);
        let v = self.item_tower.forward(item_indices, item_features);

        let raw = match (&self.head_hidden, &self.head_output) {
            (Some(hidden), Some(output)) => {
                output.forward(relu(hidden.forward(Tensor::cat(vec![u, v], 1))))
            }
            _ => (u * v).sum_dim(1),
        };
        sigmoid(raw).mul_scalar(MODEL_RATING_MAX)
    }

    pub fn forward_batch(&self, batch: &RatingBatch<B>) -> Tensor<B, 2> {
        self.forward(
            batch.user_indices.clone(),
            batch.user_features.clone(),
            batch.item_indices.clone(),
            batch.item_features.clone(),
        )
    }

    /// Mean squared error against the batch targets, plus the predictions.
    pub fn forward_loss(&self, batch: &RatingBatch<B>) -> (Tensor<B, 1>, Tensor<B, 2>) {
        let preds = self.forward_batch(batch);
        let loss  = MseLoss::new().forward(preds.clone(), batch.targets.clone(), Reduction::Mean);
        (loss, preds)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::batcher::{EncodedExample, RatingBatcher};
    use crate::data::features::FeatureVector;
    use burn::backend::NdArray;

    type B = NdArray;

    fn batch(n: usize) -> RatingBatch<B> {
        let items: Vec<EncodedExample> = (0..n)
            .map(|i| EncodedExample {
                user_index:    i % 3,
                item_index:    i % 4,
                user_features: FeatureVector::zeros(),
                item_features: FeatureVector::zeros(),
                target:        6.0,
            })
            .collect();
        RatingBatcher::<B>::new(Default::default()).batch(&items)
    }

    #[test]
    fn predictions_stay_on_rating_scale() {
        for merge in [TowerMerge::Dot, TowerMerge::Dense] {
            let model: TwoTowerModel<B> = TwoTowerConfig::new(3, 4)
                .with_embedding_dim(8)
                .with_hidden_dim(16)
                .with_repr_dim(8)
                .with_merge(merge)
                .init(&Default::default());

            let preds = model.forward_batch(&batch(5));
            assert_eq!(preds.dims(), [5, 1]);
            for p in preds.into_data().to_vec::<f32>().unwrap() {
                assert!((0.0..=10.0).contains(&p), "{merge}: {p}");
            }
        }
    }

    #[test]
    fn dot_merge_has_no_head() {
        let model: TwoTowerModel<B> = TwoTowerConfig::new(2, 2)
            .with_merge(TowerMerge::Dot)
            .init(&Default::default());
        assert!(model.head_hidden.is_none());
        assert!(model.head_output.is_none());
    }

    #[test]
    fn loss_is_a_scalar() {
        let model: TwoTowerModel<B> = TwoTowerConfig::new(3, 4).init(&Default::default());
        let (loss, _) = model.forward_loss(&batch(4));
        assert_eq!(loss.dims(), [1]);
        assert!(loss.into_scalar() >= 0.0);
    }

    #[test]
    fn merge_parses_and_config_serialises() {
        assert_eq!("DOT".parse::<TowerMerge>(), Ok(TowerMerge::Dot));
        assert!("sum".parse::<TowerMerge>().is_err());

        let cfg  = TwoTowerConfig::new(10, 20).with_merge(TowerMerge::Dot);
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("\"dot\""));
        let back: TwoTowerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.num_items, 20);
        assert_eq!(back.merge, TowerMerge::Dot);
    }

    #[test]
    fn zero_sized_tables_are_rejected() {
        assert!(TwoTowerConfig::new(0, 5).validate().is_err());
        assert!(TwoTowerConfig::new(1, 1).validate().is_ok());
    }
}
