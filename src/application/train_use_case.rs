// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates one training run:
//
//   Step 1: Validate the configuration
//   Step 2: Open the ratings store          (Layer 4 - data)
//   Step 3: Open checkpoint + artifact dirs (Layer 6 - infra)
//   Step 4: Run the streaming trainer       (Layer 5 - ml)
//
// The trainer decides whether to resume; this layer only wires
// the pieces together and reports the outcome.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::store::SqliteStore;
use crate::data::streamer::DEFAULT_BATCH_SIZE;
use crate::domain::rating::Cardinality;
use crate::infra::{
    artifact::ArtifactStore,
    cancel::CancelToken,
    checkpoint::CheckpointManager,
    retry::RetryPolicy,
};
use crate::ml::model::{TowerMerge, TwoTowerConfig};
use crate::ml::trainer::{TrainOutcome, Trainer};

// ─── Training Configuration ──────────────────────────────────────────────────
// Saved as train_config.json next to the checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    pub db_path:          String,
    pub checkpoint_dir:   String,
    pub artifact_dir:     String,
    pub batch_size:       usize,
    /// Checkpoint whenever this many more examples have been processed
    pub checkpoint_every: u64,
    pub epochs:           usize,
    pub validation_split: f64,
    /// Truncate every epoch's stream to this many examples
    pub limit:            Option<u64>,
    pub lr:               f64,
    pub seed:             u64,
    pub embedding_dim:    usize,
    pub hidden_dim:       usize,
    pub repr_dim:         usize,
    pub merge:            TowerMerge,
    pub keep_checkpoints: usize,
    /// Ignore existing checkpoints and start over
    pub fresh:            bool,
    pub retry_attempts:   usize,
    /// Year the item recency slot is measured against; current year when unset
    pub reference_year:   Option<i32>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            db_path:          "ratings.db".to_string(),
            checkpoint_dir:   "checkpoints".to_string(),
            artifact_dir:     "artifact".to_string(),
            batch_size:       DEFAULT_BATCH_SIZE,
            checkpoint_every: 1_000_000,
            epochs:           5,
            validation_split: 0.1,
            limit:            None,
            lr:               1e-3,
            seed:             42,
            embedding_dim:    32,
            hidden_dim:       64,
            repr_dim:         32,
            merge:            TowerMerge::Dense,
            keep_checkpoints: 3,
            fresh:            false,
            retry_attempts:   5,
            reference_year:   None,
        }
    }
}

impl TrainConfig {
    /// Small, fast settings for smoke runs.
    pub fn test_mode() -> Self {
        Self {
            batch_size:       64,
            checkpoint_every: 256,
            epochs:           1,
            validation_split: 0.1,
            limit:            Some(1_000),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.batch_size > 0, "batch_size must be positive");
        anyhow::ensure!(self.checkpoint_every > 0, "checkpoint_every must be positive");
        anyhow::ensure!(self.epochs > 0, "epochs must be positive");
        anyhow::ensure!(
            (0.0..1.0).contains(&self.validation_split),
            "validation_split must be in [0, 1), got {}",
            self.validation_split
        );
        anyhow::ensure!(self.lr > 0.0 && self.lr.is_finite(), "lr must be a positive number");
        anyhow::ensure!(self.limit != Some(0), "limit must be positive when given");
        anyhow::ensure!(
            self.embedding_dim > 0 && self.hidden_dim > 0 && self.repr_dim > 0,
            "embedding_dim, hidden_dim and repr_dim must be positive"
        );
        Ok(())
    }

    /// Model shape for a fresh run over a store with `card` distinct ids.
    pub fn model_config(&self, card: Cardinality) -> TwoTowerConfig {
        TwoTowerConfig::new(card.users.max(1), card.items.max(1))
            .with_embedding_dim(self.embedding_dim)
            .with_hidden_dim(self.hidden_dim)
            .with_repr_dim(self.repr_dim)
            .with_merge(self.merge)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        if self.retry_attempts <= 1 {
            return RetryPolicy::none();
        }
        RetryPolicy::new(self.retry_attempts, Duration::from_millis(500))
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
    cancel: CancelToken,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config, cancel: CancelToken::new() }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn execute(&self) -> Result<TrainOutcome> {
        let cfg = &self.config;

        // ── Step 1: Validate ──────────────────────────────────────────────────
        cfg.validate().context("Invalid training configuration")?;

        // ── Step 2: Open the store ────────────────────────────────────────────
        tracing::info!("Opening ratings store '{}'", cfg.db_path);
        let store = SqliteStore::open(&cfg.db_path)
            .with_context(|| format!("Cannot open ratings store '{}'", cfg.db_path))?;

        // ── Step 3: Checkpoint and artifact locations ─────────────────────────
        let checkpoints = CheckpointManager::new(&cfg.checkpoint_dir)?;
        let artifacts   = ArtifactStore::new(&cfg.artifact_dir);

        // ── Step 4: Train ─────────────────────────────────────────────────────
        Trainer::new(cfg, &store, &checkpoints, &artifacts)
            .with_retry(cfg.retry_policy())
            .with_cancel(self.cancel.clone())
            .run()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_defaults() {
        let cfg = TrainConfig::test_mode();
        assert_eq!(cfg.batch_size, 64);
        assert_eq!(cfg.checkpoint_every, 256);
        assert_eq!(cfg.epochs, 1);
        assert_eq!(cfg.validation_split, 0.1);
        assert_eq!(cfg.limit, Some(1_000));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn full_defaults() {
        let cfg = TrainConfig::default();
        assert_eq!(cfg.batch_size, 10_000);
        assert_eq!(cfg.checkpoint_every, 1_000_000);
        assert_eq!(cfg.epochs, 5);
        assert_eq!(cfg.limit, None);
    }

    #[test]
    fn invalid_hyperparameters_are_rejected() {
        let bad = [
            TrainConfig { batch_size: 0, ..TrainConfig::default() },
            TrainConfig { validation_split: 1.0, ..TrainConfig::default() },
            TrainConfig { lr: -1.0, ..TrainConfig::default() },
            TrainConfig { hidden_dim: 0, ..TrainConfig::default() },
            TrainConfig { limit: Some(0), ..TrainConfig::default() },
        ];
        for cfg in bad {
            assert!(cfg.validate().is_err(), "{cfg:?}");
        }
    }

    #[test]
    fn model_config_never_has_empty_tables() {
        let m = TrainConfig::default().model_config(Cardinality { users: 0, items: 7 });
        assert_eq!(m.num_users, 1);
        assert_eq!(m.num_items, 7);
        assert_eq!(m.merge, TowerMerge::Dense);
    }

    #[test]
    fn missing_store_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TrainConfig {
            db_path:        dir.path().join("absent.db").display().to_string(),
            checkpoint_dir: dir.path().join("ckpt").display().to_string(),
            artifact_dir:   dir.path().join("art").display().to_string(),
            ..TrainConfig::test_mode()
        };
        assert!(TrainUseCase::new(cfg).execute().is_err());
    }

    #[test]
    fn cancelled_run_stops_before_the_first_batch() {
        use crate::data::store::RatingRow;

        let dir = tempfile::tempdir().unwrap();
        let db  = dir.path().join("ratings.db");
        let mut store = SqliteStore::create(&db).unwrap();
        store
            .insert_ratings(&[
                RatingRow { user_id: 1, movie_id: 10, rating: 4.0, timestamp: None },
                RatingRow { user_id: 2, movie_id: 11, rating: 2.0, timestamp: None },
            ])
            .unwrap();
        drop(store);

        let cfg = TrainConfig {
            db_path:        db.display().to_string(),
            checkpoint_dir: dir.path().join("ckpt").display().to_string(),
            artifact_dir:   dir.path().join("art").display().to_string(),
            embedding_dim:  4,
            hidden_dim:     4,
            repr_dim:       4,
            ..TrainConfig::test_mode()
        };
        let cancel = CancelToken::new();
        cancel.cancel();

        let outcome = TrainUseCase::new(cfg.clone()).with_cancel(cancel).execute().unwrap();
        assert!(matches!(
            outcome,
            TrainOutcome::Interrupted { last_checkpoint: None, total_examples: 0 }
        ));
        assert!(!ArtifactStore::new(&cfg.artifact_dir).exists());
    }
}
