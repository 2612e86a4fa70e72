// ============================================================
// Layer 2 — Recommend Use Case
// ============================================================
// Serves `predict` and `recommend`:
//
//   Step 1: Open the ratings store (features are computed fresh)
//   Step 2: Load the artifact, or the latest checkpoint on request
//   Step 3: Score through the RatingPredictor interface

use anyhow::{Context, Result};

use crate::data::store::SqliteStore;
use crate::domain::rating::ScoredItem;
use crate::domain::traits::RatingPredictor;
use crate::infra::{artifact::ArtifactStore, checkpoint::CheckpointManager};
use crate::ml::inferencer::{Recommender, DEFAULT_COLD_START_SCORE};

#[derive(Debug, Clone, PartialEq)]
pub struct ServeConfig {
    pub db_path:          String,
    pub artifact_dir:     String,
    pub checkpoint_dir:   String,
    /// Serve the newest checkpoint instead of the final artifact
    pub from_checkpoint:  bool,
    pub cold_start_score: f32,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            db_path:          "ratings.db".to_string(),
            artifact_dir:     "artifact".to_string(),
            checkpoint_dir:   "checkpoints".to_string(),
            from_checkpoint:  false,
            cold_start_score: DEFAULT_COLD_START_SCORE,
        }
    }
}

pub struct RecommendUseCase {
    config: ServeConfig,
    store:  SqliteStore,
}

impl RecommendUseCase {
    pub fn new(config: ServeConfig) -> Result<Self> {
        let store = SqliteStore::open(&config.db_path)
            .with_context(|| format!("Cannot open ratings store '{}'", config.db_path))?;
        Ok(Self { config, store })
    }

    fn recommender(&self) -> Result<Recommender<'_, SqliteStore>> {
        let cfg = &self.config;
        let recommender = if cfg.from_checkpoint {
            let checkpoints = CheckpointManager::new(&cfg.checkpoint_dir)?;
            Recommender::from_checkpoint(&checkpoints, &self.store)?
        } else {
            Recommender::from_artifact(&ArtifactStore::new(&cfg.artifact_dir), &self.store)?
        };
        Ok(recommender.with_cold_start_score(cfg.cold_start_score))
    }

    pub fn predict(&self, user_id: i64, item_id: i64) -> Result<f32> {
        let recommender = self.recommender()?;
        score_pair(&recommender, user_id, item_id)
    }

    pub fn recommend(&self, user_id: i64, k: usize) -> Result<Vec<ScoredItem>> {
        let recommender = self.recommender()?;
        recommender.top_recommendations(user_id, k)
    }
}

fn score_pair(predictor: &dyn RatingPredictor, user_id: i64, item_id: i64) -> Result<f32> {
    predictor
        .predict(user_id, item_id)
        .with_context(|| format!("Cannot score user {user_id} / item {item_id}"))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::train_use_case::{TrainConfig, TrainUseCase};
    use crate::data::store::{MovieRow, RatingRow};
    use crate::ml::trainer::TrainOutcome;
    use std::path::Path;

    fn seed_store(path: &Path) {
        let mut store = SqliteStore::create(path).unwrap();
        let ratings: Vec<RatingRow> = [(1, 10, 5.0), (1, 11, 3.0), (2, 10, 4.0), (2, 12, 2.0), (3, 13, 4.5)]
            .iter()
            .map(|&(user_id, movie_id, rating)| RatingRow { user_id, movie_id, rating, timestamp: None })
            .collect();
        store.insert_ratings(&ratings).unwrap();
        store
            .insert_movies(&[
                MovieRow { movie_id: 10, title: "Heat (1995)".into(), genres: "Action|Crime".into() },
                MovieRow { movie_id: 11, title: "Up (2009)".into(), genres: "Animation".into() },
                MovieRow { movie_id: 12, title: "Alien (1979)".into(), genres: "Horror|Sci-Fi".into() },
                MovieRow { movie_id: 13, title: "Amélie (2001)".into(), genres: "Comedy|Romance".into() },
            ])
            .unwrap();
    }

    #[test]
    fn train_then_serve() {
        let dir = tempfile::tempdir().unwrap();
        let db  = dir.path().join("ratings.db");
        seed_store(&db);

        let train_cfg = TrainConfig {
            db_path:        db.display().to_string(),
            checkpoint_dir: dir.path().join("ckpt").display().to_string(),
            artifact_dir:   dir.path().join("artifact").display().to_string(),
            batch_size:     2,
            embedding_dim:  4,
            hidden_dim:     8,
            repr_dim:       4,
            reference_year: Some(2024),
            ..TrainConfig::test_mode()
        };
        let outcome = TrainUseCase::new(train_cfg.clone()).execute().unwrap();
        assert!(matches!(outcome, TrainOutcome::Completed(ref r) if r.total_examples == 5));

        let serve = RecommendUseCase::new(ServeConfig {
            db_path:        train_cfg.db_path.clone(),
            artifact_dir:   train_cfg.artifact_dir.clone(),
            checkpoint_dir: train_cfg.checkpoint_dir.clone(),
            ..ServeConfig::default()
        })
        .unwrap();

        let p = serve.predict(1, 12).unwrap();
        assert!((0.0..=10.0).contains(&p));
        assert_eq!(serve.predict(1, 999).unwrap(), DEFAULT_COLD_START_SCORE);

        let top = serve.recommend(1, 5).unwrap();
        assert_eq!(top.iter().map(|s| s.item_id).filter(|id| *id == 10 || *id == 11).count(), 0);
        assert_eq!(top.len(), 2);
    }

    #[test]
    fn serving_without_a_model_fails() {
        let dir = tempfile::tempdir().unwrap();
        let db  = dir.path().join("ratings.db");
        seed_store(&db);

        let serve = RecommendUseCase::new(ServeConfig {
            db_path:      db.display().to_string(),
            artifact_dir: dir.path().join("nothing").display().to_string(),
            ..ServeConfig::default()
        })
        .unwrap();
        assert!(serve.predict(1, 10).is_err());
    }
}
