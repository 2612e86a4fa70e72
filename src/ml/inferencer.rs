// ============================================================
// Layer 5 — Inferencer
// ============================================================
// Serves predictions from a trained model:
//
//   predict(u, i)              → rating on the 0–10 scale
//   top_recommendations(u, k)  → best k unrated items for u
//
// Ids never seen during training have no embedding row; any pair
// involving one gets the configured cold-start score instead of a
// model output. Features are always recomputed from the current
// store, with the recency slot measured against the year recorded
// at training time so training and serving vectors line up.
//
// The model and index maps are read-only after loading.

use anyhow::{anyhow, Context, Result};
use std::collections::HashSet;

use crate::data::batcher::{EncodedExample, RatingBatcher};
use crate::data::features::FeatureExtractor;
use crate::data::index_mapper::{IdKind, IndexMapper};
use crate::domain::rating::{ScoredItem, MODEL_RATING_MAX};
use crate::domain::traits::{InteractionSource, RatingPredictor};
use crate::infra::artifact::ArtifactStore;
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::model::TwoTowerModel;
use crate::ml::{default_device, Device, InnerBackend};

/// Score returned for pairs involving an unknown user or item.
pub const DEFAULT_COLD_START_SCORE: f32 = 7.0;

/// Candidates scored per forward pass in top_recommendations.
const SCORING_CHUNK: usize = 1024;

pub struct Recommender<'a, S: InteractionSource + ?Sized> {
    model:          TwoTowerModel<InnerBackend>,
    mapper:         IndexMapper,
    source:         &'a S,
    reference_year: i32,
    cold_start:     f32,
    batcher:        RatingBatcher<InnerBackend>,
}

impl<'a, S: InteractionSource + ?Sized> Recommender<'a, S> {
    pub fn new(
        model:          TwoTowerModel<InnerBackend>,
        mapper:         IndexMapper,
        source:         &'a S,
        reference_year: i32,
        device:         Device,
    ) -> Self {
        Self {
            model,
            mapper,
            source,
            reference_year,
            cold_start: DEFAULT_COLD_START_SCORE,
            batcher: RatingBatcher::new(device),
        }
    }

    /// Load the final artifact written by a completed training run.
    pub fn from_artifact(store: &ArtifactStore, source: &'a S) -> Result<Self> {
        let device   = default_device();
        let artifact = store.load::<InnerBackend>(&device)?;
        tracing::info!(
            "Loaded artifact from '{}' (trained {}, {} users, {} items)",
            store.dir().display(),
            artifact.mappings.trained_on,
            artifact.mapper.user_count(),
            artifact.mapper.item_count()
        );
        Ok(Self::new(artifact.model, artifact.mapper, source, artifact.mappings.reference_year, device))
    }

    /// Load the newest checkpoint, e.g. to inspect a run still in progress.
    pub fn from_checkpoint(checkpoints: &CheckpointManager, source: &'a S) -> Result<Self> {
        let device = default_device();
        let meta   = checkpoints
            .latest()?
            .ok_or_else(|| anyhow!("No checkpoint in '{}'", checkpoints.dir().display()))?;
        let model  = checkpoints.load_model::<InnerBackend>(&meta, &device)?;
        let mapper = IndexMapper::load(&checkpoints.load_index_maps(&meta)?)
            .context("Checkpoint index maps are corrupt")?;
        Ok(Self::new(model, mapper, source, meta.reference_year, device))
    }

    pub fn with_cold_start_score(mut self, score: f32) -> Self {
        self.cold_start = score;
        self
    }

    fn extractor(&self) -> FeatureExtractor<'a, S> {
        FeatureExtractor::new(self.source).with_reference_year(self.reference_year)
    }

    /// Model scores for `user_id` against each of `item_ids`, all of
    /// which must be known to the index maps.
    fn score(&self, user_id: i64, user_index: usize, item_ids: &[i64]) -> Result<Vec<f32>> {
        let extractor     = self.extractor();
        let user_features = extractor.user_features(user_id)?;

        let mut encoded = Vec::with_capacity(item_ids.len());
        for &item_id in item_ids {
            let item_index = self
                .mapper
                .lookup(item_id, IdKind::Item)
                .ok_or_else(|| anyhow!("Item {item_id} is not in the index maps"))?;
            encoded.push(EncodedExample {
                user_index,
                item_index,
                user_features,
                item_features: extractor.item_features(item_id)?,
                target: 0.0,
            });
        }
        if encoded.is_empty() {
            return Ok(Vec::new());
        }

        let preds = self
            .model
            .forward_batch(&self.batcher.batch(&encoded))
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow!("Cannot read predictions: {e:?}"))?;
        Ok(preds.into_iter().map(|p| p.clamp(0.0, MODEL_RATING_MAX)).collect())
    }

    pub fn predict(&self, user_id: i64, item_id: i64) -> Result<f32> {
        let user_index = self.mapper.lookup(user_id, IdKind::User);
        let item_known = self.mapper.lookup(item_id, IdKind::Item).is_some();

        let Some(user_index) = user_index.filter(|_| item_known) else {
            tracing::debug!("Cold start for ({user_id}, {item_id})");
            return Ok(self.cold_start);
        };

        let scores = self.score(user_id, user_index, &[item_id])?;
        scores.first().copied().ok_or_else(|| anyhow!("Model returned no prediction"))
    }

    /// Up to `k` unrated items, best first; ties broken by ascending item id.
    pub fn top_recommendations(&self, user_id: i64, k: usize) -> Result<Vec<ScoredItem>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let rated: HashSet<i64> = self
            .source
            .user_history(user_id)
            .with_context(|| format!("Cannot read history of user {user_id}"))?
            .into_iter()
            .map(|r| r.item_id)
            .collect();
        let candidates: Vec<i64> = self
            .mapper
            .item_ids()
            .iter()
            .copied()
            .filter(|id| !rated.contains(id))
            .collect();

        let mut scored = Vec::with_capacity(candidates.len());
        match self.mapper.lookup(user_id, IdKind::User) {
            Some(user_index) => {
                for chunk in candidates.chunks(SCORING_CHUNK) {
                    let scores = self.score(user_id, user_index, chunk)?;
                    scored.extend(
                        chunk.iter().zip(scores).map(|(&item_id, score)| ScoredItem { item_id, score }),
                    );
                }
            }
            None => {
                scored.extend(candidates.iter().map(|&item_id| ScoredItem { item_id, score: self.cold_start }));
            }
        }

        scored.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.item_id.cmp(&b.item_id)));
        scored.truncate(k);
        Ok(scored)
    }
}

impl<S: InteractionSource + ?Sized> RatingPredictor for Recommender<'_, S> {
    fn predict(&self, user_id: i64, item_id: i64) -> Result<f32> {
        Recommender::predict(self, user_id, item_id)
    }

    fn top_recommendations(&self, user_id: i64, k: usize) -> Result<Vec<ScoredItem>> {
        Recommender::top_recommendations(self, user_id, k)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::testing::MemorySource;
    use crate::domain::genre::Genre;
    use crate::ml::model::{TowerMerge, TwoTowerConfig};

    fn source() -> MemorySource {
        MemorySource::from_triples(
            &[(1, 10, 5.0), (1, 11, 3.0), (2, 12, 4.0), (2, 10, 2.0), (3, 13, 1.0)],
            &[
                (10, vec![Genre::Drama]),
                (11, vec![Genre::Comedy]),
                (12, vec![Genre::Drama, Genre::Romance]),
                (13, vec![Genre::Horror]),
            ],
        )
    }

    fn recommender(src: &MemorySource, merge: TowerMerge) -> Recommender<'_, MemorySource> {
        let mut mapper = IndexMapper::new();
        for (u, i) in [(1, 10), (1, 11), (2, 12), (2, 10), (3, 13)] {
            mapper.index_of_user(u);
            mapper.index_of_item(i);
        }
        let device = default_device();
        let model  = TwoTowerConfig::new(mapper.user_count(), mapper.item_count())
            .with_embedding_dim(4)
            .with_hidden_dim(8)
            .with_repr_dim(4)
            .with_merge(merge)
            .init::<InnerBackend>(&device);
        Recommender::new(model, mapper, src, 2024, device)
    }

    #[test]
    fn known_pairs_are_on_the_rating_scale() {
        let src = source();
        for merge in [TowerMerge::Dot, TowerMerge::Dense] {
            let rec = recommender(&src, merge);
            for (u, i) in [(1, 12), (2, 11), (3, 10)] {
                let p = rec.predict(u, i).unwrap();
                assert!((0.0..=10.0).contains(&p), "{p}");
            }
        }
    }

    #[test]
    fn unknown_ids_get_exactly_the_cold_start_score() {
        let src = source();
        let rec = recommender(&src, TowerMerge::Dense);
        assert_eq!(rec.predict(999, 10).unwrap(), DEFAULT_COLD_START_SCORE);
        assert_eq!(rec.predict(1, 999).unwrap(), DEFAULT_COLD_START_SCORE);

        let rec = rec.with_cold_start_score(5.5);
        assert_eq!(rec.predict(999, 999).unwrap(), 5.5);
    }

    #[test]
    fn prediction_is_repeatable() {
        let src = source();
        let rec = recommender(&src, TowerMerge::Dense);
        assert_eq!(rec.predict(1, 12).unwrap(), rec.predict(1, 12).unwrap());
    }

    #[test]
    fn top_k_excludes_rated_and_is_sorted() {
        let src = source();
        let rec = recommender(&src, TowerMerge::Dense);

        let top = rec.top_recommendations(1, 10).unwrap();
        let ids: Vec<i64> = top.iter().map(|s| s.item_id).collect();
        assert_eq!(top.len(), 2);
        assert!(!ids.contains(&10) && !ids.contains(&11));
        for pair in top.windows(2) {
            assert!(
                pair[0].score > pair[1].score
                    || (pair[0].score == pair[1].score && pair[0].item_id < pair[1].item_id)
            );
        }

        // Same computation as predict
        for s in &top {
            assert!((s.score - rec.predict(1, s.item_id).unwrap()).abs() < 1e-4);
        }

        assert_eq!(rec.top_recommendations(1, 1).unwrap().len(), 1);
        assert!(rec.top_recommendations(1, 0).unwrap().is_empty());
    }

    #[test]
    fn unknown_user_ranks_by_id_at_cold_start() {
        let src = source();
        let rec = recommender(&src, TowerMerge::Dot);
        let top = rec.top_recommendations(42, 3).unwrap();
        assert_eq!(top.iter().map(|s| s.item_id).collect::<Vec<_>>(), vec![10, 11, 12]);
        assert!(top.iter().all(|s| s.score == DEFAULT_COLD_START_SCORE));
    }

    #[test]
    fn usable_through_the_trait() {
        let src = source();
        let rec = recommender(&src, TowerMerge::Dense);
        let predictor: &dyn RatingPredictor = &rec;
        assert!(predictor.top_recommendations(3, 2).unwrap().len() <= 2);
        assert_eq!(predictor.predict(0, 0).unwrap(), DEFAULT_COLD_START_SCORE);
    }
}
