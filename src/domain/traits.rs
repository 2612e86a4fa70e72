// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The trainer and the inference engine are written against
// these traits, not against SQLite:
//   - SqliteStore implements RatingSource + InteractionSource
//   - tests implement them with bounded in-memory fakes
//   - Recommender implements RatingPredictor for serving layers

use anyhow::Result;

use crate::data::store::StoreError;
use crate::domain::rating::{Cardinality, ItemMetadata, KeyedExample, RatedItem, ScoredItem};

// ─── RatingSource ─────────────────────────────────────────────────────────────
/// A relation of rating examples with a stable ordering key.
pub trait RatingSource {
    /// Up to `limit` examples whose key is strictly greater than `after_key`
    /// (or from the beginning when `None`), in ascending key order.
    fn fetch_page(
        &self,
        after_key: Option<i64>,
        limit:     usize,
    ) -> std::result::Result<Vec<KeyedExample>, StoreError>;

    /// Key of the example at position `offset - 1`, i.e. the last key an
    /// uninterrupted stream would have consumed after `offset` examples.
    /// `None` for offset 0 or when the relation is shorter than `offset`.
    fn key_before(&self, offset: u64) -> std::result::Result<Option<i64>, StoreError>;

    /// Distinct user and item counts.
    fn cardinality(&self) -> std::result::Result<Cardinality, StoreError>;
}

// ─── InteractionSource ────────────────────────────────────────────────────────
/// Read access to the current snapshot, as needed by feature extraction.
pub trait InteractionSource {
    /// Every item the user has rated, with its rating and genres.
    fn user_history(&self, user_id: i64) -> std::result::Result<Vec<RatedItem>, StoreError>;

    /// Metadata for an item; `None` when the item is unknown to the store.
    fn item_metadata(&self, item_id: i64) -> std::result::Result<Option<ItemMetadata>, StoreError>;
}

// ─── RatingPredictor ──────────────────────────────────────────────────────────
/// The stable scoring interface consumed by serving and traffic-splitting
/// layers. Scores are on the 0–10 scale.
pub trait RatingPredictor {
    fn predict(&self, user_id: i64, item_id: i64) -> Result<f32>;

    /// At most `k` unrated items, best first, ties by ascending item id.
    fn top_recommendations(&self, user_id: i64, k: usize) -> Result<Vec<ScoredItem>>;
}
