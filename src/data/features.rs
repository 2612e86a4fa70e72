// ============================================================
// Layer 4 — Feature Extractor
// ============================================================
// Turns what the store knows about a user or an item into a
// fixed-width numeric vector the towers can consume.
//
//   user_features(u) ← every rating u has given, with genres
//   item_features(i) ← genres and release year of i
//
// Extraction reads through the InteractionSource trait and is a
// pure function of the store snapshot, so the same id always
// yields the same vector as long as the data does not change.
// Slot meanings live in domain::genre (UserSlot / ItemSlot).
//
// Nothing here fails on bad metadata: missing genres, unknown
// genre names or an unparseable year just leave slots at zero.

use std::collections::HashMap;

use chrono::{Datelike, Utc};

use crate::data::store::StoreError;
use crate::domain::genre::{Decade, Genre, ItemSlot, UserSlot, FEATURE_DIM};
use crate::domain::rating::{ItemMetadata, RatedItem, RatingExample};
use crate::domain::traits::InteractionSource;

/// Ratings are normalised by the top of the 1–5 scale.
const RATING_MAX: f32 = 5.0;
/// Interaction counts saturate at this many ratings.
const COUNT_SATURATION: f32 = 100.0;
/// Genre counts saturate at this many genres.
const GENRE_SATURATION: f32 = 5.0;
/// Recency is measured from this year.
const RECENCY_EPOCH: i32 = 1950;

// ─── FeatureVector ────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector([f32; FEATURE_DIM]);

impl Default for FeatureVector {
    fn default() -> Self {
        Self::zeros()
    }
}

impl FeatureVector {
    pub fn zeros() -> Self {
        Self([0.0; FEATURE_DIM])
    }

    pub fn user(&self, slot: UserSlot) -> f32 {
        self.0[slot.index()]
    }

    pub fn item(&self, slot: ItemSlot) -> f32 {
        self.0[slot.index()]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    #[cfg(test)]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&v| v == 0.0)
    }

    fn set_user(&mut self, slot: UserSlot, value: f32) {
        self.0[slot.index()] = value;
    }

    fn set_item(&mut self, slot: ItemSlot, value: f32) {
        self.0[slot.index()] = value;
    }
}

// ─── Pure vector builders ─────────────────────────────────────────────────────

/// User vector from the full rating history.
pub fn user_vector(history: &[RatedItem]) -> FeatureVector {
    let mut v = FeatureVector::zeros();
    if history.is_empty() {
        return v;
    }

    let mut genre_sum   = [0.0_f32; Genre::COUNT];
    let mut genre_count = [0_u32; Genre::COUNT];
    for rated in history {
        for &g in &rated.genres {
            genre_sum[g.slot()]   += rated.rating / RATING_MAX;
            genre_count[g.slot()] += 1;
        }
    }
    for g in Genre::ALL {
        let n = genre_count[g.slot()];
        if n > 0 {
            v.set_user(UserSlot::GenrePreference(g), genre_sum[g.slot()] / n as f32);
        }
    }

    let n        = history.len() as f32;
    let mean     = history.iter().map(|r| r.rating).sum::<f32>() / n;
    let variance = history.iter().map(|r| (r.rating - mean).powi(2)).sum::<f32>() / n;
    let high     = history.iter().filter(|r| r.rating >= 4.0).count() as f32;
    let low      = history.iter().filter(|r| r.rating <= 2.0).count() as f32;

    v.set_user(UserSlot::MeanRating,         mean / RATING_MAX);
    v.set_user(UserSlot::RatingVariance,     (variance / RATING_MAX).min(1.0));
    v.set_user(UserSlot::InteractionCount,   (n / COUNT_SATURATION).min(1.0));
    v.set_user(UserSlot::HighRatingFraction, high / n);
    v.set_user(UserSlot::LowRatingFraction,  low / n);
    v
}

/// Item vector from its metadata, with recency measured up to `reference_year`.
pub fn item_vector(meta: &ItemMetadata, reference_year: i32) -> FeatureVector {
    let mut v = FeatureVector::zeros();

    let mut distinct = 0;
    for &g in &meta.genres {
        if v.item(ItemSlot::Genre(g)) == 0.0 {
            v.set_item(ItemSlot::Genre(g), 1.0);
            distinct += 1;
        }
    }
    v.set_item(ItemSlot::GenreCount, (distinct as f32 / GENRE_SATURATION).min(1.0));

    if let Some(year) = meta.release_year {
        if let Some(decade) = Decade::of_year(year) {
            v.set_item(ItemSlot::Decade(decade), 1.0);
        }
        let span    = (reference_year - RECENCY_EPOCH).max(1) as f32;
        let recency = (year - RECENCY_EPOCH) as f32 / span;
        v.set_item(ItemSlot::Recency, recency.clamp(0.0, 1.0));
    }
    v
}

// ─── FeatureExtractor ─────────────────────────────────────────────────────────
pub struct FeatureExtractor<'a, S: InteractionSource + ?Sized> {
    source:         &'a S,
    reference_year: i32,
}

impl<'a, S: InteractionSource + ?Sized> FeatureExtractor<'a, S> {
    /// Extractor whose recency slot is relative to the current UTC year.
    pub fn new(source: &'a S) -> Self {
        Self { source, reference_year: Utc::now().year() }
    }

    pub fn with_reference_year(mut self, year: i32) -> Self {
        self.reference_year = year;
        self
    }

    pub fn user_features(&self, user_id: i64) -> Result<FeatureVector, StoreError> {
        let history = self.source.user_history(user_id)?;
        Ok(user_vector(&history))
    }

    /// Items without any metadata get the all-zero vector.
    pub fn item_features(&self, item_id: i64) -> Result<FeatureVector, StoreError> {
        Ok(match self.source.item_metadata(item_id)? {
            Some(meta) => item_vector(&meta, self.reference_year),
            None       => FeatureVector::zeros(),
        })
    }

    /// Extract each distinct user and item once.
    pub fn extract<U, I>(&self, user_ids: U, item_ids: I) -> Result<FeatureCache, StoreError>
    where
        U: IntoIterator<Item = i64>,
        I: IntoIterator<Item = i64>,
    {
        let mut cache = FeatureCache::default();
        for id in user_ids {
            if !cache.users.contains_key(&id) {
                cache.users.insert(id, self.user_features(id)?);
            }
        }
        for id in item_ids {
            if !cache.items.contains_key(&id) {
                cache.items.insert(id, self.item_features(id)?);
            }
        }
        Ok(cache)
    }

    /// Features for every distinct user and item of one batch.
    pub fn extract_batch(&self, batch: &[RatingExample]) -> Result<FeatureCache, StoreError> {
        self.extract(batch.iter().map(|e| e.user_id), batch.iter().map(|e| e.item_id))
    }
}

/// Feature vectors keyed by external id, valid for one batch.
#[derive(Debug, Default)]
pub struct FeatureCache {
    users: HashMap<i64, FeatureVector>,
    items: HashMap<i64, FeatureVector>,
}

impl FeatureCache {
    pub fn user(&self, user_id: i64) -> FeatureVector {
        self.users.get(&user_id).copied().unwrap_or_default()
    }

    pub fn item(&self, item_id: i64) -> FeatureVector {
        self.items.get(&item_id).copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.users.len() + self.items.len()
    }
}
