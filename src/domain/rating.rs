// ============================================================
// Layer 3 — Rating Domain Types
// ============================================================
// A rating example is one row of the ratings relation joined
// with the metadata of the rated item. External ratings live on
// a 1–5 scale; the model predicts on a 0–10 scale (rating × 2).

use serde::{Deserialize, Serialize};

use crate::domain::genre::Genre;

/// Factor between the external 1–5 scale and the model's 0–10 scale.
pub const MODEL_SCALE_FACTOR: f32 = 2.0;

/// Upper bound of the model's output range.
pub const MODEL_RATING_MAX: f32 = 10.0;

/// One labelled example streamed from the backing store.
/// Never mutated by the pipeline once read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingExample {
    pub user_id:      i64,
    pub item_id:      i64,
    /// External rating, 1–5
    pub rating:       f32,
    pub genres:       Vec<Genre>,
    pub release_year: Option<i32>,
}

impl RatingExample {
    pub fn new(user_id: i64, item_id: i64, rating: f32) -> Self {
        Self { user_id, item_id, rating, genres: Vec::new(), release_year: None }
    }

    pub fn with_genres(mut self, genres: Vec<Genre>) -> Self {
        self.genres = genres;
        self
    }

    pub fn with_release_year(mut self, year: Option<i32>) -> Self {
        self.release_year = year;
        self
    }

    /// The training target on the model's 0–10 scale.
    pub fn target(&self) -> f32 {
        self.rating * MODEL_SCALE_FACTOR
    }
}

/// A rating example together with the store's ordering key.
/// The key is what makes pagination (and therefore resume) stable.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedExample {
    pub key:     i64,
    pub example: RatingExample,
}

/// One rated item in a user's history, as needed by user features.
#[derive(Debug, Clone, PartialEq)]
pub struct RatedItem {
    pub item_id: i64,
    pub rating:  f32,
    pub genres:  Vec<Genre>,
}

/// Item metadata needed by item features.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemMetadata {
    pub genres:       Vec<Genre>,
    pub release_year: Option<i32>,
}

/// Distinct id counts, used to size the embedding tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cardinality {
    pub users: usize,
    pub items: usize,
}

/// A scored recommendation on the 0–10 scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredItem {
    pub item_id: i64,
    pub score:   f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_is_on_model_scale() {
        let ex = RatingExample::new(1, 2, 3.5);
        assert_eq!(ex.target(), 7.0);
    }

    #[test]
    fn builder_keeps_metadata() {
        let ex = RatingExample::new(1, 2, 4.0)
            .with_genres(vec![Genre::Drama])
            .with_release_year(Some(1995));
        assert_eq!(ex.genres, vec![Genre::Drama]);
        assert_eq!(ex.release_year, Some(1995));
    }
}
