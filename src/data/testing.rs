// In-memory sources for unit tests. The trainer, streamer and
// inferencer only see the traits, so a Vec stands in for SQLite.

use std::cell::Cell;
use std::collections::HashMap;

use crate::data::store::StoreError;
use crate::domain::genre::Genre;
use crate::domain::rating::{Cardinality, ItemMetadata, KeyedExample, RatedItem, RatingExample};
use crate::domain::traits::{InteractionSource, RatingSource};

/// A bounded ratings relation. Example `i` has ordering key `i + 1`.
pub struct MemorySource {
    examples:      Vec<RatingExample>,
    items:         HashMap<i64, ItemMetadata>,
    failures_left: Cell<usize>,
    fetches:       Cell<usize>,
}

impl MemorySource {
    pub fn new(examples: Vec<RatingExample>) -> Self {
        let mut items = HashMap::new();
        for ex in &examples {
            items.entry(ex.item_id).or_insert_with(|| ItemMetadata {
                genres:       ex.genres.clone(),
                release_year: ex.release_year,
            });
        }
        Self { examples, items, failures_left: Cell::new(0), fetches: Cell::new(0) }
    }

    /// Build from `(user, item, rating)` triples with per-item genres.
    pub fn from_triples(triples: &[(i64, i64, f32)], genres: &[(i64, Vec<Genre>)]) -> Self {
        let genre_of: HashMap<i64, Vec<Genre>> = genres.iter().cloned().collect();
        Self::new(
            triples
                .iter()
                .map(|&(u, i, r)| {
                    RatingExample::new(u, i, r)
                        .with_genres(genre_of.get(&i).cloned().unwrap_or_default())
                })
                .collect(),
        )
    }

    /// The first `n` page fetches fail with a transient error.
    pub fn failing_first(self, n: usize) -> Self {
        self.failures_left.set(n);
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.get()
    }
}

impl RatingSource for MemorySource {
    fn fetch_page(
        &self,
        after_key: Option<i64>,
        limit:     usize,
    ) -> Result<Vec<KeyedExample>, StoreError> {
        self.fetches.set(self.fetches.get() + 1);
        if self.failures_left.get() > 0 {
            self.failures_left.set(self.failures_left.get() - 1);
            return Err(StoreError::Unavailable("simulated outage".into()));
        }
        let start = after_key.map(|k| k.max(0) as usize).unwrap_or(0);
        Ok(self
            .examples
            .iter()
            .enumerate()
            .skip(start)
            .take(limit)
            .map(|(i, ex)| KeyedExample { key: i as i64 + 1, example: ex.clone() })
            .collect())
    }

    fn key_before(&self, offset: u64) -> Result<Option<i64>, StoreError> {
        if offset == 0 || offset as usize > self.examples.len() {
            return Ok(None);
        }
        Ok(Some(offset as i64))
    }

    fn cardinality(&self) -> Result<Cardinality, StoreError> {
        let mut users: Vec<i64> = self.examples.iter().map(|e| e.user_id).collect();
        let mut items: Vec<i64> = self.examples.iter().map(|e| e.item_id).collect();
        users.sort_unstable();
        users.dedup();
        items.sort_unstable();
        items.dedup();
        Ok(Cardinality { users: users.len(), items: items.len() })
    }
}

impl InteractionSource for MemorySource {
    fn user_history(&self, user_id: i64) -> Result<Vec<RatedItem>, StoreError> {
        Ok(self
            .examples
            .iter()
            .filter(|e| e.user_id == user_id)
            .map(|e| RatedItem {
                item_id: e.item_id,
                rating:  e.rating,
                genres:  self
                    .items
                    .get(&e.item_id)
                    .map(|m| m.genres.clone())
                    .unwrap_or_default(),
            })
            .collect())
    }

    fn item_metadata(&self, item_id: i64) -> Result<Option<ItemMetadata>, StoreError> {
        Ok(self.items.get(&item_id).cloned())
    }
}
