// ============================================================
// Layer 4 — Rating Batch Streamer
// ============================================================
// An explicit, restartable cursor over the ratings relation.
//
// The stream never loads the dataset: each call to next_batch()
// asks the source for one page after the last key seen. Its whole
// state is a StreamPosition:
//
//   offset   : how many examples have been yielded so far
//   last_key : the ordering key of the last yielded example
//
// Resuming after a crash is therefore just "construct a cursor at
// the checkpointed position". Given only an offset, at_offset()
// asks the source for the matching key first.
//
// A fetch that fails leaves the position untouched, so callers may
// simply retry the same next_batch() call.

use serde::{Deserialize, Serialize};

use crate::data::store::StoreError;
use crate::domain::rating::RatingExample;
use crate::domain::traits::RatingSource;

/// Default number of examples per batch.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Where a stream stands; recorded in every checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamPosition {
    pub offset:   u64,
    pub last_key: Option<i64>,
}

impl StreamPosition {
    pub fn start() -> Self {
        Self::default()
    }
}

pub struct BatchStream<'a, S: RatingSource + ?Sized> {
    source:     &'a S,
    position:   StreamPosition,
    batch_size: usize,
    /// Maximum number of examples this stream yields in total (from offset 0).
    limit:      Option<u64>,
    exhausted:  bool,
}

impl<'a, S: RatingSource + ?Sized> BatchStream<'a, S> {
    /// A stream from the first example.
    pub fn open(source: &'a S, batch_size: usize, limit: Option<u64>) -> Self {
        Self::resume(source, StreamPosition::start(), batch_size, limit)
    }

    /// A stream continuing exactly where `position` left off.
    pub fn resume(
        source:     &'a S,
        position:   StreamPosition,
        batch_size: usize,
        limit:      Option<u64>,
    ) -> Self {
        assert!(batch_size > 0, "batch_size must be positive");
        Self { source, position, batch_size, limit, exhausted: false }
    }

    /// A stream continuing after the first `offset` examples.
    pub fn at_offset(
        source:     &'a S,
        offset:     u64,
        batch_size: usize,
        limit:      Option<u64>,
    ) -> Result<Self, StoreError> {
        let last_key = source.key_before(offset)?;
        let mut stream = Self::resume(source, StreamPosition { offset, last_key }, batch_size, limit);
        // An offset past the end of the relation has nothing left to yield.
        if offset > 0 && last_key.is_none() {
            stream.exhausted = true;
        }
        Ok(stream)
    }

    pub fn position(&self) -> StreamPosition {
        self.position
    }

    /// Pull the next batch, or `None` at end of stream.
    pub fn next_batch(&mut self) -> Result<Option<Vec<RatingExample>>, StoreError> {
        if self.exhausted {
            return Ok(None);
        }

        let want = match self.limit {
            Some(limit) => {
                let remaining = limit.saturating_sub(self.position.offset);
                (remaining.min(self.batch_size as u64)) as usize
            }
            None => self.batch_size,
        };
        if want == 0 {
            self.exhausted = true;
            return Ok(None);
        }

        let page = self.source.fetch_page(self.position.last_key, want)?;
        if page.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }
        if page.len() < want {
            // Short page: the relation has no more rows after this one.
            self.exhausted = true;
        }

        self.position.offset += page.len() as u64;
        self.position.last_key = page.last().map(|k| k.key);

        tracing::debug!(
            "Fetched batch of {} (offset now {})",
            page.len(),
            self.position.offset
        );
        Ok(Some(page.into_iter().map(|k| k.example).collect()))
    }
}

impl<'a, S: RatingSource + ?Sized> Iterator for BatchStream<'a, S> {
    type Item = Result<Vec<RatingExample>, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch().transpose()
    }
}
