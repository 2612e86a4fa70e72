// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything between the SQLite store and tensor batches.
//
//   SQLite ratings ⋈ movies
//       │
//       ▼
//   SqliteStore       → keyset pages, user histories, item metadata
//       │
//       ▼
//   BatchStream       → restartable cursor, one batch at a time
//       │
//       ▼
//   IndexMapper       → external ids to dense embedding indices
//   FeatureExtractor  → fixed-width user / item vectors
//       │
//       ▼
//   ValidationSplit   → fixed held-out (user, item) pairs
//       │
//       ▼
//   RatingBatcher     → stacks encoded examples into tensors
//
// The import use case (csv crate + metadata) fills the store in
// the first place.

/// SQLite-backed rating and interaction source
pub mod store;

/// Genre and release-year parsing from raw movie rows
pub mod metadata;

/// Restartable batch cursor over the ratings relation
pub mod streamer;

/// Dense index assignment for user and item ids
pub mod index_mapper;

/// User and item feature vectors
pub mod features;

/// Deterministic train/validation split of one batch
pub mod splitter;

/// Stacks encoded examples into tensor batches
pub mod batcher;

#[cfg(test)]
pub mod testing;
