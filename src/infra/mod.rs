// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting concerns used by the training and serving paths:
//
//   checkpoint.rs — Periodic training checkpoints
//                   Weights via Burn's CompactRecorder, plus
//                   stream position, totals and index maps as
//                   JSON, staged and renamed into place.
//
//   artifact.rs   — The final trained model handed to serving
//
//   metrics.rs    — Per-epoch metrics appended to a CSV file
//
//   retry.rs      — Exponential backoff for transient failures
//
//   cancel.rs     — Cooperative cancellation flag

/// Training checkpoints: save, list, load, prune
pub mod checkpoint;

/// Final model artifact
pub mod artifact;

/// Training metrics CSV logger
pub mod metrics;

/// Retry with exponential backoff
pub mod retry;

/// Shared cancellation flag
pub mod cancel;
