// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All model code lives here:
//
//   model.rs      — Two-tower rating model
//                   • user tower: embedding ⊕ features → MLP
//                   • item tower: embedding ⊕ features → MLP
//                   • merge: dot product or dense head
//                   • sigmoid output scaled to 0–10
//
//   trainer.rs    — Streaming training loop
//                   Pulls one batch at a time, assigns indices,
//                   extracts features, takes one Adam step,
//                   validates on the held-out part, and
//                   checkpoints by examples processed
//
//   inferencer.rs — Recommender
//                   Loads the artifact (or latest checkpoint),
//                   predicts single ratings and ranks items
//
// Backends: training runs on Autodiff<InnerBackend>; validation
// and inference run on InnerBackend directly. NdArray (CPU) is the
// default; the `wgpu` cargo feature switches to the GPU backend.

use burn::prelude::Backend;

/// Two-tower model architecture
pub mod model;

/// Streaming training loop with validation and checkpointing
pub mod trainer;

/// Inference engine: rating prediction and top-k ranking
pub mod inferencer;

#[cfg(not(feature = "wgpu"))]
pub type InnerBackend = burn::backend::NdArray;

#[cfg(feature = "wgpu")]
pub type InnerBackend = burn::backend::Wgpu;

pub type TrainBackend = burn::backend::Autodiff<InnerBackend>;

pub type Device = <InnerBackend as Backend>::Device;

pub fn default_device() -> Device {
    Device::default()
}
