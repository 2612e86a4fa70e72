// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types and traits describing the rating domain.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO SQL or file I/O
//   - Only plain Rust structs, enums, and traits
//
// Everything that trains or serves the model speaks in these
// types; the data layer turns store rows into them and the ML
// layer turns them into tensors.

// Rating examples and the 1–5 / 0–10 scale conversion
pub mod rating;

// Canonical genre taxonomy and the feature slot enumerations
pub mod genre;

// Core abstractions (traits) that other layers implement
pub mod traits;
