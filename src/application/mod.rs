// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Orchestrates the other layers to accomplish one user goal
// (import, train, or serve predictions).
//
// Rules for this layer:
//   - No ML math or model code here
//   - No printing here (that's Layer 1)
//   - Only workflow coordination

// CSV → SQLite import
pub mod import_use_case;

// The streaming training workflow
pub mod train_use_case;

// Single predictions and top-k recommendations
pub mod recommend_use_case;
