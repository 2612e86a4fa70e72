// ============================================================
// Layer 6 — Cancellation
// ============================================================
// A shared flag the training loop polls before every batch fetch.
// `train` raises it on Ctrl-C or SIGTERM; the run then stops at the
// next batch boundary and can be resumed from its last checkpoint.
// A second signal exits at once.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Exit status for a run killed by a repeated interrupt.
const SIGINT_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Raise the flag; returns true if it was already raised.
    fn signal(&self) -> bool {
        let already = self.is_cancelled();
        self.cancel();
        already
    }

    /// Cancel this token on Ctrl-C or SIGTERM. Can be installed once
    /// per process.
    pub fn cancel_on_signal(&self) -> Result<()> {
        let token = self.clone();
        ctrlc::set_handler(move || {
            if token.signal() {
                eprintln!("\nSecond interrupt, exiting without a final checkpoint.");
                std::process::exit(SIGINT_EXIT_CODE);
            }
            eprintln!("\nInterrupt received; stopping after the current batch (press Ctrl-C again to exit now).");
        })
        .context("Cannot install the interrupt handler")
    }
}
