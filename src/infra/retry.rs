// ============================================================
// Layer 6 — Retry Policy
// ============================================================
// Wraps an operation that can fail transiently (SQLite busy,
// interrupted filesystem write) and re-runs it with exponential
// backoff:
//
//   attempt 1 fails → sleep base × 2
//   attempt 2 fails → sleep base × 4
//   ...              (exponent capped at 5)
//
// Errors the caller classifies as permanent are returned at once.
// The operation must leave its inputs unchanged when it fails;
// BatchStream::next_batch() does.

use std::io;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: usize,
    pub base_delay:   Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 5, base_delay: Duration::from_millis(500) }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), base_delay }
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn backoff(&self, attempt: usize) -> Duration {
        let capped = attempt.min(5) as u32;
        self.base_delay * (1 << capped)
    }

    pub fn run<T, E, F, P>(&self, what: &str, mut op: F, is_transient: P) -> Result<T, E>
    where
        E: std::fmt::Display,
        F: FnMut() -> Result<T, E>,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0usize;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if is_transient(&err) && attempt + 1 < self.max_attempts => {
                    attempt += 1;
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        "{what} failed (attempt {attempt}/{}): {err}; retrying in {delay:?}",
                        self.max_attempts
                    );
                    thread::sleep(delay);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// True when an I/O error somewhere in the chain is worth retrying.
pub fn is_transient_io(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause.downcast_ref::<io::Error>().map_or(false, |e| {
            matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            )
        })
    })
}
