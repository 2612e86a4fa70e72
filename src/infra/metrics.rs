// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Appends one CSV row per finished epoch to
// <checkpoint_dir>/metrics.csv:
//
//   epoch,train_loss,val_loss,val_mae,val_rmse,examples
//   1,4.812300,4.905100,1.771200,2.214700,1000
//   2,3.102900,3.388400,1.402300,1.840800,1000
//
// All losses and errors are on the model's 0–10 rating scale.
// The file is appended across resumed runs, so an epoch that was
// interrupted and resumed shows up once, covering only the part
// processed after the resume.

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use serde::{Deserialize, Serialize};

const HEADER: &str = "epoch,train_loss,val_loss,val_mae,val_rmse,examples";

/// One row of metrics for a single training epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// The epoch number (starts at 1)
    pub epoch: usize,

    /// Example-weighted mean MSE over the training parts of all batches
    pub train_loss: f64,

    /// Validation MSE; NaN when nothing was held out
    pub val_loss: f64,

    pub val_mae: f64,

    pub val_rmse: f64,

    /// Examples streamed during this epoch
    pub examples: u64,
}

/// Running sums for one epoch; turned into EpochMetrics at the end.
#[derive(Debug, Default, Clone)]
pub struct EpochAccumulator {
    train_loss_sum: f64,
    train_count:    u64,
    sq_err_sum:     f64,
    abs_err_sum:    f64,
    val_count:      u64,
    examples:       u64,
}

impl EpochAccumulator {
    /// Record a training step whose mean loss was `loss` over `n` examples.
    pub fn add_train(&mut self, loss: f64, n: usize) {
        self.train_loss_sum += loss * n as f64;
        self.train_count    += n as u64;
    }

    /// Record held-out predictions against their targets.
    pub fn add_validation(&mut self, preds: &[f32], targets: &[f32]) {
        for (p, t) in preds.iter().zip(targets) {
            let err = (*p - *t) as f64;
            self.sq_err_sum  += err * err;
            self.abs_err_sum += err.abs();
            self.val_count   += 1;
        }
    }

    pub fn add_examples(&mut self, n: usize) {
        self.examples += n as u64;
    }

    pub fn finish(&self, epoch: usize) -> EpochMetrics {
        let mean = |sum: f64, n: u64| if n > 0 { sum / n as f64 } else { f64::NAN };
        let val_loss = mean(self.sq_err_sum, self.val_count);
        EpochMetrics {
            epoch,
            train_loss: mean(self.train_loss_sum, self.train_count),
            val_loss,
            val_mae:    mean(self.abs_err_sum, self.val_count),
            val_rmse:   val_loss.sqrt(),
            examples:   self.examples,
        }
    }
}

/// Logs epoch metrics to a CSV file for later analysis.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Writes the CSV header if the file doesn't exist yet.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create metrics directory '{}'", dir.display()))?;

        let csv_path = dir.join("metrics.csv");
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)?;
            writeln!(f, "{HEADER}")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    /// Append one epoch's metrics as a new row in the CSV.
    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;

        writeln!(
            f,
            "{},{:.6},{:.6},{:.6},{:.6},{}",
            m.epoch,
            m.train_loss,
            m.val_loss,
            m.val_mae,
            m.val_rmse,
            m.examples,
        )?;

        tracing::debug!(
            "Logged epoch {} metrics: train_loss={:.4}, val_loss={:.4}",
            m.epoch,
            m.train_loss,
            m.val_loss,
        );

        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulator_means() {
        let mut acc = EpochAccumulator::default();
        acc.add_train(2.0, 3);
        acc.add_train(4.0, 1);
        acc.add_validation(&[5.0, 9.0], &[6.0, 6.0]);
        acc.add_examples(6);

        let m = acc.finish(1);
        assert_eq!(m.train_loss, 2.5);
        assert_eq!(m.val_loss, 5.0);
        assert_eq!(m.val_mae, 2.0);
        assert_eq!(m.val_rmse, 5.0_f64.sqrt());
        assert_eq!(m.examples, 6);
    }

    #[test]
    fn test_csv_rows_append() {
        let dir    = tempfile::tempdir().unwrap();
        let logger = MetricsLogger::new(dir.path()).unwrap();
        let mut acc = EpochAccumulator::default();
        acc.add_train(1.0, 1);
        acc.add_examples(1);
        logger.log(&acc.finish(1)).unwrap();
        logger.log(&acc.finish(2)).unwrap();

        // Re-opening keeps the existing rows
        let logger = MetricsLogger::new(dir.path()).unwrap();
        let text   = fs::read_to_string(logger.csv_path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], HEADER);
        assert_eq!(lines.len(), 3);
        assert!(lines[2].starts_with("2,1.000000,NaN"));
        assert!(lines[2].ends_with(",1"));
    }
}
