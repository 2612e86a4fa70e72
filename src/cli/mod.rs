// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction, parsed with `clap`.
// All business logic is delegated to Layer 2 (application).
//
//   import     — CSV files into the SQLite ratings store
//   train      — streaming, checkpointed training
//   predict    — one (user, item) rating
//   recommend  — top-k unrated items for a user

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, ImportArgs, PredictArgs, RecommendArgs, TrainArgs};

use crate::application::import_use_case::ImportUseCase;
use crate::application::recommend_use_case::RecommendUseCase;
use crate::application::train_use_case::TrainUseCase;
use crate::infra::cancel::CancelToken;
use crate::ml::trainer::{TrainOutcome, TrainingReport};

#[derive(Parser, Debug)]
#[command(
    name = "two-tower-rec",
    version,
    about = "Train a two-tower rating model over a ratings database, then serve predictions."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Import(args)    => run_import(args),
            Commands::Train(args)     => run_train(args),
            Commands::Predict(args)   => run_predict(args),
            Commands::Recommend(args) => run_recommend(args),
        }
    }
}

fn run_import(args: ImportArgs) -> Result<()> {
    let summary = ImportUseCase::new(args.into()).execute()?;
    println!(
        "Imported {} ratings and {} movies ({} malformed rows skipped).",
        summary.ratings, summary.movies, summary.skipped
    );
    Ok(())
}

fn run_train(args: TrainArgs) -> Result<()> {
    let cancel = CancelToken::new();
    if let Err(e) = cancel.cancel_on_signal() {
        tracing::warn!("{e:#}; Ctrl-C will kill training without a clean stop");
    }
    let use_case = TrainUseCase::new(args.into()).with_cancel(cancel);
    match use_case.execute()? {
        TrainOutcome::Completed(report) => {
            print_report(&report);
            Ok(())
        }
        TrainOutcome::Interrupted { last_checkpoint, total_examples } => match last_checkpoint {
            Some(seq) => anyhow::bail!(
                "Training interrupted after {total_examples} examples; rerun to resume from checkpoint {seq}"
            ),
            None => anyhow::bail!("Training interrupted after {total_examples} examples before any checkpoint"),
        },
    }
}

fn print_report(report: &TrainingReport) {
    println!("\nTraining complete.");
    if let Some(seq) = report.resumed_from {
        println!("  Resumed from checkpoint {seq}");
    }
    println!("  Users: {}  Items: {}", report.users, report.items);
    println!("  Examples processed: {}", report.total_examples);
    println!("  Checkpoints written: {}", report.checkpoint_totals.len());
    println!("\n  {:>5}  {:>10}  {:>10}  {:>8}  {:>8}", "epoch", "train_mse", "val_mse", "val_mae", "val_rmse");
    for m in &report.epochs {
        println!(
            "  {:>5}  {:>10.4}  {:>10.4}  {:>8.4}  {:>8.4}",
            m.epoch, m.train_loss, m.val_loss, m.val_mae, m.val_rmse
        );
    }
}

fn run_predict(args: PredictArgs) -> Result<()> {
    let use_case = RecommendUseCase::new(args.model.into())?;
    let score    = use_case.predict(args.user, args.item)?;
    println!("Predicted rating for user {} / item {}: {score:.2} / 10", args.user, args.item);
    Ok(())
}

fn run_recommend(args: RecommendArgs) -> Result<()> {
    let use_case = RecommendUseCase::new(args.model.into())?;
    let top      = use_case.recommend(args.user, args.k)?;
    if top.is_empty() {
        println!("No unrated items to recommend for user {}.", args.user);
        return Ok(());
    }
    println!("Top {} for user {}:", top.len(), args.user);
    for (rank, item) in top.iter().enumerate() {
        println!("  {:>3}. item {:<10} {:.2}", rank + 1, item.item_id, item.score);
    }
    Ok(())
}
