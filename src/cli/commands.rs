// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Four subcommands: `import`, `train`, `predict`, `recommend`.
//
// Training flags are optional so that `--test-mode` can supply
// its own defaults while anything given explicitly still wins.

use clap::{Args, Subcommand};

use crate::application::import_use_case::ImportConfig;
use crate::application::recommend_use_case::ServeConfig;
use crate::application::train_use_case::TrainConfig;
use crate::ml::inferencer::DEFAULT_COLD_START_SCORE;
use crate::ml::model::TowerMerge;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load ratings.csv (and optionally movies.csv) into the SQLite store
    Import(ImportArgs),

    /// Train the two-tower model, resuming from the latest checkpoint
    Train(TrainArgs),

    /// Predict the rating a user would give an item (0–10 scale)
    Predict(PredictArgs),

    /// Recommend the best unrated items for a user
    Recommend(RecommendArgs),
}

/// Location of the ratings database, shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct DbArgs {
    #[arg(long = "db", env = "TWO_TOWER_DB", default_value = "ratings.db")]
    pub db_path: String,
}

// ─── import ──────────────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct ImportArgs {
    #[command(flatten)]
    pub db: DbArgs,

    /// CSV with userId,movieId,rating,timestamp
    #[arg(long)]
    pub ratings: String,

    /// CSV with movieId,title,genres
    #[arg(long)]
    pub movies: Option<String>,

    /// Rows written per transaction
    #[arg(long, default_value_t = 50_000)]
    pub batch_size: usize,
}

impl From<ImportArgs> for ImportConfig {
    fn from(a: ImportArgs) -> Self {
        ImportConfig {
            db_path:     a.db.db_path,
            ratings_csv: a.ratings,
            movies_csv:  a.movies,
            batch_size:  a.batch_size,
        }
    }
}

// ─── train ───────────────────────────────────────────────────────────────────
#[derive(Args, Debug)]
pub struct TrainArgs {
    #[command(flatten)]
    pub db: DbArgs,

    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,

    /// Where the final model and index maps are written
    #[arg(long, default_value = "artifact")]
    pub artifact_dir: String,

    /// Small batches, one epoch, 1000 examples
    #[arg(long)]
    pub test_mode: bool,

    /// Ignore existing checkpoints and start over
    #[arg(long)]
    pub fresh: bool,

    /// Examples fetched per batch [default: 10000]
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Checkpoint after every N examples [default: 1000000]
    #[arg(long)]
    pub checkpoint_every: Option<u64>,

    /// [default: 5]
    #[arg(long)]
    pub epochs: Option<usize>,

    /// Fraction of each batch held out for validation [default: 0.1]
    #[arg(long)]
    pub validation_split: Option<f64>,

    /// Stop each epoch after N examples
    #[arg(long)]
    pub limit: Option<u64>,

    /// Adam learning rate [default: 0.001]
    #[arg(long)]
    pub lr: Option<f64>,

    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long)]
    pub embedding_dim: Option<usize>,

    #[arg(long)]
    pub hidden_dim: Option<usize>,

    #[arg(long)]
    pub repr_dim: Option<usize>,

    /// How the towers are combined: dot or dense [default: dense]
    #[arg(long)]
    pub merge: Option<TowerMerge>,

    /// Checkpoints kept after a completed run [default: 3]
    #[arg(long)]
    pub keep_checkpoints: Option<usize>,

    /// Attempts for transient store and filesystem failures [default: 5]
    #[arg(long)]
    pub retry_attempts: Option<usize>,

    /// Year the item recency feature is measured against [default: current year]
    #[arg(long)]
    pub reference_year: Option<i32>,
}

impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        let base = if a.test_mode { TrainConfig::test_mode() } else { TrainConfig::default() };
        TrainConfig {
            db_path:          a.db.db_path,
            checkpoint_dir:   a.checkpoint_dir,
            artifact_dir:     a.artifact_dir,
            batch_size:       a.batch_size.unwrap_or(base.batch_size),
            checkpoint_every: a.checkpoint_every.unwrap_or(base.checkpoint_every),
            epochs:           a.epochs.unwrap_or(base.epochs),
            validation_split: a.validation_split.unwrap_or(base.validation_split),
            limit:            a.limit.or(base.limit),
            lr:               a.lr.unwrap_or(base.lr),
            seed:             a.seed.unwrap_or(base.seed),
            embedding_dim:    a.embedding_dim.unwrap_or(base.embedding_dim),
            hidden_dim:       a.hidden_dim.unwrap_or(base.hidden_dim),
            repr_dim:         a.repr_dim.unwrap_or(base.repr_dim),
            merge:            a.merge.unwrap_or(base.merge),
            keep_checkpoints: a.keep_checkpoints.unwrap_or(base.keep_checkpoints),
            fresh:            a.fresh,
            retry_attempts:   a.retry_attempts.unwrap_or(base.retry_attempts),
            reference_year:   a.reference_year.or(base.reference_year),
        }
    }
}

// ─── predict / recommend ─────────────────────────────────────────────────────
#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    #[command(flatten)]
    pub db: DbArgs,

    #[arg(long, default_value = "artifact")]
    pub artifact_dir: String,

    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,

    /// Serve the newest checkpoint instead of the final artifact
    #[arg(long)]
    pub from_checkpoint: bool,

    /// Score for users or items the model has never seen
    #[arg(long, default_value_t = DEFAULT_COLD_START_SCORE)]
    pub cold_start_score: f32,
}

impl From<ModelArgs> for ServeConfig {
    fn from(a: ModelArgs) -> Self {
        ServeConfig {
            db_path:          a.db.db_path,
            artifact_dir:     a.artifact_dir,
            checkpoint_dir:   a.checkpoint_dir,
            from_checkpoint:  a.from_checkpoint,
            cold_start_score: a.cold_start_score,
        }
    }
}

#[derive(Args, Debug)]
pub struct PredictArgs {
    #[arg(long)]
    pub user: i64,

    #[arg(long)]
    pub item: i64,

    #[command(flatten)]
    pub model: ModelArgs,
}

#[derive(Args, Debug)]
pub struct RecommendArgs {
    #[arg(long)]
    pub user: i64,

    /// Number of items to return
    #[arg(long, short, default_value_t = 10)]
    pub k: usize,

    #[command(flatten)]
    pub model: ModelArgs,
}
