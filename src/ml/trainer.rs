// ============================================================
// Layer 5 — Streaming Training Loop
// ============================================================
// Trains the two-tower model one streamed batch at a time. The
// dataset is never materialised; per batch:
//
//   fetch batch          (BatchStream, retried on transient errors)
//   assign indices       (IndexMapper, in stream order)
//   extract features     (FeatureExtractor, once per distinct id)
//   split train / val    (per (user, item) pair, same in every epoch)
//   Adam step            (MSE against rating × 2)
//   validate             (model.valid() on the held-out part)
//   maybe checkpoint     (every `checkpoint_every` examples)
//
// Backends:
//   - Training uses TrainBackend (Autodiff<InnerBackend>)
//   - model.valid() returns the model on InnerBackend, so the
//     validation batcher is built for InnerBackend too
//
// Resuming: unless the run is `fresh`, the latest checkpoint of an
// unfinished run is restored (weights, index maps, epoch, stream
// position, totals) and streaming continues from exactly where it
// stopped. The checkpoint's model configuration wins over flags.
//
// The run only counts as complete once every epoch has finished and
// the artifact has been written.

use anyhow::{anyhow, Context, Result};
use burn::{
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
};
use chrono::{Datelike, Utc};

use crate::application::train_use_case::TrainConfig;
use crate::data::batcher::{EncodedExample, RatingBatcher};
use crate::data::features::FeatureExtractor;
use crate::data::index_mapper::IndexMapper;
use crate::data::splitter::ValidationSplit;
use crate::data::store::StoreError;
use crate::data::streamer::{BatchStream, StreamPosition};
use crate::domain::rating::RatingExample;
use crate::domain::traits::{InteractionSource, RatingSource};
use crate::infra::artifact::ArtifactStore;
use crate::infra::cancel::CancelToken;
use crate::infra::checkpoint::{CheckpointManager, CheckpointMeta, CheckpointProgress};
use crate::infra::metrics::{EpochAccumulator, EpochMetrics, MetricsLogger};
use crate::infra::retry::{is_transient_io, RetryPolicy};
use crate::ml::model::{TwoTowerConfig, TwoTowerModel};
use crate::ml::{default_device, Device, InnerBackend, TrainBackend};

/// How a training run ended.
#[derive(Debug)]
pub enum TrainOutcome {
    /// All epochs finished and the artifact was written.
    Completed(TrainingReport),
    /// Cancelled; resumable from `last_checkpoint` (if any was written).
    Interrupted {
        last_checkpoint: Option<u64>,
        total_examples:  u64,
    },
}

#[derive(Debug, Clone, Default)]
pub struct TrainingReport {
    pub epochs:            Vec<EpochMetrics>,
    /// Cumulative example counts at which this run wrote checkpoints
    pub checkpoint_totals: Vec<u64>,
    pub total_examples:    u64,
    pub users:             usize,
    pub items:             usize,
    /// Checkpoint sequence the run resumed from
    pub resumed_from:      Option<u64>,
}

/// Everything the epoch loop starts from, fresh or restored.
struct StartingPoint {
    model:          TwoTowerModel<TrainBackend>,
    model_cfg:      TwoTowerConfig,
    mapper:         IndexMapper,
    epoch:          usize,
    position:       StreamPosition,
    total:          u64,
    reference_year: i32,
    resumed_from:   Option<u64>,
}

pub struct Trainer<'a, S: RatingSource + InteractionSource + ?Sized> {
    cfg:         &'a TrainConfig,
    source:      &'a S,
    checkpoints: &'a CheckpointManager,
    artifacts:   &'a ArtifactStore,
    retry:       RetryPolicy,
    cancel:      CancelToken,
}

impl<'a, S: RatingSource + InteractionSource + ?Sized> Trainer<'a, S> {
    pub fn new(
        cfg:         &'a TrainConfig,
        source:      &'a S,
        checkpoints: &'a CheckpointManager,
        artifacts:   &'a ArtifactStore,
    ) -> Self {
        Self {
            cfg,
            source,
            checkpoints,
            artifacts,
            retry:  RetryPolicy::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn run(&self) -> Result<TrainOutcome> {
        let cfg    = self.cfg;
        let device = default_device();

        let StartingPoint {
            mut model,
            model_cfg,
            mut mapper,
            epoch: start_epoch,
            position: start_position,
            mut total,
            reference_year,
            resumed_from,
        } = self.starting_point(&device)?;

        self.checkpoints.save_config(cfg)?;
        let metrics   = MetricsLogger::new(self.checkpoints.dir())?;
        tracing::debug!("Epoch metrics go to '{}'", metrics.csv_path().display());
        let extractor = FeatureExtractor::new(self.source).with_reference_year(reference_year);

        let train_batcher = RatingBatcher::<TrainBackend>::new(device.clone());
        let valid_batcher = RatingBatcher::<InnerBackend>::new(device.clone());

        // Adam state starts fresh, also on resume.
        let mut optim = AdamConfig::new().with_epsilon(1e-8).init();

        let mut report = TrainingReport { resumed_from, ..TrainingReport::default() };

        tracing::info!(
            "Model ready: {} user rows, {} item rows, merge={}, {} parameters",
            model_cfg.num_users,
            model_cfg.num_items,
            model_cfg.merge,
            model.num_params()
        );

        // ── Epoch loop ────────────────────────────────────────────────────────
        let holdout = ValidationSplit::new(cfg.validation_split, cfg.seed);

        for epoch in start_epoch..cfg.epochs {
            let position = if epoch == start_epoch { start_position } else { StreamPosition::start() };
            let mut stream = if position.offset > 0 {
                self.reposition(position)?
            } else {
                BatchStream::resume(self.source, position, cfg.batch_size, cfg.limit)
            };
            let mut acc    = EpochAccumulator::default();

            tracing::info!("Epoch {}/{} starting at offset {}", epoch + 1, cfg.epochs, position.offset);

            loop {
                if self.cancel.is_cancelled() {
                    let last_checkpoint = self.checkpoints.latest_pointer()?.map(|p| p.sequence);
                    tracing::warn!(
                        "Training cancelled after {} examples; resume from checkpoint {:?}",
                        total,
                        last_checkpoint
                    );
                    return Ok(TrainOutcome::Interrupted { last_checkpoint, total_examples: total });
                }

                let offset = stream.position().offset;
                let batch  = self
                    .retry
                    .run("Batch fetch", || stream.next_batch(), StoreError::is_transient)
                    .with_context(|| format!("Failed to fetch batch at offset {offset}"))?;
                let Some(batch) = batch else { break };

                let encoded      = self.encode(&batch, &mut mapper, &model_cfg, &extractor)?;
                let (train, val) = holdout.split(&batch, encoded);

                // ── Training step ─────────────────────────────────────────────
                if !train.is_empty() {
                    let (loss, _) = model.forward_loss(&train_batcher.batch(&train));
                    let loss_val: f64 = loss.clone().into_scalar().elem::<f64>();
                    acc.add_train(loss_val, train.len());

                    let grads = GradientsParams::from_grads(loss.backward(), &model);
                    model = optim.step(cfg.lr, model, grads);
                }

                // ── Validation on the held-out part ───────────────────────────
                if !val.is_empty() {
                    let preds = model
                        .valid()
                        .forward_batch(&valid_batcher.batch(&val))
                        .into_data()
                        .to_vec::<f32>()
                        .map_err(|e| anyhow!("Cannot read validation predictions: {e:?}"))?;
                    let targets: Vec<f32> = val.iter().map(|e| e.target).collect();
                    acc.add_validation(&preds, &targets);
                }

                let before = total;
                total += batch.len() as u64;
                acc.add_examples(batch.len());
                tracing::debug!(
                    "Epoch {} offset {}: {} examples ({} train / {} val), total {}",
                    epoch + 1,
                    stream.position().offset,
                    batch.len(),
                    train.len(),
                    val.len(),
                    total
                );

                if total / cfg.checkpoint_every > before / cfg.checkpoint_every {
                    let progress = CheckpointProgress { epoch, position: stream.position(), total_examples: total };
                    self.checkpoint(&model, &model_cfg, &mapper, progress, reference_year)?;
                    report.checkpoint_totals.push(total);
                }
            }

            // ── Epoch boundary ────────────────────────────────────────────────
            let m = acc.finish(epoch + 1);
            metrics.log(&m)?;
            tracing::info!(
                "Epoch {:>3}/{} | train_loss={:.4} | val_mse={:.4} | val_mae={:.4} | val_rmse={:.4} | examples={}",
                m.epoch, cfg.epochs, m.train_loss, m.val_loss, m.val_mae, m.val_rmse, m.examples,
            );
            report.epochs.push(m);

            // The final boundary is covered by the artifact instead.
            if epoch + 1 < cfg.epochs {
                let progress = CheckpointProgress {
                    epoch:          epoch + 1,
                    position:       StreamPosition::start(),
                    total_examples: total,
                };
                self.checkpoint(&model, &model_cfg, &mapper, progress, reference_year)?;
                report.checkpoint_totals.push(total);
            }
        }

        // ── Final artifact ────────────────────────────────────────────────────
        self.retry
            .run(
                "Artifact write",
                || self.artifacts.write(&model, &model_cfg, &mapper, reference_year, total),
                is_transient_io,
            )
            .context("Failed to write the final artifact")?;
        self.checkpoints.mark_completed()?;
        self.checkpoints.prune(cfg.keep_checkpoints)?;

        report.total_examples = total;
        report.users          = mapper.user_count();
        report.items          = mapper.item_count();
        tracing::info!(
            "Training complete: {} examples, {} users, {} items",
            total,
            report.users,
            report.items
        );
        Ok(TrainOutcome::Completed(report))
    }

    /// Restore the latest unfinished checkpoint, or build a fresh model.
    fn starting_point(&self, device: &Device) -> Result<StartingPoint> {
        let cfg = self.cfg;

        if cfg.fresh {
            tracing::info!("Fresh run requested; existing checkpoints are ignored");
        } else if let Some(pointer) = self.checkpoints.latest_pointer()? {
            if pointer.completed {
                tracing::info!("Latest checkpoint belongs to a finished run; starting a new one");
            } else {
                return self.restore(pointer.sequence, device);
            }
        }

        let card = self
            .retry
            .run("Cardinality query", || self.source.cardinality(), StoreError::is_transient)
            .context("Cannot size the embedding tables")?;
        let model_cfg = cfg.model_config(card);
        model_cfg.validate()?;

        Ok(StartingPoint {
            model:          model_cfg.init::<TrainBackend>(device),
            model_cfg,
            mapper:         IndexMapper::new(),
            epoch:          0,
            position:       StreamPosition::start(),
            total:          0,
            reference_year: cfg.reference_year.unwrap_or_else(|| Utc::now().year()),
            resumed_from:   None,
        })
    }

    fn restore(&self, sequence: u64, device: &Device) -> Result<StartingPoint> {
        let meta: CheckpointMeta = self.checkpoints.load_meta(sequence)?;
        let model  = self.checkpoints.load_model::<TrainBackend>(&meta, device)?;
        let mapper = IndexMapper::load(&self.checkpoints.load_index_maps(&meta)?)
            .with_context(|| format!("Checkpoint {sequence} has corrupt index maps"))?;

        let cfg = self.cfg;
        if let Ok(previous) = self.checkpoints.load_config() {
            if previous.db_path != cfg.db_path {
                tracing::warn!(
                    "Checkpoint {sequence} was written while training on '{}', now resuming on '{}'",
                    previous.db_path,
                    cfg.db_path
                );
            }
        }
        if meta.model.embedding_dim != cfg.embedding_dim
            || meta.model.hidden_dim != cfg.hidden_dim
            || meta.model.repr_dim != cfg.repr_dim
            || meta.model.merge != cfg.merge
        {
            tracing::warn!("Resuming with the checkpoint's model configuration; model flags are ignored");
        }
        tracing::info!(
            "Resuming from checkpoint {}: epoch {}, offset {}, {} examples processed",
            meta.sequence,
            meta.epoch + 1,
            meta.batch_offset,
            meta.total_examples_processed
        );

        Ok(StartingPoint {
            model,
            model_cfg:      meta.model.clone(),
            mapper,
            epoch:          meta.epoch,
            position:       meta.position(),
            total:          meta.total_examples_processed,
            reference_year: meta.reference_year,
            resumed_from:   Some(meta.sequence),
        })
    }

    /// Stream for a resumed epoch. The recorded key wins; if counting
    /// `offset` rows lands on a different key, rows before the checkpoint
    /// were added or removed since it was written.
    fn reposition(&self, position: StreamPosition) -> Result<BatchStream<'a, S>> {
        let cfg     = self.cfg;
        let counted = self
            .retry
            .run(
                "Stream reposition",
                || BatchStream::at_offset(self.source, position.offset, cfg.batch_size, cfg.limit),
                StoreError::is_transient,
            )
            .with_context(|| format!("Cannot reposition the stream at offset {}", position.offset))?;

        let Some(recorded) = position.last_key else {
            return Ok(counted);
        };
        let found = counted.position().last_key;
        if found != Some(recorded) {
            tracing::warn!(
                "The ratings store changed before offset {} (checkpoint key {recorded}, now {found:?}); \
                 continuing after the checkpoint key",
                position.offset
            );
        }
        Ok(BatchStream::resume(self.source, position, cfg.batch_size, cfg.limit))
    }

    /// Assign indices and features for one batch, in stream order.
    fn encode(
        &self,
        batch:     &[RatingExample],
        mapper:    &mut IndexMapper,
        model_cfg: &TwoTowerConfig,
        extractor: &FeatureExtractor<'_, S>,
    ) -> Result<Vec<EncodedExample>> {
        let indices: Vec<(usize, usize)> = batch
            .iter()
            .map(|ex| (mapper.index_of_user(ex.user_id), mapper.index_of_item(ex.item_id)))
            .collect();

        anyhow::ensure!(
            mapper.user_count() <= model_cfg.num_users,
            "Embedding capacity exceeded: {} distinct users seen, user table holds {}. \
             The store grew since training started; rerun with --fresh",
            mapper.user_count(),
            model_cfg.num_users
        );
        anyhow::ensure!(
            mapper.item_count() <= model_cfg.num_items,
            "Embedding capacity exceeded: {} distinct items seen, item table holds {}. \
             The store grew since training started; rerun with --fresh",
            mapper.item_count(),
            model_cfg.num_items
        );

        let features = self
            .retry
            .run("Feature extraction", || extractor.extract_batch(batch), StoreError::is_transient)
            .context("Feature extraction failed")?;

        Ok(batch
            .iter()
            .zip(indices)
            .map(|(ex, (user_index, item_index))| EncodedExample {
                user_index,
                item_index,
                user_features: features.user(ex.user_id),
                item_features: features.item(ex.item_id),
                target:        ex.target(),
            })
            .collect())
    }

    fn checkpoint<B: Backend>(
        &self,
        model:          &TwoTowerModel<B>,
        model_cfg:      &TwoTowerConfig,
        mapper:         &IndexMapper,
        progress:       CheckpointProgress,
        reference_year: i32,
    ) -> Result<CheckpointMeta> {
        let meta = self.retry.run(
            "Checkpoint write",
            || self.checkpoints.save_checkpoint(model, model_cfg, mapper, progress, reference_year),
            is_transient_io,
        )?;
        tracing::info!(
            "Checkpoint {} written at {} examples (epoch {}, offset {})",
            meta.sequence,
            meta.total_examples_processed,
            meta.epoch + 1,
            meta.batch_offset
        );
        Ok(meta)
    }
}
