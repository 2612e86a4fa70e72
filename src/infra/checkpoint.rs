// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Persists everything a resumed run needs, keyed by a monotonically
// increasing sequence number:
//
//   checkpoints/
//     ckpt_000001/
//       model.mpk          ← weights (CompactRecorder)
//       meta.json          ← epoch, stream position, totals, model config
//       index_maps.json    ← IndexMappings at that point
//     ckpt_000002/ ...
//     latest.json          ← { "sequence": 2, "completed": false }
//     train_config.json    ← the run's TrainConfig
//     metrics.csv          ← written by MetricsLogger
//
// A checkpoint is first written to a hidden staging directory and
// renamed into place once complete, and latest.json is replaced the
// same way, so a crash mid-write never leaves latest.json pointing
// at a partial checkpoint.
//
// Optimizer moments are not saved: a resumed run restarts Adam with
// fresh state on top of the restored weights.

use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};
use burn::{
    prelude::*,
    record::{CompactRecorder, Recorder},
};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::application::train_use_case::TrainConfig;
use crate::data::index_mapper::{IndexMapper, IndexMappings};
use crate::data::streamer::StreamPosition;
use crate::ml::model::{TwoTowerConfig, TwoTowerModel};

const CKPT_PREFIX:  &str = "ckpt_";
const MODEL_FILE:   &str = "model";
const META_FILE:    &str = "meta.json";
const MAPS_FILE:    &str = "index_maps.json";
const LATEST_FILE:  &str = "latest.json";
const CONFIG_FILE:  &str = "train_config.json";

/// Where training stood when a checkpoint was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointProgress {
    /// 0-based epoch to continue in
    pub epoch:          usize,
    /// Stream position inside that epoch
    pub position:       StreamPosition,
    pub total_examples: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointMeta {
    pub sequence:                 u64,
    pub epoch:                    usize,
    pub batch_offset:             u64,
    /// Ordering key of the last example consumed in this epoch
    pub resume_key:               Option<i64>,
    pub total_examples_processed: u64,
    pub timestamp:                DateTime<Utc>,
    pub reference_year:           i32,
    pub model:                    TwoTowerConfig,
}

impl CheckpointMeta {
    pub fn position(&self) -> StreamPosition {
        StreamPosition { offset: self.batch_offset, last_key: self.resume_key }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestPointer {
    pub sequence:  u64,
    /// Set once the run that wrote this checkpoint produced its artifact
    pub completed: bool,
}

pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Creates the directory if it doesn't already exist.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn ckpt_dir(&self, sequence: u64) -> PathBuf {
        self.dir.join(format!("{CKPT_PREFIX}{sequence:06}"))
    }

    // ─── Writing ──────────────────────────────────────────────────────────────

    pub fn save_checkpoint<B: Backend>(
        &self,
        model:          &TwoTowerModel<B>,
        model_cfg:      &TwoTowerConfig,
        mapper:         &IndexMapper,
        progress:       CheckpointProgress,
        reference_year: i32,
    ) -> Result<CheckpointMeta> {
        let sequence = self.checkpoints()?.last().map_or(1, |last| last + 1);
        let meta = CheckpointMeta {
            sequence,
            epoch:                    progress.epoch,
            batch_offset:             progress.position.offset,
            resume_key:               progress.position.last_key,
            total_examples_processed: progress.total_examples,
            timestamp:                Utc::now(),
            reference_year,
            model:                    model_cfg.clone(),
        };

        let staging = self.dir.join(format!(".{CKPT_PREFIX}{sequence:06}.tmp"));
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)
            .with_context(|| format!("Cannot create '{}'", staging.display()))?;

        CompactRecorder::new()
            .record(model.clone().into_record(), staging.join(MODEL_FILE))
            .with_context(|| format!("Failed to save weights for checkpoint {sequence}"))?;
        write_json(&staging.join(META_FILE), &meta)?;
        write_json(&staging.join(MAPS_FILE), &mapper.serialize())?;

        let target = self.ckpt_dir(sequence);
        fs::rename(&staging, &target)
            .with_context(|| format!("Cannot move checkpoint into '{}'", target.display()))?;
        self.write_latest(LatestPointer { sequence, completed: false })?;

        tracing::debug!(
            "Saved checkpoint {} (epoch {}, offset {}, {} examples)",
            sequence,
            meta.epoch,
            meta.batch_offset,
            meta.total_examples_processed
        );
        Ok(meta)
    }

    fn write_latest(&self, pointer: LatestPointer) -> Result<()> {
        let tmp = self.dir.join(format!("{LATEST_FILE}.tmp"));
        write_json(&tmp, &pointer)?;
        fs::rename(&tmp, self.dir.join(LATEST_FILE)).context("Cannot update latest.json")?;
        Ok(())
    }

    /// Flag the newest checkpoint as belonging to a finished run.
    pub fn mark_completed(&self) -> Result<()> {
        if let Some(pointer) = self.latest_pointer()? {
            self.write_latest(LatestPointer { completed: true, ..pointer })?;
        }
        Ok(())
    }

    /// Delete all but the newest `keep` checkpoints. The one latest.json
    /// points at is never deleted. Returns how many were removed.
    pub fn prune(&self, keep: usize) -> Result<usize> {
        let latest    = self.latest_pointer()?.map(|p| p.sequence);
        let sequences = self.checkpoints()?;
        let excess    = sequences.len().saturating_sub(keep.max(1));

        let mut removed = 0;
        for &seq in sequences.iter().take(excess) {
            if Some(seq) == latest {
                continue;
            }
            fs::remove_dir_all(self.ckpt_dir(seq))
                .with_context(|| format!("Cannot delete checkpoint {seq}"))?;
            removed += 1;
        }
        if removed > 0 {
            tracing::info!("Pruned {} old checkpoint(s)", removed);
        }
        Ok(removed)
    }

    pub fn save_config(&self, cfg: &TrainConfig) -> Result<()> {
        write_json(&self.dir.join(CONFIG_FILE), cfg)
    }

    // ─── Reading ──────────────────────────────────────────────────────────────

    /// Sequence numbers of all complete checkpoints, ascending.
    pub fn checkpoints(&self) -> Result<Vec<u64>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("Cannot list '{}'", self.dir.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            if let Some(seq) = name
                .to_str()
                .and_then(|n| n.strip_prefix(CKPT_PREFIX))
                .and_then(|n| n.parse::<u64>().ok())
            {
                out.push(seq);
            }
        }
        out.sort_unstable();
        Ok(out)
    }

    pub fn latest_pointer(&self) -> Result<Option<LatestPointer>> {
        let path = self.dir.join(LATEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(read_json(&path)?))
    }

    /// Metadata of the newest checkpoint, if any has been written.
    pub fn latest(&self) -> Result<Option<CheckpointMeta>> {
        match self.latest_pointer()? {
            Some(pointer) => Ok(Some(self.load_meta(pointer.sequence)?)),
            None => Ok(None),
        }
    }

    pub fn load_meta(&self, sequence: u64) -> Result<CheckpointMeta> {
        read_json(&self.ckpt_dir(sequence).join(META_FILE))
            .with_context(|| format!("Checkpoint {sequence} is unreadable"))
    }

    /// Rebuild the model described by `meta` and load its weights.
    pub fn load_model<B: Backend>(
        &self,
        meta:   &CheckpointMeta,
        device: &B::Device,
    ) -> Result<TwoTowerModel<B>> {
        let path   = self.ckpt_dir(meta.sequence).join(MODEL_FILE);
        let model  = meta.model.init::<B>(device);
        let record = CompactRecorder::new()
            .load(path.clone(), device)
            .with_context(|| format!("Cannot load weights from '{}'", path.display()))?;
        tracing::info!("Loaded checkpoint {} (epoch {})", meta.sequence, meta.epoch);
        Ok(model.load_record(record))
    }

    pub fn load_index_maps(&self, meta: &CheckpointMeta) -> Result<IndexMappings> {
        read_json(&self.ckpt_dir(meta.sequence).join(MAPS_FILE))
    }

    pub fn load_config(&self) -> Result<TrainConfig> {
        read_json(&self.dir.join(CONFIG_FILE)).context("Has 'train' been run with this checkpoint directory?")
    }
}

// ─── JSON helpers ─────────────────────────────────────────────────────────────

pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("Cannot write '{}'", path.display()))
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Cannot read '{}'", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("Malformed JSON in '{}'", path.display()))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray;

    fn model_cfg() -> TwoTowerConfig {
        TwoTowerConfig::new(3, 3).with_embedding_dim(4).with_hidden_dim(8).with_repr_dim(4)
    }

    fn progress(total: u64) -> CheckpointProgress {
        CheckpointProgress {
            epoch:          0,
            position:       StreamPosition { offset: total, last_key: Some(total as i64) },
            total_examples: total,
        }
    }

    fn mapper() -> IndexMapper {
        let mut m = IndexMapper::new();
        m.index_of_user(10);
        m.index_of_item(20);
        m
    }

    #[test]
    fn empty_directory_has_no_latest() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path()).unwrap();
        assert!(mgr.latest().unwrap().is_none());
        assert!(mgr.checkpoints().unwrap().is_empty());
    }

    #[test]
    fn save_then_load_latest() {
        let dir   = tempfile::tempdir().unwrap();
        let mgr   = CheckpointManager::new(dir.path()).unwrap();
        let cfg   = model_cfg();
        let model = cfg.init::<B>(&Default::default());

        mgr.save_checkpoint(&model, &cfg, &mapper(), progress(4), 2024).unwrap();
        mgr.save_checkpoint(&model, &cfg, &mapper(), progress(8), 2024).unwrap();

        let meta = mgr.latest().unwrap().unwrap();
        assert_eq!(meta.sequence, 2);
        assert_eq!(meta.total_examples_processed, 8);
        assert_eq!(meta.position(), StreamPosition { offset: 8, last_key: Some(8) });
        assert_eq!(meta.model.repr_dim, 4);
        assert_eq!(mgr.checkpoints().unwrap(), vec![1, 2]);

        let maps = mgr.load_index_maps(&meta).unwrap();
        assert_eq!(IndexMapper::load(&maps).unwrap(), mapper());

        let loaded: TwoTowerModel<B> = mgr.load_model(&meta, &Default::default()).unwrap();
        assert_eq!(loaded.num_params(), model.num_params());

        // No staging directories are left behind
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn meta_uses_camel_case_keys() {
        let dir   = tempfile::tempdir().unwrap();
        let mgr   = CheckpointManager::new(dir.path()).unwrap();
        let cfg   = model_cfg();
        let model = cfg.init::<B>(&Default::default());
        mgr.save_checkpoint(&model, &cfg, &mapper(), progress(4), 2024).unwrap();

        let raw = fs::read_to_string(dir.path().join("ckpt_000001").join(META_FILE)).unwrap();
        for key in ["batchOffset", "resumeKey", "totalExamplesProcessed", "timestamp"] {
            assert!(raw.contains(key), "missing {key}");
        }
    }

    #[test]
    fn prune_keeps_newest() {
        let dir   = tempfile::tempdir().unwrap();
        let mgr   = CheckpointManager::new(dir.path()).unwrap();
        let cfg   = model_cfg();
        let model = cfg.init::<B>(&Default::default());
        for total in [2, 4, 6, 8] {
            mgr.save_checkpoint(&model, &cfg, &mapper(), progress(total), 2024).unwrap();
        }

        assert_eq!(mgr.prune(3).unwrap(), 1);
        assert_eq!(mgr.checkpoints().unwrap(), vec![2, 3, 4]);
        assert_eq!(mgr.prune(0).unwrap(), 2);
        assert_eq!(mgr.checkpoints().unwrap(), vec![4]);
        assert_eq!(mgr.latest().unwrap().unwrap().sequence, 4);
    }

    #[test]
    fn completion_flag_and_config() {
        let dir   = tempfile::tempdir().unwrap();
        let mgr   = CheckpointManager::new(dir.path()).unwrap();
        let cfg   = model_cfg();
        let model = cfg.init::<B>(&Default::default());
        mgr.save_checkpoint(&model, &cfg, &mapper(), progress(2), 2024).unwrap();

        assert!(!mgr.latest_pointer().unwrap().unwrap().completed);
        mgr.mark_completed().unwrap();
        assert!(mgr.latest_pointer().unwrap().unwrap().completed);

        let train_cfg = TrainConfig::test_mode();
        mgr.save_config(&train_cfg).unwrap();
        assert_eq!(mgr.load_config().unwrap(), train_cfg);
    }
}
