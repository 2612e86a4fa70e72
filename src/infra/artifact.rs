// ============================================================
// Layer 6 — Final Model Artifact
// ============================================================
// What a finished training run hands to serving:
//
//   artifact/
//     model.mpk           ← trained weights
//     model_config.json   ← TwoTowerConfig to rebuild the model
//     mappings.json       ← { userIndexMap, itemIndexMap, version,
//                             trainedOn, referenceYear, totalExamples }
//
// The whole set is written into a sibling staging directory and
// swapped in by renaming directories, so weights and mappings from
// two different runs never sit side by side. A crash between the two
// renames leaves the previous artifact under `.<name>.old` and no
// artifact at the target; rerunning `train` restores it.

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
use serde::{Deserialize, Serialize};

use crate::data::index_mapper::{IndexMapper, IndexMappings};
use crate::infra::checkpoint::{read_json, write_json};
use crate::ml::model::{TwoTowerConfig, TwoTowerModel};

/// Bumped whenever the artifact layout changes.
pub const ARTIFACT_VERSION: u32 = 1;

/// CompactRecorder appends its own `.mpk` extension to this stem.
const MODEL_FILE:     &str = "model";
const MODEL_MPK_FILE: &str = "model.mpk";
const CONFIG_FILE:    &str = "model_config.json";
const MAPPINGS_FILE:  &str = "mappings.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactMappings {
    #[serde(flatten)]
    pub index_maps:     IndexMappings,
    pub version:        u32,
    pub trained_on:     DateTime<Utc>,
    /// Year the item recency slot was computed against during training
    pub reference_year: i32,
    pub total_examples: u64,
}

/// A loaded artifact, ready for inference.
pub struct Artifact<B: Backend> {
    pub model:    TwoTowerModel<B>,
    pub config:   TwoTowerConfig,
    pub mapper:   IndexMapper,
    pub mappings: ArtifactMappings,
}

pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn exists(&self) -> bool {
        [MODEL_MPK_FILE, CONFIG_FILE, MAPPINGS_FILE]
            .iter()
            .all(|name| self.dir.join(name).exists())
    }

    /// `.<name>.<suffix>` next to the artifact directory.
    fn sibling(&self, suffix: &str) -> Result<PathBuf> {
        let name = self
            .dir
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("Artifact path '{}' has no directory name", self.dir.display()))?;
        Ok(self.dir.with_file_name(format!(".{}.{suffix}", name.to_string_lossy())))
    }

    pub fn write<B: Backend>(
        &self,
        model:          &TwoTowerModel<B>,
        config:         &TwoTowerConfig,
        mapper:         &IndexMapper,
        reference_year: i32,
        total_examples: u64,
    ) -> Result<ArtifactMappings> {
        let staging = self.sibling("staging")?;
        let old     = self.sibling("old")?;
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)
            .with_context(|| format!("Cannot create staging directory '{}'", staging.display()))?;

        let mappings = ArtifactMappings {
            index_maps: mapper.serialize(),
            version:    ARTIFACT_VERSION,
            trained_on: Utc::now(),
            reference_year,
            total_examples,
        };

        CompactRecorder::new()
            .record(model.clone().into_record(), staging.join(MODEL_FILE))
            .context("Failed to save artifact weights")?;
        write_json(&staging.join(CONFIG_FILE), config)?;
        write_json(&staging.join(MAPPINGS_FILE), &mappings)?;

        anyhow::ensure!(
            staging.join(MODEL_MPK_FILE).exists(),
            "Recorder did not produce '{MODEL_MPK_FILE}' in '{}'",
            staging.display()
        );

        if old.exists() {
            fs::remove_dir_all(&old)?;
        }
        if self.dir.exists() {
            fs::rename(&self.dir, &old)
                .with_context(|| format!("Cannot move the previous artifact out of '{}'", self.dir.display()))?;
        }
        fs::rename(&staging, &self.dir)
            .with_context(|| format!("Cannot move the new artifact into '{}'", self.dir.display()))?;
        if old.exists() {
            fs::remove_dir_all(&old)?;
        }

        tracing::info!(
            "Artifact written to '{}' ({} users, {} items)",
            self.dir.display(),
            mapper.user_count(),
            mapper.item_count()
        );
        Ok(mappings)
    }

    pub fn load<B: Backend>(&self, device: &B::Device) -> Result<Artifact<B>> {
        anyhow::ensure!(
            self.exists(),
            "No trained artifact in '{}'. Have you run 'train' first?",
            self.dir.display()
        );

        let config: TwoTowerConfig   = read_json(&self.dir.join(CONFIG_FILE))?;
        let mappings: ArtifactMappings = read_json(&self.dir.join(MAPPINGS_FILE))?;
        anyhow::ensure!(
            mappings.version == ARTIFACT_VERSION,
            "Artifact version {} is not supported (expected {})",
            mappings.version,
            ARTIFACT_VERSION
        );
        let mapper = IndexMapper::load(&mappings.index_maps)
            .context("Artifact index mappings are corrupt")?;

        let record = CompactRecorder::new()
            .load(self.dir.join(MODEL_FILE), device)
            .context("Cannot load artifact weights")?;
        let model = config.init::<B>(device).load_record(record);

        Ok(Artifact { model, config, mapper, mappings })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray;

    #[test]
    fn write_then_load() {
        let dir   = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("artifact"));
        assert!(!store.exists());
        assert!(store.load::<B>(&Default::default()).is_err());

        let cfg   = TwoTowerConfig::new(2, 3).with_embedding_dim(4).with_hidden_dim(8).with_repr_dim(4);
        let model = cfg.init::<B>(&Default::default());
        let mut mapper = IndexMapper::new();
        mapper.index_of_user(7);
        mapper.index_of_item(70);
        mapper.index_of_item(71);

        store.write(&model, &cfg, &mapper, 2024, 12).unwrap();
        assert!(store.exists());
        assert!(store.dir().join(MODEL_MPK_FILE).is_file());
        assert!(!store.sibling("staging").unwrap().exists());

        let raw = fs::read_to_string(store.dir().join(MAPPINGS_FILE)).unwrap();
        for key in ["userIndexMap", "itemIndexMap", "version", "trainedOn"] {
            assert!(raw.contains(key), "missing {key}");
        }

        let artifact = store.load::<B>(&Default::default()).unwrap();
        assert_eq!(artifact.mapper, mapper);
        assert_eq!(artifact.config.num_items, 3);
        assert_eq!(artifact.mappings.reference_year, 2024);
        assert_eq!(artifact.mappings.total_examples, 12);
    }

    #[test]
    fn rewriting_replaces_previous_artifact() {
        let dir   = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("artifact"));
        let cfg   = TwoTowerConfig::new(1, 1).with_embedding_dim(2).with_hidden_dim(2).with_repr_dim(2);
        let model = cfg.init::<B>(&Default::default());

        store.write(&model, &cfg, &IndexMapper::new(), 2024, 1).unwrap();
        fs::write(store.dir().join("stray.txt"), "left over").unwrap();
        store.write(&model, &cfg, &IndexMapper::new(), 2024, 2).unwrap();

        let artifact = store.load::<B>(&Default::default()).unwrap();
        assert_eq!(artifact.mappings.total_examples, 2);
        // The directory is swapped as a whole, not merged file by file.
        assert!(!store.dir().join("stray.txt").exists());
        assert!(!store.sibling("old").unwrap().exists());

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["artifact"]);
    }

    #[test]
    fn incomplete_artifact_is_not_loadable() {
        let dir   = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("artifact"));
        let cfg   = TwoTowerConfig::new(1, 1).with_embedding_dim(2).with_hidden_dim(2).with_repr_dim(2);
        store.write(&cfg.init::<B>(&Default::default()), &cfg, &IndexMapper::new(), 2024, 1).unwrap();

        fs::remove_file(store.dir().join(MODEL_MPK_FILE)).unwrap();
        assert!(!store.exists());
        assert!(store.load::<B>(&Default::default()).is_err());
    }
}
