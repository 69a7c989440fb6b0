// Copyright 2022 rust-dialogsum authors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Periodic training snapshots
//!
//! Each snapshot is a `checkpoint-{global step}` directory holding the weights (`rust_model.ot`)
//! and the trainer state (`trainer_state.json`). When a limit is set, the snapshots with the
//! lowest step are removed first.

use crate::pipelines::metrics::MetricMap;
use crate::DialogSumError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tch::nn;
use tracing::{debug, info};

const CHECKPOINT_PREFIX: &str = "checkpoint-";
pub const WEIGHTS_NAME: &str = "rust_model.ot";
pub const TRAINER_STATE_NAME: &str = "trainer_state.json";

/// # Progress of a training run, stored next to every snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TrainerState {
    pub global_step: usize,
    /// Fractional number of epochs completed
    pub epoch: f64,
    /// Logged losses and evaluation metrics, in order
    pub log_history: Vec<MetricMap>,
}

pub struct CheckpointManager {
    output_dir: PathBuf,
    save_total_limit: Option<usize>,
}

impl CheckpointManager {
    pub fn new<P: Into<PathBuf>>(output_dir: P, save_total_limit: Option<usize>) -> Self {
        CheckpointManager {
            output_dir: output_dir.into(),
            save_total_limit,
        }
    }

    /// Existing snapshots ordered by increasing step.
    pub fn checkpoints(&self) -> Result<Vec<(usize, PathBuf)>, DialogSumError> {
        if !self.output_dir.is_dir() {
            return Ok(vec![]);
        }
        let mut checkpoints = Vec::new();
        for entry in fs::read_dir(&self.output_dir)? {
            let path = entry?.path();
            let step = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.strip_prefix(CHECKPOINT_PREFIX))
                .and_then(|step| step.parse::<usize>().ok());
            if let (Some(step), true) = (step, path.is_dir()) {
                checkpoints.push((step, path));
            }
        }
        checkpoints.sort_by_key(|(step, _)| *step);
        Ok(checkpoints)
    }

    /// Writes a snapshot for `state.global_step` and removes the oldest ones beyond the limit.
    pub fn save(
        &self,
        var_store: &nn::VarStore,
        state: &TrainerState,
    ) -> Result<PathBuf, DialogSumError> {
        let directory = self
            .output_dir
            .join(format!("{CHECKPOINT_PREFIX}{}", state.global_step));
        fs::create_dir_all(&directory)?;
        var_store.save(directory.join(WEIGHTS_NAME))?;
        fs::write(
            directory.join(TRAINER_STATE_NAME),
            serde_json::to_string_pretty(state)?,
        )?;
        info!(path = %directory.display(), step = state.global_step, "saved checkpoint");
        self.rotate()?;
        Ok(directory)
    }

    fn rotate(&self) -> Result<(), DialogSumError> {
        let Some(limit) = self.save_total_limit else {
            return Ok(());
        };
        let checkpoints = self.checkpoints()?;
        let excess = checkpoints.len().saturating_sub(limit);
        for (_, path) in checkpoints.into_iter().take(excess) {
            debug!(path = %path.display(), "removing old checkpoint");
            fs::remove_dir_all(path)?;
        }
        Ok(())
    }

    pub fn load_state<P: AsRef<Path>>(checkpoint: P) -> Result<TrainerState, DialogSumError> {
        let content = fs::read_to_string(checkpoint.as_ref().join(TRAINER_STATE_NAME))?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tch::Device;

    #[test]
    fn keeps_most_recent_checkpoints() -> anyhow::Result<()> {
        let directory = tempfile::tempdir()?;
        let var_store = nn::VarStore::new(Device::Cpu);
        let _ = var_store.root().zeros("weight", &[2, 2]);
        let manager = CheckpointManager::new(directory.path(), Some(2));

        for step in [500, 1000, 1500, 2000] {
            let state = TrainerState {
                global_step: step,
                epoch: step as f64 / 1000.0,
                log_history: vec![],
            };
            manager.save(&var_store, &state)?;
        }

        let steps: Vec<usize> = manager.checkpoints()?.into_iter().map(|(s, _)| s).collect();
        assert_eq!(steps, vec![1500, 2000]);
        let latest = directory.path().join("checkpoint-2000");
        assert!(latest.join(WEIGHTS_NAME).exists());
        assert_eq!(CheckpointManager::load_state(&latest)?.global_step, 2000);
        Ok(())
    }

    #[test]
    fn ordering_is_numeric() -> anyhow::Result<()> {
        let directory = tempfile::tempdir()?;
        for name in ["checkpoint-900", "checkpoint-1000", "checkpoint-x", "other"] {
            fs::create_dir(directory.path().join(name))?;
        }
        let manager = CheckpointManager::new(directory.path(), None);
        let steps: Vec<usize> = manager.checkpoints()?.into_iter().map(|(s, _)| s).collect();
        assert_eq!(steps, vec![900, 1000]);
        Ok(())
    }
}
