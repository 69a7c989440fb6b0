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

use crate::DialogSumError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// When the validation set is evaluated during training
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationStrategy {
    /// Never during training
    No,
    /// After every full pass over the training set
    Epoch,
}

/// # Hyperparameters of a fine-tuning run
/// Fixed once the trainer is built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainingConfig {
    /// Directory receiving the `checkpoint-{step}` snapshots (default: `BART-LARGE-DIALOGSUM`)
    pub output_dir: PathBuf,
    /// Peak learning rate of the AdamW optimizer (default: 2e-5)
    pub learning_rate: f64,
    /// Number of examples per training batch (default: 1)
    pub per_device_train_batch_size: usize,
    /// Number of examples per evaluation batch when computing the loss (default: 1)
    pub per_device_eval_batch_size: usize,
    /// Decoupled weight decay (default: 0.01)
    pub weight_decay: f64,
    pub adam_beta1: f64,
    pub adam_beta2: f64,
    pub adam_epsilon: f64,
    /// Number of passes over the training set (default: 3)
    pub num_train_epochs: usize,
    /// Run forward passes in mixed precision on CUDA devices (default: true)
    pub fp16: bool,
    /// Validation schedule (default: every epoch)
    pub evaluation_strategy: EvaluationStrategy,
    /// Generate summaries during evaluation to compute ROUGE (default: true)
    pub predict_with_generate: bool,
    /// Optimizer steps between two snapshots (default: 500)
    pub save_steps: usize,
    /// Maximum number of snapshots kept on disk, oldest removed first (default: 3)
    pub save_total_limit: Option<usize>,
    /// Gradient norm clipping threshold, 0 disables clipping (default: 1.0)
    pub max_grad_norm: f64,
    /// Steps of linear learning rate warmup (default: 0)
    pub warmup_steps: usize,
    /// Optimizer steps between two loss log lines (default: 50)
    pub logging_steps: usize,
    /// Seed of the training order shuffling and dropout (default: 42)
    pub seed: u64,
    /// Hide the progress bars (default: false)
    pub disable_progress_bar: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            output_dir: PathBuf::from("BART-LARGE-DIALOGSUM"),
            learning_rate: 2e-5,
            per_device_train_batch_size: 1,
            per_device_eval_batch_size: 1,
            weight_decay: 0.01,
            adam_beta1: 0.9,
            adam_beta2: 0.999,
            adam_epsilon: 1e-8,
            num_train_epochs: 3,
            fp16: true,
            evaluation_strategy: EvaluationStrategy::Epoch,
            predict_with_generate: true,
            save_steps: 500,
            save_total_limit: Some(3),
            max_grad_norm: 1.0,
            warmup_steps: 0,
            logging_steps: 50,
            seed: 42,
            disable_progress_bar: false,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<(), DialogSumError> {
        let invalid = |message: String| Err(DialogSumError::InvalidConfigurationError(message));
        if !(self.learning_rate > 0.0) {
            return invalid(format!("learning_rate must be positive, got {}", self.learning_rate));
        }
        if self.per_device_train_batch_size == 0 || self.per_device_eval_batch_size == 0 {
            return invalid("batch sizes must be at least 1".to_string());
        }
        if self.num_train_epochs == 0 {
            return invalid("num_train_epochs must be at least 1".to_string());
        }
        if self.weight_decay < 0.0 || self.max_grad_norm < 0.0 {
            return invalid("weight_decay and max_grad_norm cannot be negative".to_string());
        }
        if !(0.0..1.0).contains(&self.adam_beta1) || !(0.0..1.0).contains(&self.adam_beta2) {
            return invalid("Adam betas must be in [0, 1)".to_string());
        }
        if self.save_steps == 0 || self.logging_steps == 0 {
            return invalid("save_steps and logging_steps must be at least 1".to_string());
        }
        if self.save_total_limit == Some(0) {
            return invalid("save_total_limit must be at least 1 when set".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = TrainingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.learning_rate, 2e-5);
        assert_eq!(config.num_train_epochs, 3);
        assert_eq!(config.save_total_limit, Some(3));
    }

    #[test]
    fn rejects_out_of_range_values() {
        let configs = [
            TrainingConfig {
                learning_rate: 0.0,
                ..Default::default()
            },
            TrainingConfig {
                per_device_train_batch_size: 0,
                ..Default::default()
            },
            TrainingConfig {
                num_train_epochs: 0,
                ..Default::default()
            },
            TrainingConfig {
                save_total_limit: Some(0),
                ..Default::default()
            },
            TrainingConfig {
                adam_beta2: 1.0,
                ..Default::default()
            },
        ];
        for config in configs {
            assert!(matches!(
                config.validate(),
                Err(DialogSumError::InvalidConfigurationError(_))
            ));
        }
    }

    #[test]
    fn partial_json_keeps_defaults() -> anyhow::Result<()> {
        let config: TrainingConfig =
            serde_json::from_str(r#"{"num_train_epochs": 1, "evaluation_strategy": "no"}"#)?;
        assert_eq!(config.num_train_epochs, 1);
        assert_eq!(config.evaluation_strategy, EvaluationStrategy::No);
        assert_eq!(config.weight_decay, 0.01);
        Ok(())
    }
}
