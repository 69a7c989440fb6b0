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

//! # DialogSum fine-tuning pipeline
//!
//! Loads the three DialogSum partitions, fine-tunes a BART checkpoint with frozen embeddings,
//! evaluates ROUGE on the validation set after every epoch, writes one generated summary per
//! test dialogue and saves the fine-tuned weights.
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! use rust_dialogsum::pipelines::dialogsum::{run_pipeline, DialogSumConfig};
//! use rust_dialogsum::Config;
//!
//! let config = DialogSumConfig::from_file("dialogsum.json")?;
//! let output = run_pipeline(&config)?;
//! println!("{:?}", output.test_metrics);
//! # Ok(())
//! # }
//! ```

use crate::bart::BartConfig;
use crate::data::load_splits;
use crate::pipelines::generation::GenerateConfig;
use crate::pipelines::metrics::{MetricEvaluator, MetricMap};
use crate::pipelines::preprocessing::{Preprocessor, MAX_SOURCE_LENGTH, MAX_TARGET_LENGTH};
use crate::pipelines::seq2seq::{Seq2SeqModel, Seq2SeqModelResources};
use crate::pipelines::summarization::{decode_summaries, write_summaries};
use crate::resources::LocalResource;
use crate::training::{Seq2SeqCollator, Seq2SeqTrainer, TrainOutput, TrainingConfig};
use crate::{Config, DialogSumError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tch::Device;
use tracing::info;

/// # Where the pretrained checkpoint comes from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ModelCheckpoint {
    /// Model repository on the Hugging Face hub, downloaded to the local cache
    Pretrained { name: String },
    /// Checkpoint files on disk
    Local {
        config: PathBuf,
        vocab: PathBuf,
        merges: PathBuf,
        weights: PathBuf,
    },
}

impl Default for ModelCheckpoint {
    fn default() -> Self {
        ModelCheckpoint::Pretrained {
            name: "facebook/bart-large".to_string(),
        }
    }
}

impl ModelCheckpoint {
    pub fn resources(&self) -> Result<Seq2SeqModelResources, DialogSumError> {
        match self {
            #[cfg(feature = "remote")]
            ModelCheckpoint::Pretrained { name } => Ok(Seq2SeqModelResources::from_hub(name)),
            #[cfg(not(feature = "remote"))]
            ModelCheckpoint::Pretrained { name } => {
                Err(DialogSumError::InvalidConfigurationError(format!(
                    "downloading {name} requires the `remote` feature"
                )))
            }
            ModelCheckpoint::Local {
                config,
                vocab,
                merges,
                weights,
            } => Ok(Seq2SeqModelResources {
                model_resource: Box::new(LocalResource::from(weights.clone())),
                config_resource: Box::new(LocalResource::from(config.clone())),
                vocab_resource: Box::new(LocalResource::from(vocab.clone())),
                merges_resource: Box::new(LocalResource::from(merges.clone())),
            }),
        }
    }
}

/// # Configuration of a full DialogSum run
/// Every field has a default, so a JSON file only needs the values that differ.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DialogSumConfig {
    /// Pretrained model to fine-tune (default: `facebook/bart-large` from the hub)
    pub checkpoint: ModelCheckpoint,
    pub train_file: PathBuf,
    pub validation_file: PathBuf,
    pub test_file: PathBuf,
    /// Annotation of the test file used as reference, `summary{index}` (default: 1)
    pub test_summary_index: usize,
    /// Source truncation length (default: 256)
    pub max_source_length: usize,
    /// Target truncation length (default: 128)
    pub max_target_length: usize,
    /// Freeze the embedding tables before training (default: true)
    pub freeze_embeddings: bool,
    pub training: TrainingConfig,
    /// Maximum length of generated summaries (default: 128)
    pub generation_max_length: i64,
    /// Beam width used on the test set (default: 5)
    pub predict_num_beams: i64,
    /// Stem tokens before computing ROUGE (default: true)
    pub use_stemmer: bool,
    /// Generated summaries, one per test dialogue (default: `test_output.txt`)
    pub output_file: PathBuf,
    /// Fine-tuned weights, with `config.json` written alongside
    pub model_output_path: PathBuf,
    /// Run on the first CUDA device when one is available (default: true)
    pub use_cuda: bool,
}

impl Default for DialogSumConfig {
    fn default() -> Self {
        DialogSumConfig {
            checkpoint: ModelCheckpoint::default(),
            train_file: PathBuf::from("DialogSum_Data/dialogsum.train.jsonl"),
            validation_file: PathBuf::from("DialogSum_Data/dialogsum.dev.jsonl"),
            test_file: PathBuf::from("DialogSum_Data/dialogsum.test.jsonl"),
            test_summary_index: 1,
            max_source_length: MAX_SOURCE_LENGTH,
            max_target_length: MAX_TARGET_LENGTH,
            freeze_embeddings: true,
            training: TrainingConfig::default(),
            generation_max_length: 128,
            predict_num_beams: 5,
            use_stemmer: true,
            output_file: PathBuf::from("test_output.txt"),
            model_output_path: PathBuf::from("models/dialogsumm-bart/rust_model.ot"),
            use_cuda: true,
        }
    }
}

impl Config for DialogSumConfig {}

fn require_file(path: &Path, description: &str) -> Result<(), DialogSumError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(DialogSumError::InvalidConfigurationError(format!(
            "{description} {} does not exist",
            path.display()
        )))
    }
}

impl DialogSumConfig {
    /// Checks values and input files before anything is loaded.
    pub fn validate(&self) -> Result<(), DialogSumError> {
        if self.test_summary_index == 0 {
            return Err(DialogSumError::InvalidConfigurationError(
                "test_summary_index starts at 1".to_string(),
            ));
        }
        if self.max_source_length < 2 || self.max_target_length < 2 {
            return Err(DialogSumError::InvalidConfigurationError(
                "truncation lengths must leave room for the special tokens".to_string(),
            ));
        }
        if self.predict_num_beams < 1 || self.generation_max_length < 2 {
            return Err(DialogSumError::InvalidConfigurationError(format!(
                "invalid generation settings: {} beams, max length {}",
                self.predict_num_beams, self.generation_max_length
            )));
        }
        self.training.validate()?;

        require_file(&self.train_file, "training file")?;
        require_file(&self.validation_file, "validation file")?;
        require_file(&self.test_file, "test file")?;
        if let ModelCheckpoint::Local {
            config,
            vocab,
            merges,
            weights,
        } = &self.checkpoint
        {
            require_file(config, "model configuration")?;
            require_file(vocab, "vocabulary")?;
            require_file(merges, "merges")?;
            require_file(weights, "model weights")?;
        }
        Ok(())
    }

    /// Checks the truncation and generation lengths against the positional embedding table
    /// of the loaded checkpoint.
    pub fn validate_for_model(&self, model_config: &BartConfig) -> Result<(), DialogSumError> {
        let limit = model_config.max_position_embeddings;
        for (name, length) in [
            ("max_source_length", self.max_source_length as i64),
            ("max_target_length", self.max_target_length as i64),
            ("generation_max_length", self.generation_max_length),
        ] {
            if length > limit {
                return Err(DialogSumError::InvalidConfigurationError(format!(
                    "{name} ({length}) exceeds the {limit} positions of the model"
                )));
            }
        }
        Ok(())
    }

    pub fn device(&self) -> Device {
        if self.use_cuda {
            Device::cuda_if_available()
        } else {
            Device::Cpu
        }
    }
}

/// # Results of a pipeline run
#[derive(Debug, Clone)]
pub struct DialogSumOutput {
    pub train_output: TrainOutput,
    /// Test set loss and ROUGE, keys prefixed by `test_`
    pub test_metrics: MetricMap,
    /// Written summaries, in test file order
    pub summaries: Vec<String>,
    /// Names of the variables excluded from training
    pub frozen_variables: Vec<String>,
}

/// Runs the whole fine-tuning pipeline described by `config`.
pub fn run_pipeline(config: &DialogSumConfig) -> Result<DialogSumOutput, DialogSumError> {
    config.validate()?;
    let device = config.device();
    info!(?device, "starting DialogSum fine-tuning");

    let splits = load_splits(
        &config.train_file,
        &config.validation_file,
        &config.test_file,
        config.test_summary_index,
    )?;

    let resources = config.checkpoint.resources()?;
    let mut model = Seq2SeqModel::new(&resources, device)?;
    config.validate_for_model(model.config())?;
    let tokenizer = resources.tokenizer(model.model_type())?;

    let preprocessor = Preprocessor::new(
        &tokenizer,
        config.max_source_length,
        config.max_target_length,
    );
    let train = preprocessor.preprocess(&splits.train);
    let validation = preprocessor.preprocess(&splits.validation);
    let test = preprocessor.preprocess(&splits.test);

    let frozen_variables = if config.freeze_embeddings {
        model.freeze_embeddings()?
    } else {
        vec![]
    };

    let pad_token_id = tokenizer
        .get_pad_id()
        .unwrap_or_else(|| model.config().pad_token_id());
    let collator = Seq2SeqCollator::new(pad_token_id, model.config().decoder_start_token_id());
    let eval_generate_config = GenerateConfig {
        max_length: config.generation_max_length,
        ..GenerateConfig::from_model_config(model.config(), &tokenizer)
    };
    let predict_generate_config = GenerateConfig {
        num_beams: config.predict_num_beams,
        ..eval_generate_config.clone()
    };
    let evaluator = MetricEvaluator::new(&tokenizer, config.use_stemmer)?;

    let (train_output, prediction) = {
        let mut trainer = Seq2SeqTrainer::new(
            &mut model,
            config.training.clone(),
            collator,
            eval_generate_config,
        )?
        .with_compute_metrics(|eval_prediction| evaluator.compute(eval_prediction));
        let train_output = trainer.train(&train, &validation)?;
        let prediction = trainer.predict(&test, &predict_generate_config)?;
        (train_output, prediction)
    };

    let summaries = decode_summaries(&tokenizer, &prediction.predictions);
    write_summaries(&config.output_file, &summaries)?;
    model.save(&config.model_output_path)?;

    Ok(DialogSumOutput {
        train_output,
        test_metrics: prediction.metrics,
        summaries,
        frozen_variables,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_follow_the_reference_run() {
        let config = DialogSumConfig::default();
        assert_eq!(config.test_summary_index, 1);
        assert_eq!(config.predict_num_beams, 5);
        assert_eq!(config.max_source_length, 256);
        assert_eq!(config.max_target_length, 128);
        assert_eq!(config.output_file, PathBuf::from("test_output.txt"));
    }

    #[test]
    fn checkpoint_is_tagged_in_json() -> anyhow::Result<()> {
        let config: DialogSumConfig = serde_json::from_str(
            r#"{
                "checkpoint": {"type": "local", "config": "c.json", "vocab": "v.json",
                               "merges": "m.txt", "weights": "w.ot"},
                "training": {"num_train_epochs": 1}
            }"#,
        )?;
        assert_eq!(
            config.checkpoint,
            ModelCheckpoint::Local {
                config: "c.json".into(),
                vocab: "v.json".into(),
                merges: "m.txt".into(),
                weights: "w.ot".into(),
            }
        );
        assert_eq!(config.training.num_train_epochs, 1);
        assert_eq!(config.training.learning_rate, 2e-5);
        Ok(())
    }

    #[test]
    fn lengths_must_fit_the_position_table() {
        let model_config = BartConfig {
            max_position_embeddings: 128,
            ..Default::default()
        };
        let config = DialogSumConfig::default();
        assert!(config.validate_for_model(&model_config).is_err());

        let config = DialogSumConfig {
            max_source_length: 128,
            max_target_length: 64,
            generation_max_length: 64,
            ..Default::default()
        };
        assert!(config.validate_for_model(&model_config).is_ok());

        let config = DialogSumConfig {
            generation_max_length: 129,
            ..config
        };
        assert!(matches!(
            config.validate_for_model(&model_config),
            Err(DialogSumError::InvalidConfigurationError(_))
        ));
    }

    #[test]
    fn validation_rejects_missing_files_and_bad_values() {
        let missing = DialogSumConfig {
            train_file: PathBuf::from("/nonexistent/train.jsonl"),
            ..Default::default()
        };
        assert!(matches!(
            missing.validate(),
            Err(DialogSumError::InvalidConfigurationError(_))
        ));

        let zero_index = DialogSumConfig {
            test_summary_index: 0,
            ..Default::default()
        };
        assert!(matches!(
            zero_index.validate(),
            Err(DialogSumError::InvalidConfigurationError(_))
        ));
    }
}
