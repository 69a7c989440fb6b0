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

//! # Sequence-to-sequence model set-up
//! Resolves the checkpoint files, builds the model and its tokenizer, freezes the embedding
//! tables and persists the fine-tuned weights.

use crate::bart::{BartConfig, BartForConditionalGeneration};
use crate::pipelines::common::{ModelType, TokenizerOption};
use crate::resources::ResourceProvider;
use crate::{Config, DialogSumError};
use std::fs;
use std::path::Path;
use tch::{nn, Device};
use tracing::info;

/// # Files making up a pretrained checkpoint
pub struct Seq2SeqModelResources {
    /// Model weights resource (`rust_model.ot`)
    pub model_resource: Box<dyn ResourceProvider + Send>,
    /// Config resource (`config.json`)
    pub config_resource: Box<dyn ResourceProvider + Send>,
    /// Vocab resource (`vocab.json`)
    pub vocab_resource: Box<dyn ResourceProvider + Send>,
    /// Merges resource (`merges.txt`)
    pub merges_resource: Box<dyn ResourceProvider + Send>,
}

impl Seq2SeqModelResources {
    /// Resources of a model repository on the Hugging Face hub, e.g. `facebook/bart-large`.
    #[cfg(feature = "remote")]
    pub fn from_hub(model_name: &str) -> Seq2SeqModelResources {
        use crate::resources::RemoteResource;
        Seq2SeqModelResources {
            model_resource: Box::new(RemoteResource::from_hub(model_name, "rust_model.ot")),
            config_resource: Box::new(RemoteResource::from_hub(model_name, "config.json")),
            vocab_resource: Box::new(RemoteResource::from_hub(model_name, "vocab.json")),
            merges_resource: Box::new(RemoteResource::from_hub(model_name, "merges.txt")),
        }
    }

    /// Loads the tokenizer matching the checkpoint. BART does not lower case its inputs.
    pub fn tokenizer(&self, model_type: ModelType) -> Result<TokenizerOption, DialogSumError> {
        let vocab_path = self.vocab_resource.get_local_path()?;
        let merges_path = self.merges_resource.get_local_path()?;
        TokenizerOption::from_file(model_type, vocab_path, merges_path, false, false)
    }
}

/// # Sequence-to-sequence model being fine-tuned
/// Owns the variable store holding every parameter of the model.
pub struct Seq2SeqModel {
    var_store: nn::VarStore,
    model: BartForConditionalGeneration,
    config: BartConfig,
    model_type: ModelType,
}

impl Seq2SeqModel {
    /// Builds the model described by the checkpoint configuration and loads its weights.
    ///
    /// # Arguments
    ///
    /// * `resources` - checkpoint files
    /// * `device` - device to run the model on
    ///
    /// # Example
    ///
    /// ```no_run
    /// # fn main() -> anyhow::Result<()> {
    /// use rust_dialogsum::pipelines::seq2seq::{Seq2SeqModel, Seq2SeqModelResources};
    /// use tch::Device;
    ///
    /// let resources = Seq2SeqModelResources::from_hub("facebook/bart-large");
    /// let model = Seq2SeqModel::new(&resources, Device::cuda_if_available())?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(
        resources: &Seq2SeqModelResources,
        device: Device,
    ) -> Result<Seq2SeqModel, DialogSumError> {
        let config_path = resources.config_resource.get_local_path()?;
        let weights_path = resources.model_resource.get_local_path()?;
        let config = BartConfig::from_file(config_path)?;

        let mut model = Seq2SeqModel::from_config(config, device)?;
        model.var_store.load(&weights_path)?;
        info!(weights = %weights_path.display(), "loaded pretrained weights");
        Ok(model)
    }

    /// Builds a randomly initialized model from a configuration.
    pub fn from_config(config: BartConfig, device: Device) -> Result<Seq2SeqModel, DialogSumError> {
        let model_type = config.model_type.unwrap_or(ModelType::Bart);
        if model_type != ModelType::Bart {
            return Err(DialogSumError::InvalidConfigurationError(format!(
                "fine-tuning is implemented for BART checkpoints, got {model_type:?}"
            )));
        }
        let var_store = nn::VarStore::new(device);
        let model = BartForConditionalGeneration::new(var_store.root(), &config);
        Ok(Seq2SeqModel {
            var_store,
            model,
            config,
            model_type,
        })
    }

    /// Freezes the embedding tables according to the model family and returns the names of
    /// the frozen variables.
    pub fn freeze_embeddings(&self) -> Result<Vec<String>, DialogSumError> {
        self.model_type.freeze_embeddings(&self.var_store)
    }

    /// Writes every parameter to `path` and the model configuration to `config.json` in the
    /// same directory. Missing parent directories are created.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), DialogSumError> {
        let path = path.as_ref();
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => std::env::current_dir()?,
        };
        fs::create_dir_all(&directory)?;
        self.var_store.save(path)?;
        self.config.to_file(directory.join("config.json"))?;
        info!(path = %path.display(), "saved model");
        Ok(())
    }

    pub fn model(&self) -> &BartForConditionalGeneration {
        &self.model
    }

    pub fn var_store(&self) -> &nn::VarStore {
        &self.var_store
    }

    pub fn config(&self) -> &BartConfig {
        &self.config
    }

    pub fn model_type(&self) -> ModelType {
        self.model_type
    }

    pub fn device(&self) -> Device {
        self.var_store.device()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn tiny_config() -> BartConfig {
        BartConfig {
            d_model: 8,
            decoder_attention_heads: 2,
            decoder_ffn_dim: 16,
            decoder_layers: 1,
            encoder_attention_heads: 2,
            encoder_ffn_dim: 16,
            encoder_layers: 1,
            max_position_embeddings: 16,
            vocab_size: 12,
            ..Default::default()
        }
    }

    #[test]
    fn t5_checkpoint_is_rejected() {
        let config = BartConfig {
            model_type: Some(ModelType::T5),
            ..tiny_config()
        };
        assert!(matches!(
            Seq2SeqModel::from_config(config, Device::Cpu),
            Err(DialogSumError::InvalidConfigurationError(_))
        ));
    }

    #[test]
    fn save_writes_weights_and_config() -> anyhow::Result<()> {
        let directory = tempfile::tempdir()?;
        let path = directory.path().join("nested").join("model.ot");
        let model = Seq2SeqModel::from_config(tiny_config(), Device::Cpu)?;
        model.save(&path)?;

        assert!(path.exists());
        let config = BartConfig::from_file(directory.path().join("nested").join("config.json"))?;
        assert_eq!(config.vocab_size, 12);

        let mut reloaded = Seq2SeqModel::from_config(config, Device::Cpu)?;
        reloaded.var_store.load(&path)?;
        let original = model.var_store().variables();
        for (name, tensor) in reloaded.var_store().variables() {
            assert!(tensor.equal(&original[&name]), "{name}");
        }
        Ok(())
    }
}
