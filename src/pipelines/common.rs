// Copyright 2019-present, the HuggingFace Inc. team, The Google AI Language Team and Facebook, Inc.
// Copyright 2019-2020 Guillaume Becquin
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

//! # Common blocks for the fine-tuning pipeline
//! Provides the model family identifier, which decides how embeddings are frozen, and the
//! tokenizer abstraction shared by preprocessing, evaluation and prediction.
use crate::common::error::DialogSumError;
use rust_tokenizers::tokenizer::{RobertaTokenizer, Tokenizer, TruncationStrategy};
use rust_tokenizers::vocab::Vocab;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tch::nn;
use tracing::{debug, info};

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
/// # Identifies the family of the sequence-to-sequence model
pub enum ModelType {
    Bart,
    T5,
}

struct FreezingRule {
    /// Each prefix must match at least one variable
    required: &'static [&'static str],
    /// Frozen when present, e.g. token embeddings stored apart from the shared table
    optional: &'static [&'static str],
}

const BART_FREEZING_RULE: FreezingRule = FreezingRule {
    required: &[
        "model.shared",
        "model.encoder.embed_positions",
        "model.decoder.embed_positions",
    ],
    optional: &["model.encoder.embed_tokens", "model.decoder.embed_tokens"],
};

const T5_FREEZING_RULE: FreezingRule = FreezingRule {
    required: &["shared"],
    optional: &["encoder.embed_tokens", "decoder.embed_tokens"],
};

fn matches_prefix(name: &str, prefix: &str) -> bool {
    name == prefix
        || name
            .strip_prefix(prefix)
            .map_or(false, |rest| rest.starts_with('.'))
}

impl ModelType {
    fn freezing_rule(&self) -> &'static FreezingRule {
        match self {
            ModelType::Bart => &BART_FREEZING_RULE,
            ModelType::T5 => &T5_FREEZING_RULE,
        }
    }

    /// Disables gradient tracking for the embedding tables of this model family.
    ///
    /// BART freezes the shared token embeddings and the learned positional embeddings of the
    /// encoder and the decoder. T5 has no learned positions and only freezes its token embeddings.
    /// Returns the sorted names of the frozen variables.
    ///
    /// # Errors
    ///
    /// `InvalidConfigurationError` if a table expected for the family is absent from the
    /// variable store, which happens when the family does not match the loaded weights.
    pub fn freeze_embeddings(&self, var_store: &nn::VarStore) -> Result<Vec<String>, DialogSumError> {
        let rule = self.freezing_rule();
        let variables = var_store.variables();

        for prefix in rule.required {
            if !variables.keys().any(|name| matches_prefix(name, prefix)) {
                return Err(DialogSumError::InvalidConfigurationError(format!(
                    "no variable matches `{prefix}` required to freeze {self:?} embeddings"
                )));
            }
        }

        let mut frozen = Vec::new();
        for (name, tensor) in variables.iter() {
            if rule
                .required
                .iter()
                .chain(rule.optional.iter())
                .any(|prefix| matches_prefix(name, prefix))
            {
                let _ = tensor.set_requires_grad(false);
                debug!(variable = %name, "frozen");
                frozen.push(name.clone());
            }
        }
        frozen.sort();
        info!(model_type = ?self, count = frozen.len(), "froze embedding tables");
        Ok(frozen)
    }
}

/// # Abstraction that holds the tokenizer of the model being fine-tuned
pub enum TokenizerOption {
    /// Roberta byte-level BPE tokenizer, shared by BART checkpoints
    Roberta(RobertaTokenizer),
}

impl TokenizerOption {
    /// Interface method to load a tokenizer from file
    ///
    /// # Arguments
    ///
    /// * `model_type` - family of the model the tokenizer belongs to
    /// * `vocab_path` - `vocab.json` file
    /// * `merges_path` - `merges.txt` file
    /// * `lower_case` - whether to lower case the input
    /// * `add_prefix_space` - whether to add a space in front of the first word
    pub fn from_file<P: AsRef<Path>>(
        model_type: ModelType,
        vocab_path: P,
        merges_path: P,
        lower_case: bool,
        add_prefix_space: bool,
    ) -> Result<Self, DialogSumError> {
        match model_type {
            ModelType::Bart => Ok(TokenizerOption::Roberta(RobertaTokenizer::from_file(
                vocab_path,
                merges_path,
                lower_case,
                add_prefix_space,
            )?)),
            ModelType::T5 => Err(DialogSumError::InvalidConfigurationError(
                "no tokenizer is available for T5 checkpoints".to_string(),
            )),
        }
    }

    /// Returns the model type
    pub fn model_type(&self) -> ModelType {
        match *self {
            Self::Roberta(_) => ModelType::Bart,
        }
    }

    /// Encodes a source text with special tokens, truncated to at most `max_len` ids
    /// (special tokens included).
    pub fn encode(&self, text: &str, max_len: usize) -> Vec<i64> {
        match *self {
            Self::Roberta(ref tokenizer) => {
                tokenizer
                    .encode(text, None, max_len, &TruncationStrategy::LongestFirst, 0)
                    .token_ids
            }
        }
    }

    /// Encodes a target text (summary). BART targets use the same vocabulary and special
    /// tokens as the source.
    pub fn encode_target(&self, text: &str, max_len: usize) -> Vec<i64> {
        match *self {
            Self::Roberta(_) => self.encode(text, max_len),
        }
    }

    /// Interface method to decode a sequence of token ids
    pub fn decode(
        &self,
        token_ids: &[i64],
        skip_special_tokens: bool,
        clean_up_tokenization_spaces: bool,
    ) -> String {
        match *self {
            Self::Roberta(ref tokenizer) => {
                tokenizer.decode(token_ids, skip_special_tokens, clean_up_tokenization_spaces)
            }
        }
    }

    fn special_id(&self, token: &str) -> Option<i64> {
        match *self {
            Self::Roberta(ref tokenizer) => tokenizer.vocab().values().get(token).copied(),
        }
    }

    /// Interface method
    pub fn get_pad_id(&self) -> Option<i64> {
        match *self {
            Self::Roberta(_) => self.special_id("<pad>"),
        }
    }

    /// Interface method
    pub fn get_bos_id(&self) -> Option<i64> {
        match *self {
            Self::Roberta(_) => self.special_id("<s>"),
        }
    }

    /// Interface method
    pub fn get_eos_id(&self) -> Option<i64> {
        match *self {
            Self::Roberta(_) => self.special_id("</s>"),
        }
    }

    /// Interface method
    pub fn get_unk_id(&self) -> Option<i64> {
        match *self {
            Self::Roberta(_) => self.special_id("<unk>"),
        }
    }

    /// Interface method
    pub fn get_mask_id(&self) -> Option<i64> {
        match *self {
            Self::Roberta(_) => self.special_id("<mask>"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bart::{BartConfig, BartForConditionalGeneration};
    use tch::Device;

    fn tiny_bart(vs: &nn::VarStore) -> BartForConditionalGeneration {
        let config = BartConfig {
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
        };
        BartForConditionalGeneration::new(vs.root(), &config)
    }

    #[test]
    fn prefix_matching_respects_path_segments() {
        assert!(matches_prefix("model.shared.weight", "model.shared"));
        assert!(matches_prefix("shared", "shared"));
        assert!(!matches_prefix("model.shared_bias", "model.shared"));
        assert!(!matches_prefix("model.encoder.layers.0.fc1.weight", "model.shared"));
    }

    #[test]
    fn bart_freezes_shared_and_positional_embeddings() -> anyhow::Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let _model = tiny_bart(&vs);

        let frozen = ModelType::Bart.freeze_embeddings(&vs)?;
        assert_eq!(
            frozen,
            vec![
                "model.decoder.embed_positions.weight".to_string(),
                "model.encoder.embed_positions.weight".to_string(),
                "model.shared.weight".to_string(),
            ]
        );
        for (name, tensor) in vs.variables() {
            assert_eq!(tensor.requires_grad(), !frozen.contains(&name), "{name}");
        }
        Ok(())
    }

    #[test]
    fn t5_rule_on_bart_weights_is_a_configuration_error() {
        let vs = nn::VarStore::new(Device::Cpu);
        let _model = tiny_bart(&vs);

        assert!(matches!(
            ModelType::T5.freeze_embeddings(&vs),
            Err(DialogSumError::InvalidConfigurationError(_))
        ));
    }

    #[test]
    fn t5_freezes_token_embeddings_only() -> anyhow::Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();
        let _shared = root.var("shared", &[12, 4], nn::Init::Const(0.));
        let _encoder = root.sub("encoder").var("embed_tokens", &[12, 4], nn::Init::Const(0.));
        let _relative = root
            .sub("encoder")
            .sub("block")
            .var("relative_attention_bias", &[8, 2], nn::Init::Const(0.));

        let frozen = ModelType::T5.freeze_embeddings(&vs)?;
        assert_eq!(frozen, vec!["encoder.embed_tokens".to_string(), "shared".to_string()]);
        Ok(())
    }

    #[test]
    fn model_type_deserializes_from_checkpoint_names() -> anyhow::Result<()> {
        let model_type: ModelType = serde_json::from_str("\"bart\"")?;
        assert_eq!(model_type, ModelType::Bart);
        let model_type: ModelType = serde_json::from_str("\"t5\"")?;
        assert_eq!(model_type, ModelType::T5);
        Ok(())
    }
}
