// Copyright 2020 The Facebook AI Research Team Authors
// Copyright 2020-present, the HuggingFace Inc. team.
// Copyright 2020 Guillaume Becquin
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::bart::decoder::BartDecoder;
use crate::bart::encoder::BartEncoder;
use crate::common::activations::Activation;
use crate::common::kind::get_min;
use crate::pipelines::common::ModelType;
use crate::{Config, DialogSumError};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use tch::nn::{embedding, EmbeddingConfig};
use tch::{nn, Device, Kind, Tensor};

#[derive(Debug, Serialize, Deserialize, Clone)]
/// # BART model configuration
/// Defines the BART model architecture (number of layers, hidden layer size, special token ids...)
/// and the generation defaults stored with pretrained checkpoints.
pub struct BartConfig {
    pub model_type: Option<ModelType>,
    pub activation_function: Option<Activation>,
    pub activation_dropout: f64,
    pub attention_dropout: f64,
    pub d_model: i64,
    pub decoder_attention_heads: i64,
    pub decoder_ffn_dim: i64,
    pub decoder_layers: i64,
    pub decoder_start_token_id: Option<i64>,
    pub dropout: f64,
    pub encoder_attention_heads: i64,
    pub encoder_ffn_dim: i64,
    pub encoder_layers: i64,
    pub bos_token_id: Option<i64>,
    pub eos_token_id: Option<i64>,
    pub pad_token_id: Option<i64>,
    pub forced_bos_token_id: Option<i64>,
    pub forced_eos_token_id: Option<i64>,
    pub init_std: f64,
    pub max_position_embeddings: i64,
    pub normalize_embedding: Option<bool>,
    pub scale_embedding: Option<bool>,
    pub vocab_size: i64,
    pub min_length: Option<i64>,
    pub max_length: Option<i64>,
    pub num_beams: Option<i64>,
    pub no_repeat_ngram_size: Option<i64>,
    pub early_stopping: Option<bool>,
    pub length_penalty: Option<f64>,
}

impl Config for BartConfig {}

impl Default for BartConfig {
    /// Architecture of `facebook/bart-large`
    fn default() -> Self {
        BartConfig {
            model_type: Some(ModelType::Bart),
            activation_function: Some(Activation::gelu),
            activation_dropout: 0.1,
            attention_dropout: 0.1,
            d_model: 1024,
            decoder_attention_heads: 16,
            decoder_ffn_dim: 4096,
            decoder_layers: 12,
            decoder_start_token_id: Some(2),
            dropout: 0.1,
            encoder_attention_heads: 16,
            encoder_ffn_dim: 4096,
            encoder_layers: 12,
            bos_token_id: Some(0),
            eos_token_id: Some(2),
            pad_token_id: Some(1),
            forced_bos_token_id: Some(0),
            forced_eos_token_id: Some(2),
            init_std: 0.02,
            max_position_embeddings: 1024,
            normalize_embedding: Some(true),
            scale_embedding: Some(false),
            vocab_size: 50265,
            min_length: None,
            max_length: None,
            num_beams: Some(4),
            no_repeat_ngram_size: Some(3),
            early_stopping: Some(true),
            length_penalty: None,
        }
    }
}

impl BartConfig {
    pub fn pad_token_id(&self) -> i64 {
        self.pad_token_id.unwrap_or(1)
    }

    pub fn eos_token_id(&self) -> i64 {
        self.eos_token_id.unwrap_or(2)
    }

    pub fn decoder_start_token_id(&self) -> i64 {
        self.decoder_start_token_id
            .unwrap_or_else(|| self.eos_token_id())
    }
}

/// Lower-triangular additive mask of shape (1, 1, *target_length*, *target_length*).
pub(crate) fn causal_mask(
    target_length: i64,
    dtype: Kind,
    device: Device,
) -> Result<Tensor, DialogSumError> {
    let mask = Tensor::full([target_length, target_length], get_min(dtype)?, (dtype, device));
    let mask = mask.triu(1);
    Ok(mask.unsqueeze(0).unsqueeze(0))
}

/// Turns a (*batch size*, *source_length*) keep-mask into an additive mask of shape
/// (*batch size*, 1, *target_length*, *source_length*).
pub(crate) fn expand_mask(
    mask: &Tensor,
    target_length: Option<i64>,
    dtype: Kind,
) -> Result<Tensor, DialogSumError> {
    let (batch_size, source_length) = mask.size2()?;
    let target_length = target_length.unwrap_or(source_length);
    let expanded_mask = mask
        .unsqueeze(1)
        .unsqueeze(1)
        .expand([batch_size, 1, target_length, source_length], true)
        .to_kind(dtype);
    let inverted_mask: Tensor = 1 - expanded_mask;
    Ok(inverted_mask.masked_fill(&inverted_mask.to_kind(Kind::Bool), get_min(dtype)?))
}

/// Shifts token ids one position to the right, inserting `decoder_start_token_id` in front.
/// The ignore-index `-100` left in shifted label positions is replaced by `pad_token_id`.
pub fn shift_tokens_right(
    input_ids: &Tensor,
    pad_token_id: i64,
    decoder_start_token_id: i64,
) -> Result<Tensor, DialogSumError> {
    let (_, sequence_length) = input_ids.size2()?;
    let shifted = input_ids.zeros_like();
    if sequence_length > 1 {
        shifted
            .slice(1, 1, sequence_length, 1)
            .copy_(&input_ids.slice(1, 0, sequence_length - 1, 1));
    }
    let _ = shifted.select(1, 0).fill_(decoder_start_token_id);
    Ok(shifted.masked_fill(&shifted.eq(-100), pad_token_id))
}

/// # BART Base model
/// Base architecture for BART model, complemented with a language model head in
/// `BartForConditionalGeneration`. It is made of the following blocks:
/// - `encoder`: `BartEncoder` (transformer) made of a vector of encoding layers
/// - `decoder`: `BartDecoder` (transformer) made of a vector of decoding layers with self attention and encoder cross-attention.
/// - `embeddings`: token embeddings stored under `shared`, used by the encoder, the decoder and the language model head
pub struct BartModel {
    pub(crate) encoder: BartEncoder,
    decoder: BartDecoder,
    pub(crate) embeddings: nn::Embedding,
    pad_token_id: i64,
    decoder_start_token_id: i64,
}

impl BartModel {
    /// Build a new `BartModel`
    ///
    /// # Arguments
    ///
    /// * `p` - Variable store path for the root of the BART model
    /// * `config` - `BartConfig` object defining the model architecture
    ///
    /// # Example
    ///
    /// ```no_run
    /// use rust_dialogsum::bart::{BartConfig, BartModel};
    /// use rust_dialogsum::Config;
    /// use std::path::Path;
    /// use tch::{nn, Device};
    ///
    /// let config_path = Path::new("path/to/config.json");
    /// let device = Device::Cpu;
    /// let p = nn::VarStore::new(device);
    /// let config = BartConfig::from_file(config_path)?;
    /// let bart: BartModel = BartModel::new(&p.root() / "bart", &config);
    /// # Ok::<(), rust_dialogsum::DialogSumError>(())
    /// ```
    pub fn new<'p, P>(p: P, config: &BartConfig) -> BartModel
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();

        let pad_token_id = config.pad_token_id();
        let embedding_config = EmbeddingConfig {
            padding_idx: pad_token_id,
            ..Default::default()
        };
        let embeddings: nn::Embedding = embedding(
            p / "shared",
            config.vocab_size,
            config.d_model,
            embedding_config,
        );

        let encoder = BartEncoder::new(p / "encoder", config);
        let decoder = BartDecoder::new(p / "decoder", config);

        BartModel {
            encoder,
            decoder,
            embeddings,
            pad_token_id,
            decoder_start_token_id: config.decoder_start_token_id(),
        }
    }

    /// Forward pass through the model
    ///
    /// # Arguments
    ///
    /// * `input_ids` - Optional input tensor of shape (*batch size*, *source_sequence_length*). Required unless `encoder_output` is given.
    /// * `attention_mask` - Optional attention mask of shape (*batch size*, *source_sequence_length*) for the encoder positions. Positions with a mask with value 0 will be masked.
    /// * `decoder_input_ids` - Optional input tensor of shape (*batch size*, *target_sequence_length*). Defaults to `input_ids` shifted right.
    /// * `encoder_output` - Optional encoder last hidden state of shape (*batch size*, *source_sequence_length*, *hidden_size*). When provided, the encoder is not run again.
    /// * `decoder_attention_mask` - Optional attention mask of shape (*batch size*, *target_sequence_length*) for the decoder positions.
    /// * `train` - boolean flag to turn on/off the dropout layers in the model. Should be set to false for inference.
    ///
    /// # Returns
    ///
    /// * `BartModelOutput` containing:
    ///   - `decoder_output` - `Tensor` of shape (*batch size*, *target_sequence_length*, *hidden_size*) representing the activations of the last decoder hidden state
    ///   - `encoder_hidden_state` - `Option<Tensor>` of shape (*batch size*, *source_sequence_length*, *hidden_size*), set if the encoder was run in this call
    pub fn forward_t(
        &self,
        input_ids: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        decoder_input_ids: Option<&Tensor>,
        encoder_output: Option<&Tensor>,
        decoder_attention_mask: Option<&Tensor>,
        train: bool,
    ) -> Result<BartModelOutput, DialogSumError> {
        let calc_decoder_input_ids = match (decoder_input_ids, input_ids) {
            (None, Some(input_ids)) => Some(shift_tokens_right(
                input_ids,
                self.pad_token_id,
                self.decoder_start_token_id,
            )?),
            _ => None,
        };
        let decoder_input_ids = decoder_input_ids
            .or(calc_decoder_input_ids.as_ref())
            .ok_or_else(|| {
                DialogSumError::ValueError(
                    "Either decoder_input_ids or input_ids must be provided".to_string(),
                )
            })?;

        let calc_encoder_output = match (encoder_output, input_ids) {
            (None, Some(input_ids)) => Some(self.encoder.forward_t(
                input_ids,
                attention_mask,
                &self.embeddings,
                train,
            )?),
            _ => None,
        };
        let encoder_hidden_state = encoder_output
            .or(calc_encoder_output.as_ref())
            .ok_or_else(|| {
                DialogSumError::ValueError(
                    "Either input_ids or encoder_output must be provided".to_string(),
                )
            })?;

        let decoder_output = self.decoder.forward_t(
            decoder_input_ids,
            encoder_hidden_state,
            attention_mask,
            decoder_attention_mask,
            &self.embeddings,
            train,
        )?;
        Ok(BartModelOutput {
            decoder_output,
            encoder_hidden_state: calc_encoder_output,
        })
    }
}

/// # BART Model for conditional generation
/// BART model with a vocabulary decoding head
/// It is made of the following blocks:
/// - `base_model`: `BartModel` Base BART model
/// - `linear`: Linear layer without bias tied to the weights of the token id embeddings
pub struct BartForConditionalGeneration {
    base_model: BartModel,
}

impl BartForConditionalGeneration {
    /// Build a new `BartForConditionalGeneration`
    ///
    /// # Arguments
    ///
    /// * `p` - Variable store path for the root of the BART model
    /// * `config` - `BartConfig` object defining the model architecture
    ///
    /// # Example
    ///
    /// ```no_run
    /// use rust_dialogsum::bart::{BartConfig, BartForConditionalGeneration};
    /// use rust_dialogsum::Config;
    /// use std::path::Path;
    /// use tch::{nn, Device};
    ///
    /// let config_path = Path::new("path/to/config.json");
    /// let device = Device::Cpu;
    /// let p = nn::VarStore::new(device);
    /// let config = BartConfig::from_file(config_path)?;
    /// let bart: BartForConditionalGeneration =
    ///     BartForConditionalGeneration::new(&p.root(), &config);
    /// # Ok::<(), rust_dialogsum::DialogSumError>(())
    /// ```
    pub fn new<'p, P>(p: P, config: &BartConfig) -> BartForConditionalGeneration
    where
        P: Borrow<nn::Path<'p>>,
    {
        let base_model = BartModel::new(p.borrow() / "model", config);
        BartForConditionalGeneration { base_model }
    }

    /// Forward pass through the model
    ///
    /// # Arguments
    ///
    /// * `input_ids` - Optional input tensor of shape (*batch size*, *source_sequence_length*). Required unless `encoder_output` is given.
    /// * `attention_mask` - Optional attention mask of shape (*batch size*, *source_sequence_length*) for the encoder positions. Positions with a mask with value 0 will be masked.
    /// * `encoder_output` - Optional encoder last hidden state of shape (*batch size*, *source_sequence_length*, *hidden_size*), re-used across generation steps.
    /// * `decoder_input_ids` - Optional input tensor of shape (*batch size*, *target_sequence_length*). During training these are the labels shifted right.
    /// * `decoder_attention_mask` - Optional attention mask of shape (*batch size*, *target_sequence_length*) for the decoder positions.
    /// * `train` - boolean flag to turn on/off the dropout layers in the model. Should be set to false for inference.
    ///
    /// # Returns
    ///
    /// * `BartModelOutput` containing:
    ///   - `decoder_output` - `Tensor` of shape (*batch size*, *target_sequence_length*, *vocab_size*) representing the logits for each vocabulary item and position
    ///   - `encoder_hidden_state` - `Option<Tensor>` of shape (*batch size*, *source_sequence_length*, *hidden_size*), set if the encoder was run in this call
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use tch::{nn, Device, Tensor, no_grad};
    /// # use rust_dialogsum::Config;
    /// # use std::path::Path;
    /// # use tch::kind::Kind::Int64;
    /// use rust_dialogsum::bart::{BartConfig, BartForConditionalGeneration};
    /// # let config_path = Path::new("path/to/config.json");
    /// # let device = Device::Cpu;
    /// # let vs = nn::VarStore::new(device);
    /// # let config = BartConfig::from_file(config_path)?;
    /// # let bart_model = BartForConditionalGeneration::new(&vs.root(), &config);
    /// let (batch_size, source_sequence_length, target_sequence_length) = (4, 64, 16);
    /// let input_tensor = Tensor::randint(1000, [batch_size, source_sequence_length], (Int64, device));
    /// let target_tensor = Tensor::randint(1000, [batch_size, target_sequence_length], (Int64, device));
    /// let encoder_attention_mask = Tensor::ones([batch_size, source_sequence_length], (Int64, device));
    ///
    /// let model_output = no_grad(|| {
    ///     bart_model.forward_t(
    ///         Some(&input_tensor),
    ///         Some(&encoder_attention_mask),
    ///         None,
    ///         Some(&target_tensor),
    ///         None,
    ///         false,
    ///     )
    /// })?;
    /// # Ok::<(), rust_dialogsum::DialogSumError>(())
    /// ```
    pub fn forward_t(
        &self,
        input_ids: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        encoder_output: Option<&Tensor>,
        decoder_input_ids: Option<&Tensor>,
        decoder_attention_mask: Option<&Tensor>,
        train: bool,
    ) -> Result<BartModelOutput, DialogSumError> {
        let base_model_output = self.base_model.forward_t(
            input_ids,
            attention_mask,
            decoder_input_ids,
            encoder_output,
            decoder_attention_mask,
            train,
        )?;

        let lm_logits = base_model_output
            .decoder_output
            .linear::<Tensor>(&self.base_model.embeddings.ws, None);
        Ok(BartModelOutput {
            decoder_output: lm_logits,
            ..base_model_output
        })
    }

    /// Runs the encoder only (dropout off), returning its last hidden state.
    pub fn encode(
        &self,
        input_ids: &Tensor,
        attention_mask: Option<&Tensor>,
    ) -> Result<Tensor, DialogSumError> {
        self.base_model.encoder.forward_t(
            input_ids,
            attention_mask,
            &self.base_model.embeddings,
            false,
        )
    }
}

/// Container holding a BART model output. The decoder output holds either the hidden state of
/// the last decoder layer or the language model logits.
pub struct BartModelOutput {
    /// Hidden state of the last layer of the decoder, or logits for the language model head
    pub decoder_output: Tensor,
    /// Hidden state of the last layer of the encoder, when computed in this pass
    pub encoder_hidden_state: Option<Tensor>,
}
