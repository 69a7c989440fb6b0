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

use crate::bart::attention::BartAttention;
use crate::bart::bart_model::{causal_mask, expand_mask};
use crate::bart::embeddings::LearnedPositionalEmbedding;
use crate::bart::BartConfig;
use crate::common::activations::Activation;
use crate::DialogSumError;
use std::borrow::Borrow;
use tch::{nn, Tensor};

pub struct DecoderLayer {
    self_attention: BartAttention,
    encoder_attention: BartAttention,
    self_attention_layer_norm: nn::LayerNorm,
    encoder_attention_layer_norm: nn::LayerNorm,
    dropout: f64,
    activation_dropout: f64,
    activation: fn(&Tensor) -> Tensor,
    fc1: nn::Linear,
    fc2: nn::Linear,
    final_layer_norm: nn::LayerNorm,
}

impl DecoderLayer {
    pub fn new<'p, P>(p: P, config: &BartConfig) -> DecoderLayer
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();

        let layer_norm_config = nn::LayerNormConfig {
            eps: 1e-5,
            ..Default::default()
        };
        let self_attention = BartAttention::new(
            p / "self_attn",
            config.d_model,
            config.decoder_attention_heads,
            config.attention_dropout,
        );
        let encoder_attention = BartAttention::new(
            p / "encoder_attn",
            config.d_model,
            config.decoder_attention_heads,
            config.attention_dropout,
        );
        let self_attention_layer_norm = nn::layer_norm(
            p / "self_attn_layer_norm",
            vec![config.d_model],
            layer_norm_config,
        );
        let encoder_attention_layer_norm = nn::layer_norm(
            p / "encoder_attn_layer_norm",
            vec![config.d_model],
            layer_norm_config,
        );
        let activation = config
            .activation_function
            .unwrap_or(Activation::gelu)
            .get_function();
        let fc1 = nn::linear(
            p / "fc1",
            config.d_model,
            config.decoder_ffn_dim,
            Default::default(),
        );
        let fc2 = nn::linear(
            p / "fc2",
            config.decoder_ffn_dim,
            config.d_model,
            Default::default(),
        );
        let final_layer_norm = nn::layer_norm(
            p / "final_layer_norm",
            vec![config.d_model],
            layer_norm_config,
        );

        DecoderLayer {
            self_attention,
            encoder_attention,
            self_attention_layer_norm,
            encoder_attention_layer_norm,
            dropout: config.dropout,
            activation_dropout: config.activation_dropout,
            activation,
            fc1,
            fc2,
            final_layer_norm,
        }
    }

    pub fn forward_t(
        &self,
        x: &Tensor,
        encoder_hidden_states: &Tensor,
        encoder_attention_mask: Option<&Tensor>,
        decoder_attention_mask: &Tensor,
        train: bool,
    ) -> Tensor {
        let output = self
            .self_attention
            .forward_t(x, None, Some(decoder_attention_mask), train);
        let output: Tensor = output.dropout(self.dropout, train) + x;
        let output = output.apply(&self.self_attention_layer_norm);

        let residual = output.shallow_clone();
        let output = self.encoder_attention.forward_t(
            &output,
            Some(encoder_hidden_states),
            encoder_attention_mask,
            train,
        );
        let output: Tensor = output.dropout(self.dropout, train) + residual;
        let output = output.apply(&self.encoder_attention_layer_norm);

        let residual = output.shallow_clone();
        let output = (self.activation)(&output.apply(&self.fc1));
        let output = output
            .dropout(self.activation_dropout, train)
            .apply(&self.fc2)
            .dropout(self.dropout, train);
        let output: Tensor = output + residual;
        output.apply(&self.final_layer_norm)
    }
}

/// # BART decoder
/// Runs the full decoder prefix at every call (no incremental key/value cache).
pub struct BartDecoder {
    dropout: f64,
    layer_norm_embedding: Option<nn::LayerNorm>,
    layers: Vec<DecoderLayer>,
    embed_positions: LearnedPositionalEmbedding,
    scale_embedding: f64,
}

impl BartDecoder {
    pub fn new<'p, P>(p: P, config: &BartConfig) -> BartDecoder
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();
        let normalize_embedding = config.normalize_embedding.unwrap_or(true);
        let scale_embedding = if config.scale_embedding.unwrap_or(false) {
            (config.d_model as f64).sqrt()
        } else {
            1.0
        };

        let layer_norm_embedding = if normalize_embedding {
            let layer_norm_config = nn::LayerNormConfig {
                eps: 1e-5,
                ..Default::default()
            };
            Some(nn::layer_norm(
                p / "layernorm_embedding",
                vec![config.d_model],
                layer_norm_config,
            ))
        } else {
            None
        };

        let embed_positions = LearnedPositionalEmbedding::new(
            p / "embed_positions",
            config.max_position_embeddings,
            config.d_model,
        );

        let p_layers = p / "layers";
        let layers = (0..config.decoder_layers)
            .map(|layer_index| DecoderLayer::new(&p_layers / layer_index, config))
            .collect();

        BartDecoder {
            dropout: config.dropout,
            layer_norm_embedding,
            layers,
            embed_positions,
            scale_embedding,
        }
    }

    /// Decodes `input_ids` of shape (*batch size*, *target_sequence_length*) attending to
    /// `encoder_hidden_states`. `decoder_attention_mask` (1 = keep, 0 = padding) is combined
    /// with the causal mask.
    pub fn forward_t(
        &self,
        input_ids: &Tensor,
        encoder_hidden_states: &Tensor,
        encoder_attention_mask: Option<&Tensor>,
        decoder_attention_mask: Option<&Tensor>,
        embeddings: &nn::Embedding,
        train: bool,
    ) -> Result<Tensor, DialogSumError> {
        let x = input_ids.apply(embeddings) * self.scale_embedding;
        let x: Tensor = x + self.embed_positions.forward(input_ids);
        let x = if let Some(layer_norm_embedding) = &self.layer_norm_embedding {
            x.apply(layer_norm_embedding)
        } else {
            x
        };
        let mut hidden_state = x.dropout(self.dropout, train);
        let kind = hidden_state.kind();
        let target_length = input_ids.size()[1];

        let mut self_attention_mask = causal_mask(target_length, kind, input_ids.device())?;
        if let Some(mask) = decoder_attention_mask {
            self_attention_mask = self_attention_mask + expand_mask(mask, None, kind)?;
        }
        let encoder_attention_mask = encoder_attention_mask
            .map(|mask| expand_mask(mask, Some(target_length), kind))
            .transpose()?;

        for layer in &self.layers {
            hidden_state = layer.forward_t(
                &hidden_state,
                encoder_hidden_states,
                encoder_attention_mask.as_ref(),
                &self_attention_mask,
                train,
            );
        }
        Ok(hidden_state)
    }
}
