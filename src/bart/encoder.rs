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
use crate::bart::bart_model::expand_mask;
use crate::bart::embeddings::LearnedPositionalEmbedding;
use crate::bart::BartConfig;
use crate::common::activations::Activation;
use crate::DialogSumError;
use std::borrow::Borrow;
use tch::{nn, Tensor};

pub struct EncoderLayer {
    self_attention: BartAttention,
    self_attention_layer_norm: nn::LayerNorm,
    dropout: f64,
    activation_dropout: f64,
    activation: fn(&Tensor) -> Tensor,
    fc1: nn::Linear,
    fc2: nn::Linear,
    final_layer_norm: nn::LayerNorm,
}

impl EncoderLayer {
    pub fn new<'p, P>(p: P, config: &BartConfig) -> EncoderLayer
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
            config.encoder_attention_heads,
            config.attention_dropout,
        );
        let self_attention_layer_norm = nn::layer_norm(
            p / "self_attn_layer_norm",
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
            config.encoder_ffn_dim,
            Default::default(),
        );
        let fc2 = nn::linear(
            p / "fc2",
            config.encoder_ffn_dim,
            config.d_model,
            Default::default(),
        );
        let final_layer_norm = nn::layer_norm(
            p / "final_layer_norm",
            vec![config.d_model],
            layer_norm_config,
        );

        EncoderLayer {
            self_attention,
            self_attention_layer_norm,
            dropout: config.dropout,
            activation_dropout: config.activation_dropout,
            activation,
            fc1,
            fc2,
            final_layer_norm,
        }
    }

    pub fn forward_t(&self, x: &Tensor, encoder_attention_mask: Option<&Tensor>, train: bool) -> Tensor {
        let output = self
            .self_attention
            .forward_t(x, None, encoder_attention_mask, train);
        let output: Tensor = output.dropout(self.dropout, train) + x;
        let output = output.apply(&self.self_attention_layer_norm);

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

/// # BART encoder
/// Token embeddings are looked up in the table shared with the decoder and the language
/// model head, passed in at each call.
pub struct BartEncoder {
    dropout: f64,
    layer_norm_embedding: Option<nn::LayerNorm>,
    layers: Vec<EncoderLayer>,
    embed_positions: LearnedPositionalEmbedding,
    scale_embedding: f64,
}

impl BartEncoder {
    pub fn new<'p, P>(p: P, config: &BartConfig) -> BartEncoder
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
        let layers = (0..config.encoder_layers)
            .map(|layer_index| EncoderLayer::new(&p_layers / layer_index, config))
            .collect();

        BartEncoder {
            dropout: config.dropout,
            layer_norm_embedding,
            layers,
            embed_positions,
            scale_embedding,
        }
    }

    /// Encodes `input_ids` of shape (*batch size*, *source_sequence_length*). The optional
    /// `attention_mask` has the same shape, with 1 for tokens to attend and 0 for padding.
    ///
    /// Returns the last hidden state of shape (*batch size*, *source_sequence_length*, *hidden_size*).
    pub fn forward_t(
        &self,
        input_ids: &Tensor,
        attention_mask: Option<&Tensor>,
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

        let attention_mask = attention_mask
            .map(|mask| expand_mask(mask, None, hidden_state.kind()))
            .transpose()?;

        for layer in &self.layers {
            hidden_state = layer.forward_t(&hidden_state, attention_mask.as_ref(), train);
        }
        Ok(hidden_state)
    }
}
