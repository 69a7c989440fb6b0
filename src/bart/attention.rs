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

use std::borrow::Borrow;
use tch::{nn, Tensor};

/// # Multi-head attention used for encoder self-attention, decoder self-attention and
/// decoder-encoder cross-attention.
///
/// Inputs are batch-first: (*batch size*, *sequence_length*, *embed_dim*). Masks are additive
/// and broadcastable to (*batch size*, 1, *target_length*, *source_length*).
#[derive(Debug)]
pub struct BartAttention {
    num_heads: i64,
    head_dim: i64,
    dropout: f64,
    scaling: f64,
    k_proj: nn::Linear,
    v_proj: nn::Linear,
    q_proj: nn::Linear,
    out_proj: nn::Linear,
}

impl BartAttention {
    pub fn new<'p, P>(p: P, embed_dim: i64, num_heads: i64, dropout: f64) -> BartAttention
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();

        let k_proj = nn::linear(p / "k_proj", embed_dim, embed_dim, Default::default());
        let v_proj = nn::linear(p / "v_proj", embed_dim, embed_dim, Default::default());
        let q_proj = nn::linear(p / "q_proj", embed_dim, embed_dim, Default::default());
        let out_proj = nn::linear(p / "out_proj", embed_dim, embed_dim, Default::default());

        let head_dim = embed_dim / num_heads;
        let scaling = (head_dim as f64).powf(-0.5);

        BartAttention {
            num_heads,
            head_dim,
            dropout,
            scaling,
            k_proj,
            v_proj,
            q_proj,
            out_proj,
        }
    }

    fn split_heads(&self, x: Tensor, bs: i64) -> Tensor {
        x.view([bs, -1, self.num_heads, self.head_dim])
            .transpose(1, 2)
            .contiguous()
    }

    /// Attends from `hidden_states` to `key_value_states` (cross-attention) or to
    /// `hidden_states` itself when no key/value states are given (self-attention).
    pub fn forward_t(
        &self,
        hidden_states: &Tensor,
        key_value_states: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        train: bool,
    ) -> Tensor {
        let input_size = hidden_states.size();
        let (bs, target_length) = (input_size[0], input_size[1]);

        let query = self.split_heads(hidden_states.apply(&self.q_proj) * self.scaling, bs);
        let key_value_input = key_value_states.unwrap_or(hidden_states);
        let key = self.split_heads(key_value_input.apply(&self.k_proj), bs);
        let value = self.split_heads(key_value_input.apply(&self.v_proj), bs);

        let mut attention_weights = query.matmul(&key.transpose(-1, -2));
        if let Some(mask) = attention_mask {
            attention_weights = attention_weights + mask;
        }
        let attention_probabilities = attention_weights
            .softmax(-1, attention_weights.kind())
            .dropout(self.dropout, train);

        attention_probabilities
            .matmul(&value)
            .transpose(1, 2)
            .contiguous()
            .view([bs, target_length, self.num_heads * self.head_dim])
            .apply(&self.out_proj)
    }
}
