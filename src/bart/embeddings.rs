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
use tch::nn::embedding;
use tch::{nn, Kind, Tensor};

/// Position ids are shifted by this offset: the first two rows of the pretrained
/// table are reserved.
const POSITION_OFFSET: i64 = 2;

/// # Learned positional embedding
/// Stored under `embed_positions` in the encoder and the decoder. These are the tables
/// frozen together with the shared token embeddings before fine-tuning.
#[derive(Debug)]
pub struct LearnedPositionalEmbedding {
    embedding: nn::Embedding,
}

impl LearnedPositionalEmbedding {
    pub fn new<'p, P>(p: P, num_embeddings: i64, embedding_dim: i64) -> LearnedPositionalEmbedding
    where
        P: Borrow<nn::Path<'p>>,
    {
        let embedding: nn::Embedding = embedding(
            p.borrow(),
            num_embeddings + POSITION_OFFSET,
            embedding_dim,
            Default::default(),
        );
        LearnedPositionalEmbedding { embedding }
    }

    /// Returns position embeddings of shape (*sequence_length*, *embedding_dim*) for an input of
    /// shape (*batch size*, *sequence_length*), broadcast over the batch by the caller.
    pub fn forward(&self, input: &Tensor) -> Tensor {
        let sequence_length = input.size()[1];
        let positions = Tensor::arange_start(
            POSITION_OFFSET,
            POSITION_OFFSET + sequence_length,
            (Kind::Int64, input.device()),
        );
        positions.apply(&self.embedding)
    }
}
