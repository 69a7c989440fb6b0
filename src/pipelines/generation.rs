// Copyright 2018 The Google AI Language Team Authors, Facebook AI Research authors.
// Copyright 2018 Google AI, Google Brain and Carnegie Mellon University Authors and the HuggingFace Inc. team.
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

//! # Beam search decoding
//!
//! Summaries are generated one source at a time: the dialogue is encoded once, the encoder
//! states are repeated for every beam and the decoder is run over the full prefix of each beam
//! at every step.
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! use rust_dialogsum::pipelines::generation::{BeamSearch, GenerateConfig};
//! use rust_dialogsum::pipelines::seq2seq::{Seq2SeqModel, Seq2SeqModelResources};
//! # use tch::Device;
//! let resources = Seq2SeqModelResources::from_hub("facebook/bart-large");
//! let model = Seq2SeqModel::new(&resources, Device::Cpu)?;
//! let generate_config = GenerateConfig {
//!     num_beams: 5,
//!     ..Default::default()
//! };
//! let beam_search = BeamSearch::new(model.model(), &generate_config, model.device());
//! let summary_ids = beam_search.generate(&[0, 31414, 232, 2])?;
//! # Ok(())
//! # }
//! ```

use crate::bart::{BartConfig, BartForConditionalGeneration};
use crate::pipelines::common::TokenizerOption;
use crate::DialogSumError;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tch::{Device, Kind, Tensor};

/// # Configuration for beam search generation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerateConfig {
    /// Maximum sequence length, decoder start token included (default: 128)
    pub max_length: i64,
    /// Minimum sequence length before the end of sequence token is allowed (default: 0)
    pub min_length: i64,
    /// Number of beams for beam search (default: 4)
    pub num_beams: i64,
    /// Exponential penalty based on the length of the hypotheses generated (default: 1.0)
    pub length_penalty: f64,
    /// Early stopping flag indicating if the beam search should stop as soon as `num_beams` hypotheses have been generated (default: true)
    pub early_stopping: bool,
    /// Number of allowed repetitions of n-grams. Values higher than 0 turn on this feature (default: 3)
    pub no_repeat_ngram_size: i64,
    /// First token fed to the decoder (default: 2)
    pub decoder_start_token_id: i64,
    /// Token forced right after the decoder start token (default: 0)
    pub forced_bos_token_id: Option<i64>,
    /// Token forced at the last position (default: 2)
    pub forced_eos_token_id: Option<i64>,
    /// End of sequence token (default: 2)
    pub eos_token_id: i64,
    /// Tokens never generated, e.g. padding (default: none)
    pub suppress_token_ids: Vec<i64>,
}

impl Default for GenerateConfig {
    fn default() -> GenerateConfig {
        GenerateConfig {
            max_length: 128,
            min_length: 0,
            num_beams: 4,
            length_penalty: 1.0,
            early_stopping: true,
            no_repeat_ngram_size: 3,
            decoder_start_token_id: 2,
            forced_bos_token_id: Some(0),
            forced_eos_token_id: Some(2),
            eos_token_id: 2,
            suppress_token_ids: vec![],
        }
    }
}

impl GenerateConfig {
    /// Generation settings stored with a checkpoint, falling back to the defaults. The
    /// tokenizer's padding, unknown, mask and beginning of sequence tokens are suppressed (the
    /// latter remains reachable through `forced_bos_token_id`).
    pub fn from_model_config(config: &BartConfig, tokenizer: &TokenizerOption) -> GenerateConfig {
        let defaults = GenerateConfig::default();
        let mut suppress_token_ids: Vec<i64> = [
            tokenizer.get_pad_id(),
            tokenizer.get_unk_id(),
            tokenizer.get_mask_id(),
            tokenizer.get_bos_id(),
        ]
        .into_iter()
        .flatten()
        .collect();
        suppress_token_ids.sort_unstable();
        suppress_token_ids.dedup();
        GenerateConfig {
            max_length: config.max_length.unwrap_or(defaults.max_length),
            min_length: config.min_length.unwrap_or(defaults.min_length),
            num_beams: config.num_beams.unwrap_or(defaults.num_beams),
            length_penalty: config.length_penalty.unwrap_or(defaults.length_penalty),
            early_stopping: config.early_stopping.unwrap_or(defaults.early_stopping),
            no_repeat_ngram_size: config
                .no_repeat_ngram_size
                .unwrap_or(defaults.no_repeat_ngram_size),
            decoder_start_token_id: config.decoder_start_token_id(),
            forced_bos_token_id: config.forced_bos_token_id,
            forced_eos_token_id: config.forced_eos_token_id,
            eos_token_id: config.eos_token_id(),
            suppress_token_ids,
        }
    }

    pub fn validate(&self) -> Result<(), DialogSumError> {
        if self.num_beams < 1 {
            return Err(DialogSumError::InvalidConfigurationError(format!(
                "num_beams must be at least 1, got {}",
                self.num_beams
            )));
        }
        if self.max_length < 2 {
            return Err(DialogSumError::InvalidConfigurationError(format!(
                "max_length must be at least 2, got {}",
                self.max_length
            )));
        }
        if self.min_length > self.max_length {
            return Err(DialogSumError::InvalidConfigurationError(format!(
                "min_length ({}) exceeds max_length ({})",
                self.min_length, self.max_length
            )));
        }
        Ok(())
    }
}

/// Finished hypotheses of one source, bounded to the `num_beams` best ones.
#[derive(Debug, Clone)]
struct BeamHypotheses {
    length_penalty: f64,
    early_stopping: bool,
    num_beams: usize,
    beams: Vec<(f64, Vec<i64>)>,
    worst_score: f64,
}

impl BeamHypotheses {
    fn new(num_beams: usize, length_penalty: f64, early_stopping: bool) -> BeamHypotheses {
        BeamHypotheses {
            length_penalty,
            early_stopping,
            num_beams,
            beams: Vec::with_capacity(num_beams + 1),
            worst_score: 1e9f64,
        }
    }

    fn len(&self) -> usize {
        self.beams.len()
    }

    fn add(&mut self, hypothesis: Vec<i64>, sum_log_probabilities: f64) {
        let score = sum_log_probabilities / (hypothesis.len() as f64).powf(self.length_penalty);
        if self.len() < self.num_beams || score > self.worst_score {
            self.beams.push((score, hypothesis));
            if self.len() > self.num_beams {
                if let Some((worst_score_position, _)) = self
                    .beams
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, (score, _))| OrderedFloat(*score))
                {
                    let _ = self.beams.remove(worst_score_position);
                }
            }
            self.worst_score = self
                .beams
                .iter()
                .map(|(score, _)| OrderedFloat(*score))
                .min()
                .map_or(score, |worst| worst.0);
        }
    }

    fn is_done(&self, best_sum_log_probabilities: f64, current_length: usize) -> bool {
        if self.len() < self.num_beams {
            false
        } else if self.early_stopping {
            true
        } else {
            self.worst_score
                >= best_sum_log_probabilities / (current_length as f64).powf(self.length_penalty)
        }
    }

    fn best(self) -> Option<Vec<i64>> {
        self.beams
            .into_iter()
            .max_by_key(|(score, _)| OrderedFloat(*score))
            .map(|(_, hypothesis)| hypothesis)
    }
}

/// Tokens that would complete an n-gram already present in `tokens`.
fn get_banned_tokens(tokens: &[i64], no_repeat_ngram_size: usize) -> Vec<i64> {
    if no_repeat_ngram_size == 0 || tokens.len() + 1 < no_repeat_ngram_size {
        return vec![];
    }
    let prefix = &tokens[tokens.len() + 1 - no_repeat_ngram_size..];
    tokens
        .windows(no_repeat_ngram_size)
        .filter(|ngram| &ngram[..no_repeat_ngram_size - 1] == prefix)
        .map(|ngram| ngram[no_repeat_ngram_size - 1])
        .collect()
}

/// # Beam search over a `BartForConditionalGeneration` model
pub struct BeamSearch<'a> {
    model: &'a BartForConditionalGeneration,
    config: &'a GenerateConfig,
    device: Device,
}

impl<'a> BeamSearch<'a> {
    pub fn new(
        model: &'a BartForConditionalGeneration,
        config: &'a GenerateConfig,
        device: Device,
    ) -> BeamSearch<'a> {
        BeamSearch {
            model,
            config,
            device,
        }
    }

    fn token_tensor(&self, token_ids: &[i64]) -> Tensor {
        Tensor::from_slice(token_ids).to(self.device)
    }

    fn float_tensor(&self, values: &[f64]) -> Tensor {
        Tensor::from_slice(values).to_kind(Kind::Float).to(self.device)
    }

    fn force_token(scores: &mut Tensor, token_id: i64) {
        let _ = scores.fill_(f64::NEG_INFINITY);
        let _ = scores.narrow(1, token_id, 1).fill_(0.0);
    }

    /// Masks the scores of tokens that may not follow the current beams.
    fn constrain_scores(&self, scores: &mut Tensor, beams: &[Vec<i64>], current_length: i64) {
        if !self.config.suppress_token_ids.is_empty() {
            let _ = scores.index_fill_(
                1,
                &self.token_tensor(&self.config.suppress_token_ids),
                f64::NEG_INFINITY,
            );
        }
        if current_length < self.config.min_length {
            let _ = scores.index_fill_(
                1,
                &self.token_tensor(&[self.config.eos_token_id]),
                f64::NEG_INFINITY,
            );
        }
        if self.config.no_repeat_ngram_size > 0 {
            for (beam_index, beam) in beams.iter().enumerate() {
                let banned_tokens =
                    get_banned_tokens(beam, self.config.no_repeat_ngram_size as usize);
                if !banned_tokens.is_empty() {
                    let _ = scores.get(beam_index as i64).index_fill_(
                        0,
                        &self.token_tensor(&banned_tokens),
                        f64::NEG_INFINITY,
                    );
                }
            }
        }
        if current_length == 1 {
            if let Some(forced_bos_token_id) = self.config.forced_bos_token_id {
                Self::force_token(scores, forced_bos_token_id);
            }
        } else if current_length == self.config.max_length - 1 {
            if let Some(forced_eos_token_id) = self.config.forced_eos_token_id {
                Self::force_token(scores, forced_eos_token_id);
            }
        }
    }

    /// Generates the best sequence for a single tokenized source.
    ///
    /// # Returns
    ///
    /// * `Vec<i64>` starting with the decoder start token and terminated by the end of sequence
    /// token unless `max_length` was reached
    pub fn generate(&self, input_ids: &[i64]) -> Result<Vec<i64>, DialogSumError> {
        tch::no_grad(|| self.generate_no_grad(input_ids))
    }

    fn generate_no_grad(&self, input_ids: &[i64]) -> Result<Vec<i64>, DialogSumError> {
        if input_ids.is_empty() {
            return Err(DialogSumError::ValueError(
                "cannot generate from an empty input".to_string(),
            ));
        }
        let num_beams = self.config.num_beams.max(1) as usize;
        let max_length = self.config.max_length;

        let input_tensor = self.token_tensor(input_ids).unsqueeze(0);
        let encoder_output = self
            .model
            .encode(&input_tensor, None)?
            .repeat([num_beams as i64, 1, 1]);

        let mut beams = vec![vec![self.config.decoder_start_token_id]; num_beams];
        let mut beam_scores = vec![-1e9f64; num_beams];
        beam_scores[0] = 0.0;
        let mut hypotheses = BeamHypotheses::new(
            num_beams,
            self.config.length_penalty,
            self.config.early_stopping,
        );

        let mut current_length = 1i64;
        let mut done = false;
        while current_length < max_length {
            let decoder_input_ids = Tensor::from_slice2(&beams).to(self.device);
            let logits = self
                .model
                .forward_t(
                    None,
                    None,
                    Some(&encoder_output),
                    Some(&decoder_input_ids),
                    None,
                    false,
                )?
                .decoder_output;
            let mut scores = logits.select(1, -1).log_softmax(-1, Kind::Float);
            self.constrain_scores(&mut scores, &beams, current_length);

            let vocab_size = scores.size()[1];
            let next_scores =
                (scores + self.float_tensor(&beam_scores).unsqueeze(-1)).view([-1]);
            let (top_scores, top_indices) = next_scores.topk(2 * num_beams as i64, 0, true, true);
            let top_scores = Vec::<f64>::try_from(&top_scores.to_device(Device::Cpu))?;
            let top_indices = Vec::<i64>::try_from(&top_indices.to_device(Device::Cpu))?;

            let mut next_beams = Vec::with_capacity(num_beams);
            let mut next_beam_scores = Vec::with_capacity(num_beams);
            for (rank, (score, index)) in top_scores.iter().zip(top_indices.iter()).enumerate() {
                let beam_index = (index / vocab_size) as usize;
                let token_id = index % vocab_size;
                if token_id == self.config.eos_token_id {
                    if rank < num_beams {
                        hypotheses.add(beams[beam_index].clone(), *score);
                    }
                } else {
                    let mut beam = beams[beam_index].clone();
                    beam.push(token_id);
                    next_beams.push(beam);
                    next_beam_scores.push(*score);
                }
                if next_beams.len() == num_beams {
                    break;
                }
            }

            let best_score = top_scores.first().copied().unwrap_or(f64::NEG_INFINITY);
            done = hypotheses.is_done(best_score, current_length as usize);
            if done || next_beams.is_empty() {
                break;
            }
            beams = next_beams;
            beam_scores = next_beam_scores;
            current_length += 1;
        }

        if !done {
            for (beam, score) in beams.iter().zip(beam_scores.iter()) {
                hypotheses.add(beam.clone(), *score);
            }
        }
        let mut output = hypotheses
            .best()
            .unwrap_or_else(|| vec![self.config.decoder_start_token_id]);
        if (output.len() as i64) < max_length {
            output.push(self.config.eos_token_id);
        }
        Ok(output)
    }
}
