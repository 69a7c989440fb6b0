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

//! # Evaluation metrics for generated summaries
//!
//! Generated and reference token ids are decoded, split into sentences (one per line, as
//! `rougeLsum` expects) and scored with ROUGE. Reported values are F-measures averaged over the
//! examples and scaled to 0-100, plus the mean generated length, all rounded to 4 decimals.

use crate::pipelines::common::TokenizerOption;
use crate::pipelines::rouge::{RougeScorer, RougeType};
use crate::pipelines::sentences::split_sentences;
use crate::DialogSumError;
use std::collections::BTreeMap;

/// Named metric values, e.g. `rouge1` or `gen_len`
pub type MetricMap = BTreeMap<String, f64>;

/// Reference token ids of one example. Positions added by batch padding are `None`.
pub type LabelIds = Vec<Option<i64>>;

/// # Generated token ids and their references, in the same order
#[derive(Debug, Clone, Default)]
pub struct EvalPrediction {
    pub predictions: Vec<Vec<i64>>,
    pub label_ids: Vec<LabelIds>,
}

pub(crate) fn round_metric(value: f64) -> f64 {
    (value * 1e4).round() / 1e4
}

/// Decoded text normalized for scoring: trimmed, one sentence per line.
pub fn postprocess_for_metrics(text: &str) -> String {
    split_sentences(text.trim()).join("\n")
}

/// # Computes ROUGE and generation length metrics
pub struct MetricEvaluator<'a> {
    tokenizer: &'a TokenizerOption,
    scorer: RougeScorer,
    pad_token_id: i64,
}

impl<'a> MetricEvaluator<'a> {
    pub fn new(
        tokenizer: &'a TokenizerOption,
        use_stemmer: bool,
    ) -> Result<MetricEvaluator<'a>, DialogSumError> {
        let pad_token_id = tokenizer.get_pad_id().ok_or_else(|| {
            DialogSumError::InvalidConfigurationError(
                "the tokenizer has no padding token".to_string(),
            )
        })?;
        Ok(MetricEvaluator {
            tokenizer,
            scorer: RougeScorer::new(&RougeType::all(), use_stemmer),
            pad_token_id,
        })
    }

    fn decode(&self, token_ids: &[i64]) -> String {
        postprocess_for_metrics(&self.tokenizer.decode(token_ids, true, true))
    }

    /// Scores the predictions against their references.
    ///
    /// # Returns
    ///
    /// * `MetricMap` with keys `rouge1`, `rouge2`, `rougeL`, `rougeLsum` and `gen_len`
    pub fn compute(&self, eval_prediction: &EvalPrediction) -> Result<MetricMap, DialogSumError> {
        let EvalPrediction {
            predictions,
            label_ids,
        } = eval_prediction;
        if predictions.len() != label_ids.len() {
            return Err(DialogSumError::ValueError(format!(
                "got {} predictions for {} references",
                predictions.len(),
                label_ids.len()
            )));
        }
        if predictions.is_empty() {
            return Err(DialogSumError::ValueError(
                "no predictions to evaluate".to_string(),
            ));
        }

        let mut totals: BTreeMap<RougeType, f64> = BTreeMap::new();
        let mut generated_length = 0usize;
        for (prediction, labels) in predictions.iter().zip(label_ids.iter()) {
            let labels: Vec<i64> = labels
                .iter()
                .map(|label| label.unwrap_or(self.pad_token_id))
                .collect();
            let scores = self
                .scorer
                .score(&self.decode(&labels), &self.decode(prediction));
            for (rouge_type, score) in scores {
                *totals.entry(rouge_type).or_insert(0.0) += score.fmeasure;
            }
            generated_length += prediction
                .iter()
                .filter(|token_id| **token_id != self.pad_token_id)
                .count();
        }

        let count = predictions.len() as f64;
        let mut metrics: MetricMap = totals
            .into_iter()
            .map(|(rouge_type, total)| {
                (
                    rouge_type.name().to_string(),
                    round_metric(total / count * 100.0),
                )
            })
            .collect();
        metrics.insert(
            "gen_len".to_string(),
            round_metric(generated_length as f64 / count),
        );
        Ok(metrics)
    }
}
