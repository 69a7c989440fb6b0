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

use crate::pipelines::generation::{BeamSearch, GenerateConfig};
use crate::pipelines::metrics::{EvalPrediction, LabelIds, MetricMap};
use crate::pipelines::preprocessing::{TokenizedDataset, TokenizedExample};
use crate::pipelines::seq2seq::Seq2SeqModel;
use crate::training::checkpoint::{CheckpointManager, TrainerState};
use crate::training::collator::{Seq2SeqBatch, Seq2SeqCollator, IGNORE_INDEX};
use crate::training::config::{EvaluationStrategy, TrainingConfig};
use crate::training::scaler::GradScaler;
use crate::DialogSumError;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Instant;
use tch::nn::OptimizerConfig;
use tch::{nn, Device, Kind, Reduction, Tensor};
use tracing::{debug, info, warn};

/// Callback turning generated sequences and references into named metrics
pub type ComputeMetrics<'a> =
    Box<dyn Fn(&EvalPrediction) -> Result<MetricMap, DialogSumError> + 'a>;

/// # Summary of a finished training run
#[derive(Debug, Clone)]
pub struct TrainOutput {
    pub global_step: usize,
    /// Mean loss over every optimizer step
    pub training_loss: f64,
    /// `train_loss`, `train_runtime` and `epoch`
    pub metrics: MetricMap,
}

/// # Generated sequences for a dataset
#[derive(Debug, Clone)]
pub struct PredictionOutput {
    /// Generated token ids, one sequence per example in dataset order
    pub predictions: Vec<Vec<i64>>,
    /// References, `None` where they were padded within their evaluation batch
    pub label_ids: Vec<LabelIds>,
    /// Loss and generation metrics, prefixed by `test_`
    pub metrics: MetricMap,
}

/// Cross-entropy over the vocabulary, ignoring positions labelled `IGNORE_INDEX`.
pub fn compute_loss(logits: &Tensor, labels: &Tensor) -> Tensor {
    let vocab_size = logits.size()[logits.dim() - 1];
    logits
        .to_kind(Kind::Float)
        .reshape([-1, vocab_size])
        .cross_entropy_loss::<Tensor>(
            &labels.reshape([-1]),
            None,
            Reduction::Mean,
            IGNORE_INDEX,
            0.0,
        )
}

/// Learning rate multiplier: linear warmup, then linear decay to 0 at `total_steps`.
pub fn linear_schedule(step: usize, warmup_steps: usize, total_steps: usize) -> f64 {
    if step < warmup_steps {
        return step as f64 / warmup_steps.max(1) as f64;
    }
    let remaining = total_steps.saturating_sub(step) as f64;
    (remaining / total_steps.saturating_sub(warmup_steps).max(1) as f64).max(0.0)
}

fn prefixed(metrics: MetricMap, prefix: &str) -> MetricMap {
    metrics
        .into_iter()
        .map(|(name, value)| (format!("{prefix}_{name}"), value))
        .collect()
}

/// # Fine-tunes a sequence-to-sequence model
///
/// Runs the optimization loop with AdamW, evaluates on the validation set after each epoch and
/// generates predictions with beam search.
///
/// ```no_run
/// # fn main() -> anyhow::Result<()> {
/// # use rust_dialogsum::pipelines::preprocessing::TokenizedDataset;
/// # use rust_dialogsum::data::Split;
/// use rust_dialogsum::pipelines::generation::GenerateConfig;
/// use rust_dialogsum::pipelines::seq2seq::{Seq2SeqModel, Seq2SeqModelResources};
/// use rust_dialogsum::training::{Seq2SeqCollator, Seq2SeqTrainer, TrainingConfig};
/// use tch::Device;
///
/// # let train = TokenizedDataset { split: Split::Train, examples: vec![] };
/// # let validation = TokenizedDataset { split: Split::Validation, examples: vec![] };
/// let resources = Seq2SeqModelResources::from_hub("facebook/bart-large");
/// let mut model = Seq2SeqModel::new(&resources, Device::cuda_if_available())?;
/// model.freeze_embeddings()?;
/// let collator = Seq2SeqCollator::new(1, 2);
/// let mut trainer = Seq2SeqTrainer::new(
///     &mut model,
///     TrainingConfig::default(),
///     collator,
///     GenerateConfig::default(),
/// )?;
/// let output = trainer.train(&train, &validation)?;
/// # Ok(())
/// # }
/// ```
pub struct Seq2SeqTrainer<'a> {
    model: &'a mut Seq2SeqModel,
    config: TrainingConfig,
    collator: Seq2SeqCollator,
    generate_config: GenerateConfig,
    compute_metrics: Option<ComputeMetrics<'a>>,
    checkpoints: CheckpointManager,
    state: TrainerState,
}

impl<'a> Seq2SeqTrainer<'a> {
    /// # Arguments
    ///
    /// * `model` - model to fine-tune, with its embeddings already frozen if needed
    /// * `config` - `TrainingConfig` hyperparameters
    /// * `collator` - batching of the tokenized examples
    /// * `generate_config` - beam search settings used during evaluation
    pub fn new(
        model: &'a mut Seq2SeqModel,
        config: TrainingConfig,
        collator: Seq2SeqCollator,
        generate_config: GenerateConfig,
    ) -> Result<Seq2SeqTrainer<'a>, DialogSumError> {
        config.validate()?;
        generate_config.validate()?;
        if config.fp16 && !model.device().is_cuda() {
            warn!("mixed precision requires a CUDA device, training in full precision");
        }
        let checkpoints = CheckpointManager::new(&config.output_dir, config.save_total_limit);
        Ok(Seq2SeqTrainer {
            model,
            config,
            collator,
            generate_config,
            compute_metrics: None,
            checkpoints,
            state: TrainerState::default(),
        })
    }

    /// Sets the callback scoring generated sequences during evaluation and prediction.
    pub fn with_compute_metrics<F>(mut self, compute_metrics: F) -> Self
    where
        F: Fn(&EvalPrediction) -> Result<MetricMap, DialogSumError> + 'a,
    {
        self.compute_metrics = Some(Box::new(compute_metrics));
        self
    }

    pub fn state(&self) -> &TrainerState {
        &self.state
    }

    fn device(&self) -> Device {
        self.model.device()
    }

    fn use_autocast(&self) -> bool {
        self.config.fp16 && self.device().is_cuda()
    }

    fn progress_bar(&self, length: usize, message: String) -> ProgressBar {
        if self.config.disable_progress_bar {
            return ProgressBar::hidden();
        }
        let progress_bar = ProgressBar::new(length as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
        {
            progress_bar.set_style(style.progress_chars("##-"));
        }
        progress_bar.set_message(message);
        progress_bar
    }

    fn forward_loss(&self, batch: &Seq2SeqBatch, train: bool) -> Result<Tensor, DialogSumError> {
        tch::autocast(self.use_autocast(), || {
            let logits = self
                .model
                .model()
                .forward_t(
                    Some(&batch.input_ids),
                    Some(&batch.attention_mask),
                    None,
                    Some(&batch.decoder_input_ids),
                    None,
                    train,
                )?
                .decoder_output;
            Ok(compute_loss(&logits, &batch.labels))
        })
    }

    /// Global L2 norm of the gradients. Frozen variables have no gradient and are skipped.
    fn gradient_norm(variables: &[Tensor]) -> f64 {
        let mut total_norm_squared = 0f64;
        for variable in variables {
            let grad = variable.grad();
            if grad.defined() {
                total_norm_squared += grad
                    .to_kind(Kind::Float)
                    .square()
                    .sum(Kind::Float)
                    .double_value(&[]);
            }
        }
        total_norm_squared.sqrt()
    }

    /// Rescales the gradients so that their global norm does not exceed `max_grad_norm`.
    fn clip_gradients(&self, variables: &[Tensor], total_norm: f64) {
        if self.config.max_grad_norm > 0.0 && total_norm > self.config.max_grad_norm {
            let clip_coefficient = self.config.max_grad_norm / (total_norm + 1e-6);
            tch::no_grad(|| {
                for variable in variables {
                    let mut grad = variable.grad();
                    if grad.defined() {
                        let _ = grad.g_mul_scalar_(clip_coefficient);
                    }
                }
            });
        }
    }

    fn shuffled_order(&self, length: usize) -> Result<Vec<usize>, DialogSumError> {
        let permutation = Tensor::randperm(length as i64, (Kind::Int64, Device::Cpu));
        Ok(Vec::<i64>::try_from(&permutation)?
            .into_iter()
            .map(|index| index as usize)
            .collect())
    }

    fn save_checkpoint(&self) -> Result<(), DialogSumError> {
        self.checkpoints.save(self.model.var_store(), &self.state)?;
        Ok(())
    }

    /// Runs `num_train_epochs` passes over `train_dataset` in a seeded random order.
    ///
    /// # Returns
    ///
    /// * `TrainOutput` with the final step and mean training loss
    pub fn train(
        &mut self,
        train_dataset: &TokenizedDataset,
        eval_dataset: &TokenizedDataset,
    ) -> Result<TrainOutput, DialogSumError> {
        if train_dataset.is_empty() {
            return Err(DialogSumError::ValueError(
                "the training set is empty".to_string(),
            ));
        }
        tch::manual_seed(self.config.seed as i64);
        let start = Instant::now();

        let batch_size = self.config.per_device_train_batch_size;
        let batches_per_epoch = (train_dataset.len() + batch_size - 1) / batch_size;
        let total_steps = batches_per_epoch * self.config.num_train_epochs;

        let mut optimizer = nn::AdamW {
            beta1: self.config.adam_beta1,
            beta2: self.config.adam_beta2,
            wd: self.config.weight_decay,
            eps: self.config.adam_epsilon,
            amsgrad: false,
        }
        .build(self.model.var_store(), self.config.learning_rate)?;
        let trainable: Vec<Tensor> = self
            .model
            .var_store()
            .trainable_variables()
            .into_iter()
            .filter(|variable| variable.requires_grad())
            .collect();

        info!(
            examples = train_dataset.len(),
            epochs = self.config.num_train_epochs,
            batch_size,
            total_steps,
            trainable_tensors = trainable.len(),
            "starting training"
        );

        let mut scaler = GradScaler::new(self.use_autocast());
        if scaler.is_enabled() {
            info!(scale = scaler.scale(), "mixed precision with dynamic loss scaling");
        }

        self.state = TrainerState::default();
        let mut skipped_steps = 0usize;
        let mut loss_sum = 0f64;
        let mut logged_loss_sum = 0f64;
        let mut logged_steps = 0usize;
        for epoch in 0..self.config.num_train_epochs {
            let order = self.shuffled_order(train_dataset.len())?;
            let progress_bar = self.progress_bar(
                batches_per_epoch,
                format!("epoch {}/{}", epoch + 1, self.config.num_train_epochs),
            );
            for (batch_index, indices) in order.chunks(batch_size).enumerate() {
                let examples: Vec<&TokenizedExample> = indices
                    .iter()
                    .map(|index| &train_dataset.examples[*index])
                    .collect();
                let batch = self.collator.collate(&examples, self.device())?;

                let learning_rate = self.config.learning_rate
                    * linear_schedule(
                        self.state.global_step,
                        self.config.warmup_steps,
                        total_steps,
                    );
                optimizer.set_lr(learning_rate);

                let loss = self.forward_loss(&batch, true)?;
                optimizer.zero_grad();
                scaler.scale_loss(&loss).backward();
                scaler.unscale(&trainable);
                let gradient_norm = Self::gradient_norm(&trainable);
                if scaler.update(gradient_norm.is_finite()) {
                    self.clip_gradients(&trainable, gradient_norm);
                    optimizer.step();
                } else {
                    skipped_steps += 1;
                    debug!(
                        step = self.state.global_step,
                        scale = scaler.scale(),
                        "gradient overflow, skipping optimizer step"
                    );
                }

                let loss_value = loss.double_value(&[]);
                if !loss_value.is_finite() {
                    warn!(step = self.state.global_step, "non-finite training loss");
                }
                loss_sum += loss_value;
                logged_loss_sum += loss_value;
                logged_steps += 1;
                self.state.global_step += 1;
                self.state.epoch = epoch as f64 + (batch_index + 1) as f64 / batches_per_epoch as f64;

                progress_bar.inc(1);
                progress_bar.set_message(format!(
                    "epoch {}/{} loss {:.4}",
                    epoch + 1,
                    self.config.num_train_epochs,
                    loss_value
                ));

                if self.state.global_step % self.config.logging_steps == 0 {
                    let mean_loss = logged_loss_sum / logged_steps as f64;
                    debug!(
                        step = self.state.global_step,
                        epoch = self.state.epoch,
                        loss = mean_loss,
                        learning_rate,
                        "training"
                    );
                    self.state.log_history.push(MetricMap::from([
                        ("loss".to_string(), mean_loss),
                        ("learning_rate".to_string(), learning_rate),
                        ("epoch".to_string(), self.state.epoch),
                        ("step".to_string(), self.state.global_step as f64),
                    ]));
                    logged_loss_sum = 0.0;
                    logged_steps = 0;
                }
                if self.state.global_step % self.config.save_steps == 0 {
                    self.save_checkpoint()?;
                }
            }
            progress_bar.finish_and_clear();

            if self.config.evaluation_strategy == EvaluationStrategy::Epoch {
                let mut metrics = self.evaluate(eval_dataset)?;
                info!(epoch = epoch + 1, ?metrics, "evaluation");
                metrics.insert("epoch".to_string(), self.state.epoch);
                metrics.insert("step".to_string(), self.state.global_step as f64);
                self.state.log_history.push(metrics);
            }
        }

        if self.state.global_step % self.config.save_steps != 0 {
            self.save_checkpoint()?;
        }

        let training_loss = loss_sum / self.state.global_step.max(1) as f64;
        let metrics = MetricMap::from([
            ("train_loss".to_string(), training_loss),
            ("train_runtime".to_string(), start.elapsed().as_secs_f64()),
            ("epoch".to_string(), self.state.epoch),
        ]);
        info!(
            steps = self.state.global_step,
            skipped_steps,
            loss = training_loss,
            "training completed"
        );
        Ok(TrainOutput {
            global_step: self.state.global_step,
            training_loss,
            metrics,
        })
    }

    /// Mean loss over evaluation batches and the references collated with them, padded with
    /// `None` to the longest target of their batch.
    fn evaluation_loss(
        &self,
        dataset: &TokenizedDataset,
    ) -> Result<(f64, Vec<LabelIds>), DialogSumError> {
        let mut total = 0f64;
        let mut batches = 0usize;
        let mut label_ids = Vec::with_capacity(dataset.len());
        for chunk in dataset
            .examples
            .chunks(self.config.per_device_eval_batch_size)
        {
            let examples: Vec<&TokenizedExample> = chunk.iter().collect();
            let batch = self.collator.collate(&examples, self.device())?;
            let loss = tch::no_grad(|| self.forward_loss(&batch, false))?;
            total += loss.double_value(&[]);
            batches += 1;
            label_ids.extend(batch.label_ids);
        }
        Ok((total / batches.max(1) as f64, label_ids))
    }

    fn prediction_loop(
        &self,
        dataset: &TokenizedDataset,
        generate_config: &GenerateConfig,
        prefix: &str,
    ) -> Result<PredictionOutput, DialogSumError> {
        if dataset.is_empty() {
            return Err(DialogSumError::ValueError(format!(
                "the {} set is empty",
                dataset.split
            )));
        }
        generate_config.validate()?;

        let (loss, label_ids) = self.evaluation_loss(dataset)?;
        let mut metrics = MetricMap::new();
        metrics.insert("loss".to_string(), loss);
        let mut predictions = Vec::with_capacity(dataset.len());
        if self.config.predict_with_generate {
            let beam_search = BeamSearch::new(self.model.model(), generate_config, self.device());
            let progress_bar =
                self.progress_bar(dataset.len(), format!("generating {}", dataset.split));
            for example in &dataset.examples {
                predictions.push(beam_search.generate(&example.input_ids)?);
                progress_bar.inc(1);
            }
            progress_bar.finish_and_clear();

            if let Some(compute_metrics) = &self.compute_metrics {
                let eval_prediction = EvalPrediction {
                    predictions,
                    label_ids,
                };
                metrics.extend(compute_metrics(&eval_prediction)?);
                return Ok(PredictionOutput {
                    predictions: eval_prediction.predictions,
                    label_ids: eval_prediction.label_ids,
                    metrics: prefixed(metrics, prefix),
                });
            }
        }
        Ok(PredictionOutput {
            predictions,
            label_ids,
            metrics: prefixed(metrics, prefix),
        })
    }

    /// Validation loss and, when generating, the metrics of the generated summaries.
    ///
    /// # Returns
    ///
    /// * `MetricMap` with keys prefixed by `eval_`
    pub fn evaluate(&self, eval_dataset: &TokenizedDataset) -> Result<MetricMap, DialogSumError> {
        Ok(self
            .prediction_loop(eval_dataset, &self.generate_config, "eval")?
            .metrics)
    }

    /// Generates a sequence for every example of `test_dataset` with `generate_config`.
    pub fn predict(
        &self,
        test_dataset: &TokenizedDataset,
        generate_config: &GenerateConfig,
    ) -> Result<PredictionOutput, DialogSumError> {
        let output = self.prediction_loop(test_dataset, generate_config, "test")?;
        info!(metrics = ?output.metrics, "prediction");
        Ok(output)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn schedule_warms_up_then_decays() {
        assert_eq!(linear_schedule(0, 0, 10), 1.0);
        assert_eq!(linear_schedule(5, 0, 10), 0.5);
        assert_eq!(linear_schedule(10, 0, 10), 0.0);
        assert_eq!(linear_schedule(1, 4, 12), 0.25);
        assert_eq!(linear_schedule(4, 4, 12), 1.0);
        assert_eq!(linear_schedule(8, 4, 12), 0.5);
        assert_eq!(linear_schedule(20, 4, 12), 0.0);
    }

    #[test]
    fn loss_ignores_padded_labels() -> anyhow::Result<()> {
        let logits = Tensor::from_slice(&[0f32, 10., 0., 10., 0., 0.]).reshape([1, 2, 3]);
        let labels = Tensor::from_slice(&[1i64, IGNORE_INDEX]).reshape([1, 2]);
        let loss = compute_loss(&logits, &labels).double_value(&[]);
        let expected = -(10f64.exp() / (2.0 + 10f64.exp())).ln();
        assert!((loss - expected).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn metric_names_are_prefixed() {
        let metrics = prefixed(MetricMap::from([("rouge1".to_string(), 1.0)]), "eval");
        assert_eq!(metrics.get("eval_rouge1"), Some(&1.0));
    }
}
