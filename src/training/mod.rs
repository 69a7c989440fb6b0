//! # Fine-tuning loop
//!
//! - `TrainingConfig`: hyperparameters of a run (learning rate, epochs, checkpoint rotation...)
//! - `Seq2SeqCollator`: pads tokenized examples into batches and builds decoder inputs
//! - `Seq2SeqTrainer`: optimization with AdamW, per-epoch evaluation and beam search prediction
//! - `GradScaler`: dynamic loss scaling for `fp16` training on CUDA
//! - `CheckpointManager`: periodic `checkpoint-{step}` snapshots, oldest removed first

pub mod checkpoint;
pub mod collator;
pub mod config;
pub mod scaler;
pub mod trainer;

pub use checkpoint::{CheckpointManager, TrainerState};
pub use collator::{Seq2SeqBatch, Seq2SeqCollator, IGNORE_INDEX};
pub use config::{EvaluationStrategy, TrainingConfig};
pub use scaler::GradScaler;
pub use trainer::{compute_loss, ComputeMetrics, PredictionOutput, Seq2SeqTrainer, TrainOutput};
