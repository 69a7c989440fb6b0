//! # Fine-tuning and summarization pipelines
//!
//! The building blocks of the DialogSum run, from tokenization to written summaries:
//!
//! #### 1. Model set-up
//! `seq2seq` resolves the checkpoint files (hub or local), builds `BartForConditionalGeneration`
//! and its tokenizer and freezes the embedding tables following the rules of the model family
//! (`common::ModelType`).
//!
//! #### 2. Preprocessing
//! `preprocessing` tokenizes dialogues (up to 256 tokens) and reference summaries (up to 128
//! tokens). Padding is left to the training collator.
//!
//! #### 3. Generation
//! `generation` implements beam search with forced beginning/end of sequence tokens, minimum
//! length and n-gram repetition blocking.
//!
//! #### 4. Evaluation
//! `metrics` decodes generated and reference ids, places one sentence per line (`sentences`) and
//! reports `rouge1`, `rouge2`, `rougeL`, `rougeLsum` (`rouge`) and the mean generated length.
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! use rust_dialogsum::pipelines::common::{ModelType, TokenizerOption};
//! use rust_dialogsum::pipelines::metrics::{EvalPrediction, MetricEvaluator};
//!
//! let tokenizer =
//!     TokenizerOption::from_file(ModelType::Bart, "vocab.json", "merges.txt", false, false)?;
//! let evaluator = MetricEvaluator::new(&tokenizer, true)?;
//! let reference = tokenizer.encode_target("#Person1# buys a ticket.", 128);
//! let metrics = evaluator.compute(&EvalPrediction {
//!     predictions: vec![reference.clone()],
//!     label_ids: vec![reference.into_iter().map(Some).collect()],
//! })?;
//! assert_eq!(metrics["rouge1"], 100.0);
//! # Ok(())
//! # }
//! ```
//!
//! #### 5. Output
//! `summarization` flattens every generated summary to a single line and writes them in dataset
//! order.
//!
//! `dialogsum` chains all of the above with the `training` loop.

pub mod common;
pub mod dialogsum;
pub mod generation;
pub mod metrics;
pub mod preprocessing;
pub mod rouge;
pub mod sentences;
pub mod seq2seq;
pub mod summarization;
