//! # Fine-tuning BART for dialogue summarization
//!
//! Rust implementation of a fine-tuning run of [BART](https://arxiv.org/abs/1910.13461) on the
//! [DialogSum](https://github.com/cylnlp/dialogsum) corpus, built on
//! [tch-rs](https://github.com/LaurentMazare/tch-rs) and
//! [rust-tokenizers](https://github.com/guillaume-be/rust-tokenizers).
//!
//! The pipeline:
//! 1. loads the train, validation and test JSON-lines files (`data`),
//! 2. tokenizes dialogues and summaries (`pipelines::preprocessing`),
//! 3. loads a pretrained checkpoint and freezes its embedding tables (`pipelines::seq2seq`),
//! 4. trains with AdamW and evaluates ROUGE on the validation set after every epoch (`training`),
//! 5. generates test summaries with beam search (`pipelines::generation`),
//! 6. writes one summary per line and saves the fine-tuned weights (`pipelines::summarization`).
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! use rust_dialogsum::pipelines::dialogsum::{run_pipeline, DialogSumConfig};
//!
//! let output = run_pipeline(&DialogSumConfig::default())?;
//! for (name, value) in &output.test_metrics {
//!     println!("{name}: {value}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Loading pretrained checkpoints
//!
//! Checkpoints are downloaded from the Hugging Face hub (`remote` feature) and cached under
//! `$DIALOGSUM_CACHE` or the user cache directory. Weights must be in the `rust_model.ot`
//! format, with parameter names following the [Transformers library](https://github.com/huggingface/transformers).
//! Local checkpoints are described with `pipelines::dialogsum::ModelCheckpoint::Local`.
//!
//! # Logging
//!
//! The library logs through `tracing`. The `dialogsum-train` binary installs a subscriber
//! filtered by `RUST_LOG` (default `info`).

pub mod bart;
mod common;
pub mod data;
pub mod pipelines;
pub mod training;

pub use common::error::DialogSumError;
pub use common::resources;
pub use common::{Activation, Config};
