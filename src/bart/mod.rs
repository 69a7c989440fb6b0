//! # BART (Lewis et al.)
//!
//! Implementation of the BART language model ([BART: Denoising Sequence-to-Sequence Pre-training for Natural Language Generation, Translation, and Comprehension](https://arxiv.org/abs/1910.13461) Lewis, Liu, Goyal, Ghazvininejad, Mohamed, Levy, Stoyanov, Zettlemoyer, 2019).
//! The base model is implemented in the `bart::BartModel` struct. The model also includes a language model head: `bart::BartForConditionalGeneration`,
//! the model fine-tuned by this crate.
//!
//! # Model set-up and pre-trained weights loading
//!
//! All models expect the following resources:
//! - Configuration file expected to have a structure following the [Transformers library](https://github.com/huggingface/transformers)
//! - Model weights are expected to have a structure and parameter names following the [Transformers library](https://github.com/huggingface/transformers). A conversion using the Python utility scripts is required to convert the `.bin` weights to the `.ot` format.
//! - `RobertaTokenizer` using a `vocab.json` vocabulary and `merges.txt` 2-gram merges
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! #
//! use tch::{nn, Device};
//! # use std::path::PathBuf;
//! use rust_dialogsum::bart::{BartConfig, BartForConditionalGeneration};
//! use rust_dialogsum::resources::{LocalResource, ResourceProvider};
//! use rust_dialogsum::Config;
//!
//! let config_resource = LocalResource {
//!     local_path: PathBuf::from("path/to/config.json"),
//! };
//! let weights_resource = LocalResource {
//!     local_path: PathBuf::from("path/to/rust_model.ot"),
//! };
//! let config_path = config_resource.get_local_path()?;
//! let weights_path = weights_resource.get_local_path()?;
//!
//! let device = Device::cuda_if_available();
//! let mut vs = nn::VarStore::new(device);
//! let config = BartConfig::from_file(config_path)?;
//! let bart_model = BartForConditionalGeneration::new(vs.root(), &config);
//! vs.load(weights_path)?;
//!
//! # Ok(())
//! # }
//! ```

mod attention;
mod bart_model;
mod decoder;
mod embeddings;
mod encoder;

pub use bart_model::{
    shift_tokens_right, BartConfig, BartForConditionalGeneration, BartModel, BartModelOutput,
};
