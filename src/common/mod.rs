pub(crate) mod activations;
pub mod config;
pub mod error;
pub(crate) mod kind;
pub mod resources;

pub use activations::Activation;
pub use config::Config;
