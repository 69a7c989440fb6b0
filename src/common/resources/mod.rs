//! # Resource definitions for model weights, vocabularies and configuration files
//!
//! A fine-tuning run needs four files for its starting checkpoint:
//! - model weights (`rust_model.ot`)
//! - configuration file (`config.json`)
//! - vocabulary (`vocab.json`)
//! - BPE merges (`merges.txt`)
//!
//! Two types of resources are pre-defined:
//! - LocalResource: points to a local file
//! - RemoteResource: points to a remote file via a URL, downloaded and cached on first access
//!   (requires the `remote` feature)
//!
//! For both types of resources, the local location of the file can be retrieved using
//! `get_local_path`, allowing to reference the resource file location regardless if it is a remote
//! or local resource.

mod local;

use crate::common::error::DialogSumError;
pub use local::LocalResource;
use std::path::PathBuf;

/// # Resource Trait that can provide the location of the model, configuration or vocabulary resources
pub trait ResourceProvider {
    /// Provides the local path for a resource.
    ///
    /// # Returns
    ///
    /// * `PathBuf` pointing to the resource file
    ///
    /// # Example
    ///
    /// ```no_run
    /// use rust_dialogsum::resources::{LocalResource, ResourceProvider};
    /// use std::path::PathBuf;
    /// let config_resource = LocalResource {
    ///     local_path: PathBuf::from("path/to/config.json"),
    /// };
    /// let config_path = config_resource.get_local_path();
    /// ```
    fn get_local_path(&self) -> Result<PathBuf, DialogSumError>;
}

impl<T: ResourceProvider + ?Sized> ResourceProvider for Box<T> {
    fn get_local_path(&self) -> Result<PathBuf, DialogSumError> {
        T::get_local_path(self)
    }
}

#[cfg(feature = "remote")]
mod remote;
#[cfg(feature = "remote")]
pub use remote::RemoteResource;
