use super::*;
use crate::common::error::DialogSumError;
use cached_path::{Cache, Options, ProgressBar};
use dirs::cache_dir;
use lazy_static::lazy_static;
use std::path::PathBuf;

/// # Remote resource that will be downloaded and cached locally on demand
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct RemoteResource {
    /// Remote path/url for the resource
    pub url: String,
    /// Local subdirectory of the cache root where this resource is saved
    pub cache_subdir: String,
}

impl RemoteResource {
    /// Creates a RemoteResource for a file of a model repository hosted on the Hugging Face hub.
    /// The file is cached under `<cache root>/<model name>/`.
    ///
    /// # Arguments
    ///
    /// * `model_name` - Repository name, e.g. `facebook/bart-large`
    /// * `file_name` - File within the repository, e.g. `rust_model.ot`
    ///
    /// # Example
    ///
    /// ```no_run
    /// use rust_dialogsum::resources::RemoteResource;
    /// let weights_resource = RemoteResource::from_hub("facebook/bart-large", "rust_model.ot");
    /// ```
    pub fn from_hub(model_name: &str, file_name: &str) -> RemoteResource {
        RemoteResource {
            url: format!("https://huggingface.co/{model_name}/resolve/main/{file_name}"),
            cache_subdir: model_name.to_string(),
        }
    }
}

impl ResourceProvider for RemoteResource {
    /// Gets the local path for a remote resource.
    ///
    /// The remote resource is downloaded and cached. Then the path
    /// to the local cache is returned.
    fn get_local_path(&self) -> Result<PathBuf, DialogSumError> {
        let cached_path = CACHE
            .cached_path_with_options(&self.url, &Options::default().subdir(&self.cache_subdir))?;
        Ok(cached_path)
    }
}

lazy_static! {
    /// # Global cache directory
    /// If the environment variable `DIALOGSUM_CACHE` is set, will save the cache model files at
    /// that location. Otherwise defaults to `$XDG_CACHE_HOME/.dialogsum`, or corresponding user
    /// cache for the current system.
    pub static ref CACHE: Cache = Cache::builder()
        .dir(_get_cache_directory())
        .progress_bar(Some(ProgressBar::Light))
        .build()
        .expect("could not create the resource cache");
}

fn _get_cache_directory() -> PathBuf {
    match std::env::var("DIALOGSUM_CACHE") {
        Ok(value) => PathBuf::from(value),
        Err(_) => {
            let mut home = cache_dir().unwrap_or_else(std::env::temp_dir);
            home.push(".dialogsum");
            home
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hub_files_are_cached_per_model() {
        let resource = RemoteResource::from_hub("facebook/bart-large", "merges.txt");
        assert_eq!(
            resource.url,
            "https://huggingface.co/facebook/bart-large/resolve/main/merges.txt"
        );
        assert_eq!(resource.cache_subdir, "facebook/bart-large");
    }
}
