use crate::common::error::DialogSumError;
use crate::resources::ResourceProvider;
use std::path::PathBuf;

/// # Local resource
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct LocalResource {
    /// Local path for the resource
    pub local_path: PathBuf,
}

impl ResourceProvider for LocalResource {
    /// Gets the path for a local resource, failing early if the file is missing.
    fn get_local_path(&self) -> Result<PathBuf, DialogSumError> {
        if self.local_path.exists() {
            Ok(self.local_path.clone())
        } else {
            Err(DialogSumError::IOError(format!(
                "local resource {} does not exist",
                self.local_path.display()
            )))
        }
    }
}

impl From<PathBuf> for LocalResource {
    fn from(local_path: PathBuf) -> Self {
        Self { local_path }
    }
}
