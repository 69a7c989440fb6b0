// Copyright 2019 Guillaume Becquin
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

use crate::common::error::DialogSumError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// # Utility to deserialize and serialize JSON configuration files
/// Shared by the model configuration (`BartConfig`) and the pipeline configuration
/// (`DialogSumConfig`).
pub trait Config
where
    for<'de> Self: Deserialize<'de> + Serialize,
{
    /// Loads a `Config` object from a JSON file.
    ///
    /// # Arguments
    ///
    /// * `path` - `Path` to the configuration JSON file.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use rust_dialogsum::bart::BartConfig;
    /// use rust_dialogsum::Config;
    /// use std::path::Path;
    ///
    /// let config_path = Path::new("path/to/config.json");
    /// let config = BartConfig::from_file(config_path)?;
    /// # Ok::<(), rust_dialogsum::DialogSumError>(())
    /// ```
    fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, DialogSumError> {
        let path = path.as_ref();
        let f = File::open(path).map_err(|error| {
            DialogSumError::IOError(format!(
                "could not open configuration file {}: {error}",
                path.display()
            ))
        })?;
        let br = BufReader::new(f);
        serde_json::from_reader(br).map_err(|error| {
            DialogSumError::InvalidConfigurationError(format!(
                "could not parse configuration {}: {error}",
                path.display()
            ))
        })
    }

    /// Writes the configuration as pretty-printed JSON.
    fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), DialogSumError> {
        let f = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(f), self)?;
        Ok(())
    }
}
