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

use rust_tokenizers::error::TokenizerError;
use std::path::Path;
use tch::TchError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DialogSumError {
    #[error("Endpoint not available error: {0}")]
    FileDownloadError(String),

    #[error("IO error: {0}")]
    IOError(String),

    #[error("Tch tensor error: {0}")]
    TchError(String),

    #[error("Tokenizer error: {0}")]
    TokenizerError(String),

    #[error("Invalid configuration error: {0}")]
    InvalidConfigurationError(String),

    #[error("Value error: {0}")]
    ValueError(String),

    #[error("Data error in {path} at line {line}: {message}")]
    DataError {
        path: String,
        line: usize,
        message: String,
    },
}

impl DialogSumError {
    /// Builds a `DataError` pointing at a 1-based line of an input file
    pub fn data_error<P: AsRef<Path>, S: Into<String>>(path: P, line: usize, message: S) -> Self {
        DialogSumError::DataError {
            path: path.as_ref().display().to_string(),
            line,
            message: message.into(),
        }
    }
}

#[cfg(feature = "remote")]
impl From<cached_path::Error> for DialogSumError {
    fn from(error: cached_path::Error) -> Self {
        DialogSumError::FileDownloadError(error.to_string())
    }
}

impl From<std::io::Error> for DialogSumError {
    fn from(error: std::io::Error) -> Self {
        DialogSumError::IOError(error.to_string())
    }
}

impl From<TokenizerError> for DialogSumError {
    fn from(error: TokenizerError) -> Self {
        DialogSumError::TokenizerError(error.to_string())
    }
}

impl From<TchError> for DialogSumError {
    fn from(error: TchError) -> Self {
        DialogSumError::TchError(error.to_string())
    }
}

impl From<serde_json::Error> for DialogSumError {
    fn from(error: serde_json::Error) -> Self {
        DialogSumError::ValueError(error.to_string())
    }
}
