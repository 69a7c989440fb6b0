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

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// # One dialogue with its reference summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueRecord {
    /// Identifier of the dialogue (e.g. `train_0`)
    pub fname: String,
    /// Multi-turn dialogue text, turns separated by newlines
    pub dialogue: String,
    /// Reference summary. For test data, the annotation selected by the configured index.
    pub summary: String,
}

/// Dataset partition a table was loaded for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Validation,
    Test,
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Split::Train => "train",
            Split::Validation => "validation",
            Split::Test => "test",
        };
        write!(f, "{name}")
    }
}

/// # Ordered collection of records read from a single JSON-lines file
#[derive(Debug, Clone)]
pub struct DatasetTable {
    split: Split,
    path: PathBuf,
    records: Vec<DialogueRecord>,
}

impl DatasetTable {
    pub fn new<P: Into<PathBuf>>(split: Split, path: P, records: Vec<DialogueRecord>) -> Self {
        DatasetTable {
            split,
            path: path.into(),
            records,
        }
    }

    pub fn split(&self) -> Split {
        self.split
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[DialogueRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DialogueRecord> {
        self.records.iter()
    }
}

/// The three partitions of the corpus. They are kept apart for the whole run.
#[derive(Debug, Clone)]
pub struct DatasetSplits {
    pub train: DatasetTable,
    pub validation: DatasetTable,
    pub test: DatasetTable,
}
