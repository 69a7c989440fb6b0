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

//! # Tokenization of dialogue/summary pairs
//!
//! Dialogues become encoder inputs and summaries become decoder labels. Both are truncated to
//! a fixed number of tokens and left unpadded: padding happens per batch in the collator.

use crate::data::{DatasetTable, DialogueRecord, Split};
use crate::pipelines::common::TokenizerOption;
use tracing::info;

/// Maximum number of source tokens, special tokens included
pub const MAX_SOURCE_LENGTH: usize = 256;
/// Maximum number of target tokens, special tokens included
pub const MAX_TARGET_LENGTH: usize = 128;

/// # A record with its model inputs
#[derive(Debug, Clone)]
pub struct TokenizedExample {
    pub record: DialogueRecord,
    pub input_ids: Vec<i64>,
    /// Same length as `input_ids`, all ones before batching
    pub attention_mask: Vec<i64>,
    pub labels: Vec<i64>,
}

/// # Tokenized counterpart of a `DatasetTable`
#[derive(Debug, Clone)]
pub struct TokenizedDataset {
    pub split: Split,
    pub examples: Vec<TokenizedExample>,
}

impl TokenizedDataset {
    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }
}

/// # Turns dialogue records into `TokenizedExample`s
pub struct Preprocessor<'a> {
    tokenizer: &'a TokenizerOption,
    max_source_length: usize,
    max_target_length: usize,
}

impl<'a> Preprocessor<'a> {
    /// # Example
    ///
    /// ```no_run
    /// # use rust_dialogsum::pipelines::common::{ModelType, TokenizerOption};
    /// use rust_dialogsum::pipelines::preprocessing::{Preprocessor, MAX_SOURCE_LENGTH, MAX_TARGET_LENGTH};
    /// # let tokenizer = TokenizerOption::from_file(ModelType::Bart, "vocab.json", "merges.txt", false, false)?;
    /// let preprocessor = Preprocessor::new(&tokenizer, MAX_SOURCE_LENGTH, MAX_TARGET_LENGTH);
    /// # Ok::<(), rust_dialogsum::DialogSumError>(())
    /// ```
    pub fn new(
        tokenizer: &'a TokenizerOption,
        max_source_length: usize,
        max_target_length: usize,
    ) -> Preprocessor<'a> {
        Preprocessor {
            tokenizer,
            max_source_length,
            max_target_length,
        }
    }

    pub fn preprocess_record(&self, record: &DialogueRecord) -> TokenizedExample {
        let input_ids = self
            .tokenizer
            .encode(&record.dialogue, self.max_source_length);
        let attention_mask = vec![1; input_ids.len()];
        let labels = self
            .tokenizer
            .encode_target(&record.summary, self.max_target_length);
        TokenizedExample {
            record: record.clone(),
            input_ids,
            attention_mask,
            labels,
        }
    }

    /// Tokenizes every record of the table, keeping the table order.
    pub fn preprocess(&self, table: &DatasetTable) -> TokenizedDataset {
        let examples: Vec<TokenizedExample> = table
            .iter()
            .map(|record| self.preprocess_record(record))
            .collect();
        let truncated = examples
            .iter()
            .filter(|example| example.input_ids.len() == self.max_source_length)
            .count();
        info!(
            split = %table.split(),
            examples = examples.len(),
            at_source_limit = truncated,
            "tokenized dataset"
        );
        TokenizedDataset {
            split: table.split(),
            examples,
        }
    }
}
