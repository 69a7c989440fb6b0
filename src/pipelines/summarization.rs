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

//! # Summary post-processing and output
//!
//! Generated token ids are decoded without special tokens, segmented into sentences and
//! re-joined on a single line, then written one summary per line in dataset order.

use crate::pipelines::common::TokenizerOption;
use crate::pipelines::sentences::split_sentences;
use crate::DialogSumError;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

/// Sentences of the decoded summary joined by single spaces, without line breaks.
pub fn postprocess_summary(text: &str) -> String {
    split_sentences(text.trim()).join(" ").replace('\n', "")
}

/// Decodes generated sequences into single-line summaries.
pub fn decode_summaries(tokenizer: &TokenizerOption, generated: &[Vec<i64>]) -> Vec<String> {
    generated
        .iter()
        .map(|token_ids| postprocess_summary(&tokenizer.decode(token_ids, true, true)))
        .collect()
}

/// Writes one summary per line to `path`, creating missing parent directories. An existing
/// file is overwritten.
///
/// # Example
///
/// ```no_run
/// use rust_dialogsum::pipelines::summarization::write_summaries;
///
/// let summaries = vec!["#Person1# orders a pizza.".to_string()];
/// write_summaries("test_output.txt", &summaries)?;
/// # Ok::<(), rust_dialogsum::DialogSumError>(())
/// ```
pub fn write_summaries<P: AsRef<Path>>(path: P, summaries: &[String]) -> Result<(), DialogSumError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    for summary in summaries {
        writeln!(writer, "{}", summary.replace('\n', ""))?;
    }
    writer.flush()?;
    info!(path = %path.display(), summaries = summaries.len(), "wrote summaries");
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn summary_is_flattened_to_one_line() {
        assert_eq!(
            postprocess_summary(" #Person1# is late.\nThey apologize. "),
            "#Person1# is late. They apologize."
        );
        assert_eq!(postprocess_summary(""), "");
    }

    #[test]
    fn writes_one_line_per_summary() -> anyhow::Result<()> {
        let directory = tempfile::tempdir()?;
        let path = directory.path().join("out").join("test_output.txt");
        let summaries = vec![
            "First summary.".to_string(),
            String::new(),
            "Third\nsummary.".to_string(),
        ];
        write_summaries(&path, &summaries)?;

        let content = fs::read_to_string(&path)?;
        assert_eq!(content, "First summary.\n\nThirdsummary.\n");
        Ok(())
    }
}
