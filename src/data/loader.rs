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

use crate::data::record::{DatasetSplits, DatasetTable, DialogueRecord, Split};
use crate::DialogSumError;
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::info;

/// # Column layout of a JSON-lines file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    /// Train and validation files: `fname`, `dialogue` and a single `summary`
    Labelled,
    /// Test file: `fname`, `dialogue` and several annotations `summary1`, `summary2`...
    /// The annotation with the given 1-based index is kept as the record summary.
    Test { summary_index: usize },
}

impl Schema {
    fn summary_key(&self) -> String {
        match self {
            Schema::Labelled => "summary".to_string(),
            Schema::Test { summary_index } => format!("summary{summary_index}"),
        }
    }
}

fn string_field(object: &Map<String, Value>, key: &str) -> Result<String, String> {
    match object.get(key) {
        Some(Value::String(value)) => Ok(value.clone()),
        Some(other) => Err(format!("field `{key}` must be a string, got {other}")),
        None => Err(format!("missing field `{key}`")),
    }
}

fn parse_record(line: &str, summary_key: &str) -> Result<DialogueRecord, String> {
    let value: Value =
        serde_json::from_str(line).map_err(|error| format!("invalid JSON: {error}"))?;
    let object = value
        .as_object()
        .ok_or_else(|| "expected a JSON object".to_string())?;
    Ok(DialogueRecord {
        fname: string_field(object, "fname")?,
        dialogue: string_field(object, "dialogue")?,
        summary: string_field(object, summary_key)?,
    })
}

/// Reads a JSON-lines file into a `DatasetTable`.
///
/// Every line must be a JSON object holding the fields required by `schema`; other
/// fields are dropped. The first offending line aborts the load with a `DataError` naming the
/// file and the 1-based line number.
///
/// # Arguments
///
/// * `path` - location of the `.jsonl` file
/// * `split` - partition the table belongs to
/// * `schema` - column layout of the file
///
/// # Example
///
/// ```no_run
/// use rust_dialogsum::data::{load_table, Schema, Split};
///
/// let test = load_table("dialogsum.test.jsonl", Split::Test, Schema::Test { summary_index: 1 })?;
/// # Ok::<(), rust_dialogsum::DialogSumError>(())
/// ```
pub fn load_table<P: AsRef<Path>>(
    path: P,
    split: Split,
    schema: Schema,
) -> Result<DatasetTable, DialogSumError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|error| {
        DialogSumError::IOError(format!("could not open {}: {error}", path.display()))
    })?;
    let summary_key = schema.summary_key();

    let mut records = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|error| DialogSumError::data_error(path, index + 1, error.to_string()))?;
        if line.trim().is_empty() {
            return Err(DialogSumError::data_error(
                path,
                index + 1,
                "blank line, expected a JSON object".to_string(),
            ));
        }
        let record = parse_record(&line, &summary_key)
            .map_err(|message| DialogSumError::data_error(path, index + 1, message))?;
        records.push(record);
    }

    info!(split = %split, path = %path.display(), records = records.len(), "loaded dataset");
    Ok(DatasetTable::new(split, path, records))
}

/// Loads the train, validation and test partitions. The test file keeps the annotation
/// `summary{test_summary_index}`.
pub fn load_splits<P: AsRef<Path>>(
    train: P,
    validation: P,
    test: P,
    test_summary_index: usize,
) -> Result<DatasetSplits, DialogSumError> {
    Ok(DatasetSplits {
        train: load_table(train, Split::Train, Schema::Labelled)?,
        validation: load_table(validation, Split::Validation, Schema::Labelled)?,
        test: load_table(
            test,
            Split::Test,
            Schema::Test {
                summary_index: test_summary_index,
            },
        )?,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_lines(lines: &[&str]) -> anyhow::Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        for line in lines {
            writeln!(file, "{line}")?;
        }
        Ok(file)
    }

    #[test]
    fn keeps_required_fields_in_order() -> anyhow::Result<()> {
        let file = write_lines(&[
            r##"{"fname": "train_0", "dialogue": "#Person1#: Hi.", "summary": "A greeting.", "topic": "hello"}"##,
            r##"{"fname": "train_1", "dialogue": "#Person1#: Bye.", "summary": "A farewell."}"##,
        ])?;
        let table = load_table(file.path(), Split::Train, Schema::Labelled)?;

        assert_eq!(table.len(), 2);
        assert_eq!(table.records()[0].fname, "train_0");
        assert_eq!(table.records()[0].summary, "A greeting.");
        assert_eq!(table.records()[1].dialogue, "#Person1#: Bye.");
        assert_eq!(table.split(), Split::Train);
        Ok(())
    }

    #[test]
    fn selects_test_annotation() -> anyhow::Result<()> {
        let file = write_lines(&[
            r#"{"fname": "test_0", "dialogue": "d", "summary1": "first", "summary2": "second", "summary3": "third"}"#,
        ])?;
        let first = load_table(file.path(), Split::Test, Schema::Test { summary_index: 1 })?;
        let third = load_table(file.path(), Split::Test, Schema::Test { summary_index: 3 })?;

        assert_eq!(first.records()[0].summary, "first");
        assert_eq!(third.records()[0].summary, "third");
        Ok(())
    }

    #[test]
    fn malformed_line_reports_location() -> anyhow::Result<()> {
        let file = write_lines(&[
            r#"{"fname": "a", "dialogue": "d", "summary": "s"}"#,
            r#"{"fname": "b", "dialogue": "d""#,
        ])?;
        match load_table(file.path(), Split::Validation, Schema::Labelled) {
            Err(DialogSumError::DataError { line, message, .. }) => {
                assert_eq!(line, 2);
                assert!(message.contains("invalid JSON"));
            }
            other => panic!("expected a data error, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn missing_or_mistyped_field_is_rejected() -> anyhow::Result<()> {
        let missing = write_lines(&[r#"{"fname": "a", "dialogue": "d"}"#])?;
        let mistyped = write_lines(&[r#"{"fname": 3, "dialogue": "d", "summary": "s"}"#])?;
        let not_object = write_lines(&[r#"["a", "b"]"#])?;

        for file in [&missing, &mistyped, &not_object] {
            assert!(matches!(
                load_table(file.path(), Split::Train, Schema::Labelled),
                Err(DialogSumError::DataError { line: 1, .. })
            ));
        }
        Ok(())
    }

    #[test]
    fn blank_line_is_rejected() -> anyhow::Result<()> {
        let file = write_lines(&[
            r#"{"fname": "a", "dialogue": "d", "summary": "s"}"#,
            "   ",
            r#"{"fname": "b", "dialogue": "d", "summary": "s"}"#,
        ])?;
        match load_table(file.path(), Split::Train, Schema::Labelled) {
            Err(DialogSumError::DataError { line, message, .. }) => {
                assert_eq!(line, 2);
                assert!(message.contains("blank line"));
            }
            other => panic!("expected a data error, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn missing_file_is_an_io_error() {
        assert!(matches!(
            load_table("does/not/exist.jsonl", Split::Train, Schema::Labelled),
            Err(DialogSumError::IOError(_))
        ));
    }
}
