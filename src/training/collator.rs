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

use crate::bart::shift_tokens_right;
use crate::pipelines::metrics::LabelIds;
use crate::pipelines::preprocessing::TokenizedExample;
use crate::DialogSumError;
use tch::{Device, Tensor};

/// Label value ignored by the loss
pub const IGNORE_INDEX: i64 = -100;

/// # Padded tensors for a batch of examples
pub struct Seq2SeqBatch {
    /// Shape (*batch size*, *source length*), padded with the padding token
    pub input_ids: Tensor,
    /// Shape (*batch size*, *source length*), 0 on padding
    pub attention_mask: Tensor,
    /// Shape (*batch size*, *target length*), padded with `IGNORE_INDEX`
    pub labels: Tensor,
    /// Labels shifted one position to the right behind the decoder start token
    pub decoder_input_ids: Tensor,
    /// Unpadded references, `None` where the batch was padded
    pub label_ids: Vec<LabelIds>,
}

/// # Pads tokenized examples into model-ready batches
#[derive(Debug, Clone, Copy)]
pub struct Seq2SeqCollator {
    pad_token_id: i64,
    decoder_start_token_id: i64,
}

fn pad_rows(rows: &[&[i64]], value: i64) -> Vec<Vec<i64>> {
    let width = rows.iter().map(|row| row.len()).max().unwrap_or(0);
    rows.iter()
        .map(|row| {
            let mut padded = row.to_vec();
            padded.resize(width, value);
            padded
        })
        .collect()
}

impl Seq2SeqCollator {
    pub fn new(pad_token_id: i64, decoder_start_token_id: i64) -> Seq2SeqCollator {
        Seq2SeqCollator {
            pad_token_id,
            decoder_start_token_id,
        }
    }

    /// Pads `examples` to the longest source and the longest target of the batch.
    pub fn collate(
        &self,
        examples: &[&TokenizedExample],
        device: Device,
    ) -> Result<Seq2SeqBatch, DialogSumError> {
        if examples.is_empty() {
            return Err(DialogSumError::ValueError(
                "cannot collate an empty batch".to_string(),
            ));
        }
        if let Some(example) = examples
            .iter()
            .find(|example| example.input_ids.is_empty() || example.labels.is_empty())
        {
            return Err(DialogSumError::ValueError(format!(
                "example {} has no tokens",
                example.record.fname
            )));
        }

        let sources: Vec<&[i64]> = examples.iter().map(|e| e.input_ids.as_slice()).collect();
        let masks: Vec<&[i64]> = examples
            .iter()
            .map(|e| e.attention_mask.as_slice())
            .collect();
        let targets: Vec<&[i64]> = examples.iter().map(|e| e.labels.as_slice()).collect();

        let input_ids = Tensor::from_slice2(&pad_rows(&sources, self.pad_token_id)).to(device);
        let attention_mask = Tensor::from_slice2(&pad_rows(&masks, 0)).to(device);
        let labels = Tensor::from_slice2(&pad_rows(&targets, IGNORE_INDEX)).to(device);
        let decoder_input_ids =
            shift_tokens_right(&labels, self.pad_token_id, self.decoder_start_token_id)?;

        let target_width = targets.iter().map(|row| row.len()).max().unwrap_or(0);
        let label_ids = targets
            .iter()
            .map(|row| {
                let mut ids: LabelIds = row.iter().copied().map(Some).collect();
                ids.resize(target_width, None);
                ids
            })
            .collect();

        Ok(Seq2SeqBatch {
            input_ids,
            attention_mask,
            labels,
            decoder_input_ids,
            label_ids,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::data::DialogueRecord;

    fn example(input_ids: Vec<i64>, labels: Vec<i64>) -> TokenizedExample {
        TokenizedExample {
            record: DialogueRecord {
                fname: "train_0".to_string(),
                dialogue: String::new(),
                summary: String::new(),
            },
            attention_mask: vec![1; input_ids.len()],
            input_ids,
            labels,
        }
    }

    #[test]
    fn pads_to_longest_example() -> anyhow::Result<()> {
        let collator = Seq2SeqCollator::new(1, 2);
        let first = example(vec![0, 10, 11, 2], vec![0, 20, 2]);
        let second = example(vec![0, 12, 2], vec![0, 21, 22, 23, 2]);
        let batch = collator.collate(&[&first, &second], Device::Cpu)?;

        assert_eq!(
            Vec::<Vec<i64>>::try_from(&batch.input_ids)?,
            vec![vec![0, 10, 11, 2], vec![0, 12, 2, 1]]
        );
        assert_eq!(
            Vec::<Vec<i64>>::try_from(&batch.attention_mask)?,
            vec![vec![1, 1, 1, 1], vec![1, 1, 1, 0]]
        );
        assert_eq!(
            Vec::<Vec<i64>>::try_from(&batch.labels)?,
            vec![vec![0, 20, 2, -100, -100], vec![0, 21, 22, 23, 2]]
        );
        assert_eq!(
            Vec::<Vec<i64>>::try_from(&batch.decoder_input_ids)?,
            vec![vec![2, 0, 20, 2, 1], vec![2, 0, 21, 22, 23]]
        );
        assert_eq!(
            batch.label_ids[0],
            vec![Some(0), Some(20), Some(2), None, None]
        );
        Ok(())
    }

    #[test]
    fn rejects_empty_batches() {
        let collator = Seq2SeqCollator::new(1, 2);
        assert!(collator.collate(&[], Device::Cpu).is_err());
        let empty = example(vec![], vec![0, 2]);
        assert!(collator.collate(&[&empty], Device::Cpu).is_err());
    }
}
