//! Data collation: padding prepared examples into model batches.

use anyhow::{bail, Result};
use candle_core::{DType, Device, Tensor};
use speechmix_core::{SpeechMixBatch, IGNORE_INDEX};

use super::Example;

/// How label and text id sequences are padded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Padding {
    /// Pad to the longest sequence in the batch.
    #[default]
    Longest,
    /// Pad to `max_length_labels`; longer sequences are kept whole.
    MaxLength,
    /// No padding; every sequence must already have the same length.
    DoNotPad,
}

pub struct DataCollatorWithPadding {
    pub pad_token_id: u32,
    pub bos_token_id: Option<u32>,
    pub padding: Padding,
    pub max_length_labels: Option<usize>,
    pub pad_to_multiple_of_labels: Option<usize>,
}

/// A padded batch, still on the host.
#[derive(Debug, Clone)]
pub struct CollatedBatch {
    /// [batch_size * max_samples] zero-padded waveforms, row-major.
    pub input_values: Vec<f32>,
    pub input_lengths: Vec<usize>,
    pub max_samples: usize,
    /// Padding positions hold `IGNORE_INDEX`.
    pub labels: Vec<Vec<i64>>,
    pub text_input_ids: Option<Vec<Vec<u32>>>,
    pub text_lengths: Option<Vec<usize>>,
}

impl DataCollatorWithPadding {
    pub fn new(pad_token_id: u32, bos_token_id: Option<u32>) -> Self {
        Self {
            pad_token_id,
            bos_token_id,
            padding: Padding::Longest,
            max_length_labels: None,
            pad_to_multiple_of_labels: None,
        }
    }

    /// Padded width for sequences whose longest member is `longest`.
    fn target_len(&self, lengths: &[usize]) -> Result<usize> {
        let longest = lengths.iter().copied().max().unwrap_or(0);
        let width = match self.padding {
            Padding::Longest => longest,
            Padding::MaxLength => self.max_length_labels.map_or(longest, |m| m.max(longest)),
            Padding::DoNotPad => {
                if lengths.iter().any(|&l| l != longest) {
                    bail!("padding is disabled but sequence lengths differ: {:?}", lengths);
                }
                return Ok(longest);
            }
        };
        Ok(match self.pad_to_multiple_of_labels {
            Some(m) if m > 1 => width.div_ceil(m) * m,
            _ => width,
        })
    }

    /// Pads `seqs` with `fill`, returning the rows and their true lengths.
    fn pad<T: Copy>(&self, seqs: &[&[T]], fill: T) -> Result<(Vec<Vec<T>>, Vec<usize>)> {
        let lengths: Vec<usize> = seqs.iter().map(|s| s.len()).collect();
        let width = self.target_len(&lengths)?;
        let rows = seqs
            .iter()
            .map(|s| {
                let mut row = s.to_vec();
                row.resize(width, fill);
                row
            })
            .collect();
        Ok((rows, lengths))
    }

    pub fn collate(&self, features: &[Example]) -> Result<CollatedBatch> {
        if features.is_empty() {
            bail!("cannot collate an empty batch");
        }

        let input_lengths: Vec<usize> = features.iter().map(|f| f.input_values.len()).collect();
        let max_samples = input_lengths.iter().copied().max().unwrap_or(0);
        let mut input_values = vec![0f32; features.len() * max_samples];
        for (row, f) in input_values.chunks_mut(max_samples.max(1)).zip(features) {
            row[..f.input_values.len()].copy_from_slice(&f.input_values);
        }

        let label_seqs: Vec<Vec<i64>> = features
            .iter()
            .map(|f| f.labels.iter().map(|&t| t as i64).collect())
            .collect();
        let label_refs: Vec<&[i64]> = label_seqs.iter().map(Vec::as_slice).collect();
        let (mut labels, _) = self.pad(&label_refs, IGNORE_INDEX)?;

        // Drop a BOS column added by tokenization; the decoder adds its own
        // start token.
        if let Some(bos) = self.bos_token_id {
            if labels.iter().all(|row| row.first() == Some(&(bos as i64))) {
                for row in labels.iter_mut() {
                    row.remove(0);
                }
            }
        }

        let (text_input_ids, text_lengths) = if features.iter().all(|f| f.text_input_ids.is_some()) {
            let refs: Vec<&[u32]> = features
                .iter()
                .filter_map(|f| f.text_input_ids.as_deref())
                .collect();
            let (rows, lengths) = self.pad(&refs, self.pad_token_id)?;
            (Some(rows), Some(lengths))
        } else {
            (None, None)
        };

        Ok(CollatedBatch {
            input_values,
            input_lengths,
            max_samples,
            labels,
            text_input_ids,
            text_lengths,
        })
    }
}

impl CollatedBatch {
    pub fn batch_size(&self) -> usize {
        self.input_lengths.len()
    }

    /// Moves the batch onto `device`, waveforms cast to `dtype`.
    pub fn to_model_batch(&self, device: &Device, dtype: DType) -> candle_core::Result<SpeechMixBatch> {
        let b = self.batch_size();
        let input_values = Tensor::from_slice(&self.input_values, (b, self.max_samples), device)?.to_dtype(dtype)?;
        let label_len = self.labels.first().map_or(0, Vec::len);
        let flat: Vec<i64> = self.labels.iter().flatten().copied().collect();
        let labels = Tensor::from_vec(flat, (b, label_len), device)?;

        let text_input_ids = match &self.text_input_ids {
            Some(rows) => {
                let width = rows.first().map_or(0, Vec::len);
                let flat: Vec<u32> = rows.iter().flatten().copied().collect();
                Some(Tensor::from_vec(flat, (b, width), device)?)
            }
            None => None,
        };

        Ok(SpeechMixBatch {
            input_values,
            input_lengths: self.input_lengths.clone(),
            labels,
            text_input_ids,
            text_lengths: self.text_lengths.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example(samples: usize, labels: &[u32], text: Option<&[u32]>) -> Example {
        Example {
            input_values: vec![0.5; samples],
            length: samples,
            text: String::new(),
            labels: labels.to_vec(),
            input_ids: labels.to_vec(),
            text_input_ids: text.map(<[u32]>::to_vec),
        }
    }

    #[test]
    fn test_label_padding_is_ignore_index() -> Result<()> {
        let collator = DataCollatorWithPadding::new(0, Some(1));
        let batch = collator.collate(&[example(3, &[5, 6, 2], None), example(5, &[7, 2], None), example(1, &[0, 2], None)])?;

        assert_eq!(batch.labels, vec![vec![5, 6, 2], vec![7, 2, IGNORE_INDEX], vec![0, 2, IGNORE_INDEX]]);
        assert_eq!(batch.input_lengths, vec![3, 5, 1]);
        assert_eq!(batch.max_samples, 5);
        assert_eq!(&batch.input_values[5..10], &[0.5, 0.5, 0.5, 0.5, 0.5]);
        assert_eq!(&batch.input_values[13..15], &[0.0, 0.0]);
        assert!(batch.text_input_ids.is_none());
        Ok(())
    }

    #[test]
    fn test_leading_bos_column_is_dropped() -> Result<()> {
        let collator = DataCollatorWithPadding::new(0, Some(1));
        let batch = collator.collate(&[example(2, &[1, 5, 2], None), example(2, &[1, 2], None)])?;
        assert_eq!(batch.labels, vec![vec![5, 2], vec![2, IGNORE_INDEX]]);

        // Only some rows start with BOS: nothing is dropped.
        let batch = collator.collate(&[example(2, &[1, 5, 2], None), example(2, &[6, 2], None)])?;
        assert_eq!(batch.labels, vec![vec![1, 5, 2], vec![6, 2, IGNORE_INDEX]]);
        Ok(())
    }

    #[test]
    fn test_text_ids_pad_with_pad_token() -> Result<()> {
        let mut collator = DataCollatorWithPadding::new(0, None);
        collator.pad_to_multiple_of_labels = Some(4);
        let batch = collator.collate(&[example(2, &[5, 2], Some(&[5])), example(2, &[6, 7, 2], Some(&[6, 7]))])?;
        assert_eq!(batch.text_input_ids, Some(vec![vec![5, 0, 0, 0], vec![6, 7, 0, 0]]));
        assert_eq!(batch.text_lengths, Some(vec![1, 2]));
        assert_eq!(batch.labels[0], vec![5, 2, IGNORE_INDEX, IGNORE_INDEX]);
        Ok(())
    }

    #[test]
    fn test_padding_modes() -> Result<()> {
        let mut collator = DataCollatorWithPadding::new(0, None);
        collator.padding = Padding::MaxLength;
        collator.max_length_labels = Some(4);
        let batch = collator.collate(&[example(1, &[5, 2], None)])?;
        assert_eq!(batch.labels, vec![vec![5, 2, IGNORE_INDEX, IGNORE_INDEX]]);

        collator.padding = Padding::DoNotPad;
        assert!(collator.collate(&[example(1, &[5, 2], None), example(1, &[2], None)]).is_err());
        Ok(())
    }

    #[test]
    fn test_to_model_batch_shapes() -> Result<()> {
        let collator = DataCollatorWithPadding::new(0, None);
        let batch = collator
            .collate(&[example(4, &[5, 2], Some(&[5])), example(2, &[2], Some(&[]))])?
            .to_model_batch(&Device::Cpu, DType::F32)?;
        assert_eq!(batch.input_values.dims(), &[2, 4]);
        assert_eq!(batch.labels.to_vec2::<i64>()?, vec![vec![5, 2], vec![2, IGNORE_INDEX]]);
        assert_eq!(batch.text_input_ids.map(|t| t.dims().to_vec()), Some(vec![2, 1]));
        Ok(())
    }
}
