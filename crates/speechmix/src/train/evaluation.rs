//! Evaluation over a cached split: teacher-forced loss plus CER/WER of the
//! argmax predictions.

use anyhow::Result;
use candle_core::{DType, Tensor, D};
use serde_json::{Map, Value};
use speechmix_core::{SpeechMix, IGNORE_INDEX};

use crate::data::sampler::sequential_batches;
use crate::data::{CachedSplit, DataCollatorWithPadding};
use crate::metrics::{compute_metrics, Metrics};

#[derive(Clone, Debug)]
pub struct EvalOutput {
    pub loss: f64,
    pub metrics: Metrics,
    pub samples: usize,
}

impl EvalOutput {
    /// `eval_`-prefixed values, as logged and passed to callbacks.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("eval_loss".into(), self.loss.into());
        m.insert("eval_cer".into(), self.metrics.cer.into());
        m.insert("eval_wer".into(), self.metrics.wer.into());
        m.insert("eval_samples".into(), self.samples.into());
        m
    }
}

/// Argmax token per position, with ignored label positions set back to
/// the ignore index.
pub fn masked_predictions(logits: &Tensor, labels: &Tensor) -> Result<Vec<Vec<i64>>> {
    let pred = logits.argmax(D::Minus1)?.to_dtype(DType::I64)?;
    let mask = labels.ge(0i64)?;
    let ignored = Tensor::full(IGNORE_INDEX, pred.shape(), pred.device())?;
    Ok(mask.where_cond(&pred, &ignored)?.to_vec2::<i64>()?)
}

pub fn evaluate_split(
    model: &SpeechMix,
    split: &CachedSplit,
    collator: &DataCollatorWithPadding,
    batch_size: usize,
) -> Result<EvalOutput> {
    if split.is_empty() {
        anyhow::bail!("❌ Evaluation split {:?} is empty", split.path());
    }
    let mut loss_sum = 0.0;
    let mut samples = 0usize;
    let mut predictions = Vec::with_capacity(split.len());
    let mut references = Vec::with_capacity(split.len());

    for indices in sequential_batches(split.len(), batch_size) {
        let examples = split.get_many(&indices)?;
        let collated = collator.collate(&examples)?;
        let batch = collated.to_model_batch(&model.device, model.dtype())?;
        let out = model.forward(&batch)?;

        let n = indices.len();
        loss_sum += out.loss.to_dtype(DType::F64)?.to_scalar::<f64>()? * n as f64;
        samples += n;
        predictions.extend(masked_predictions(&out.logits, &batch.labels)?);
        references.extend(collated.labels);
    }

    let metrics = compute_metrics(&model.tokenizer, &predictions, &references)?;
    Ok(EvalOutput {
        loss: loss_sum / samples as f64,
        metrics,
        samples,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_masked_predictions() -> Result<()> {
        let device = Device::Cpu;
        let logits = Tensor::new(&[[[0f32, 1.0, 0.0], [2.0, 0.0, 0.0]], [[0.0, 0.0, 3.0], [0.0, 4.0, 0.0]]], &device)?;
        let labels = Tensor::new(&[[1i64, 0], [2, IGNORE_INDEX]], &device)?;
        assert_eq!(masked_predictions(&logits, &labels)?, vec![vec![1, 0], vec![2, IGNORE_INDEX]]);
        Ok(())
    }
}
