//! Recognition metrics: corpus-level character and word error rates.

use anyhow::{anyhow, Result};
use serde::Serialize;
use speechmix_core::IGNORE_INDEX;
use tokenizers::Tokenizer;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Metrics {
    pub cer: f64,
    pub wer: f64,
}

/// Levenshtein distance between two token sequences.
pub fn edit_distance<T: PartialEq>(reference: &[T], hypothesis: &[T]) -> usize {
    let m = hypothesis.len();
    if reference.is_empty() {
        return m;
    }
    let mut prev: Vec<usize> = (0..=m).collect();
    let mut cur = vec![0usize; m + 1];
    for (i, r) in reference.iter().enumerate() {
        cur[0] = i + 1;
        for (j, h) in hypothesis.iter().enumerate() {
            let cost = usize::from(r != h);
            cur[j + 1] = (prev[j + 1] + 1).min(cur[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[m]
}

/// Total edits over total reference units; an empty reference corpus
/// scores 0 when the hypotheses are empty too, 1 otherwise.
fn error_rate<T: PartialEq>(pairs: impl Iterator<Item = (Vec<T>, Vec<T>)>) -> f64 {
    let (mut edits, mut total) = (0usize, 0usize);
    for (r, h) in pairs {
        edits += edit_distance(&r, &h);
        total += r.len();
    }
    match (total, edits) {
        (0, 0) => 0.0,
        (0, _) => 1.0,
        _ => edits as f64 / total as f64,
    }
}

pub fn cer(references: &[String], hypotheses: &[String]) -> f64 {
    error_rate(
        references
            .iter()
            .zip(hypotheses)
            .map(|(r, h)| (r.chars().collect::<Vec<_>>(), h.chars().collect::<Vec<_>>())),
    )
}

pub fn wer(references: &[String], hypotheses: &[String]) -> f64 {
    error_rate(
        references
            .iter()
            .zip(hypotheses)
            .map(|(r, h)| (r.split_whitespace().collect::<Vec<_>>(), h.split_whitespace().collect::<Vec<_>>())),
    )
}

/// Drops ignore-index (and any other negative) entries.
pub fn strip_ignored(ids: &[i64]) -> Vec<u32> {
    ids.iter().filter(|&&t| t != IGNORE_INDEX && t >= 0).map(|&t| t as u32).collect()
}

pub fn decode_batch(tokenizer: &Tokenizer, ids: &[Vec<i64>]) -> Result<Vec<String>> {
    ids.iter()
        .map(|row| {
            tokenizer
                .decode(&strip_ignored(row), true)
                .map_err(|e| anyhow!("decode failed: {}", e))
        })
        .collect()
}

/// CER and WER of predicted ids against label ids, both decoded with
/// special tokens skipped.
pub fn compute_metrics(tokenizer: &Tokenizer, predictions: &[Vec<i64>], labels: &[Vec<i64>]) -> Result<Metrics> {
    if predictions.len() != labels.len() {
        return Err(anyhow!("{} predictions for {} labels", predictions.len(), labels.len()));
    }
    let pred_str = decode_batch(tokenizer, predictions)?;
    let label_str = decode_batch(tokenizer, labels)?;
    Ok(Metrics {
        cer: cer(&label_str, &pred_str),
        wer: wer(&label_str, &pred_str),
    })
}
