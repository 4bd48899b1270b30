//! Example preparation: audio decoding, transcript tokenization and
//! optional self-labeling by the text model.

use anyhow::{anyhow, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use rayon::ThreadPool;
use speechmix_core::SpeechMix;
use tokenizers::Tokenizer;
use tracing::{info, warn};

use super::audio::load_audio;
use super::source::RawExample;
use super::Example;

/// Transcript token ids: lowercased, no special tokens.
pub fn tokenize_transcript(tokenizer: &Tokenizer, sentence: &str) -> Result<Vec<u32>> {
    let encoding = tokenizer
        .encode(sentence.to_lowercase(), false)
        .map_err(|e| anyhow!("tokenization failed for {:?}: {}", sentence, e))?;
    Ok(encoding.get_ids().to_vec())
}

/// Builds one example from a decoded waveform. With `selftype` the labels
/// are the text model's own greedy output for the transcript and the
/// transcript ids are kept as `text_input_ids`.
pub fn prepare_example(model: &SpeechMix, input_values: Vec<f32>, sentence: &str, selftype: bool) -> Result<Example> {
    let ids = tokenize_transcript(&model.tokenizer, sentence)?;
    let (mut labels, text_input_ids) = if selftype {
        let generated = model.decoder_model.greedy_generate(&ids, &model.device)?;
        (generated, Some(ids))
    } else {
        (ids, None)
    };
    labels.push(model.text_config().eos_token_id);

    Ok(Example {
        length: input_values.len(),
        input_values,
        text: sentence.to_string(),
        input_ids: labels.clone(),
        labels,
        text_input_ids,
    })
}

fn progress_bar(len: usize, what: &str) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
    {
        pb.set_style(style);
    }
    pb.set_message(what.to_string());
    pb
}

/// Prepares a whole split. Audio is decoded on `pool`; self-labeling runs
/// on the model device one example at a time.
pub fn prepare_split(model: &SpeechMix, raw: &[RawExample], selftype: bool, pool: &ThreadPool) -> Result<Vec<Example>> {
    let pb = progress_bar(raw.len(), "decoding audio");
    let waveforms: Vec<Vec<f32>> = pool.install(|| {
        raw.par_iter()
            .map(|row| {
                let samples = load_audio(&row.audio);
                pb.inc(1);
                samples
            })
            .collect::<std::result::Result<_, _>>()
    })?;
    pb.finish_and_clear();

    let empty = waveforms.iter().filter(|w| w.is_empty()).count();
    if empty > 0 {
        warn!("{} audio files decoded to zero samples", empty);
    }

    let pb = progress_bar(raw.len(), if selftype { "self-labeling" } else { "tokenizing" });
    let mut examples = Vec::with_capacity(raw.len());
    for (row, samples) in raw.iter().zip(waveforms) {
        examples.push(prepare_example(model, samples, &row.sentence, selftype)?);
        pb.inc(1);
    }
    pb.finish_and_clear();

    info!("Prepared {} examples", examples.len());
    Ok(examples)
}
