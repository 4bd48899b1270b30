#![allow(dead_code)]

use speechmix::train::args::VariantFlags;
use speechmix::train::{DatasetArgs, ModelArgs};
use speechmix_core::model::config::default_fixed_except;
use speechmix_core::{SpeechEncoderConfig, TextModelConfig};
use std::path::{Path, PathBuf};

pub const VOCAB: [&str; 12] = [
    "<pad>", "<s>", "</s>", "<unk>", "hello", "world", "the", "cat", "sat", "on", "mat", "a",
];

pub const TRAIN_ROWS: [&str; 4] = ["Hello world", "the cat sat", "ON THE MAT", "a cat"];
pub const TEST_ROWS: [&str; 2] = ["hello cat", "the mat"];

pub fn tokenizer_json() -> String {
    let added: Vec<String> = (0..4)
        .map(|i| {
            format!(
                r#"{{"id":{i},"content":"{}","single_word":false,"lstrip":false,"rstrip":false,"normalized":false,"special":true}}"#,
                VOCAB[i]
            )
        })
        .collect();
    let vocab: Vec<String> = VOCAB
        .iter()
        .enumerate()
        .map(|(i, w)| format!(r#""{w}":{i}"#))
        .collect();
    format!(
        r#"{{"version":"1.0","truncation":null,"padding":null,"added_tokens":[{}],
            "normalizer":null,"pre_tokenizer":{{"type":"Whitespace"}},"post_processor":null,
            "decoder":null,"model":{{"type":"WordLevel","vocab":{{{}}},"unk_token":"<unk>"}}}}"#,
        added.join(","),
        vocab.join(",")
    )
}

pub fn speech_config() -> SpeechEncoderConfig {
    SpeechEncoderConfig {
        hidden_size: 8,
        num_hidden_layers: 2,
        num_attention_heads: 2,
        intermediate_size: 16,
        conv_dim: vec![8, 8],
        conv_kernel: vec![4, 2],
        conv_stride: vec![2, 2],
        layer_norm_eps: 1e-5,
    }
}

pub fn text_config() -> TextModelConfig {
    TextModelConfig {
        vocab_size: VOCAB.len(),
        d_model: 8,
        encoder_layers: 1,
        decoder_layers: 1,
        attention_heads: 2,
        ffn_dim: 16,
        // 450-sample fixtures give 112 speech frames through the text encoder
        max_position_embeddings: 128,
        pad_token_id: 0,
        bos_token_id: Some(1),
        eos_token_id: 2,
        decoder_start_token_id: Some(2),
        max_length: 5,
        layer_norm_eps: 1e-5,
    }
}

/// Writes `speech/` and `text/` model directories (configs and tokenizer,
/// no weights) under `root`.
pub fn write_model_dirs(root: &Path) -> anyhow::Result<(PathBuf, PathBuf)> {
    let speech = root.join("speech");
    let text = root.join("text");
    std::fs::create_dir_all(&speech)?;
    std::fs::create_dir_all(&text)?;
    std::fs::write(speech.join("config.json"), serde_json::to_string(&speech_config())?)?;
    std::fs::write(text.join("config.json"), serde_json::to_string(&text_config())?)?;
    std::fs::write(text.join("tokenizer.json"), tokenizer_json())?;
    Ok((speech, text))
}

pub fn write_wav(path: &Path, samples: usize, freq: f32) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for i in 0..samples {
        let v = (i as f32 * freq).sin() * 8000.0;
        writer.write_sample(v as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

/// `{root}/corpus/en/{train,test}.jsonl` with one short WAV per row.
pub fn write_dataset(root: &Path) -> anyhow::Result<PathBuf> {
    let corpus = root.join("corpus");
    let split_dir = corpus.join("en");
    std::fs::create_dir_all(&split_dir)?;
    for (split, rows) in [("train", &TRAIN_ROWS[..]), ("test", &TEST_ROWS[..])] {
        let mut lines = Vec::new();
        for (i, text) in rows.iter().enumerate() {
            let wav = format!("{split}_{i}.wav");
            write_wav(&split_dir.join(&wav), 300 + 50 * i, 0.05 + 0.01 * i as f32)?;
            lines.push(serde_json::json!({ "audio": wav, "sentence": text }).to_string());
        }
        std::fs::write(split_dir.join(format!("{split}.jsonl")), lines.join("\n"))?;
    }
    Ok(corpus)
}

pub fn model_args(speech: &Path, text: &Path, variant: VariantFlags) -> ModelArgs {
    ModelArgs {
        speech_model_config: speech.to_string_lossy().into_owned(),
        nlp_model_config: text.to_string_lossy().into_owned(),
        variant,
        share_layer_ratio: 0.0,
        down_scale: 2,
        weighted_sum: false,
        fixed_parameters: false,
        fixed_except: default_fixed_except(),
        fp16: false,
    }
}

pub fn dataset_args(corpus: &Path, cache_dir: &Path) -> DatasetArgs {
    DatasetArgs {
        dataset: corpus.to_string_lossy().into_owned(),
        field: "en".to_string(),
        train_split: "train".to_string(),
        test_split: "test".to_string(),
        cache_dir: cache_dir.to_path_buf(),
        worker: 2,
    }
}
