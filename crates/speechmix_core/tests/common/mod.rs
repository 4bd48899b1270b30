#![allow(dead_code)]

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use speechmix_core::{ModelVariant, SpeechEncoderConfig, SpeechMix, SpeechMixConfig, TextModelConfig};
use tokenizers::Tokenizer;

pub const VOCAB: [&str; 12] = [
    "<pad>", "<s>", "</s>", "<unk>", "hello", "world", "the", "cat", "sat", "on", "mat", "a",
];

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

pub fn tokenizer() -> Tokenizer {
    Tokenizer::from_bytes(tokenizer_json().as_bytes()).expect("tokenizer json")
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
        max_position_embeddings: 32,
        pad_token_id: 0,
        bos_token_id: Some(1),
        eos_token_id: 2,
        decoder_start_token_id: Some(2),
        max_length: 5,
        layer_norm_eps: 1e-5,
    }
}

pub fn tiny_model(variant: ModelVariant, config: SpeechMixConfig) -> anyhow::Result<(SpeechMix, VarMap)> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let model = SpeechMix::load(variant, config, &speech_config(), &text_config(), tokenizer(), vb)?;
    Ok((model, varmap))
}
