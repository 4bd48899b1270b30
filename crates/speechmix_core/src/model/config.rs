//! Model configurations

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Speech encoder configuration (`config.json` of the speech checkpoint).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct SpeechEncoderConfig {
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    #[serde(default = "default_conv_dim")]
    pub conv_dim: Vec<usize>,
    #[serde(default = "default_conv_kernel")]
    pub conv_kernel: Vec<usize>,
    #[serde(default = "default_conv_stride")]
    pub conv_stride: Vec<usize>,
    #[serde(default = "default_eps")]
    pub layer_norm_eps: f64,
}

fn default_conv_dim() -> Vec<usize> {
    vec![512; 7]
}

fn default_conv_kernel() -> Vec<usize> {
    vec![10, 3, 3, 3, 3, 2, 2]
}

fn default_conv_stride() -> Vec<usize> {
    vec![5, 2, 2, 2, 2, 2, 2]
}

fn default_eps() -> f64 {
    1e-5
}

/// Text encoder-decoder configuration (`config.json` of the NLP checkpoint).
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct TextModelConfig {
    pub vocab_size: usize,
    pub d_model: usize,
    #[serde(alias = "num_hidden_layers")]
    pub encoder_layers: usize,
    pub decoder_layers: usize,
    #[serde(alias = "encoder_attention_heads")]
    pub attention_heads: usize,
    #[serde(alias = "encoder_ffn_dim")]
    pub ffn_dim: usize,
    #[serde(default = "default_max_positions")]
    pub max_position_embeddings: usize,
    #[serde(default)]
    pub pad_token_id: u32,
    #[serde(default)]
    pub bos_token_id: Option<u32>,
    pub eos_token_id: u32,
    #[serde(default)]
    pub decoder_start_token_id: Option<u32>,
    /// Generation cap for greedy decoding.
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    #[serde(default = "default_eps")]
    pub layer_norm_eps: f64,
}

fn default_max_positions() -> usize {
    1024
}

fn default_max_length() -> usize {
    200
}

impl TextModelConfig {
    /// Token the decoder starts from; falls back to EOS as BART does.
    pub fn decoder_start(&self) -> u32 {
        self.decoder_start_token_id.unwrap_or(self.eos_token_id)
    }
}

/// Options of the bridged model that come from the command line.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct SpeechMixConfig {
    /// Fraction of top speech-encoder layers to drop.
    pub share_layer_ratio: f64,
    /// Stride of the length adapter.
    pub down_scale: usize,
    /// Learn a softmax-weighted sum over all encoder layer outputs.
    pub weighted_sum: bool,
    /// Freeze the decoder except names containing a `fixed_except` entry.
    pub fixed_parameters: bool,
    pub fixed_except: Vec<String>,
    /// Weight of the distillation / adversarial terms.
    pub aux_loss_weight: f64,
}

impl Default for SpeechMixConfig {
    fn default() -> Self {
        Self {
            share_layer_ratio: 0.0,
            down_scale: 8,
            weighted_sum: false,
            fixed_parameters: false,
            fixed_except: default_fixed_except(),
            aux_loss_weight: 1.0,
        }
    }
}

pub fn default_fixed_except() -> Vec<String> {
    [
        "layer_norm",
        "encoder_attn",
        "enc_to_dec_proj",
        "length_adapter",
        "layernorm_embedding",
        "attention",
        "encoder",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Reads a serde JSON config file.
pub fn read_json_config<T: serde::de::DeserializeOwned>(path: &Path) -> candle_core::Result<T> {
    let file = std::fs::File::open(path)?;
    serde_json::from_reader(std::io::BufReader::new(file))
        .map_err(|e| candle_core::Error::Msg(format!("invalid config {}: {e}", path.display())))
}
