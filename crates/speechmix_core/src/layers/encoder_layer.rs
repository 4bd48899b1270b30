//! EncoderLayer - post-LN transformer encoder layer

use candle_core::{Module, Result, Tensor};
use candle_nn::VarBuilder;

use super::{layer_norm, FeedForward, LayerNorm, MultiHeadAttention};

/// Checkpoint key names of an encoder layer. Speech and text checkpoints
/// name the same sub-modules differently.
#[derive(Clone, Copy, Debug)]
pub struct LayerNames {
    pub attention: &'static str,
    pub attention_norm: &'static str,
    pub fc1: &'static str,
    pub fc2: &'static str,
    pub final_norm: &'static str,
}

impl LayerNames {
    pub const SPEECH: Self = Self {
        attention: "attention",
        attention_norm: "layer_norm",
        fc1: "feed_forward.intermediate_dense",
        fc2: "feed_forward.output_dense",
        final_norm: "final_layer_norm",
    };

    pub const TEXT: Self = Self {
        attention: "self_attn",
        attention_norm: "self_attn_layer_norm",
        fc1: "fc1",
        fc2: "fc2",
        final_norm: "final_layer_norm",
    };
}

pub struct EncoderLayer {
    pub attention: MultiHeadAttention,
    pub attention_norm: LayerNorm,
    pub ffn: FeedForward,
    pub final_norm: LayerNorm,
}

impl EncoderLayer {
    pub fn load(
        dim: usize,
        n_heads: usize,
        ffn_dim: usize,
        eps: f64,
        names: LayerNames,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            attention: MultiHeadAttention::load(dim, n_heads, vb.pp(names.attention))?,
            attention_norm: layer_norm(dim, eps, vb.pp(names.attention_norm))?,
            ffn: FeedForward::load(dim, ffn_dim, (names.fc1, names.fc2), vb.clone())?,
            final_norm: layer_norm(dim, eps, vb.pp(names.final_norm))?,
        })
    }

    pub fn forward(&self, x: &Tensor, mask: Option<&Tensor>) -> Result<Tensor> {
        let attn = self.attention.forward(x, None, mask)?;
        let x = self.attention_norm.forward(&(x + attn)?)?;
        let ff = self.ffn.forward(&x)?;
        self.final_norm.forward(&(x + ff)?)
    }
}
