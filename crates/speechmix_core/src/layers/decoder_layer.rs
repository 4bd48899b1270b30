//! DecoderLayer - post-LN transformer decoder layer with cross attention

use candle_core::{Module, Result, Tensor};
use candle_nn::VarBuilder;

use super::{layer_norm, FeedForward, LayerNorm, MultiHeadAttention};

pub struct DecoderLayer {
    pub self_attn: MultiHeadAttention,
    pub self_attn_layer_norm: LayerNorm,
    pub encoder_attn: MultiHeadAttention,
    pub encoder_attn_layer_norm: LayerNorm,
    pub ffn: FeedForward,
    pub final_layer_norm: LayerNorm,
}

impl DecoderLayer {
    pub fn load(dim: usize, n_heads: usize, ffn_dim: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            self_attn: MultiHeadAttention::load(dim, n_heads, vb.pp("self_attn"))?,
            self_attn_layer_norm: layer_norm(dim, eps, vb.pp("self_attn_layer_norm"))?,
            encoder_attn: MultiHeadAttention::load(dim, n_heads, vb.pp("encoder_attn"))?,
            encoder_attn_layer_norm: layer_norm(dim, eps, vb.pp("encoder_attn_layer_norm"))?,
            ffn: FeedForward::load(dim, ffn_dim, ("fc1", "fc2"), vb.clone())?,
            final_layer_norm: layer_norm(dim, eps, vb.pp("final_layer_norm"))?,
        })
    }

    /// `self_mask` is causal (+ padding); `memory_mask` masks encoder padding.
    pub fn forward(
        &self,
        x: &Tensor,
        memory: &Tensor,
        self_mask: &Tensor,
        memory_mask: Option<&Tensor>,
    ) -> Result<Tensor> {
        let h = self.self_attn.forward(x, None, Some(self_mask))?;
        let x = self.self_attn_layer_norm.forward(&(x + h)?)?;

        let h = self.encoder_attn.forward(&x, Some(memory), memory_mask)?;
        let x = self.encoder_attn_layer_norm.forward(&(x + h)?)?;

        let h = self.ffn.forward(&x)?;
        self.final_layer_norm.forward(&(x + h)?)
    }
}
