//! MultiHeadAttention - scaled dot-product attention with additive masks

use candle_core::{Device, Module, Result, Tensor, D};
use candle_nn::{linear, ops::softmax, Linear, VarBuilder};

/// Additive value used for masked attention positions.
const MASK_VALUE: f32 = -1e9;

/// Multi-head attention. Used as self attention (`kv = None`) or as cross
/// attention over encoder states.
#[derive(Clone)]
pub struct MultiHeadAttention {
    pub q_proj: Linear,
    pub k_proj: Linear,
    pub v_proj: Linear,
    pub out_proj: Linear,
    pub n_heads: usize,
    pub head_dim: usize,
    pub scaling: f64,
}

impl MultiHeadAttention {
    pub fn load(dim: usize, n_heads: usize, vb: VarBuilder) -> Result<Self> {
        if n_heads == 0 || dim % n_heads != 0 {
            candle_core::bail!("hidden size {dim} is not divisible by {n_heads} heads");
        }
        let head_dim = dim / n_heads;
        Ok(Self {
            q_proj: linear(dim, dim, vb.pp("q_proj"))?,
            k_proj: linear(dim, dim, vb.pp("k_proj"))?,
            v_proj: linear(dim, dim, vb.pp("v_proj"))?,
            out_proj: linear(dim, dim, vb.pp("out_proj"))?,
            n_heads,
            head_dim,
            scaling: 1.0 / (head_dim as f64).sqrt(),
        })
    }

    /// [batch, seq, dim] -> [batch, heads, seq, head_dim]
    fn split_heads(&self, x: &Tensor) -> Result<Tensor> {
        let (b, t, _) = x.dims3()?;
        x.reshape((b, t, self.n_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }

    /// `x`: [batch, tq, dim]. `kv`: [batch, tk, dim] for cross attention.
    /// `mask`: additive, broadcastable to [batch, heads, tq, tk].
    pub fn forward(&self, x: &Tensor, kv: Option<&Tensor>, mask: Option<&Tensor>) -> Result<Tensor> {
        let (b, tq, _) = x.dims3()?;
        let source = kv.unwrap_or(x);

        let q = self.split_heads(&(self.q_proj.forward(x)? * self.scaling)?)?;
        let k = self.split_heads(&self.k_proj.forward(source)?)?;
        let v = self.split_heads(&self.v_proj.forward(source)?)?;

        let scores = q.matmul(&k.t()?.contiguous()?)?;
        let scores = match mask {
            Some(m) => scores.broadcast_add(&m.to_dtype(scores.dtype())?)?,
            None => scores,
        };
        let probs = softmax(&scores, D::Minus1)?;
        let out = probs
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((b, tq, self.n_heads * self.head_dim))?;
        self.out_proj.forward(&out)
    }
}

/// Key padding mask of shape [batch, 1, 1, max_len]: 0 for valid frames,
/// a large negative value past each row's length.
pub fn padding_mask(lengths: &[usize], max_len: usize, device: &Device) -> Result<Tensor> {
    let mut data = Vec::with_capacity(lengths.len() * max_len);
    for &len in lengths {
        for j in 0..max_len {
            data.push(if j < len { 0f32 } else { MASK_VALUE });
        }
    }
    Tensor::from_vec(data, (lengths.len(), 1, 1, max_len), device)
}

/// Causal mask of shape [1, 1, len, len].
pub fn causal_mask(len: usize, device: &Device) -> Result<Tensor> {
    let data: Vec<f32> = (0..len)
        .flat_map(|i| (0..len).map(move |j| if j > i { MASK_VALUE } else { 0f32 }))
        .collect();
    Tensor::from_vec(data, (1, 1, len, len), device)
}
