//! LengthAdapter - shortens encoder sequences by `down_scale`

use candle_core::{Module, Result, Tensor};
use candle_nn::{conv1d, Conv1d, Conv1dConfig, VarBuilder};

use super::conv_out_len;

pub struct LengthAdapter {
    pub conv: Conv1d,
    pub down_scale: usize,
}

impl LengthAdapter {
    pub fn load(dim: usize, down_scale: usize, vb: VarBuilder) -> Result<Self> {
        let down_scale = down_scale.max(1);
        let cfg = Conv1dConfig {
            stride: down_scale,
            ..Default::default()
        };
        let conv = conv1d(dim, dim, down_scale, cfg, vb.pp("conv"))?;
        Ok(Self { conv, down_scale })
    }

    /// Adapted length of a sequence with `len` frames. Never returns zero
    /// for non-empty input so every row keeps at least one attendable frame.
    pub fn output_len(&self, len: usize) -> usize {
        if len == 0 {
            0
        } else {
            conv_out_len(len, self.down_scale, self.down_scale).max(1)
        }
    }

    /// [batch, frames, dim] -> [batch, frames / down_scale, dim]
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (b, t, d) = x.dims3()?;
        // Pad short sequences so the conv always yields one frame.
        let x = if t < self.down_scale {
            let pad = Tensor::zeros((b, self.down_scale - t, d), x.dtype(), x.device())?;
            Tensor::cat(&[x, &pad], 1)?
        } else {
            x.clone()
        };
        let y = self.conv.forward(&x.transpose(1, 2)?.contiguous()?)?.gelu_erf()?;
        y.transpose(1, 2)?.contiguous()
    }
}
