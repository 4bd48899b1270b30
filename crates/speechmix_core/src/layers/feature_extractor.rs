//! FeatureExtractor - strided conv stack turning raw waveforms into frames

use candle_core::{Module, Result, Tensor};
use candle_nn::{conv1d, Conv1d, Conv1dConfig, VarBuilder};

use super::{conv_out_len, layer_norm, LayerNorm};

pub struct FeatureExtractor {
    pub conv_layers: Vec<Conv1d>,
    pub kernels: Vec<usize>,
    pub strides: Vec<usize>,
    pub layer_norm: LayerNorm,
}

impl FeatureExtractor {
    pub fn load(
        conv_dim: &[usize],
        conv_kernel: &[usize],
        conv_stride: &[usize],
        eps: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        if conv_dim.is_empty()
            || conv_dim.len() != conv_kernel.len()
            || conv_dim.len() != conv_stride.len()
        {
            candle_core::bail!(
                "conv_dim/conv_kernel/conv_stride must be non-empty and of equal length ({}/{}/{})",
                conv_dim.len(),
                conv_kernel.len(),
                conv_stride.len()
            );
        }

        let mut conv_layers = Vec::with_capacity(conv_dim.len());
        let mut in_channels = 1;
        for (i, ((&out, &k), &s)) in conv_dim.iter().zip(conv_kernel).zip(conv_stride).enumerate() {
            let cfg = Conv1dConfig {
                stride: s,
                ..Default::default()
            };
            conv_layers.push(conv1d(in_channels, out, k, cfg, vb.pp(format!("conv_layers.{i}.conv")))?);
            in_channels = out;
        }
        let layer_norm = layer_norm(in_channels, eps, vb.pp("layer_norm"))?;

        Ok(Self {
            conv_layers,
            kernels: conv_kernel.to_vec(),
            strides: conv_stride.to_vec(),
            layer_norm,
        })
    }

    /// Number of frames produced for `samples` input samples.
    pub fn output_len(&self, samples: usize) -> usize {
        self.kernels
            .iter()
            .zip(&self.strides)
            .fold(samples, |len, (&k, &s)| conv_out_len(len, k, s))
    }

    /// [batch, samples] -> [batch, frames, channels]
    pub fn forward(&self, waveform: &Tensor) -> Result<Tensor> {
        let mut x = waveform.unsqueeze(1)?;
        for conv in &self.conv_layers {
            x = conv.forward(&x)?.gelu_erf()?;
        }
        let x = x.transpose(1, 2)?.contiguous()?;
        self.layer_norm.forward(&x)
    }
}
