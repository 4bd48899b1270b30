//! SpeechEncoder - waveform encoder

use candle_core::{Module, Result, Tensor, D};
use candle_nn::{linear, ops::softmax, Linear, VarBuilder};

use super::SpeechEncoderConfig;
use crate::layers::{padding_mask, sinusoidal_positions, EncoderLayer, FeatureExtractor, LayerNames};

/// Encoded frames plus the number of valid frames per row.
pub struct EncoderOutput {
    pub hidden: Tensor,
    pub lengths: Vec<usize>,
}

pub struct SpeechEncoder {
    pub feature_extractor: FeatureExtractor,
    pub feature_projection: Linear,
    pub layers: Vec<EncoderLayer>,
    /// Present when the output is a learned mix of all layer outputs.
    pub layer_weights: Option<Tensor>,
    pub config: SpeechEncoderConfig,
}

impl SpeechEncoder {
    /// Loads the encoder, keeping only the bottom `1 - share_layer_ratio`
    /// fraction of transformer layers.
    pub fn load(
        cfg: &SpeechEncoderConfig,
        share_layer_ratio: f64,
        weighted_sum: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let feature_extractor = FeatureExtractor::load(
            &cfg.conv_dim,
            &cfg.conv_kernel,
            &cfg.conv_stride,
            cfg.layer_norm_eps,
            vb.pp("feature_extractor"),
        )?;
        let conv_out = *cfg.conv_dim.last().unwrap_or(&cfg.hidden_size);
        let feature_projection = linear(conv_out, cfg.hidden_size, vb.pp("feature_projection.projection"))?;

        let kept = kept_layers(cfg.num_hidden_layers, share_layer_ratio);
        let layers = (0..kept)
            .map(|i| {
                EncoderLayer::load(
                    cfg.hidden_size,
                    cfg.num_attention_heads,
                    cfg.intermediate_size,
                    cfg.layer_norm_eps,
                    LayerNames::SPEECH,
                    vb.pp(format!("encoder.layers.{i}")),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let layer_weights = if weighted_sum && kept > 0 {
            Some(vb.get_with_hints(kept, "layer_weights", candle_nn::Init::Const(0.0))?)
        } else {
            None
        };

        Ok(Self {
            feature_extractor,
            feature_projection,
            layers,
            layer_weights,
            config: cfg.clone(),
        })
    }

    pub fn hidden_size(&self) -> usize {
        self.config.hidden_size
    }

    /// Frames produced for an input of `samples` samples.
    pub fn output_len(&self, samples: usize) -> usize {
        self.feature_extractor.output_len(samples)
    }

    /// `input_values`: [batch, samples] zero-padded waveforms.
    pub fn forward(&self, input_values: &Tensor, input_lengths: &[usize]) -> Result<EncoderOutput> {
        let features = self.feature_extractor.forward(input_values)?;
        let (_, frames, _) = features.dims3()?;
        if frames == 0 {
            candle_core::bail!("audio batch is shorter than the encoder receptive field");
        }
        let lengths: Vec<usize> = input_lengths
            .iter()
            .map(|&n| self.output_len(n).clamp(1, frames))
            .collect();

        let x = self.feature_projection.forward(&features)?;
        let pos = sinusoidal_positions(frames, self.hidden_size(), x.device())?.to_dtype(x.dtype())?;
        let mut x = x.broadcast_add(&pos)?;

        let mask = padding_mask(&lengths, frames, x.device())?;
        let mut layer_outputs = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            x = layer.forward(&x, Some(&mask))?;
            if self.layer_weights.is_some() {
                layer_outputs.push(x.clone());
            }
        }

        let hidden = match &self.layer_weights {
            Some(w) => {
                let norm = softmax(w, D::Minus1)?.to_dtype(x.dtype())?;
                let stacked = Tensor::stack(&layer_outputs, 0)?;
                stacked
                    .broadcast_mul(&norm.reshape((layer_outputs.len(), 1, 1, 1))?)?
                    .sum(0)?
            }
            None => x,
        };

        Ok(EncoderOutput { hidden, lengths })
    }
}

/// Number of bottom layers kept when `ratio` of them are shared away.
pub fn kept_layers(total: usize, ratio: f64) -> usize {
    let ratio = ratio.clamp(0.0, 1.0);
    let dropped = (total as f64 * ratio).round() as usize;
    total.saturating_sub(dropped)
}
