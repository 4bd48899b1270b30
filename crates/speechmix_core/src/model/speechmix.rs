//! SpeechMix - speech encoder bridged into a text encoder-decoder

use candle_core::{DType, Device, Module, Result, Tensor, D};
use candle_nn::{linear, ops::log_softmax, Linear, VarBuilder};
use tokenizers::Tokenizer;

use super::{ModelVariant, SpeechEncoder, SpeechEncoderConfig, SpeechMixConfig, TextModel, TextModelConfig};
use crate::layers::LengthAdapter;
use crate::params::ParamSet;
use crate::IGNORE_INDEX;

/// Model inputs of one collated batch, already on the model device.
pub struct SpeechMixBatch {
    /// [batch, samples] zero-padded waveforms.
    pub input_values: Tensor,
    pub input_lengths: Vec<usize>,
    /// [batch, label_len] i64, padding set to `IGNORE_INDEX`.
    pub labels: Tensor,
    /// [batch, text_len] u32, present for self-labeled variants.
    pub text_input_ids: Option<Tensor>,
    pub text_lengths: Option<Vec<usize>>,
}

pub struct SpeechMixOutput {
    pub loss: Tensor,
    /// [batch, label_len, vocab]
    pub logits: Tensor,
}

/// Linear real/fake head over mean-pooled encoder states.
pub struct Discriminator {
    pub weight: Tensor,
    pub bias: Tensor,
}

impl Discriminator {
    pub fn load(dim: usize, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get_with_hints((1, dim), "weight", candle_nn::init::DEFAULT_KAIMING_NORMAL)?;
        let bias = vb.get_with_hints(1, "bias", candle_nn::Init::Const(0.0))?;
        Ok(Self { weight, bias })
    }

    /// [batch, dim] -> [batch, 1]. With `frozen`, gradients stop at the
    /// discriminator's own parameters.
    pub fn forward(&self, pooled: &Tensor, frozen: bool) -> Result<Tensor> {
        let (w, b) = if frozen {
            (self.weight.detach(), self.bias.detach())
        } else {
            (self.weight.clone(), self.bias.clone())
        };
        pooled.matmul(&w.t()?)?.broadcast_add(&b)
    }
}

pub struct SpeechMix {
    pub variant: ModelVariant,
    pub config: SpeechMixConfig,
    pub encoder_model: SpeechEncoder,
    pub length_adapter: Option<LengthAdapter>,
    pub enc_to_dec_proj: Linear,
    pub decoder_model: TextModel,
    pub discriminator: Option<Discriminator>,
    pub tokenizer: Tokenizer,
    pub device: Device,
}

impl SpeechMix {
    pub fn load(
        variant: ModelVariant,
        config: SpeechMixConfig,
        speech_cfg: &SpeechEncoderConfig,
        text_cfg: &TextModelConfig,
        tokenizer: Tokenizer,
        vb: VarBuilder,
    ) -> Result<Self> {
        let encoder_model = SpeechEncoder::load(
            speech_cfg,
            config.share_layer_ratio,
            config.weighted_sum,
            vb.pp("encoder_model"),
        )?;
        let hidden = speech_cfg.hidden_size;

        let length_adapter = if variant.length_adapter() {
            Some(LengthAdapter::load(hidden, config.down_scale, vb.pp("length_adapter"))?)
        } else {
            None
        };
        let enc_to_dec_proj = linear(hidden, text_cfg.d_model, vb.pp("enc_to_dec_proj"))?;
        let decoder_model = TextModel::load(text_cfg, vb.pp("decoder_model"))?;
        let discriminator = if variant.adversarial() {
            Some(Discriminator::load(text_cfg.d_model, vb.pp("discriminator"))?)
        } else {
            None
        };

        Ok(Self {
            variant,
            config,
            encoder_model,
            length_adapter,
            enc_to_dec_proj,
            decoder_model,
            discriminator,
            tokenizer,
            device: vb.device().clone(),
        })
    }

    /// Parameter dtype the model was built with.
    pub fn dtype(&self) -> DType {
        self.enc_to_dec_proj.weight().dtype()
    }

    pub fn text_config(&self) -> &TextModelConfig {
        &self.decoder_model.config
    }

    /// Initial trainability: with fixed parameters, every decoder parameter
    /// whose name contains none of `fixed_except` is frozen. Returns the
    /// number of frozen parameters.
    pub fn apply_fixed_parameters(&self, params: &mut ParamSet) -> usize {
        if !(self.config.fixed_parameters || self.variant.forces_fixed_parameters()) {
            return 0;
        }
        params.freeze_except("decoder_model.", &self.config.fixed_except)
    }

    /// Speech frames as seen by the decoder's cross attention, with the
    /// number of valid frames per row, plus the projected speech states.
    pub fn encode_speech(&self, input_values: &Tensor, input_lengths: &[usize]) -> Result<(Tensor, Vec<usize>, Tensor)> {
        let enc = self.encoder_model.forward(input_values, input_lengths)?;
        let (hidden, lengths) = match &self.length_adapter {
            Some(adapter) => {
                let hidden = adapter.forward(&enc.hidden)?;
                let (_, frames, _) = hidden.dims3()?;
                let lengths = enc
                    .lengths
                    .iter()
                    .map(|&l| adapter.output_len(l).clamp(1, frames))
                    .collect();
                (hidden, lengths)
            }
            None => (enc.hidden, enc.lengths),
        };
        let projected = self.enc_to_dec_proj.forward(&hidden)?;
        let memory = if self.variant.routes_through_text_encoder() {
            let (_, frames, _) = projected.dims3()?;
            let max_positions = self.text_config().max_position_embeddings;
            if frames > max_positions {
                candle_core::bail!(
                    "{frames} speech frames exceed the text encoder's max_position_embeddings {max_positions}; \
                     shorten the audio or use an Adapt variant with a larger --down-scale"
                );
            }
            self.decoder_model.encode_embeds(&projected, &lengths)?
        } else {
            projected.clone()
        };
        Ok((memory, lengths, projected))
    }

    pub fn forward(&self, batch: &SpeechMixBatch) -> Result<SpeechMixOutput> {
        let (memory, lengths, _) = self.encode_speech(&batch.input_values, &batch.input_lengths)?;

        let text_cfg = self.text_config();
        let decoder_input_ids = shift_tokens_right(&batch.labels, text_cfg.pad_token_id, text_cfg.decoder_start())?;
        let hidden = self.decoder_model.decode(&decoder_input_ids, &memory, &lengths)?;
        let logits = self.decoder_model.lm_logits(&hidden)?;
        let mut loss = masked_cross_entropy(&logits, &batch.labels)?;

        if let (true, Some(text_ids), Some(text_lengths)) = (
            self.variant.self_labeled(),
            batch.text_input_ids.as_ref(),
            batch.text_lengths.as_ref(),
        ) {
            let weight = self.config.aux_loss_weight;
            let text_memory = self.decoder_model.encode(text_ids, text_lengths)?.detach();
            let text_hidden = self
                .decoder_model
                .decode(&decoder_input_ids, &text_memory, text_lengths)?
                .detach();
            let label_mask = batch.labels.ge(0i64)?;
            let distill = masked_mse(&hidden, &text_hidden, &label_mask)?;
            loss = (loss + (distill * weight)?)?;

            if let Some(disc) = &self.discriminator {
                let speech_pooled = mean_pool(&memory, &lengths)?;
                let text_pooled = mean_pool(&text_memory, text_lengths)?;
                let d_loss = (bce_with_logits(&disc.forward(&text_pooled, false)?, true)?
                    + bce_with_logits(&disc.forward(&speech_pooled.detach(), false)?, false)?)?;
                let g_loss = bce_with_logits(&disc.forward(&speech_pooled, true)?, true)?;
                loss = (loss + ((d_loss + g_loss)? * weight)?)?;
            }
        }

        Ok(SpeechMixOutput { loss, logits })
    }

    /// Greedy transcription of a padded waveform batch.
    pub fn transcribe_ids(&self, input_values: &Tensor, input_lengths: &[usize]) -> Result<Vec<Vec<u32>>> {
        let (memory, lengths, _) = self.encode_speech(input_values, input_lengths)?;
        self.decoder_model.generate_from_memory(&memory, &lengths)
    }

    pub fn transcribe(&self, waveform: &[f32]) -> Result<String> {
        let input = Tensor::new(waveform, &self.device)?
            .to_dtype(self.dtype())?
            .unsqueeze(0)?;
        let ids = self.transcribe_ids(&input, &[waveform.len()])?;
        let ids = ids.into_iter().next().unwrap_or_default();
        self.tokenizer
            .decode(&ids, true)
            .map_err(|e| candle_core::Error::Msg(format!("decode failed: {e}")))
    }
}

/// Decoder inputs: labels shifted one step right behind `start`, with
/// ignore-index positions replaced by `pad`.
pub fn shift_tokens_right(labels: &Tensor, pad: u32, start: u32) -> Result<Tensor> {
    let (b, l) = labels.dims2()?;
    let rows = labels.to_dtype(DType::I64)?.to_vec2::<i64>()?;
    let mut shifted = Vec::with_capacity(b * l);
    for row in rows {
        shifted.push(start);
        for &tok in row.iter().take(l.saturating_sub(1)) {
            shifted.push(if tok < 0 { pad } else { tok as u32 });
        }
    }
    Tensor::from_vec(shifted, (b, l), labels.device())
}

/// Mean token cross entropy over positions whose label is not ignored.
pub fn masked_cross_entropy(logits: &Tensor, labels: &Tensor) -> Result<Tensor> {
    let (b, l, v) = logits.dims3()?;
    let logits = logits.reshape((b * l, v))?.to_dtype(DType::F32)?;
    let labels = labels.reshape(b * l)?.to_dtype(DType::I64)?;

    let mask = labels.ge(0i64)?;
    let safe_labels = mask.where_cond(&labels, &labels.zeros_like()?)?.to_dtype(DType::U32)?;
    let log_sm = log_softmax(&logits, D::Minus1)?;
    let nll = log_sm
        .gather(&safe_labels.unsqueeze(1)?, D::Minus1)?
        .squeeze(D::Minus1)?
        .neg()?;

    let mask_f = mask.to_dtype(DType::F32)?;
    let total = (nll * &mask_f)?.sum_all()?;
    let count = mask_f.sum_all()?.to_scalar::<f32>()?;
    if count == 0.0 {
        total * 0.0
    } else {
        total / count as f64
    }
}

/// Mean squared error over label positions; `mask` is [batch, len] u8.
fn masked_mse(a: &Tensor, b: &Tensor, mask: &Tensor) -> Result<Tensor> {
    let diff = (a.to_dtype(DType::F32)? - b.to_dtype(DType::F32)?)?.sqr()?.mean(D::Minus1)?;
    let mask_f = mask.to_dtype(DType::F32)?;
    let total = (diff * &mask_f)?.sum_all()?;
    let count = mask_f.sum_all()?.to_scalar::<f32>()?;
    if count == 0.0 {
        total * 0.0
    } else {
        total / count as f64
    }
}

/// [batch, seq, dim] -> [batch, dim], averaging the first `lengths[i]` frames.
fn mean_pool(x: &Tensor, lengths: &[usize]) -> Result<Tensor> {
    let (b, t, _) = x.dims3()?;
    let mut mask = Vec::with_capacity(b * t);
    for &len in lengths {
        let len = len.clamp(1, t.max(1));
        for j in 0..t {
            mask.push(if j < len { 1.0 / len as f32 } else { 0.0 });
        }
    }
    let weights = Tensor::from_vec(mask, (b, t, 1), x.device())?.to_dtype(x.dtype())?;
    x.broadcast_mul(&weights)?.sum(1)
}

fn softplus(x: &Tensor) -> Result<Tensor> {
    let tail = (x.abs()?.neg()?.exp()? + 1.0)?.log()?;
    x.relu()? + tail
}

/// Binary cross entropy on logits against an all-`real` or all-fake target.
fn bce_with_logits(logits: &Tensor, real: bool) -> Result<Tensor> {
    let logits = logits.to_dtype(DType::F32)?;
    let per_item = if real { softplus(&logits.neg()?)? } else { softplus(&logits)? };
    per_item.mean_all()
}
