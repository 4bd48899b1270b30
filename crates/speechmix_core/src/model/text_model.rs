//! TextModel - encoder-decoder language model

use candle_core::{Device, Module, Result, Tensor, D};
use candle_nn::{embedding, linear_no_bias, Embedding, Linear, VarBuilder};

use super::TextModelConfig;
use crate::layers::{causal_mask, layer_norm, padding_mask, DecoderLayer, EncoderLayer, LayerNames, LayerNorm};

pub struct TextModel {
    pub shared: Embedding,
    pub encoder_positions: Embedding,
    pub encoder_layernorm_embedding: LayerNorm,
    pub encoder_layers: Vec<EncoderLayer>,
    pub decoder_positions: Embedding,
    pub decoder_layernorm_embedding: LayerNorm,
    pub decoder_layers: Vec<DecoderLayer>,
    pub lm_head: Linear,
    pub config: TextModelConfig,
}

impl TextModel {
    pub fn load(cfg: &TextModelConfig, vb: VarBuilder) -> Result<Self> {
        let d = cfg.d_model;
        let eps = cfg.layer_norm_eps;
        let model = vb.pp("model");
        let enc = model.pp("encoder");
        let dec = model.pp("decoder");

        let encoder_layers = (0..cfg.encoder_layers)
            .map(|i| {
                EncoderLayer::load(
                    d,
                    cfg.attention_heads,
                    cfg.ffn_dim,
                    eps,
                    LayerNames::TEXT,
                    enc.pp(format!("layers.{i}")),
                )
            })
            .collect::<Result<Vec<_>>>()?;
        let decoder_layers = (0..cfg.decoder_layers)
            .map(|i| DecoderLayer::load(d, cfg.attention_heads, cfg.ffn_dim, eps, dec.pp(format!("layers.{i}"))))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            shared: embedding(cfg.vocab_size, d, model.pp("shared"))?,
            encoder_positions: embedding(cfg.max_position_embeddings, d, enc.pp("embed_positions"))?,
            encoder_layernorm_embedding: layer_norm(d, eps, enc.pp("layernorm_embedding"))?,
            encoder_layers,
            decoder_positions: embedding(cfg.max_position_embeddings, d, dec.pp("embed_positions"))?,
            decoder_layernorm_embedding: layer_norm(d, eps, dec.pp("layernorm_embedding"))?,
            decoder_layers,
            lm_head: linear_no_bias(d, cfg.vocab_size, vb.pp("lm_head"))?,
            config: cfg.clone(),
        })
    }

    fn add_positions(&self, x: &Tensor, table: &Embedding) -> Result<Tensor> {
        let (_, t, _) = x.dims3()?;
        if t > self.config.max_position_embeddings {
            candle_core::bail!(
                "sequence of {t} positions exceeds max_position_embeddings {}",
                self.config.max_position_embeddings
            );
        }
        let positions = Tensor::arange(0u32, t as u32, x.device())?;
        let pos = table.forward(&positions)?.to_dtype(x.dtype())?;
        x.broadcast_add(&pos)
    }

    /// Runs the text encoder over precomputed input embeddings
    /// ([batch, seq, d_model]); this is how projected speech enters EED models.
    pub fn encode_embeds(&self, embeds: &Tensor, lengths: &[usize]) -> Result<Tensor> {
        let (_, t, _) = embeds.dims3()?;
        let x = self.add_positions(embeds, &self.encoder_positions)?;
        let mut x = self.encoder_layernorm_embedding.forward(&x)?;
        let mask = padding_mask(lengths, t, x.device())?;
        for layer in &self.encoder_layers {
            x = layer.forward(&x, Some(&mask))?;
        }
        Ok(x)
    }

    pub fn encode(&self, input_ids: &Tensor, lengths: &[usize]) -> Result<Tensor> {
        let embeds = self.shared.forward(input_ids)?;
        self.encode_embeds(&embeds, lengths)
    }

    /// Decoder hidden states for `decoder_input_ids` attending to `memory`.
    pub fn decode(&self, decoder_input_ids: &Tensor, memory: &Tensor, memory_lengths: &[usize]) -> Result<Tensor> {
        let (_, t) = decoder_input_ids.dims2()?;
        let (_, tm, _) = memory.dims3()?;
        let x = self.shared.forward(decoder_input_ids)?;
        let x = self.add_positions(&x, &self.decoder_positions)?;
        let mut x = self.decoder_layernorm_embedding.forward(&x)?;

        let self_mask = causal_mask(t, x.device())?;
        let memory_mask = padding_mask(memory_lengths, tm, x.device())?;
        for layer in &self.decoder_layers {
            x = layer.forward(&x, memory, &self_mask, Some(&memory_mask))?;
        }
        Ok(x)
    }

    pub fn lm_logits(&self, hidden: &Tensor) -> Result<Tensor> {
        self.lm_head.forward(hidden)
    }

    /// Batched greedy decoding from encoder `memory`. Each row stops at EOS
    /// (not included) or after `max_length` tokens.
    pub fn generate_from_memory(&self, memory: &Tensor, memory_lengths: &[usize]) -> Result<Vec<Vec<u32>>> {
        let (b, _, _) = memory.dims3()?;
        let device = memory.device();
        let eos = self.config.eos_token_id;
        let max_len = self.config.max_length.min(self.config.max_position_embeddings.saturating_sub(1));

        let mut prefixes: Vec<Vec<u32>> = vec![vec![self.config.decoder_start()]; b];
        let mut finished = vec![false; b];
        for _ in 0..max_len {
            if finished.iter().all(|f| *f) {
                break;
            }
            let next = self.next_tokens(&prefixes, memory, memory_lengths, device)?;
            for (row, token) in next.into_iter().enumerate() {
                if finished[row] {
                    // Keep shapes aligned; finished rows are trimmed below.
                    prefixes[row].push(eos);
                } else if token == eos {
                    finished[row] = true;
                    prefixes[row].push(eos);
                } else {
                    prefixes[row].push(token);
                }
            }
        }

        Ok(prefixes
            .into_iter()
            .map(|p| p.into_iter().skip(1).take_while(|&t| t != eos).collect())
            .collect())
    }

    fn next_tokens(
        &self,
        prefixes: &[Vec<u32>],
        memory: &Tensor,
        memory_lengths: &[usize],
        device: &Device,
    ) -> Result<Vec<u32>> {
        let t = prefixes[0].len();
        let flat: Vec<u32> = prefixes.iter().flatten().copied().collect();
        let ids = Tensor::from_vec(flat, (prefixes.len(), t), device)?;
        let hidden = self.decode(&ids, memory, memory_lengths)?;
        let last = hidden.narrow(1, t - 1, 1)?;
        self.lm_logits(&last)?.squeeze(1)?.argmax(D::Minus1)?.to_vec1::<u32>()
    }

    /// Greedy decoding of the text model on its own input, used to build
    /// self-supervised labels.
    pub fn greedy_generate(&self, input_ids: &[u32], device: &Device) -> Result<Vec<u32>> {
        if input_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = Tensor::new(input_ids, device)?.unsqueeze(0)?;
        let memory = self.encode(&ids, &[input_ids.len()])?;
        let mut out = self.generate_from_memory(&memory, &[input_ids.len()])?;
        Ok(out.pop().unwrap_or_default())
    }
}
