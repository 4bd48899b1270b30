//! Pretrained sources - resolving and loading the two model halves

use candle_core::{DType, Device, Result};
use candle_nn::{VarBuilder, VarMap};
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;
use tracing::{info, warn};

use crate::model::config::read_json_config;
use crate::model::{ModelVariant, SpeechEncoderConfig, SpeechMix, SpeechMixConfig, TextModelConfig};

const CONFIG_FILE: &str = "config.json";
const WEIGHTS_FILE: &str = "model.safetensors";
const TOKENIZER_FILE: &str = "tokenizer.json";

/// Where a pretrained half lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelSource {
    Local(PathBuf),
    Hub(String),
}

/// Files of a resolved pretrained half. Weights are optional: a missing
/// checkpoint leaves the half randomly initialised.
#[derive(Clone, Debug)]
pub struct PretrainedFiles {
    pub config: PathBuf,
    pub weights: Option<PathBuf>,
    pub tokenizer: Option<PathBuf>,
}

impl ModelSource {
    /// `HF*` variants treat the name as a Hub repository id.
    pub fn for_variant(name: &str, variant: ModelVariant) -> Self {
        if variant.hub_sources() {
            Self::Hub(name.to_string())
        } else {
            Self::Local(PathBuf::from(name))
        }
    }

    pub fn resolve(&self) -> Result<PretrainedFiles> {
        match self {
            Self::Local(dir) => {
                let config = dir.join(CONFIG_FILE);
                if !config.exists() {
                    candle_core::bail!("no {CONFIG_FILE} in {}", dir.display());
                }
                let weights = Some(dir.join(WEIGHTS_FILE)).filter(|p| p.exists());
                let tokenizer = Some(dir.join(TOKENIZER_FILE)).filter(|p| p.exists());
                Ok(PretrainedFiles {
                    config,
                    weights,
                    tokenizer,
                })
            }
            Self::Hub(repo_id) => {
                info!("Fetching {} from the Hugging Face Hub", repo_id);
                let api = hf_hub::api::sync::Api::new().map_err(hub_error)?;
                let repo = api.model(repo_id.clone());
                let config = repo.get(CONFIG_FILE).map_err(hub_error)?;
                let weights = repo.get(WEIGHTS_FILE).ok();
                if weights.is_none() {
                    warn!("{} has no {}; weights stay randomly initialised", repo_id, WEIGHTS_FILE);
                }
                let tokenizer = repo.get(TOKENIZER_FILE).ok();
                Ok(PretrainedFiles {
                    config,
                    weights,
                    tokenizer,
                })
            }
        }
    }
}

fn hub_error(e: hf_hub::api::sync::ApiError) -> candle_core::Error {
    candle_core::Error::Msg(format!("hub request failed: {e}"))
}

pub fn load_tokenizer(path: &Path) -> Result<Tokenizer> {
    Tokenizer::from_file(path)
        .map_err(|e| candle_core::Error::Msg(format!("failed to load tokenizer {}: {e}", path.display())))
}

/// Copies every tensor of a safetensors checkpoint into the variable
/// `{prefix}.{name}` of `varmap`. Unknown names are skipped; shape
/// mismatches are errors. Returns (loaded, skipped).
pub fn load_weights(varmap: &VarMap, prefix: &str, path: &Path, device: &Device) -> Result<(usize, usize)> {
    let tensors = candle_core::safetensors::load(path, device)?;
    let data = varmap
        .data()
        .lock()
        .map_err(|_| candle_core::Error::Msg("VarMap lock poisoned".to_string()))?;

    let (mut loaded, mut skipped) = (0, 0);
    for (name, tensor) in tensors {
        let full = format!("{prefix}.{name}");
        match data.get(&full) {
            Some(var) => {
                var.set(&tensor.to_dtype(var.dtype())?)?;
                loaded += 1;
            }
            None => {
                tracing::debug!("skipping unused weight {}", full);
                skipped += 1;
            }
        }
    }
    Ok((loaded, skipped))
}

/// Builds a SpeechMix model from the two resolved halves and loads their
/// pretrained weights. The returned VarMap owns every parameter.
pub fn build_speechmix(
    variant: ModelVariant,
    config: SpeechMixConfig,
    speech: &PretrainedFiles,
    text: &PretrainedFiles,
    dtype: DType,
    device: &Device,
) -> Result<(SpeechMix, VarMap)> {
    let speech_cfg: SpeechEncoderConfig = read_json_config(&speech.config)?;
    let text_cfg: TextModelConfig = read_json_config(&text.config)?;
    let tokenizer_path = text
        .tokenizer
        .as_ref()
        .ok_or_else(|| candle_core::Error::Msg(format!("the text model needs a {TOKENIZER_FILE}")))?;
    let tokenizer = load_tokenizer(tokenizer_path)?;

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, dtype, device);
    let model = SpeechMix::load(variant, config, &speech_cfg, &text_cfg, tokenizer, vb)?;

    for (prefix, files) in [("encoder_model", speech), ("decoder_model", text)] {
        match &files.weights {
            Some(path) => {
                let (loaded, skipped) = load_weights(&varmap, prefix, path, device)?;
                info!("Loaded {} tensors into {} ({} skipped)", loaded, prefix, skipped);
            }
            None => warn!("No pretrained weights for {}; using random init", prefix),
        }
    }

    Ok((model, varmap))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_for_variant() {
        assert_eq!(
            ModelSource::for_variant("facebook/wav2vec2-base", ModelVariant::HFSpeechMixEED),
            ModelSource::Hub("facebook/wav2vec2-base".into())
        );
        assert_eq!(
            ModelSource::for_variant("models/w2v", ModelVariant::SpeechMixEED),
            ModelSource::Local(PathBuf::from("models/w2v"))
        );
    }

    #[test]
    fn test_local_source_requires_config() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ModelSource::Local(dir.path().to_path_buf()).resolve().is_err());
        std::fs::write(dir.path().join(CONFIG_FILE), "{}").unwrap();
        let files = ModelSource::Local(dir.path().to_path_buf()).resolve().unwrap();
        assert!(files.weights.is_none());
        assert!(files.tokenizer.is_none());
    }
}
