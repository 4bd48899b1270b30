//! Training Arguments - CLI configuration for SpeechMix runs

use anyhow::{Context, Result};
use candle_core::{DType, Device};
use candle_nn::VarMap;
use clap::Args;
use serde::Serialize;
use speechmix_core::model::config::default_fixed_except;
use speechmix_core::pretrained::build_speechmix;
use speechmix_core::{ModelSource, ModelVariant, ParamSet, SpeechMix, SpeechMixConfig};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::data::DatasetLocation;

/// The twelve model constructors; at most one may be given.
#[derive(Args, Debug, Clone, Default, Serialize)]
#[group(multiple = false)]
pub struct VariantFlags {
    #[arg(long = "SpeechMixEED")]
    pub speech_mix_eed: bool,
    #[arg(long = "SpeechMixED")]
    pub speech_mix_ed: bool,
    #[arg(long = "SpeechMixSelf")]
    pub speech_mix_self: bool,
    #[arg(long = "SpeechMixAdapt")]
    pub speech_mix_adapt: bool,
    #[arg(long = "SpeechMixGAN")]
    pub speech_mix_gan: bool,
    #[arg(long = "SpeechMixFixed")]
    pub speech_mix_fixed: bool,
    #[arg(long = "HFSpeechMixEED")]
    pub hf_speech_mix_eed: bool,
    #[arg(long = "HFSpeechMixED")]
    pub hf_speech_mix_ed: bool,
    #[arg(long = "HFSpeechMixSelf")]
    pub hf_speech_mix_self: bool,
    #[arg(long = "HFSpeechMixAdapt")]
    pub hf_speech_mix_adapt: bool,
    #[arg(long = "HFSpeechMixGAN")]
    pub hf_speech_mix_gan: bool,
    #[arg(long = "HFSpeechMixFixed")]
    pub hf_speech_mix_fixed: bool,
}

impl VariantFlags {
    /// Selected variant; `SpeechMixEED` when no flag is given.
    pub fn variant(&self) -> ModelVariant {
        use ModelVariant::*;
        [
            (self.speech_mix_eed, SpeechMixEED),
            (self.speech_mix_ed, SpeechMixED),
            (self.speech_mix_self, SpeechMixSelf),
            (self.speech_mix_adapt, SpeechMixAdapt),
            (self.speech_mix_gan, SpeechMixGAN),
            (self.speech_mix_fixed, SpeechMixFixed),
            (self.hf_speech_mix_eed, HFSpeechMixEED),
            (self.hf_speech_mix_ed, HFSpeechMixED),
            (self.hf_speech_mix_self, HFSpeechMixSelf),
            (self.hf_speech_mix_adapt, HFSpeechMixAdapt),
            (self.hf_speech_mix_gan, HFSpeechMixGAN),
            (self.hf_speech_mix_fixed, HFSpeechMixFixed),
        ]
        .into_iter()
        .find_map(|(set, v)| set.then_some(v))
        .unwrap_or(SpeechMixEED)
    }
}

/// Which model to build and how.
#[derive(Args, Debug, Clone, Serialize)]
pub struct ModelArgs {
    /// Speech encoder: local directory, or Hub repo id for HF variants
    #[arg(long, alias = "speech_model_config")]
    pub speech_model_config: String,

    /// Text encoder-decoder: local directory, or Hub repo id for HF variants
    #[arg(long, alias = "nlp_model_config")]
    pub nlp_model_config: String,

    #[command(flatten)]
    pub variant: VariantFlags,

    /// Fraction of top speech encoder layers to drop
    #[arg(long, alias = "share_layer_ratio", default_value_t = 0.0)]
    pub share_layer_ratio: f64,

    /// Length adapter stride (Adapt variants)
    #[arg(long, alias = "down_scale", default_value_t = 8)]
    pub down_scale: usize,

    /// Learn a weighted sum over all speech encoder layers
    #[arg(long, alias = "weighted_sum")]
    pub weighted_sum: bool,

    /// Freeze the decoder except parameters matching --fixed-except
    #[arg(long, alias = "fixed_parameters")]
    pub fixed_parameters: bool,

    #[arg(long, alias = "fixed_except", num_args = 1.., default_values_t = default_fixed_except())]
    pub fixed_except: Vec<String>,

    /// Half precision weights (CUDA only)
    #[arg(long)]
    pub fp16: bool,
}

/// A built model with the variables that own its parameters.
pub struct LoadedModel {
    pub model: SpeechMix,
    pub varmap: VarMap,
    /// Initial trainability, fixed parameters already applied.
    pub params: ParamSet,
    pub variant: ModelVariant,
}

impl ModelArgs {
    pub fn model_variant(&self) -> ModelVariant {
        self.variant.variant()
    }

    pub fn speechmix_config(&self) -> SpeechMixConfig {
        SpeechMixConfig {
            share_layer_ratio: self.share_layer_ratio,
            down_scale: self.down_scale,
            weighted_sum: self.weighted_sum,
            fixed_parameters: self.fixed_parameters,
            fixed_except: self.fixed_except.clone(),
            ..SpeechMixConfig::default()
        }
    }

    pub fn dtype(&self, device: &Device) -> DType {
        if !self.fp16 {
            DType::F32
        } else if device.is_cuda() {
            DType::F16
        } else {
            warn!("⚠️ --fp16 needs a CUDA device; training in f32");
            DType::F32
        }
    }

    /// Resolves both pretrained halves, builds the model, and optionally
    /// overwrites every parameter from a saved checkpoint.
    pub fn load(&self, device: &Device, checkpoint: Option<&Path>) -> Result<LoadedModel> {
        let variant = self.model_variant();
        info!("Building {} ({} + {})", variant, self.speech_model_config, self.nlp_model_config);

        let speech = ModelSource::for_variant(&self.speech_model_config, variant)
            .resolve()
            .with_context(|| format!("resolving speech model '{}'", self.speech_model_config))?;
        let text = ModelSource::for_variant(&self.nlp_model_config, variant)
            .resolve()
            .with_context(|| format!("resolving text model '{}'", self.nlp_model_config))?;

        let dtype = self.dtype(device);
        let (model, mut varmap) = build_speechmix(variant, self.speechmix_config(), &speech, &text, dtype, device)?;

        if let Some(path) = checkpoint {
            let file = if path.is_dir() { path.join("model.safetensors") } else { path.to_path_buf() };
            info!("📂 Loading checkpoint {:?}", file);
            varmap
                .load(&file)
                .with_context(|| format!("loading checkpoint {:?}", file))?;
        }

        let mut params = ParamSet::from_varmap(&varmap)?;
        let frozen = model.apply_fixed_parameters(&mut params);
        if frozen > 0 {
            info!("🔒 Fixed {} decoder parameters", frozen);
        }
        info!(
            "Model ready: {} parameters ({} trainable, {:.2}M weights)",
            params.len(),
            params.trainable_count(),
            params.trainable_elements() as f64 / 1e6
        );

        Ok(LoadedModel {
            model,
            varmap,
            params,
            variant,
        })
    }
}

/// Where the data comes from and where prepared splits are cached.
#[derive(Args, Debug, Clone, Serialize)]
pub struct DatasetArgs {
    /// Dataset root directory
    #[arg(long)]
    pub dataset: String,

    /// Dataset config (sub-directory); empty for none
    #[arg(long, default_value = "")]
    pub field: String,

    #[arg(long, alias = "train_split")]
    pub train_split: String,

    #[arg(long, alias = "test_split")]
    pub test_split: String,

    /// Directory for prepared split caches
    #[arg(long, alias = "cache_dir", default_value = ".")]
    pub cache_dir: PathBuf,

    /// Audio decoding threads
    #[arg(long, default_value_t = 10)]
    pub worker: usize,
}

impl DatasetArgs {
    pub fn location(&self) -> DatasetLocation {
        DatasetLocation {
            dataset: self.dataset.clone(),
            field: self.field.clone(),
            train_split: self.train_split.clone(),
            test_split: self.test_split.clone(),
            cache_dir: self.cache_dir.clone(),
            workers: self.worker,
        }
    }
}

/// Training configuration from command line arguments
#[derive(Args, Debug, Clone, Serialize)]
pub struct TrainArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    #[command(flatten)]
    pub data: DatasetArgs,

    /// Free-form suffix of the output directory name
    #[arg(long, default_value = "")]
    pub notes: String,

    #[arg(long, alias = "grad_accum", default_value_t = 3)]
    pub grad_accum: usize,

    #[arg(long, alias = "logging_steps", default_value_t = 10)]
    pub logging_steps: usize,

    #[arg(long, alias = "warmup_steps", default_value_t = 10)]
    pub warmup_steps: usize,

    /// Checkpoints to keep (the best one is never deleted); 0 keeps all
    #[arg(long, alias = "save_total_limit", default_value_t = 2)]
    pub save_total_limit: usize,

    /// Per-device batch size (train and eval)
    #[arg(long)]
    pub batch: usize,

    #[arg(long, default_value_t = 1000)]
    pub epoch: usize,

    #[arg(long, default_value_t = 5e-4)]
    pub lr: f64,

    /// Optimizer steps between evaluation + checkpoint
    #[arg(long, alias = "eval_step", default_value_t = 700)]
    pub eval_step: usize,

    /// Epochs over which the speech encoder is gradually unfrozen
    #[arg(long, alias = "freeze_epoch", default_value_t = 1000)]
    pub freeze_epoch: usize,

    #[arg(long, alias = "early_stopping_patience", default_value_t = 20)]
    pub early_stopping_patience: usize,

    #[arg(long, alias = "output_dir")]
    pub output_dir: Option<PathBuf>,

    /// Checkpoint directory to resume from
    #[arg(long)]
    pub resume: Option<PathBuf>,

    /// Report metrics to the remote tracker
    #[arg(long)]
    pub wandb: bool,

    #[arg(long, alias = "tracking_url", env = "SPEECHMIX_TRACKING_URL")]
    pub tracking_url: Option<String>,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

impl TrainArgs {
    /// `./{speech}_{nlp}_{variant}_{notes}`, Hub ids flattened.
    pub fn output_dir(&self) -> PathBuf {
        if let Some(dir) = &self.output_dir {
            return dir.clone();
        }
        let flat = |s: &str| s.trim_end_matches('/').replace('/', "-");
        PathBuf::from(format!(
            "./{}_{}_{}_{}",
            flat(&self.model.speech_model_config),
            flat(&self.model.nlp_model_config),
            self.model.model_variant(),
            self.notes
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;

    fn parse(extra: &[&str]) -> Result<TrainArgs, clap::Error> {
        let mut argv = vec![
            "speechmix",
            "train",
            "--speech_model_config",
            "facebook/wav2vec2-base",
            "--nlp-model-config",
            "facebook/bart-base",
            "--dataset",
            "data/cv",
            "--field",
            "en",
            "--train_split",
            "train",
            "--test-split",
            "test",
            "--batch",
            "4",
        ];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv)?.command {
            Commands::Train(args) => Ok(args),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_defaults() -> anyhow::Result<()> {
        let args = parse(&[])?;
        assert_eq!(args.model.model_variant(), ModelVariant::SpeechMixEED);
        assert_eq!(args.grad_accum, 3);
        assert_eq!(args.logging_steps, 10);
        assert_eq!(args.warmup_steps, 10);
        assert_eq!(args.save_total_limit, 2);
        assert_eq!(args.data.worker, 10);
        assert_eq!(args.epoch, 1000);
        assert_eq!(args.lr, 5e-4);
        assert_eq!(args.eval_step, 700);
        assert_eq!(args.model.down_scale, 8);
        assert_eq!(args.model.fixed_except, default_fixed_except());
        assert_eq!(args.freeze_epoch, 1000);
        assert_eq!(args.early_stopping_patience, 20);
        assert_eq!(
            args.output_dir(),
            PathBuf::from("./facebook-wav2vec2-base_facebook-bart-base_SpeechMixEED_")
        );
        Ok(())
    }

    #[test]
    fn test_variant_flags() -> anyhow::Result<()> {
        assert_eq!(parse(&["--SpeechMixED"])?.model.model_variant(), ModelVariant::SpeechMixED);
        assert_eq!(parse(&["--HFSpeechMixGAN"])?.model.model_variant(), ModelVariant::HFSpeechMixGAN);
        assert!(parse(&["--SpeechMixSelf", "--SpeechMixAdapt"]).is_err());
        Ok(())
    }

    #[test]
    fn test_fixed_except_list_and_notes() -> anyhow::Result<()> {
        let args = parse(&["--fixed_except", "fc1", "fc2", "--notes", "run1", "--SpeechMixFixed"])?;
        assert_eq!(args.model.fixed_except, vec!["fc1".to_string(), "fc2".to_string()]);
        assert!(args.output_dir().to_string_lossy().ends_with("_SpeechMixFixed_run1"));
        Ok(())
    }
}
