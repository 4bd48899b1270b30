//! Data Module - dataset preparation for SpeechMix training
//!
//! - source: raw manifests (jsonl / tsv) of audio paths and transcripts
//! - audio: WAV decoding and resampling to 16 kHz
//! - prepare: tokenization and optional self-labeling
//! - cache: on-disk prepared splits
//! - collator: padding into model batches
//! - sampler: length-grouped batch order

use candle_core::Device;
use clap::Args;
use serde::{Deserialize, Serialize};
use speechmix_core::SpeechMix;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

pub mod audio;
pub mod cache;
pub mod collator;
pub mod prepare;
pub mod sampler;
pub mod source;

pub use cache::CachedSplit;
pub use collator::{CollatedBatch, DataCollatorWithPadding, Padding};
pub use sampler::LengthGroupedSampler;

/// Sampling rate every waveform is converted to.
pub const SAMPLING_RATE: u32 = 16_000;

/// One prepared example.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub input_values: Vec<f32>,
    /// Number of audio samples.
    pub length: usize,
    pub text: String,
    pub labels: Vec<u32>,
    pub input_ids: Vec<u32>,
    /// Tokenized transcript, kept for self-labeled variants.
    pub text_input_ids: Option<Vec<u32>>,
}

#[derive(Debug, Error)]
pub enum DataError {
    #[error("no manifest for split '{split}' under {dir} (expected {split}.jsonl or {split}.tsv)")]
    ManifestNotFound { dir: PathBuf, split: String },

    #[error("{path}:{line}: {message}")]
    Manifest {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("audio file {path}: {message}")]
    Audio { path: PathBuf, message: String },

    #[error("dataset cache {path} is corrupt: {message}")]
    CorruptCache { path: PathBuf, message: String },

    #[error("row {index} out of range (split has {len} rows)")]
    RowOutOfRange { index: usize, len: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Which side of the train/valid pair a cache directory holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SplitKind {
    Train,
    Valid,
}

impl SplitKind {
    fn prefix(self) -> &'static str {
        match self {
            Self::Train => "train_ds",
            Self::Valid => "valid_ds",
        }
    }
}

/// `{cache_dir}/{train|valid}_ds_{dataset}_{field}_{split}`, with path
/// separators in the dataset name flattened.
pub fn cache_path(cache_dir: &Path, kind: SplitKind, dataset: &str, field: &str, split: &str) -> PathBuf {
    let sanitize = |s: &str| s.replace(['/', '\\'], "-");
    cache_dir.join(format!(
        "{}_{}_{}_{}",
        kind.prefix(),
        sanitize(dataset),
        sanitize(field),
        sanitize(split)
    ))
}

/// Where the raw splits live and where prepared caches go.
#[derive(Clone, Debug)]
pub struct DatasetLocation {
    pub dataset: String,
    pub field: String,
    pub train_split: String,
    pub test_split: String,
    pub cache_dir: PathBuf,
    pub workers: usize,
}

impl DatasetLocation {
    pub fn train_cache(&self) -> PathBuf {
        cache_path(&self.cache_dir, SplitKind::Train, &self.dataset, &self.field, &self.train_split)
    }

    pub fn valid_cache(&self) -> PathBuf {
        cache_path(&self.cache_dir, SplitKind::Valid, &self.dataset, &self.field, &self.test_split)
    }
}

/// Loads both cached splits when both exist; otherwise prepares both from
/// the raw manifests and caches them.
pub fn load_or_prepare(
    model: &SpeechMix,
    location: &DatasetLocation,
    selftype: bool,
) -> anyhow::Result<(CachedSplit, CachedSplit)> {
    let train_path = location.train_cache();
    let valid_path = location.valid_cache();

    if cache::is_cached(&train_path) && cache::is_cached(&valid_path) {
        info!("📂 Reusing cached splits {:?} / {:?}", train_path, valid_path);
        return Ok((cache::load_split(&train_path)?, cache::load_split(&valid_path)?));
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(location.workers.max(1))
        .build()?;
    let root = Path::new(&location.dataset);

    for (split, path) in [(&location.train_split, &train_path), (&location.test_split, &valid_path)] {
        let raw = source::read_split(root, &location.field, split)?;
        info!("Preparing split '{}' ({} rows, selftype={})", split, raw.len(), selftype);
        let examples = prepare::prepare_split(model, &raw, selftype, &pool)?;
        cache::save_split(path, &examples)?;
        info!("💾 Cached {} rows at {:?}", examples.len(), path);
    }

    Ok((cache::load_split(&train_path)?, cache::load_split(&valid_path)?))
}

#[derive(Args, Debug, Clone)]
pub struct PrepareArgs {
    #[command(flatten)]
    pub model: crate::train::ModelArgs,

    #[command(flatten)]
    pub data: crate::train::DatasetArgs,
}

/// Builds (or reuses) both cached splits and exits.
pub fn run(args: PrepareArgs) -> anyhow::Result<()> {
    info!("--- SpeechMix Dataset Preparation ---");
    let device = Device::cuda_if_available(0).unwrap_or(Device::Cpu);
    let loaded = args.model.load(&device, None)?;
    let (train, valid) = load_or_prepare(&loaded.model, &args.data.location(), loaded.variant.self_labeled())?;
    info!(
        "✅ {} train rows at {:?}, {} valid rows at {:?}",
        train.len(),
        train.path(),
        valid.len(),
        valid.path()
    );
    Ok(())
}
