//! SpeechMix Core
//!
//! Building blocks for composite speech-to-text models: a waveform speech
//! encoder bridged into a text encoder-decoder, the twelve SpeechMix variants,
//! and the named parameter registry used for freezing schedules.

pub mod layers;
pub mod model;
pub mod params;
pub mod pretrained;

pub use model::{
    ModelVariant, SpeechEncoderConfig, SpeechMix, SpeechMixBatch, SpeechMixConfig,
    SpeechMixOutput, TextModelConfig,
};
pub use params::ParamSet;
pub use pretrained::{ModelSource, PretrainedFiles};

/// Label value ignored by the loss and the metrics.
pub const IGNORE_INDEX: i64 = -100;
