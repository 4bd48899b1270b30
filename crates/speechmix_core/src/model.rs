//! Model Module - SpeechMix architecture
//!
//! - SpeechEncoder: waveform encoder with optional weighted layer sum
//! - TextModel: encoder-decoder language model with greedy generation
//! - SpeechMix: the bridged model, parameterised by ModelVariant
//! - Configs: serde JSON configs of both pretrained halves

pub mod config;
pub mod speech_encoder;
pub mod speechmix;
pub mod text_model;
pub mod variant;

pub use config::{SpeechEncoderConfig, SpeechMixConfig, TextModelConfig};
pub use speech_encoder::{EncoderOutput, SpeechEncoder};
pub use speechmix::{SpeechMix, SpeechMixBatch, SpeechMixOutput};
pub use text_model::TextModel;
pub use variant::ModelVariant;
