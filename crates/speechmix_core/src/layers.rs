//! Layers Module - Neural network building blocks
//!
//! - MultiHeadAttention: self and cross attention with additive masks
//! - FeedForward: two-layer GELU MLP
//! - EncoderLayer / DecoderLayer: post-LN transformer layers
//! - FeatureExtractor: strided conv stack over raw waveforms
//! - LayerNorm: differentiable layer normalization
//! - LengthAdapter: strided conv that shortens encoder sequences

pub mod attention;
pub mod decoder_layer;
pub mod encoder_layer;
pub mod feature_extractor;
pub mod feed_forward;
pub mod layer_norm;
pub mod length_adapter;
pub mod positional;

pub use attention::{causal_mask, padding_mask, MultiHeadAttention};
pub use decoder_layer::DecoderLayer;
pub use encoder_layer::{EncoderLayer, LayerNames};
pub use feature_extractor::FeatureExtractor;
pub use feed_forward::FeedForward;
pub use layer_norm::{layer_norm, LayerNorm};
pub use length_adapter::LengthAdapter;
pub use positional::sinusoidal_positions;

/// Output length of an unpadded 1-D convolution.
pub fn conv_out_len(len: usize, kernel: usize, stride: usize) -> usize {
    if len < kernel {
        0
    } else {
        (len - kernel) / stride + 1
    }
}
