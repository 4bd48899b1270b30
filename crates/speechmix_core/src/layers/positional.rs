//! Sinusoidal position table

use candle_core::{Device, Result, Tensor};

/// Returns a [len, dim] sinusoidal table (sin on even, cos on odd channels).
pub fn sinusoidal_positions(len: usize, dim: usize, device: &Device) -> Result<Tensor> {
    let mut table = vec![0f32; len * dim];
    for pos in 0..len {
        for i in 0..dim {
            let exponent = (2 * (i / 2)) as f64 / dim as f64;
            let angle = pos as f64 / 10000f64.powf(exponent);
            table[pos * dim + i] = if i % 2 == 0 { angle.sin() } else { angle.cos() } as f32;
        }
    }
    Tensor::from_vec(table, (len, dim), device)
}
