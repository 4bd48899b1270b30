//! FeedForward - two-layer GELU MLP

use candle_core::{Module, Result, Tensor};
use candle_nn::{linear, Linear, VarBuilder};

pub struct FeedForward {
    pub fc1: Linear,
    pub fc2: Linear,
}

impl FeedForward {
    /// `names` are the (expand, contract) projection prefixes, which differ
    /// between speech and text checkpoints.
    pub fn load(dim: usize, hidden: usize, names: (&str, &str), vb: VarBuilder) -> Result<Self> {
        let fc1 = linear(dim, hidden, vb.pp(names.0))?;
        let fc2 = linear(hidden, dim, vb.pp(names.1))?;
        Ok(Self { fc1, fc2 })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let h = self.fc1.forward(x)?.gelu_erf()?;
        self.fc2.forward(&h)
    }
}
