//! LayerNorm - mean/variance normalization over the last dimension
//!
//! Built from plain tensor ops so the backward pass reaches everything
//! below it. candle-nn's fused kernel has no gradient.

use candle_core::{DType, Module, Result, Tensor, D};
use candle_nn::VarBuilder;

#[derive(Clone)]
pub struct LayerNorm {
    pub weight: Tensor,
    pub bias: Tensor,
    pub eps: f64,
}

impl LayerNorm {
    pub fn load(dim: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get_with_hints(dim, "weight", candle_nn::Init::Const(1.0))?;
        let bias = vb.get_with_hints(dim, "bias", candle_nn::Init::Const(0.0))?;
        Ok(Self { weight, bias, eps })
    }
}

impl Module for LayerNorm {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x_dtype = x.dtype();
        let x_f32 = x.to_dtype(DType::F32)?;

        let mean = x_f32.mean_keepdim(D::Minus1)?;
        let centered = x_f32.broadcast_sub(&mean)?;
        let var = centered.sqr()?.mean_keepdim(D::Minus1)?;
        let normed = centered.broadcast_div(&(var + self.eps)?.sqrt()?)?;

        let weight = self.weight.to_dtype(DType::F32)?;
        let bias = self.bias.to_dtype(DType::F32)?;
        normed
            .broadcast_mul(&weight)?
            .broadcast_add(&bias)?
            .to_dtype(x_dtype)
    }
}

pub fn layer_norm(dim: usize, eps: f64, vb: VarBuilder) -> Result<LayerNorm> {
    LayerNorm::load(dim, eps, vb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Var};

    #[test]
    fn test_normalizes_last_dim() -> anyhow::Result<()> {
        let device = Device::Cpu;
        let ln = LayerNorm {
            weight: Tensor::ones(4, DType::F32, &device)?,
            bias: Tensor::zeros(4, DType::F32, &device)?,
            eps: 1e-5,
        };
        let x = Tensor::new(&[[1f32, 2.0, 3.0, 4.0], [10.0, 10.0, 10.0, 10.0]], &device)?;
        let y = ln.forward(&x)?.to_vec2::<f32>()?;
        let mean: f32 = y[0].iter().sum::<f32>() / 4.0;
        let var: f32 = y[0].iter().map(|v| (v - mean).powi(2)).sum::<f32>() / 4.0;
        assert!(mean.abs() < 1e-5);
        assert!((var - 1.0).abs() < 1e-3);
        // constant rows collapse to the bias
        assert!(y[1].iter().all(|v| v.abs() < 1e-5));
        Ok(())
    }

    #[test]
    fn test_gradient_flows_through_norm() -> anyhow::Result<()> {
        let device = Device::Cpu;
        let x = Var::new(&[[1f32, 2.0, 4.0]], &device)?;
        let weight = Var::new(&[1f32, 1.0, 1.0], &device)?;
        let ln = LayerNorm {
            weight: weight.as_tensor().clone(),
            bias: Tensor::zeros(3, DType::F32, &device)?,
            eps: 1e-5,
        };
        let target = Tensor::new(&[[1f32, 0.0, 0.0]], &device)?;
        let loss = (ln.forward(x.as_tensor())? * target)?.sum_all()?;
        let grads = loss.backward()?;
        assert!(grads.get(x.as_tensor()).is_some());
        assert!(grads.get(weight.as_tensor()).is_some());
        Ok(())
    }
}
