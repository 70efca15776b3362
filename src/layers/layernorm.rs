//! Layer normalization implementation
//!
//! Layer normalization standardizes each row (token) over its feature axis and then
//! applies a learnable per-feature scale (gamma) and shift (beta):
//!
//! 1. Compute row statistics: mean μ and (biased) variance σ² over the features
//! 2. Normalize: x_norm = (x - μ) / sqrt(σ² + ε)
//! 3. Scale and shift: y = γ * x_norm + β
//!
//! Unlike batch normalization there are no running statistics, so training and
//! inference behave identically.
//!
//! # References
//!
//! Ba, J. L., Kiros, J. R., & Hinton, G. E. (2016). Layer Normalization. arXiv:1607.06450.

use crate::error::{ensure_len, MilError, Result};
use crate::layers::Layer;
use crate::utils::init::norm_params;

/// Default epsilon, matching common deep learning frameworks.
pub const LAYER_NORM_EPS: f32 = 1e-5;

/// Layer normalization over the last (feature) axis.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    size: usize,
    epsilon: f32,
    gamma: Vec<f32>,
    beta: Vec<f32>,
}

impl LayerNorm {
    /// Creates a layer norm with gamma = 1 and beta = 0.
    pub fn new(size: usize) -> Self {
        let (gamma, beta) = norm_params(size);
        Self {
            size,
            epsilon: LAYER_NORM_EPS,
            gamma,
            beta,
        }
    }

    /// Creates a layer norm with explicit affine parameters.
    pub fn from_parts(gamma: Vec<f32>, beta: Vec<f32>, epsilon: f32) -> Result<Self> {
        ensure_len("layer norm beta", gamma.len(), beta.len())?;
        if epsilon <= 0.0 {
            return Err(MilError::InvalidConfig("epsilon must be positive".to_string()));
        }
        Ok(Self {
            size: gamma.len(),
            epsilon,
            gamma,
            beta,
        })
    }

    pub fn epsilon(&self) -> f32 {
        self.epsilon
    }
}

impl Layer for LayerNorm {
    fn forward(&self, input: &[f32], output: &mut [f32], batch_size: usize) -> Result<()> {
        ensure_len("layer norm input", batch_size * self.size, input.len())?;
        ensure_len("layer norm output", batch_size * self.size, output.len())?;
        if self.size == 0 {
            return Ok(());
        }

        let inv_size = 1.0 / self.size as f32;
        for (row_in, row_out) in input
            .chunks_exact(self.size)
            .zip(output.chunks_exact_mut(self.size))
        {
            let mean = row_in.iter().sum::<f32>() * inv_size;
            let var = row_in.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() * inv_size;
            let inv_std = 1.0 / (var + self.epsilon).sqrt();

            for (j, (out, &x)) in row_out.iter_mut().zip(row_in).enumerate() {
                *out = (x - mean) * inv_std * self.gamma[j] + self.beta[j];
            }
        }
        Ok(())
    }

    fn input_size(&self) -> usize {
        self.size
    }

    fn output_size(&self) -> usize {
        self.size
    }

    /// gamma + beta
    fn parameter_count(&self) -> usize {
        self.gamma.len() + self.beta.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rows_are_standardized() {
        let norm = LayerNorm::new(4);
        let input = vec![1.0, 2.0, 3.0, 4.0, 10.0, 10.0, 10.0, 14.0];
        let output = norm.forward_alloc(&input, 2).unwrap();

        for row in output.chunks_exact(4) {
            let mean: f32 = row.iter().sum::<f32>() / 4.0;
            let var: f32 = row.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / 4.0;
            assert_relative_eq!(mean, 0.0, epsilon = 1e-5);
            assert_relative_eq!(var, 1.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_constant_row_maps_to_beta() {
        let norm = LayerNorm::from_parts(vec![2.0, 2.0], vec![0.5, -0.5], 1e-5).unwrap();
        let output = norm.forward_alloc(&[3.0, 3.0], 1).unwrap();
        assert_eq!(output, vec![0.5, -0.5]);
    }

    #[test]
    fn test_parameter_count() {
        assert_eq!(LayerNorm::new(512).parameter_count(), 1024);
    }

    #[test]
    fn test_rejects_bad_epsilon() {
        assert!(LayerNorm::from_parts(vec![1.0], vec![0.0], 0.0).is_err());
    }
}
