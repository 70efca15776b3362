//! Dense (fully connected) layer implementation
//!
//! This module provides a DenseLayer (also known as Linear or Fully Connected layer)
//! that performs the transformation: output = input × weights + biases

use rand::Rng;

use crate::error::{ensure_len, Result};
use crate::layers::Layer;
use crate::utils::matrix::gemm;
use crate::utils::InitPolicy;

/// Dense (fully connected) layer with weights and optional biases.
///
/// Performs the linear transformation: y = xW + b
/// where x is the input (batch_size × input_size),
/// W is the weight matrix (input_size × output_size),
/// and b is the bias vector (output_size).
///
/// # Example
///
/// ```ignore
/// use rand::{rngs::StdRng, SeedableRng};
/// use rust_mil_networks::layers::DenseLayer;
/// use rust_mil_networks::utils::InitPolicy;
///
/// let mut rng = StdRng::seed_from_u64(42);
/// let layer = DenseLayer::new(1024, 512, InitPolicy::XavierNormal, &mut rng);
/// assert_eq!(layer.input_size(), 1024);
/// assert_eq!(layer.output_size(), 512);
/// ```
#[derive(Debug, Clone)]
pub struct DenseLayer {
    input_size: usize,
    output_size: usize,
    weights: Vec<f32>,
    biases: Option<Vec<f32>>,
}

impl DenseLayer {
    /// Create a new DenseLayer whose weights follow `policy` and whose biases
    /// start at zero.
    pub fn new<R: Rng + ?Sized>(
        input_size: usize,
        output_size: usize,
        policy: InitPolicy,
        rng: &mut R,
    ) -> Self {
        Self {
            input_size,
            output_size,
            weights: policy.linear_weights(input_size, output_size, rng),
            biases: Some(vec![0.0f32; output_size]),
        }
    }

    /// Create a DenseLayer without a bias term.
    pub fn without_bias<R: Rng + ?Sized>(
        input_size: usize,
        output_size: usize,
        policy: InitPolicy,
        rng: &mut R,
    ) -> Self {
        Self {
            biases: None,
            ..Self::new(input_size, output_size, policy, rng)
        }
    }

    /// Build a layer from explicit parameters.
    ///
    /// `weights` is row-major input_size × output_size.
    pub fn from_parts(
        input_size: usize,
        output_size: usize,
        weights: Vec<f32>,
        biases: Option<Vec<f32>>,
    ) -> Result<Self> {
        ensure_len("dense weights", input_size * output_size, weights.len())?;
        if let Some(ref b) = biases {
            ensure_len("dense biases", output_size, b.len())?;
        }
        Ok(Self {
            input_size,
            output_size,
            weights,
            biases,
        })
    }

    /// Row-major input_size × output_size weight matrix.
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    /// Bias vector, if the layer has one.
    pub fn biases(&self) -> Option<&[f32]> {
        self.biases.as_deref()
    }
}

impl Layer for DenseLayer {
    fn forward(&self, input: &[f32], output: &mut [f32], batch_size: usize) -> Result<()> {
        ensure_len("dense input", batch_size * self.input_size, input.len())?;
        ensure_len("dense output", batch_size * self.output_size, output.len())?;

        gemm(
            batch_size,
            self.output_size,
            self.input_size,
            input,
            &self.weights,
            output,
            false,
            false,
            1.0,
            0.0,
        )?;

        if let Some(ref biases) = self.biases {
            for row in output.chunks_exact_mut(self.output_size) {
                for (value, bias) in row.iter_mut().zip(biases) {
                    *value += bias;
                }
            }
        }
        Ok(())
    }

    fn input_size(&self) -> usize {
        self.input_size
    }

    fn output_size(&self) -> usize {
        self.output_size
    }

    /// Returns input_size × output_size (weights) + output_size (biases, if any).
    fn parameter_count(&self) -> usize {
        self.weights.len() + self.biases.as_ref().map_or(0, Vec::len)
    }
}
