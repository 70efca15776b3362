//! Layer trait definition for neural network layers
//!
//! This module defines the core Layer trait that the row-wise layer types
//! implement. The trait provides a common interface for forward propagation
//! and layer introspection. Parameter updates belong to an external training
//! procedure and are not part of this interface.

use crate::error::Result;

/// Core trait for row-wise neural network layers.
///
/// A layer maps every row of a row-major `batch_size × input_size` buffer to
/// a row of the `batch_size × output_size` output buffer. For MIL models the
/// "batch" is usually the flattened `bags × instances` axis.
///
/// # Example
///
/// ```ignore
/// let mut output = vec![0.0f32; rows * layer.output_size()];
/// layer.forward(&input, &mut output, rows)?;
/// ```
pub trait Layer {
    /// Forward propagation through the layer.
    ///
    /// # Arguments
    ///
    /// * `input` - Input data flattened as a 1D array (batch_size × input_size)
    /// * `output` - Output buffer to store results (batch_size × output_size)
    /// * `batch_size` - Number of rows in the batch
    ///
    /// # Errors
    ///
    /// Returns [`MilError::ShapeMismatch`](crate::error::MilError::ShapeMismatch)
    /// if the buffer lengths disagree with the layer dimensions.
    fn forward(&self, input: &[f32], output: &mut [f32], batch_size: usize) -> Result<()>;

    /// Get the input size of the layer.
    fn input_size(&self) -> usize;

    /// Get the output size of the layer.
    fn output_size(&self) -> usize;

    /// Get the number of trainable parameters in the layer.
    fn parameter_count(&self) -> usize;

    /// Switch between training and inference behaviour.
    ///
    /// Layers without mode-dependent behaviour ignore this.
    fn set_training(&mut self, _training: bool) {}

    /// Convenience wrapper allocating the output buffer.
    fn forward_alloc(&self, input: &[f32], batch_size: usize) -> Result<Vec<f32>> {
        let mut output = vec![0.0f32; batch_size * self.output_size()];
        self.forward(input, &mut output, batch_size)?;
        Ok(output)
    }
}
