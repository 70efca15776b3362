//! Depthwise 2D convolution layer implementation
//!
//! This module provides a DepthwiseConv2DLayer: every channel is convolved with
//! its own square filter (groups == channels), so channels never mix while each
//! output position sees its spatial neighbours. Padding is fixed at
//! `kernel_size / 2` with stride 1, which preserves the spatial size for odd
//! kernels.
//!
//! Inputs use a channel-last token layout: a grid of `height × width` tokens,
//! token `t` sitting at row `t / width` and column `t % width`, each token holding
//! `channels` values. This is the layout a sequence of token embeddings already
//! has, so no transposition is needed around the convolution.

use rand::Rng;

use crate::error::{ensure_len, MilError, Result};
use crate::utils::init::uniform_weights;

/// Depthwise 2D convolution with "same" zero padding and per-channel bias.
///
/// # Fields
///
/// * `channels` - Number of input (and output) channels
/// * `kernel_size` - Size of the square kernel (odd)
/// * `weights` - Filters stored as channels × kernel_size × kernel_size
/// * `biases` - Bias for each channel
///
/// # Example
///
/// ```ignore
/// let mut rng = StdRng::seed_from_u64(42);
/// let conv = DepthwiseConv2DLayer::new(512, 7, &mut rng)?;
/// let mut out = vec![0.0; 49 * 512];
/// conv.forward_grid(&tokens, &mut out, 7, 7)?;
/// ```
#[derive(Debug, Clone)]
pub struct DepthwiseConv2DLayer {
    channels: usize,
    kernel_size: usize,
    weights: Vec<f32>,
    biases: Vec<f32>,
}

impl DepthwiseConv2DLayer {
    /// Create a new depthwise convolution with Xavier-uniform filters and zero biases.
    ///
    /// For a depthwise filter fan_in = fan_out = kernel_size².
    ///
    /// # Errors
    ///
    /// Returns [`MilError::InvalidConfig`] for an even or zero kernel size.
    pub fn new<R: Rng + ?Sized>(channels: usize, kernel_size: usize, rng: &mut R) -> Result<Self> {
        if kernel_size == 0 || kernel_size % 2 == 0 {
            return Err(MilError::InvalidConfig(format!(
                "depthwise kernel size must be positive and odd, got {}",
                kernel_size
            )));
        }

        let fan = (kernel_size * kernel_size) as f32;
        let limit = (6.0f32 / (fan + fan)).sqrt();
        let weights = uniform_weights(channels * kernel_size * kernel_size, limit, rng);

        Ok(Self {
            channels,
            kernel_size,
            weights,
            biases: vec![0.0f32; channels],
        })
    }

    /// Build a layer from explicit filters (channels × k × k) and biases.
    pub fn from_parts(
        channels: usize,
        kernel_size: usize,
        weights: Vec<f32>,
        biases: Vec<f32>,
    ) -> Result<Self> {
        if kernel_size == 0 || kernel_size % 2 == 0 {
            return Err(MilError::InvalidConfig(format!(
                "depthwise kernel size must be positive and odd, got {}",
                kernel_size
            )));
        }
        ensure_len("depthwise weights", channels * kernel_size * kernel_size, weights.len())?;
        ensure_len("depthwise biases", channels, biases.len())?;
        Ok(Self {
            channels,
            kernel_size,
            weights,
            biases,
        })
    }

    /// Get the number of channels.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Get the kernel size.
    pub fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    /// Get the padding applied on every side.
    pub fn padding(&self) -> usize {
        self.kernel_size / 2
    }

    /// Get the total number of trainable parameters.
    pub fn parameter_count(&self) -> usize {
        self.weights.len() + self.biases.len()
    }

    /// Convolve one `height × width` token grid (channel-last).
    ///
    /// `output` is overwritten and has the same layout and size as `input`.
    pub fn forward_grid(
        &self,
        input: &[f32],
        output: &mut [f32],
        height: usize,
        width: usize,
    ) -> Result<()> {
        let c = self.channels;
        let k = self.kernel_size;
        let pad = self.padding() as isize;
        ensure_len("depthwise input", height * width * c, input.len())?;
        ensure_len("depthwise output", height * width * c, output.len())?;

        for row in 0..height {
            for col in 0..width {
                let out_base = (row * width + col) * c;
                output[out_base..out_base + c].copy_from_slice(&self.biases);

                for ki in 0..k {
                    let src_row = row as isize + ki as isize - pad;
                    if src_row < 0 || src_row >= height as isize {
                        continue;
                    }
                    for kj in 0..k {
                        let src_col = col as isize + kj as isize - pad;
                        if src_col < 0 || src_col >= width as isize {
                            continue;
                        }
                        let in_base = (src_row as usize * width + src_col as usize) * c;
                        let tap = ki * k + kj;
                        for ch in 0..c {
                            output[out_base + ch] +=
                                self.weights[ch * k * k + tap] * input[in_base + ch];
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_conv_initialization() {
        let mut rng = StdRng::seed_from_u64(42);
        let layer = DepthwiseConv2DLayer::new(8, 3, &mut rng).unwrap();

        assert_eq!(layer.channels(), 8);
        assert_eq!(layer.kernel_size(), 3);
        assert_eq!(layer.padding(), 1);
        // weights: 8 * 3 * 3 = 72, biases: 8
        assert_eq!(layer.parameter_count(), 80);
    }

    #[test]
    fn test_rejects_even_kernel() {
        let mut rng = StdRng::seed_from_u64(42);
        assert!(DepthwiseConv2DLayer::new(4, 4, &mut rng).is_err());
        assert!(DepthwiseConv2DLayer::new(4, 0, &mut rng).is_err());
    }

    #[test]
    fn test_box_filter_counts_neighbours() {
        // One channel, all-ones 3x3 kernel over an all-ones 3x3 grid:
        // corners see 4 cells, edges 6, the centre 9.
        let layer = DepthwiseConv2DLayer::from_parts(1, 3, vec![1.0; 9], vec![0.0]).unwrap();
        let input = vec![1.0; 9];
        let mut output = vec![0.0; 9];
        layer.forward_grid(&input, &mut output, 3, 3).unwrap();
        assert_eq!(output, vec![4.0, 6.0, 4.0, 6.0, 9.0, 6.0, 4.0, 6.0, 4.0]);
    }

    #[test]
    fn test_channels_do_not_mix() {
        // Channel 0 uses the identity tap, channel 1 is zeroed with bias 2.
        let mut weights = vec![0.0; 2 * 9];
        weights[4] = 1.0;
        let layer = DepthwiseConv2DLayer::from_parts(2, 3, weights, vec![0.0, 2.0]).unwrap();
        let input: Vec<f32> = (0..8).map(|v| v as f32).collect(); // 2x2 grid, 2 channels
        let mut output = vec![0.0; 8];
        layer.forward_grid(&input, &mut output, 2, 2).unwrap();
        assert_eq!(output, vec![0.0, 2.0, 2.0, 2.0, 4.0, 2.0, 6.0, 2.0]);
    }

    #[test]
    fn test_grid_size_must_match_buffer() {
        let mut rng = StdRng::seed_from_u64(1);
        let layer = DepthwiseConv2DLayer::new(2, 3, &mut rng).unwrap();
        let input = vec![0.0; 10];
        let mut output = vec![0.0; 10];
        assert!(layer.forward_grid(&input, &mut output, 2, 2).is_err());
    }
}
