//! Pyramid position encoding generator (PPEG)
//!
//! Instance tokens are laid out on an `H × W` grid (token `t` at row `t / W`,
//! column `t % W`) and encoded with three depthwise convolutions of kernel
//! 7, 5 and 3 whose outputs are summed with the identity. The aggregation token
//! at position 0 bypasses the convolutions.

use rand::Rng;
use tracing::trace;

use crate::error::{ensure_len, MilError, Result};
use crate::layers::DepthwiseConv2DLayer;

/// Kernel sizes of the three convolution branches.
pub const PPEG_KERNELS: [usize; 3] = [7, 5, 3];

#[derive(Debug, Clone)]
pub struct Ppeg {
    dim: usize,
    branches: Vec<DepthwiseConv2DLayer>,
}

impl Ppeg {
    pub fn new<R: Rng + ?Sized>(dim: usize, rng: &mut R) -> Result<Self> {
        let branches = PPEG_KERNELS
            .iter()
            .map(|&k| DepthwiseConv2DLayer::new(dim, k, rng))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { dim, branches })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn parameter_count(&self) -> usize {
        self.branches.iter().map(DepthwiseConv2DLayer::parameter_count).sum()
    }

    /// Encodes `batch_size` sequences of `1 + height * width` tokens.
    ///
    /// # Errors
    ///
    /// [`MilError::ShapeMismatch`] when `seq_len - 1 != height * width`.
    pub fn forward(
        &self,
        x: &[f32],
        batch_size: usize,
        seq_len: usize,
        height: usize,
        width: usize,
    ) -> Result<Vec<f32>> {
        let c = self.dim;
        if seq_len == 0 || seq_len - 1 != height * width {
            return Err(MilError::shape(
                "ppeg grid tokens",
                height * width,
                seq_len.saturating_sub(1),
            ));
        }
        ensure_len("ppeg input", batch_size * seq_len * c, x.len())?;
        trace!(batch_size, height, width, "ppeg");

        let grid_len = height * width * c;
        let mut output = Vec::with_capacity(x.len());
        let mut branch_out = vec![0.0f32; grid_len];

        for sequence in x.chunks(seq_len * c) {
            let (cls_token, grid) = sequence.split_at(c);
            let mut encoded = grid.to_vec();
            for branch in &self.branches {
                branch.forward_grid(grid, &mut branch_out, height, width)?;
                for (e, b) in encoded.iter_mut().zip(&branch_out) {
                    *e += b;
                }
            }
            output.extend_from_slice(cls_token);
            output.extend(encoded);
        }
        Ok(output)
    }
}
