//! Nystrom-approximate multi-head self-attention
//!
//! Full softmax attention costs O(n²). The Nystrom approximation picks `m`
//! landmark queries and keys (means of contiguous token groups) and rebuilds
//! the attention matrix from three small softmax kernels:
//!
//! ```text
//! attn1 = softmax(Q K̃ᵀ)     n × m
//! attn2 = softmax(Q̃ K̃ᵀ)     m × m
//! attn3 = softmax(Q̃ Kᵀ)     m × n
//! out   = attn1 · pinv(attn2) · (attn3 · V)
//! ```
//!
//! The pseudo-inverse is approximated with a fixed number of Newton-style
//! iterations. A depthwise convolution over the value sequence (one filter per
//! head) is added to the output as a residual.
//!
//! # References
//!
//! Xiong, Y. et al. (2021). Nyströmformer: A Nyström-Based Algorithm for
//! Approximating Self-Attention. AAAI.

use rand::Rng;
use tracing::trace;

use crate::error::{ensure_len, MilError, Result};
use crate::layers::{DenseLayer, DropoutLayer, Layer, LayerNorm};
use crate::utils::activations::softmax_rows;
use crate::utils::init::uniform_weights;
use crate::utils::matrix::{column_block, matmul, matmul_transpose_b, scaled_identity, transpose};
use crate::utils::InitPolicy;

/// Hyperparameters of a [`NystromAttention`] block.
#[derive(Debug, Clone, PartialEq)]
pub struct NystromConfig {
    /// Token width
    pub dim: usize,
    pub heads: usize,
    pub dim_head: usize,
    /// Number of landmarks m
    pub num_landmarks: usize,
    pub pinv_iterations: usize,
    /// Add the depthwise value convolution to the output
    pub residual: bool,
    /// Length of the residual filter along the sequence (odd)
    pub residual_kernel: usize,
    /// Dropout after the output projection; 0 disables it
    pub dropout: f32,
}

impl NystromConfig {
    /// Settings used by the TransMIL encoder for a `dim`-wide token:
    /// 8 heads of `dim / 8`, `dim / 2` landmarks, 6 pseudo-inverse
    /// iterations, residual kernel 33 and dropout 0.1.
    pub fn for_dim(dim: usize) -> Self {
        Self {
            dim,
            heads: 8,
            dim_head: dim / 8,
            num_landmarks: dim / 2,
            pinv_iterations: 6,
            residual: true,
            residual_kernel: 33,
            dropout: 0.1,
        }
    }

    pub fn inner_dim(&self) -> usize {
        self.heads * self.dim_head
    }

    fn validate(&self) -> Result<()> {
        if self.dim == 0 || self.heads == 0 || self.dim_head == 0 || self.num_landmarks == 0 {
            return Err(MilError::InvalidConfig(format!(
                "nystrom attention needs positive sizes (dim {}, heads {}, dim_head {}, landmarks {})",
                self.dim, self.heads, self.dim_head, self.num_landmarks
            )));
        }
        if self.residual && self.residual_kernel % 2 == 0 {
            return Err(MilError::InvalidConfig(format!(
                "residual kernel must be odd, got {}",
                self.residual_kernel
            )));
        }
        Ok(())
    }
}

/// Multi-head self-attention with the Nystrom approximation.
#[derive(Debug)]
pub struct NystromAttention {
    config: NystromConfig,
    to_qkv: DenseLayer,
    to_out: DenseLayer,
    dropout: Option<DropoutLayer>,
    /// heads × residual_kernel
    residual_weights: Option<Vec<f32>>,
}

impl NystromAttention {
    pub fn new<R: Rng + ?Sized>(config: NystromConfig, policy: InitPolicy, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let inner = config.inner_dim();

        let to_qkv = DenseLayer::without_bias(config.dim, 3 * inner, policy, rng);
        let to_out = DenseLayer::new(inner, config.dim, policy, rng);
        let dropout = if config.dropout > 0.0 {
            Some(DropoutLayer::new(config.dim, config.dropout, rng)?)
        } else {
            None
        };
        let residual_weights = if config.residual {
            let limit = 1.0 / (config.residual_kernel as f32).sqrt();
            Some(uniform_weights(config.heads * config.residual_kernel, limit, rng))
        } else {
            None
        };

        Ok(Self {
            config,
            to_qkv,
            to_out,
            dropout,
            residual_weights,
        })
    }

    pub fn config(&self) -> &NystromConfig {
        &self.config
    }

    pub fn parameter_count(&self) -> usize {
        self.to_qkv.parameter_count()
            + self.to_out.parameter_count()
            + self.residual_weights.as_ref().map_or(0, Vec::len)
    }

    pub fn set_training(&mut self, training: bool) {
        if let Some(ref mut dropout) = self.dropout {
            dropout.set_training(training);
        }
    }

    /// Attends over `batch_size` sequences of `seq_len` tokens.
    pub fn forward(&self, x: &[f32], batch_size: usize, seq_len: usize) -> Result<Vec<f32>> {
        let dim = self.config.dim;
        if seq_len == 0 {
            return Err(MilError::EmptyBag);
        }
        ensure_len("nystrom input", batch_size * seq_len * dim, x.len())?;

        let mut output = Vec::with_capacity(x.len());
        for sequence in x.chunks(seq_len * dim) {
            output.extend(self.attend(sequence, seq_len)?);
        }
        Ok(output)
    }

    /// Attention over a single `n × dim` sequence.
    fn attend(&self, x: &[f32], n: usize) -> Result<Vec<f32>> {
        let NystromConfig {
            dim,
            heads,
            dim_head,
            num_landmarks: m,
            pinv_iterations,
            ..
        } = self.config;
        let inner = heads * dim_head;

        // Front zero padding up to a multiple of m
        let pad = (m - n % m) % m;
        let len = n + pad;
        let group = len / m;
        let mut padded = vec![0.0f32; pad * dim];
        padded.extend_from_slice(x);
        trace!(n, pad, landmarks = m, group, "nystrom attention");

        let qkv = self.to_qkv.forward_alloc(&padded, len)?;
        let scale = (dim_head as f32).powf(-0.5);
        let mut merged = vec![0.0f32; len * inner];

        for head in 0..heads {
            let offset = head * dim_head;
            let mut q = column_block(&qkv, len, 3 * inner, offset, dim_head)?;
            q.iter_mut().for_each(|v| *v *= scale);
            let k = column_block(&qkv, len, 3 * inner, inner + offset, dim_head)?;
            let v = column_block(&qkv, len, 3 * inner, 2 * inner + offset, dim_head)?;

            let q_landmarks = landmark_means(&q, m, group, dim_head);
            let k_landmarks = landmark_means(&k, m, group, dim_head);

            let mut attn1 = matmul_transpose_b(&q, &k_landmarks, len, dim_head, m)?;
            softmax_rows(&mut attn1, len, m)?;
            let mut attn2 = matmul_transpose_b(&q_landmarks, &k_landmarks, m, dim_head, m)?;
            softmax_rows(&mut attn2, m, m)?;
            let mut attn3 = matmul_transpose_b(&q_landmarks, &k, m, dim_head, len)?;
            softmax_rows(&mut attn3, m, len)?;

            let attn2_inv = iterative_pinv(&attn2, m, pinv_iterations)?;
            let left = matmul(&attn1, &attn2_inv, len, m, m)?;
            let right = matmul(&attn3, &v, m, len, dim_head)?;
            let mut out = matmul(&left, &right, len, m, dim_head)?;

            if let Some(ref weights) = self.residual_weights {
                let kernel = self.config.residual_kernel;
                let filter = &weights[head * kernel..(head + 1) * kernel];
                add_sequence_conv(&mut out, &v, filter, len, dim_head);
            }

            for t in 0..len {
                merged[t * inner + offset..t * inner + offset + dim_head]
                    .copy_from_slice(&out[t * dim_head..(t + 1) * dim_head]);
            }
        }

        let mut projected = self.to_out.forward_alloc(&merged, len)?;
        if let Some(ref dropout) = self.dropout {
            projected = dropout.forward_alloc(&projected, len)?;
        }
        Ok(projected.split_off(pad * dim))
    }
}

/// Means of `m` contiguous groups of `group` rows.
fn landmark_means(data: &[f32], m: usize, group: usize, width: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; m * width];
    let inv = 1.0 / group as f32;
    for (row, values) in data.chunks(width).enumerate() {
        let target = &mut out[(row / group) * width..(row / group + 1) * width];
        for (acc, v) in target.iter_mut().zip(values) {
            *acc += v * inv;
        }
    }
    out
}

/// `out[t, d] += Σ_j filter[j] · values[t + j - pad, d]` with zero padding.
fn add_sequence_conv(out: &mut [f32], values: &[f32], filter: &[f32], len: usize, width: usize) {
    let pad = (filter.len() / 2) as isize;
    for t in 0..len {
        for (j, &w) in filter.iter().enumerate() {
            let src = t as isize + j as isize - pad;
            if src < 0 || src >= len as isize {
                continue;
            }
            let src = src as usize;
            let dst = &mut out[t * width..(t + 1) * width];
            for (o, v) in dst.iter_mut().zip(&values[src * width..(src + 1) * width]) {
                *o += w * v;
            }
        }
    }
}

/// `value · I − m` for an n × n matrix.
fn identity_minus(value: f32, m: &[f32], n: usize) -> Vec<f32> {
    let mut out = scaled_identity(n, value);
    for (o, v) in out.iter_mut().zip(m) {
        *o -= v;
    }
    out
}

/// Iterative Moore-Penrose pseudo-inverse of an n × n matrix.
///
/// Starts from `xᵀ / (max_i Σ_j |x_ij| · max_j Σ_i |x_ij|)` and applies
/// `z ← ¼ z (13I − xz (15I − xz (7I − xz)))` `iterations` times.
pub fn iterative_pinv(x: &[f32], n: usize, iterations: usize) -> Result<Vec<f32>> {
    ensure_len("pinv input", n * n, x.len())?;

    let max_row = x
        .chunks(n)
        .map(|row| row.iter().map(|v| v.abs()).sum::<f32>())
        .fold(0.0f32, f32::max);
    let max_col = (0..n)
        .map(|c| (0..n).map(|r| x[r * n + c].abs()).sum::<f32>())
        .fold(0.0f32, f32::max);
    let denom = max_row * max_col;
    if denom <= 0.0 {
        return Ok(vec![0.0f32; n * n]);
    }

    let mut z = transpose(x, n, n)?;
    z.iter_mut().for_each(|v| *v /= denom);

    for _ in 0..iterations {
        let xz = matmul(x, &z, n, n, n)?;
        let inner = identity_minus(7.0, &xz, n);
        let inner = identity_minus(15.0, &matmul(&xz, &inner, n, n, n)?, n);
        let inner = identity_minus(13.0, &matmul(&xz, &inner, n, n, n)?, n);
        z = matmul(&z, &inner, n, n, n)?;
        z.iter_mut().for_each(|v| *v *= 0.25);
    }
    Ok(z)
}

/// Pre-norm residual block: `x + attn(LayerNorm(x))`.
#[derive(Debug)]
pub struct TransLayer {
    norm: LayerNorm,
    attn: NystromAttention,
}

impl TransLayer {
    pub fn new<R: Rng + ?Sized>(config: NystromConfig, policy: InitPolicy, rng: &mut R) -> Result<Self> {
        Ok(Self {
            norm: LayerNorm::new(config.dim),
            attn: NystromAttention::new(config, policy, rng)?,
        })
    }

    pub fn dim(&self) -> usize {
        self.attn.config().dim
    }

    pub fn attention(&self) -> &NystromAttention {
        &self.attn
    }

    pub fn parameter_count(&self) -> usize {
        self.norm.parameter_count() + self.attn.parameter_count()
    }

    pub fn set_training(&mut self, training: bool) {
        self.attn.set_training(training);
    }

    pub fn forward(&self, x: &[f32], batch_size: usize, seq_len: usize) -> Result<Vec<f32>> {
        let normed = self.norm.forward_alloc(x, batch_size * seq_len)?;
        let mut out = self.attn.forward(&normed, batch_size, seq_len)?;
        for (o, v) in out.iter_mut().zip(x) {
            *o += v;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small_config() -> NystromConfig {
        NystromConfig {
            dropout: 0.0,
            residual_kernel: 5,
            ..NystromConfig::for_dim(16)
        }
    }

    fn random_tokens(rng: &mut StdRng, count: usize) -> Vec<f32> {
        (0..count).map(|_| rng.gen_range(-1.0..1.0)).collect()
    }

    #[test]
    fn test_for_dim_defaults() {
        let config = NystromConfig::for_dim(512);
        assert_eq!(config.heads, 8);
        assert_eq!(config.dim_head, 64);
        assert_eq!(config.num_landmarks, 256);
        assert_eq!(config.pinv_iterations, 6);
        assert_eq!(config.residual_kernel, 33);
        assert_eq!(config.inner_dim(), 512);
    }

    #[test]
    fn test_pinv_inverts_well_conditioned_matrix() {
        let x = vec![0.9, 0.1, 0.2, 0.8];
        let z = iterative_pinv(&x, 2, 6).unwrap();
        let product = matmul(&x, &z, 2, 2, 2).unwrap();
        for (p, e) in product.iter().zip(&[1.0, 0.0, 0.0, 1.0]) {
            assert!((p - e).abs() < 1e-4, "{} vs {}", p, e);
        }
    }

    #[test]
    fn test_landmark_means_groups_contiguous_rows() {
        let data = vec![1.0, 3.0, 5.0, 7.0];
        assert_eq!(landmark_means(&data, 2, 2, 1), vec![2.0, 6.0]);
    }

    #[test]
    fn test_sequence_conv_centre_tap_is_identity() {
        let values = vec![1.0, 2.0, 3.0];
        let mut out = vec![0.0; 3];
        add_sequence_conv(&mut out, &values, &[0.0, 1.0, 0.0], 3, 1);
        assert_eq!(out, values);
    }

    #[test]
    fn test_output_keeps_sequence_length() {
        let mut rng = StdRng::seed_from_u64(7);
        let attn = NystromAttention::new(small_config(), InitPolicy::XavierNormal, &mut rng).unwrap();
        // 11 tokens with 8 landmarks needs 5 padding rows
        let x = random_tokens(&mut rng, 11 * 16);
        let out = attn.forward(&x, 1, 11).unwrap();
        assert_eq!(out.len(), 11 * 16);
        assert!(out.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_matches_full_attention_when_every_token_is_a_landmark() {
        let mut rng = StdRng::seed_from_u64(11);
        let config = NystromConfig {
            residual: false,
            num_landmarks: 4,
            pinv_iterations: 12,
            ..small_config()
        };
        let attn = NystromAttention::new(config.clone(), InitPolicy::XavierNormal, &mut rng).unwrap();
        // Sharper attention keeps attn2 well conditioned
        let x: Vec<f32> = random_tokens(&mut rng, 4 * 16).iter().map(|v| v * 4.0).collect();
        let out = attn.forward(&x, 1, 4).unwrap();

        let inner = config.inner_dim();
        let qkv = attn.to_qkv.forward_alloc(&x, 4).unwrap();
        let scale = (config.dim_head as f32).powf(-0.5);
        let mut merged = vec![0.0; 4 * inner];
        for head in 0..config.heads {
            let offset = head * config.dim_head;
            let q = column_block(&qkv, 4, 3 * inner, offset, config.dim_head).unwrap();
            let k = column_block(&qkv, 4, 3 * inner, inner + offset, config.dim_head).unwrap();
            let v = column_block(&qkv, 4, 3 * inner, 2 * inner + offset, config.dim_head).unwrap();
            let mut scores = matmul_transpose_b(&q, &k, 4, config.dim_head, 4).unwrap();
            scores.iter_mut().for_each(|s| *s *= scale);
            softmax_rows(&mut scores, 4, 4).unwrap();
            let head_out = matmul(&scores, &v, 4, 4, config.dim_head).unwrap();
            for t in 0..4 {
                merged[t * inner + offset..t * inner + offset + config.dim_head]
                    .copy_from_slice(&head_out[t * config.dim_head..(t + 1) * config.dim_head]);
            }
        }
        let expected = attn.to_out.forward_alloc(&merged, 4).unwrap();

        for (a, e) in out.iter().zip(&expected) {
            assert!((a - e).abs() < 1e-3, "{} vs {}", a, e);
        }
    }

    #[test]
    fn test_sequences_in_a_batch_are_independent() {
        let mut rng = StdRng::seed_from_u64(3);
        let layer = TransLayer::new(small_config(), InitPolicy::XavierNormal, &mut rng).unwrap();
        let x = random_tokens(&mut rng, 2 * 6 * 16);
        let batched = layer.forward(&x, 2, 6).unwrap();
        let single = layer.forward(&x[6 * 16..], 1, 6).unwrap();
        for (a, b) in batched[6 * 16..].iter().zip(&single) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut rng = StdRng::seed_from_u64(1);
        let config = NystromConfig {
            residual_kernel: 4,
            ..small_config()
        };
        assert!(NystromAttention::new(config, InitPolicy::XavierNormal, &mut rng).is_err());
        assert!(NystromAttention::new(NystromConfig::for_dim(4), InitPolicy::XavierNormal, &mut rng).is_err());
    }
}
