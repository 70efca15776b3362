//! Weight initialization policy
//!
//! Every linear layer is initialized through an [`InitPolicy`] chosen once
//! at model construction: weights are drawn according to the policy and
//! biases start at zero. Normalization layers always start as the identity
//! transform (weight 1, bias 0).

use rand::Rng;
use rand_distr::StandardNormal;
use serde::Deserialize;

/// Initialization rule for linear layer weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitPolicy {
    /// Glorot normal: N(0, 2 / (fan_in + fan_out))
    #[default]
    XavierNormal,
    /// Glorot uniform: U(-limit, limit), limit = sqrt(6 / (fan_in + fan_out))
    XavierUniform,
}

impl InitPolicy {
    /// Draws `fan_in * fan_out` weights for a linear layer.
    pub fn linear_weights<R: Rng + ?Sized>(&self, fan_in: usize, fan_out: usize, rng: &mut R) -> Vec<f32> {
        let count = fan_in * fan_out;
        let fan_sum = (fan_in + fan_out).max(1) as f32;

        match self {
            InitPolicy::XavierNormal => {
                let std = (2.0f32 / fan_sum).sqrt();
                (0..count)
                    .map(|_| {
                        let z: f32 = rng.sample(StandardNormal);
                        z * std
                    })
                    .collect()
            }
            InitPolicy::XavierUniform => uniform_weights(count, (6.0f32 / fan_sum).sqrt(), rng),
        }
    }
}

/// Samples `count` values from U(-limit, limit).
pub fn uniform_weights<R: Rng + ?Sized>(count: usize, limit: f32, rng: &mut R) -> Vec<f32> {
    if limit <= 0.0 {
        return vec![0.0; count];
    }
    (0..count).map(|_| rng.gen_range(-limit..limit)).collect()
}

/// Samples `count` values from N(0, 1).
pub fn standard_normal<R: Rng + ?Sized>(count: usize, rng: &mut R) -> Vec<f32> {
    (0..count).map(|_| rng.sample(StandardNormal)).collect()
}

/// Identity affine parameters for a normalization layer: (weight, bias).
pub fn norm_params(size: usize) -> (Vec<f32>, Vec<f32>) {
    (vec![1.0f32; size], vec![0.0f32; size])
}
