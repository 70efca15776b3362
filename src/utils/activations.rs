//! Activation functions and row-wise reductions
//!
//! This module provides the element-wise nonlinearities used by the MIL models
//! and the row-wise operations applied to logits:
//! - Sigmoid, Tanh, ReLU, GELU (f32, applied in-place)
//! - Softmax over the rows of a flat row-major matrix
//! - Argmax per row
//! - Discrete survival function from per-bin hazards

use crate::error::{MilError, Result};

/// Activation used by the instance feature extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Activation {
    /// Gaussian error linear unit (tanh approximation)
    #[default]
    Gelu,
    /// Rectified linear unit
    Relu,
}

impl Activation {
    /// Parses an activation name. Matching is case-insensitive and, like the
    /// reference models, anything other than "gelu" falls back to ReLU.
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("gelu") {
            Activation::Gelu
        } else {
            Activation::Relu
        }
    }

    /// Applies the activation to every element of `data`.
    pub fn apply_inplace(&self, data: &mut [f32]) {
        match self {
            Activation::Gelu => gelu_inplace(data),
            Activation::Relu => relu_inplace(data),
        }
    }
}

/// Sigmoid activation function (f32 version).
///
/// Returns the sigmoid of the input: 1 / (1 + exp(-x))
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Sigmoid applied in-place.
pub fn sigmoid_inplace(data: &mut [f32]) {
    for value in data.iter_mut() {
        *value = sigmoid(*value);
    }
}

/// Hyperbolic tangent applied in-place.
pub fn tanh_inplace(data: &mut [f32]) {
    for value in data.iter_mut() {
        *value = value.tanh();
    }
}

/// ReLU activation function (f32 version) applied in-place.
///
/// Sets all negative values to 0.0, keeps positive values unchanged.
pub fn relu_inplace(data: &mut [f32]) {
    for value in data.iter_mut() {
        if *value < 0.0 {
            *value = 0.0;
        }
    }
}

/// GELU activation (tanh approximation).
pub fn gelu(x: f32) -> f32 {
    const SQRT_2_OVER_PI: f32 = 0.797_884_6;
    const COEFF: f32 = 0.044_715;

    0.5 * x * (1.0 + (SQRT_2_OVER_PI * (x + COEFF * x * x * x)).tanh())
}

/// GELU applied in-place.
pub fn gelu_inplace(data: &mut [f32]) {
    for value in data.iter_mut() {
        *value = gelu(*value);
    }
}

/// Softmax activation function (f32 version) applied row-wise.
///
/// Converts logits to probabilities for each row. Uses the max-subtraction
/// trick for numerical stability to avoid overflow with large values.
///
/// # Arguments
/// * `outputs` - Flat array containing row-major matrix data
/// * `rows` - Number of rows in the matrix
/// * `cols` - Number of columns in the matrix
pub fn softmax_rows(outputs: &mut [f32], rows: usize, cols: usize) -> Result<()> {
    if cols == 0 {
        return Ok(());
    }
    if outputs.len() != rows * cols {
        return Err(MilError::shape("softmax_rows", rows * cols, outputs.len()));
    }

    for row in outputs.chunks_exact_mut(cols) {
        let mut max_value = row[0];
        for &value in row.iter().skip(1) {
            if value > max_value {
                max_value = value;
            }
        }

        let mut sum = 0.0f32;
        for value in row.iter_mut() {
            *value = (*value - max_value).exp();
            sum += *value;
        }

        let inv_sum = 1.0f32 / sum;
        for value in row.iter_mut() {
            *value *= inv_sum;
        }
    }
    Ok(())
}

/// Index of the largest value in each row (first index wins on ties).
pub fn argmax_rows(data: &[f32], rows: usize, cols: usize) -> Result<Vec<usize>> {
    if data.len() != rows * cols {
        return Err(MilError::shape("argmax_rows", rows * cols, data.len()));
    }
    if cols == 0 {
        return Ok(vec![0; rows]);
    }

    let indices = data
        .chunks_exact(cols)
        .map(|row| {
            let mut best = 0usize;
            for (j, &value) in row.iter().enumerate().skip(1) {
                if value > row[best] {
                    best = j;
                }
            }
            best
        })
        .collect();
    Ok(indices)
}

/// Discrete survival function S_j = prod_{i <= j} (1 - h_i), per row.
///
/// Every factor lies in [0, 1] when the hazards do, so each row is
/// non-increasing along the bin axis.
pub fn survival_from_hazards(hazards: &[f32], rows: usize, bins: usize) -> Result<Vec<f32>> {
    if hazards.len() != rows * bins {
        return Err(MilError::shape("survival_from_hazards", rows * bins, hazards.len()));
    }

    let mut surv = vec![0.0f32; hazards.len()];
    if bins == 0 {
        return Ok(surv);
    }
    for (h_row, s_row) in hazards.chunks_exact(bins).zip(surv.chunks_exact_mut(bins)) {
        let mut running = 1.0f32;
        for (h, s) in h_row.iter().zip(s_row.iter_mut()) {
            running *= 1.0 - h;
            *s = running;
        }
    }
    Ok(surv)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON_F32: f32 = 1e-6;

    #[test]
    fn test_sigmoid_zero() {
        assert!((sigmoid(0.0) - 0.5).abs() < EPSILON_F32);
    }

    #[test]
    fn test_relu_mixed() {
        let mut data = vec![-2.0, -1.0, 0.0, 1.0, 2.0];
        relu_inplace(&mut data);
        assert_eq!(data, vec![0.0, 0.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_gelu_shape() {
        assert_eq!(gelu(0.0), 0.0);
        assert!((gelu(3.0) - 3.0).abs() < 0.01);
        assert!(gelu(-3.0).abs() < 0.01);
        assert!(gelu(-0.5) < 0.0);
    }

    #[test]
    fn test_activation_from_name() {
        assert_eq!(Activation::from_name("GELU"), Activation::Gelu);
        assert_eq!(Activation::from_name("relu"), Activation::Relu);
        assert_eq!(Activation::from_name("anything"), Activation::Relu);
    }

    #[test]
    fn test_softmax_rows_independent() {
        let mut data = vec![1.0, 2.0, 3.0, 0.0, 0.0, 0.0];
        softmax_rows(&mut data, 2, 3).unwrap();
        let first: f32 = data[..3].iter().sum();
        let second: f32 = data[3..].iter().sum();
        assert!((first - 1.0).abs() < EPSILON_F32);
        assert!((second - 1.0).abs() < EPSILON_F32);
        assert!((data[3] - 1.0 / 3.0).abs() < EPSILON_F32);
    }

    #[test]
    fn test_softmax_single_column_is_exactly_one() {
        let mut data = vec![-7.25, 42.0];
        softmax_rows(&mut data, 2, 1).unwrap();
        assert_eq!(data, vec![1.0, 1.0]);
    }

    #[test]
    fn test_softmax_numerical_stability() {
        let mut data = vec![1000.0, 1001.0, 1002.0];
        softmax_rows(&mut data, 1, 3).unwrap();
        assert!(!data.iter().any(|x| x.is_nan() || x.is_infinite()));
    }

    #[test]
    fn test_softmax_rejects_bad_length() {
        let mut data = vec![1.0, 2.0, 3.0];
        assert!(softmax_rows(&mut data, 2, 2).is_err());
    }

    #[test]
    fn test_argmax_rows_first_wins() {
        let data = vec![0.1, 0.9, 0.9, 5.0, -1.0, 2.0];
        assert_eq!(argmax_rows(&data, 2, 3).unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_survival_cumulative_product() {
        let hazards = vec![0.5, 0.5, 0.0, 1.0];
        let surv = survival_from_hazards(&hazards, 1, 4).unwrap();
        assert_eq!(surv, vec![0.5, 0.25, 0.25, 0.0]);
    }
}
