// Integration tests for the layer building blocks and matrix helpers.
// Layers are exercised through the public Layer trait the models use.

use approx::assert_relative_eq;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rust_mil_networks::layers::{DenseLayer, DepthwiseConv2DLayer, DropoutLayer, Layer, LayerNorm};
use rust_mil_networks::utils::init::{norm_params, standard_normal};
use rust_mil_networks::utils::matrix::{column_block, scaled_identity};
use rust_mil_networks::utils::{matmul, matmul_transpose_b, transpose, InitPolicy};
use rust_mil_networks::MilError;

// ============================================================================
// Dense Layer Tests
// ============================================================================

mod dense_tests {
    use super::*;

    #[test]
    fn test_dense_known_weights() {
        // y = x W + b with W = [[1, 2], [3, 4], [5, 6]]
        let layer = DenseLayer::from_parts(
            3,
            2,
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            Some(vec![0.5, -0.5]),
        )
        .unwrap();
        let output = layer.forward_alloc(&[1.0, 0.0, -1.0, 2.0, 1.0, 0.0], 2).unwrap();
        assert_eq!(output, vec![-3.5, -4.5, 5.5, 7.5]);
    }

    #[test]
    fn test_dense_without_bias() {
        let mut rng = StdRng::seed_from_u64(1);
        let layer = DenseLayer::without_bias(4, 3, InitPolicy::XavierNormal, &mut rng);
        assert!(layer.biases().is_none());
        assert_eq!(layer.parameter_count(), 12);
        assert_eq!(layer.forward_alloc(&[0.0; 4], 1).unwrap(), vec![0.0; 3]);
    }

    #[test]
    fn test_dense_initial_biases_are_zero() {
        let mut rng = StdRng::seed_from_u64(2);
        for policy in [InitPolicy::XavierNormal, InitPolicy::XavierUniform] {
            let layer = DenseLayer::new(16, 8, policy, &mut rng);
            assert_eq!(layer.biases().unwrap(), &[0.0; 8]);
            assert_eq!(layer.weights().len(), 128);
        }
    }

    #[test]
    fn test_xavier_uniform_within_limit() {
        let mut rng = StdRng::seed_from_u64(3);
        let limit = (6.0f32 / (64.0 + 32.0)).sqrt();
        let weights = InitPolicy::XavierUniform.linear_weights(64, 32, &mut rng);
        assert!(weights.iter().all(|w| w.abs() <= limit));
    }

    #[test]
    fn test_xavier_normal_variance() {
        let mut rng = StdRng::seed_from_u64(4);
        let weights = InitPolicy::XavierNormal.linear_weights(200, 200, &mut rng);
        let mean = weights.iter().sum::<f32>() / weights.len() as f32;
        let var = weights.iter().map(|w| (w - mean) * (w - mean)).sum::<f32>() / weights.len() as f32;
        assert_relative_eq!(var, 2.0 / 400.0, max_relative = 0.1);
    }

    #[test]
    fn test_dense_shape_mismatch() {
        let layer = DenseLayer::from_parts(2, 2, vec![0.0; 4], None).unwrap();
        assert!(matches!(
            layer.forward_alloc(&[1.0, 2.0, 3.0], 1),
            Err(MilError::ShapeMismatch { .. })
        ));
        assert!(DenseLayer::from_parts(2, 2, vec![0.0; 3], None).is_err());
    }
}

// ============================================================================
// Normalization and Dropout Tests
// ============================================================================

mod regularization_tests {
    use super::*;

    #[test]
    fn test_layer_norm_identity_affine() {
        let (gamma, beta) = norm_params(3);
        assert_eq!(gamma, vec![1.0; 3]);
        assert_eq!(beta, vec![0.0; 3]);

        let norm = LayerNorm::new(3);
        let output = norm.forward_alloc(&[1.0, 2.0, 3.0], 1).unwrap();
        let expected = 1.0 / (2.0f32 / 3.0 + 1e-5).sqrt();
        assert_relative_eq!(output[0], -expected, epsilon = 1e-5);
        assert_relative_eq!(output[1], 0.0, epsilon = 1e-6);
        assert_relative_eq!(output[2], expected, epsilon = 1e-5);
    }

    #[test]
    fn test_dropout_rate_statistical_verification() {
        let mut rng = StdRng::seed_from_u64(42);
        let layer = DropoutLayer::new(1000, 0.25, &mut rng).unwrap();
        let output = layer.forward_alloc(&vec![1.0; 10_000], 10).unwrap();

        let dropped = output.iter().filter(|&&x| x == 0.0).count() as f32 / output.len() as f32;
        assert!((dropped - 0.25).abs() < 0.03, "dropped fraction {}", dropped);
        for &value in output.iter().filter(|&&x| x != 0.0) {
            assert_relative_eq!(value, 1.0 / 0.75, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_dropout_inference_passthrough() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut layer = DropoutLayer::new(4, 0.5, &mut rng).unwrap();
        layer.set_training(false);
        assert!(!layer.is_training());

        let input = vec![1.0, -2.0, 3.0, -4.0];
        assert_eq!(layer.forward_alloc(&input, 1).unwrap(), input);
    }

    #[test]
    fn test_dropout_rejects_invalid_rate() {
        let mut rng = StdRng::seed_from_u64(6);
        assert!(DropoutLayer::new(4, 1.0, &mut rng).is_err());
        assert!(DropoutLayer::new(4, -0.1, &mut rng).is_err());
    }
}

// ============================================================================
// Depthwise Convolution Tests
// ============================================================================

mod conv_tests {
    use super::*;

    #[test]
    fn test_box_filter_on_grid() {
        // Single channel 3x3 grid, all-ones 3x3 filter: each output is the
        // sum of its in-bounds neighbourhood
        let conv = DepthwiseConv2DLayer::from_parts(1, 3, vec![1.0; 9], vec![0.0]).unwrap();
        let input: Vec<f32> = (1..=9).map(|v| v as f32).collect();
        let mut output = vec![0.0; 9];
        conv.forward_grid(&input, &mut output, 3, 3).unwrap();

        assert_eq!(output[4], 45.0);
        assert_eq!(output[0], 1.0 + 2.0 + 4.0 + 5.0);
        assert_eq!(output[8], 5.0 + 6.0 + 8.0 + 9.0);
    }

    #[test]
    fn test_channels_do_not_mix() {
        // Channel 0 filter is zero, channel 1 filter is the identity tap
        let mut weights = vec![0.0; 2 * 9];
        weights[9 + 4] = 1.0;
        let conv = DepthwiseConv2DLayer::from_parts(2, 3, weights, vec![0.25, 0.0]).unwrap();
        let input: Vec<f32> = (0..2 * 4).map(|v| v as f32).collect();
        let mut output = vec![0.0; 8];
        conv.forward_grid(&input, &mut output, 2, 2).unwrap();

        for token in output.chunks(2).zip(input.chunks(2)) {
            assert_eq!(token.0[0], 0.25);
            assert_eq!(token.0[1], token.1[1]);
        }
    }

    #[test]
    fn test_even_kernel_rejected() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(matches!(
            DepthwiseConv2DLayer::new(4, 4, &mut rng),
            Err(MilError::InvalidConfig(_))
        ));
    }
}

// ============================================================================
// Matrix Helper Tests
// ============================================================================

mod matrix_tests {
    use super::*;

    #[test]
    fn test_matmul_and_transpose_b_agree() {
        let a = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]; // 2x3
        let b = vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0]; // 3x2
        let direct = matmul(&a, &b, 2, 3, 2).unwrap();
        assert_eq!(direct, vec![58.0, 64.0, 139.0, 154.0]);

        let b_t = transpose(&b, 3, 2).unwrap();
        assert_eq!(matmul_transpose_b(&a, &b_t, 2, 3, 2).unwrap(), direct);
    }

    #[test]
    fn test_column_block_and_identity() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert_eq!(column_block(&data, 2, 3, 1, 2).unwrap(), vec![2.0, 3.0, 5.0, 6.0]);
        assert!(column_block(&data, 2, 3, 2, 2).is_err());
        assert_eq!(scaled_identity(2, 3.0), vec![3.0, 0.0, 0.0, 3.0]);
    }

    #[test]
    fn test_standard_normal_is_seeded() {
        let a = standard_normal(8, &mut StdRng::seed_from_u64(9));
        let b = standard_normal(8, &mut StdRng::seed_from_u64(9));
        assert_eq!(a, b);
    }
}
