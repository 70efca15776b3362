//! Shared utilities for the MIL network implementations
//!
//! This module provides the numeric helpers used across models: activation
//! functions, matrix multiplication over flat buffers, and the weight
//! initialization policy.

pub mod activations;
pub mod init;
pub mod matrix;

pub use activations::{
    argmax_rows, gelu, relu_inplace, sigmoid, softmax_rows, survival_from_hazards, Activation,
};
pub use init::InitPolicy;
pub use matrix::{gemm, matmul, matmul_transpose_b, transpose};
