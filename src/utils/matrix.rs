//! Matrix helpers over row-major flat buffers
//!
//! All tensors in this crate are stored as flat `f32` slices in row-major
//! order. These helpers wrap ndarray's GEMM so callers can keep working with
//! plain buffers.

use ndarray::linalg::general_mat_mul;
use ndarray::{ArrayView2, ArrayViewMut2};

use crate::error::{ensure_len, Result};

/// General matrix multiply: C = alpha * op(A) * op(B) + beta * C.
///
/// `op(A)` is m×k and `op(B)` is k×n. When `transpose_a` is set, `a` holds the
/// k×m matrix; likewise `b` holds n×k when `transpose_b` is set.
#[allow(clippy::too_many_arguments)]
pub fn gemm(
    m: usize,
    n: usize,
    k: usize,
    a: &[f32],
    b: &[f32],
    c: &mut [f32],
    transpose_a: bool,
    transpose_b: bool,
    alpha: f32,
    beta: f32,
) -> Result<()> {
    ensure_len("gemm lhs", m * k, a.len())?;
    ensure_len("gemm rhs", k * n, b.len())?;
    ensure_len("gemm output", m * n, c.len())?;

    let a_view = if transpose_a {
        ArrayView2::from_shape((k, m), a)?.reversed_axes()
    } else {
        ArrayView2::from_shape((m, k), a)?
    };
    let b_view = if transpose_b {
        ArrayView2::from_shape((n, k), b)?.reversed_axes()
    } else {
        ArrayView2::from_shape((k, n), b)?
    };
    let mut c_view = ArrayViewMut2::from_shape((m, n), c)?;

    general_mat_mul(alpha, &a_view, &b_view, beta, &mut c_view);
    Ok(())
}

/// Returns A (m×k) · B (k×n).
pub fn matmul(a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Result<Vec<f32>> {
    let mut c = vec![0.0f32; m * n];
    gemm(m, n, k, a, b, &mut c, false, false, 1.0, 0.0)?;
    Ok(c)
}

/// Returns A (m×k) · Bᵀ where `b` is stored n×k.
pub fn matmul_transpose_b(a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Result<Vec<f32>> {
    let mut c = vec![0.0f32; m * n];
    gemm(m, n, k, a, b, &mut c, false, true, 1.0, 0.0)?;
    Ok(c)
}

/// Transposes a rows×cols matrix.
pub fn transpose(data: &[f32], rows: usize, cols: usize) -> Result<Vec<f32>> {
    ensure_len("transpose", rows * cols, data.len())?;
    let mut out = vec![0.0f32; data.len()];
    for r in 0..rows {
        for c in 0..cols {
            out[c * rows + r] = data[r * cols + c];
        }
    }
    Ok(out)
}

/// Copies columns `start..start + width` of a rows×cols matrix.
pub fn column_block(data: &[f32], rows: usize, cols: usize, start: usize, width: usize) -> Result<Vec<f32>> {
    ensure_len("column_block", rows * cols, data.len())?;
    if start + width > cols {
        return Err(crate::error::MilError::shape(
            "column_block range",
            format!("<= {}", cols),
            start + width,
        ));
    }
    let mut out = Vec::with_capacity(rows * width);
    for row in data.chunks_exact(cols) {
        out.extend_from_slice(&row[start..start + width]);
    }
    Ok(out)
}

/// Identity matrix of size n×n scaled by `value`.
pub fn scaled_identity(n: usize, value: f32) -> Vec<f32> {
    let mut out = vec![0.0f32; n * n];
    for i in 0..n {
        out[i * n + i] = value;
    }
    out
}
