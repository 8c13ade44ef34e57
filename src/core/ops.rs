//! Checked tensor primitives shared by every cell.
//!
//! ndarray panics on incompatible shapes; these wrappers turn that into
//! `RnnError::ShapeMismatch` at the first product that cannot be formed.

use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView2, Axis};

use crate::error::{Result, RnnError};

/// `a · b` for `(n, k) · (k, m)`.
pub fn matmul(a: ArrayView2<'_, f32>, b: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
    if a.ncols() != b.nrows() {
        return Err(RnnError::shape("matmul", a.shape(), b.shape()));
    }
    Ok(a.dot(&b))
}

/// Element-wise `a + b` for equal shapes.
pub fn add(mut a: Array2<f32>, b: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
    if a.dim() != b.dim() {
        return Err(RnnError::shape("add", a.shape(), b.shape()));
    }
    a += &b;
    Ok(a)
}

/// Row-broadcast bias add: `a[i, :] + bias`.
pub fn add_bias(mut a: Array2<f32>, bias: ArrayView1<'_, f32>) -> Result<Array2<f32>> {
    if a.ncols() != bias.len() {
        return Err(RnnError::shape("bias", a.shape(), bias.shape()));
    }
    a += &bias;
    Ok(a)
}

/// Affine map `x · w + b`.
pub fn affine(
    x: ArrayView2<'_, f32>,
    w: ArrayView2<'_, f32>,
    b: ArrayView1<'_, f32>,
) -> Result<Array2<f32>> {
    add_bias(matmul(x, w)?, b)
}

/// Logistic sigmoid: 1 / (1 + exp(-x))
pub fn sigmoid(x: ArrayView2<'_, f32>) -> Array2<f32> {
    x.mapv(|v| 1.0 / (1.0 + (-v).exp()))
}

pub fn tanh(x: ArrayView2<'_, f32>) -> Array2<f32> {
    x.mapv(f32::tanh)
}

/// `1 - x`, element-wise.
pub fn complement(x: ArrayView2<'_, f32>) -> Array2<f32> {
    x.mapv(|v| 1.0 - v)
}

/// The `n`-th `dim`-wide column block of a concatenated gate projection.
pub fn gate_block(x: &Array2<f32>, n: usize, dim: usize) -> ArrayView2<'_, f32> {
    x.slice(s![.., n * dim..(n + 1) * dim])
}

/// `m · new + (1 − m) · prev` with one mask value per batch row.
///
/// Rows with mask 0 return `prev` bit-for-bit.
pub fn mask_blend(
    mask: ArrayView1<'_, f32>,
    new: &Array2<f32>,
    prev: ArrayView2<'_, f32>,
) -> Result<Array2<f32>> {
    if new.dim() != prev.dim() {
        return Err(RnnError::shape("mask_blend", new.shape(), prev.shape()));
    }
    if mask.len() != new.nrows() {
        return Err(RnnError::shape("mask_blend", mask.shape(), new.shape()));
    }
    let m = mask.insert_axis(Axis(1));
    let keep = m.mapv(|v| 1.0 - v);
    Ok(&m * new + &keep * &prev)
}

/// Stack per-step `(B, F)` tensors into a time-major `(T, B, F)` tensor.
pub fn stack_steps(steps: &[Array2<f32>]) -> Result<Array3<f32>> {
    let views: Vec<ArrayView2<'_, f32>> = steps.iter().map(|a| a.view()).collect();
    ndarray::stack(Axis(0), &views).map_err(|_| {
        let first = steps.first().map(|a| a.shape().to_vec()).unwrap_or_default();
        RnnError::ShapeMismatch {
            op: "stack_steps",
            left: first,
            right: vec![steps.len()],
        }
    })
}

/// Mean over the time axis, weighted by a `(T, B)` mask.
///
/// Rows whose mask sums to zero come back as zeros.
pub fn masked_mean(x: ArrayView2<'_, f32>, mask: ArrayView1<'_, f32>) -> Array1<f32> {
    let total: f32 = mask.sum();
    if total == 0.0 {
        return Array1::zeros(x.ncols());
    }
    let weighted = &x * &mask.insert_axis(Axis(1));
    weighted.sum_axis(Axis(0)) / total
}
