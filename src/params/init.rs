//! Initial weight draws.
//!
//! - Normal: `scale · N(0, 1)`, centered, for input and attention projections.
//! - Orthogonal: Q factor of a square Gaussian matrix, for recurrent blocks.
//!
//! Multi-gate matrices are drawn block by block and concatenated along the
//! output axis, so every gate block is orthogonal on its own.

use ndarray::{concatenate, Array1, Array2, ArrayView2, Axis};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::error::{Result, RnnError};

/// Columns with a smaller norm than this are redrawn during orthogonalisation.
const MIN_COLUMN_NORM: f64 = 1e-6;

/// `(nin, nout)` matrix of `scale · N(0, 1)` draws.
pub fn normal_weight<R: Rng + ?Sized>(rng: &mut R, nin: usize, nout: usize, scale: f32) -> Array2<f32> {
    Array2::from_shape_simple_fn((nin, nout), || {
        let v: f32 = rng.sample(StandardNormal);
        v * scale
    })
}

/// `(dim, dim)` orthogonal matrix.
///
/// Modified Gram-Schmidt over the columns of a Gaussian matrix, accumulated
/// in f64.
pub fn orthogonal_weight<R: Rng + ?Sized>(rng: &mut R, dim: usize) -> Array2<f32> {
    let mut q: Vec<Array1<f64>> = Vec::with_capacity(dim);

    while q.len() < dim {
        let mut v = Array1::from_shape_simple_fn(dim, || rng.sample::<f64, _>(StandardNormal));
        for basis in &q {
            let proj = basis.dot(&v);
            v.scaled_add(-proj, basis);
        }
        let norm = v.dot(&v).sqrt();
        if norm < MIN_COLUMN_NORM {
            continue;
        }
        q.push(v / norm);
    }

    let mut out = Array2::zeros((dim, dim));
    for (j, column) in q.iter().enumerate() {
        for (i, &v) in column.iter().enumerate() {
            out[[i, j]] = v as f32;
        }
    }
    out
}

/// Concatenate independently drawn blocks along the output (column) axis.
pub fn concat_columns(blocks: &[Array2<f32>]) -> Result<Array2<f32>> {
    let views: Vec<ArrayView2<'_, f32>> = blocks.iter().map(|b| b.view()).collect();
    concatenate(Axis(1), &views).map_err(|_| RnnError::ShapeMismatch {
        op: "concat_columns",
        left: blocks.first().map(|b| b.shape().to_vec()).unwrap_or_default(),
        right: vec![blocks.len()],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_orthogonal_columns() {
        let mut rng = StdRng::seed_from_u64(7);
        let q = orthogonal_weight(&mut rng, 6);
        let gram = q.t().dot(&q);
        for i in 0..6 {
            for j in 0..6 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!(
                    (gram[[i, j]] - expected).abs() < 1e-5,
                    "gram[{}, {}] = {}",
                    i,
                    j,
                    gram[[i, j]]
                );
            }
        }
    }

    #[test]
    fn test_normal_weight_scale() {
        let mut rng = StdRng::seed_from_u64(3);
        let w = normal_weight(&mut rng, 64, 64, 0.01);
        let mean = w.mean().unwrap_or(1.0);
        let max = w.iter().map(|v| v.abs()).fold(0.0f32, f32::max);
        assert!(mean.abs() < 1e-3, "mean = {}", mean);
        assert!(max < 0.06, "max = {}", max);
        assert!(max > 0.0);
    }

    #[test]
    fn test_blocks_are_independent() {
        let mut rng = StdRng::seed_from_u64(11);
        let blocks = vec![orthogonal_weight(&mut rng, 4), orthogonal_weight(&mut rng, 4)];
        let joined = concat_columns(&blocks).unwrap();
        assert_eq!(joined.dim(), (4, 8));
        assert_ne!(blocks[0], blocks[1]);
        // each 4×4 block stays orthogonal after concatenation
        let right = joined.slice(ndarray::s![.., 4..8]).to_owned();
        let gram = right.t().dot(&right);
        assert!((gram[[2, 2]] - 1.0).abs() < 1e-5);
        assert!(gram[[0, 3]].abs() < 1e-5);
    }

    #[test]
    fn test_seeded_draws_repeat() {
        let a = normal_weight(&mut StdRng::seed_from_u64(5), 3, 3, 1.0);
        let b = normal_weight(&mut StdRng::seed_from_u64(5), 3, 3, 1.0);
        assert_eq!(a, b);
    }
}
