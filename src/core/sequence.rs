//! Time-major input batches and their padding masks.

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis};

use crate::error::{Result, RnnError};

/// A `(T, B, F)` input tensor with its `(T, B)` step mask.
#[derive(Clone, Debug)]
pub struct SequenceBatch {
    data: Array3<f32>,
    mask: Array2<f32>,
}

impl SequenceBatch {
    /// Wrap a time-major tensor.  A missing mask means every step is live.
    pub fn new(data: Array3<f32>, mask: Option<Array2<f32>>) -> Result<Self> {
        let (steps, batch, _) = data.dim();
        if steps == 0 {
            return Err(RnnError::InvalidConfig("input sequence has no timesteps"));
        }
        let mask = match mask {
            Some(mask) => {
                validate_mask(mask.view(), steps, batch)?;
                mask
            }
            None => Array2::ones((steps, batch)),
        };
        Ok(Self { data, mask })
    }

    /// Rank-2 `(T, F)` input; the batch axis is taken to be 1.
    pub fn unbatched(data: Array2<f32>, mask: Option<Array1<f32>>) -> Result<Self> {
        let data = data.insert_axis(Axis(1));
        let mask = mask.map(|m| m.insert_axis(Axis(1)));
        Self::new(data, mask)
    }

    /// One generation step: `(B, F)` input with an optional `(B,)` mask.
    pub fn single_step(x: Array2<f32>, mask: Option<Array1<f32>>) -> Result<Self> {
        let data = x.insert_axis(Axis(0));
        let mask = mask.map(|m| m.insert_axis(Axis(0)));
        Self::new(data, mask)
    }

    pub fn steps(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn batch(&self) -> usize {
        self.data.len_of(Axis(1))
    }

    pub fn features(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn mask(&self) -> &Array2<f32> {
        &self.mask
    }

    /// Input slice `(B, F)` at step `t`.
    pub fn step(&self, t: usize) -> ArrayView2<'_, f32> {
        self.data.index_axis(Axis(0), t)
    }

    /// Mask row `(B,)` at step `t`.
    pub fn mask_at(&self, t: usize) -> ArrayView1<'_, f32> {
        self.mask.index_axis(Axis(0), t)
    }
}

/// Check that a mask is `(steps, batch)` and holds only zeros and ones.
pub fn validate_mask(mask: ArrayView2<'_, f32>, steps: usize, batch: usize) -> Result<()> {
    if mask.dim() != (steps, batch) {
        return Err(RnnError::InvalidMask {
            reason: format!("expected shape {:?}, got {:?}", (steps, batch), mask.dim()),
        });
    }
    if let Some(v) = mask.iter().find(|&&v| v != 0.0 && v != 1.0) {
        return Err(RnnError::InvalidMask {
            reason: format!("mask values must be 0 or 1, found {}", v),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_default_mask_is_ones() {
        let batch = SequenceBatch::new(Array3::zeros((3, 2, 4)), None).unwrap();
        assert_eq!(batch.steps(), 3);
        assert_eq!(batch.batch(), 2);
        assert_eq!(batch.features(), 4);
        assert!(batch.mask().iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_unbatched_input() {
        let batch = SequenceBatch::unbatched(Array2::zeros((5, 3)), None).unwrap();
        assert_eq!(batch.data().dim(), (5, 1, 3));
        assert_eq!(batch.mask().dim(), (5, 1));
    }

    #[test]
    fn test_single_step_shape() {
        let batch = SequenceBatch::single_step(Array2::zeros((2, 3)), Some(array![1.0, 0.0])).unwrap();
        assert_eq!(batch.steps(), 1);
        assert_eq!(batch.mask_at(0), array![1.0, 0.0]);
    }

    #[test]
    fn test_rejects_fractional_mask() {
        let err = SequenceBatch::new(Array3::zeros((1, 2, 1)), Some(array![[1.0, 0.5]])).unwrap_err();
        assert!(matches!(err, RnnError::InvalidMask { .. }));
    }

    #[test]
    fn test_rejects_wrong_mask_shape() {
        let err = SequenceBatch::new(Array3::zeros((2, 2, 1)), Some(array![[1.0, 1.0]])).unwrap_err();
        assert!(matches!(err, RnnError::InvalidMask { .. }));
    }

    #[test]
    fn test_rejects_empty_sequence() {
        assert!(SequenceBatch::new(Array3::zeros((0, 2, 1)), None).is_err());
    }
}
