//! Recurrent state carried between steps.
//!
//! Replay mode threads this through the sequence internally; single-step mode
//! hands it back to the caller, who passes it into the next call.

use ndarray::Array2;

use crate::error::{Result, RnnError};

/// Hidden state `(B, dim)` plus the memory cell for LSTM layers.
#[derive(Clone, Debug, PartialEq)]
pub struct RecurrentState {
    pub hidden: Array2<f32>,
    pub memory: Option<Array2<f32>>,
}

impl RecurrentState {
    /// Hidden-only state (GRU layers).
    pub fn new(hidden: Array2<f32>) -> Self {
        Self {
            hidden,
            memory: None,
        }
    }

    /// Hidden and memory state (LSTM layers).
    pub fn with_memory(hidden: Array2<f32>, memory: Array2<f32>) -> Self {
        Self {
            hidden,
            memory: Some(memory),
        }
    }

    /// Zero state for `batch` rows of width `dim`.
    pub fn zeros(batch: usize, dim: usize, with_memory: bool) -> Self {
        Self {
            hidden: Array2::zeros((batch, dim)),
            memory: with_memory.then(|| Array2::zeros((batch, dim))),
        }
    }

    pub fn batch(&self) -> usize {
        self.hidden.nrows()
    }

    pub fn dim(&self) -> usize {
        self.hidden.ncols()
    }

    /// Check if the state has diverged (NaN or Inf).
    pub fn is_healthy(&self) -> bool {
        let hidden_ok = self.hidden.iter().all(|v| v.is_finite());
        let memory_ok = self
            .memory
            .as_ref()
            .map_or(true, |m| m.iter().all(|v| v.is_finite()));
        hidden_ok && memory_ok
    }

    /// L2 norm of the hidden state (for monitoring divergence).
    pub fn norm(&self) -> f32 {
        self.hidden.mapv(|v| v * v).sum().sqrt()
    }

    /// Check the hidden (and memory) shape against `(batch, dim)`.
    pub(crate) fn expect_shape(&self, batch: usize, dim: usize) -> Result<()> {
        if self.hidden.dim() != (batch, dim) {
            return Err(RnnError::shape(
                "initial state",
                self.hidden.shape(),
                &[batch, dim],
            ));
        }
        if let Some(memory) = &self.memory {
            if memory.dim() != (batch, dim) {
                return Err(RnnError::shape("initial memory", memory.shape(), &[batch, dim]));
            }
        }
        Ok(())
    }
}
