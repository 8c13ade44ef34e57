//! Failure taxonomy for the layer engine.
//!
//! Configuration errors are raised before any tensor operation runs; shape
//! errors are raised by the first matrix product that cannot be formed.

use thiserror::Error;

use crate::params::ParamKey;

/// Errors surfaced while building parameters or running a forward pass.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RnnError {
    #[error("layer `{component}` needs a context dimension for its attention parameters")]
    MissingContextDim { component: String },

    #[error("context must be provided for a conditional layer")]
    MissingContext,

    #[error("context must be 3-d (source_len, batch, dim), got rank {rank}")]
    ContextRank { rank: usize },

    #[error("previous state must be provided in single-step mode")]
    MissingPreviousState,

    #[error("parameter {key} is not present in the parameter set")]
    MissingParameter { key: ParamKey },

    #[error("parameter {key} has shape {actual:?}, expected {expected:?}")]
    ParameterShape {
        key: ParamKey,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("shape mismatch in {op}: {left:?} vs {right:?}")]
    ShapeMismatch {
        op: &'static str,
        left: Vec<usize>,
        right: Vec<usize>,
    },

    #[error("invalid mask: {reason}")]
    InvalidMask { reason: String },

    #[error("invalid layer configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("single-step mode expects exactly one timestep, got {steps}")]
    SingleStepLength { steps: usize },

    #[error("dropout rate must lie in [0, 1), got {rate}")]
    InvalidDropoutRate { rate: f32 },
}

pub type Result<T> = std::result::Result<T, RnnError>;

impl RnnError {
    pub(crate) fn shape(op: &'static str, left: &[usize], right: &[usize]) -> Self {
        RnnError::ShapeMismatch {
            op,
            left: left.to_vec(),
            right: right.to_vec(),
        }
    }
}
