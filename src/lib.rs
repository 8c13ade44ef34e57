//! # nmt-layers
//!
//! Recurrent layer engine for attention-based neural machine translation.
//!
//! ## Components
//!
//! 1. **ParameterSchema** — declares and initialises the weights of a layer
//! 2. **Cells** — per-step GRU and LSTM recurrences, plain and stacked
//! 3. **AttentionScorer** — additive (Bahdanau) alignment over a source sequence
//! 4. **SequenceDriver** — replay over a full sequence or one re-entrant step
//! 5. **Conditional decoder layers** — cell, attention, then context-driven cell
//!
//! ## Execution modes
//!
//! - **Replay**: the whole target sequence is known (training).
//! - **Single step**: the caller owns the loop and feeds back the previous
//!   state (generation).  Both modes run the same step function, so they
//!   produce identical state transitions for identical inputs.
//!
//! Tensors are time-major `(T, B, F)` with a `(T, B)` mask of zeros and ones.

pub mod attention;
pub mod cells;
pub mod core;
pub mod error;
pub mod layers;
pub mod params;
pub mod runtime;

pub use crate::core::{RecurrentState, SequenceBatch};
pub use crate::error::{Result, RnnError};
pub use crate::layers::{Layer, LayerOutput};
pub use crate::params::{LayerConfig, LayerKind, ParamKey, ParameterSchema, ParameterSet, Role};
pub use crate::runtime::{Dropout, ForwardRequest, Mode};

/// Crate-wide constants.
pub mod config {
    /// Standard deviation multiplier for normal-initialised weights.
    pub const INIT_SCALE: f32 = 0.01;

    /// Units per stack when a stacked layer does not say otherwise.
    pub const DEFAULT_UNIT_SIZE: usize = 2;

    /// Dropout rate used by the demo binary when `--dropout` has no value.
    pub const DEFAULT_DROPOUT_RATE: f32 = 0.5;

    /// Tolerance on alignment weights summing to one.
    pub const ALIGNMENT_TOLERANCE: f32 = 1e-5;

    /// Gate blocks in a GRU projection (reset, update).
    pub const GRU_GATES: usize = 2;

    /// Gate blocks in an LSTM projection (input, forget, output, candidate).
    pub const LSTM_GATES: usize = 4;
}
