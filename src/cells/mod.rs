//! Recurrent cell steps.
//!
//! 1. `gru`: plain-gate units (input-driven and context-driven)
//! 2. `lstm`: memory-gate units sharing one gate kernel
//! 3. `stack`: sequential composition of units within a timestep

pub mod gru;
pub mod lstm;
pub mod stack;

pub use gru::{gru_step, gru_step_attention, GruCondUnit, GruContextWeights, GruProjection, GruUnit};
pub use lstm::{lstm_kernel, GateActivations, LstmCellOutput, LstmCondUnit, LstmUnit};
pub use stack::{Stack, StackedLstmOutput};
