//! Core module — numeric helpers, sequence batches, and recurrent state.

pub mod ops;
pub mod sequence;
pub mod state;

pub use sequence::SequenceBatch;
pub use state::RecurrentState;
