//! Soft alignment over source annotations for conditional decoders.

pub mod scorer;

pub use scorer::{AttentionOutput, AttentionScorer, ProjectedSource};
