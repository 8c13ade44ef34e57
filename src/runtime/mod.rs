//! Runtime: how a layer is driven through time.
//!
//! - `driver`: step-function trait, replay and single-step execution
//! - `dropout`: output dropout with a caller-owned noise source
//! - `request`: the forward-pass argument bundle

pub mod driver;
pub mod dropout;
pub mod request;

pub use driver::{project_steps, Mode, SequenceDriver, StepFunction};
pub use dropout::Dropout;
pub use request::ForwardRequest;
