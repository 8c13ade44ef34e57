//! Parameter layout: structured keys, initial draws, per-layer schemas,
//! and the parameter set the forward pass reads from.

pub mod init;
pub mod key;
pub mod schema;
pub mod set;

pub use key::{KeyScope, ParamKey, Role};
pub use schema::{init, Activation, InitKind, LayerConfig, LayerKind, ParamSpec, ParameterSchema};
pub use set::{ParamTensor, ParameterSet};
