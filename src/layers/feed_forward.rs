//! Feed-forward layer: `activ(x · W + b)`.
//!
//! Used to map the mean source annotation to a decoder's initial state, and
//! as a plain per-step projection.

use ndarray::{Array1, Array2, ArrayView2};

use crate::core::ops::{affine, tanh};
use crate::error::Result;
use crate::params::{Activation, KeyScope, LayerConfig, ParameterSet, Role};
use crate::runtime::{project_steps, ForwardRequest};

use super::output::LayerOutput;

#[derive(Clone, Debug)]
pub struct FeedForward<'p> {
    w: &'p Array2<f32>,
    b: &'p Array1<f32>,
    activation: Activation,
}

impl<'p> FeedForward<'p> {
    pub fn load(params: &'p ParameterSet, config: &LayerConfig, activation: Activation) -> Result<Self> {
        let scope = KeyScope::new(&config.component_name(), config.layer_id, None);
        Ok(Self {
            w: params.matrix_shaped(&scope.key(Role::W), config.nin, config.dim)?,
            b: params.vector_len(&scope.key(Role::B), config.dim)?,
            activation,
        })
    }

    pub fn nout(&self) -> usize {
        self.w.ncols()
    }

    /// Apply to one `(B, nin)` slice.
    pub fn apply(&self, x: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        let y = affine(x, self.w.view(), self.b.view())?;
        Ok(match self.activation {
            Activation::Tanh => tanh(y.view()),
            Activation::Linear => y,
        })
    }

    /// Apply to every timestep; the mode and state fields of the request
    /// do not apply to a stateless layer.
    pub fn forward(&self, req: ForwardRequest<'_>) -> Result<LayerOutput> {
        let steps = project_steps(req.input, |_, x| self.apply(x))?;
        LayerOutput::from_hidden(&steps, req.dropout)
    }
}
