//! GRU layer: a stack of input-driven units, optionally conditioned on a
//! per-step context sequence.

use std::sync::Arc;

use ndarray::{Array2, Axis};

use crate::cells::{GruProjection, GruUnit, Stack};
use crate::error::Result;
use crate::params::{KeyScope, LayerConfig, ParameterSet};
use crate::runtime::{project_steps, ForwardRequest, SequenceDriver, StepFunction};

use super::output::LayerOutput;
use super::{check_context, initial_hidden};

/// Step input: every unit's projection of `x_t` and the context slice.
#[derive(Clone, Debug)]
pub struct GruStepInput {
    pub projections: Vec<GruProjection>,
    pub context: Option<Array2<f32>>,
}

#[derive(Clone, Debug)]
pub struct GruLayer<'p> {
    component: Arc<str>,
    dim: usize,
    context_dim: Option<usize>,
    stack: Stack<GruUnit<'p>>,
}

impl<'p> GruLayer<'p> {
    pub fn load(params: &'p ParameterSet, config: &LayerConfig) -> Result<Self> {
        let component = config.component_name();
        let stack = Stack::load(&config.units(), |unit| {
            let scope = KeyScope::new(&component, config.layer_id, unit);
            GruUnit::load(params, &scope, config.nin, config.dim, config.context_dim)
        })?;
        Ok(Self {
            component,
            dim: config.dim,
            context_dim: config.context_dim,
            stack,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn forward(&self, req: ForwardRequest<'_>) -> Result<LayerOutput> {
        req.check_mode()?;
        let input = req.input;
        let (steps, batch) = (input.steps(), input.batch());
        let context = check_context(&self.component, self.context_dim, req.context3()?, steps, batch)?;

        tracing::debug!(
            component = %self.component,
            mode = ?req.mode,
            steps,
            batch,
            units = self.stack.len(),
            "gru forward"
        );

        let inputs = project_steps(input, |t, x| {
            Ok(GruStepInput {
                projections: self.stack.project(x)?,
                context: context.map(|c| c.index_axis(Axis(0), t).to_owned()),
            })
        })?;

        let init = initial_hidden(req.init_state.as_ref(), batch, self.dim)?;
        let states = SequenceDriver::new(self).run(req.mode, &inputs, input.mask().view(), init, || {
            Array2::zeros((batch, self.dim))
        })?;

        LayerOutput::from_hidden(&states, req.dropout)
    }
}

impl StepFunction for GruLayer<'_> {
    type Input = GruStepInput;
    type State = Array2<f32>;

    fn step(&self, input: &GruStepInput, mask: ndarray::ArrayView1<'_, f32>, prev: &Array2<f32>) -> Result<Array2<f32>> {
        let context = input.context.as_ref().map(|c| c.view());
        self.stack.step(mask, &input.projections, context, prev.view())
    }
}
