//! LSTM layer: a stack of input-driven units with a memory cell.

use std::sync::Arc;

use ndarray::{Array2, ArrayView1, Axis};

use crate::cells::{GateActivations, LstmUnit, Stack};
use crate::core::ops::stack_steps;
use crate::error::Result;
use crate::params::{KeyScope, LayerConfig, ParameterSet};
use crate::runtime::{project_steps, ForwardRequest, SequenceDriver, StepFunction};

use super::output::{gate_traces, LayerOutput};
use super::{check_context, initial_memory_state};

#[derive(Clone, Debug)]
pub struct LstmStepInput {
    pub projections: Vec<Array2<f32>>,
    pub context: Option<Array2<f32>>,
}

/// Hidden and memory after a step, with the gates that produced them.
#[derive(Clone, Debug)]
pub struct LstmStepState {
    pub hidden: Array2<f32>,
    pub memory: Array2<f32>,
    pub gates: Vec<GateActivations>,
}

impl LstmStepState {
    fn start(hidden: Array2<f32>, memory: Array2<f32>) -> Self {
        Self {
            hidden,
            memory,
            gates: Vec::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LstmLayer<'p> {
    component: Arc<str>,
    dim: usize,
    context_dim: Option<usize>,
    units: Vec<Option<usize>>,
    stack: Stack<LstmUnit<'p>>,
}

impl<'p> LstmLayer<'p> {
    pub fn load(params: &'p ParameterSet, config: &LayerConfig) -> Result<Self> {
        let component = config.component_name();
        let units = config.units();
        let stack = Stack::load(&units, |unit| {
            let scope = KeyScope::new(&component, config.layer_id, unit);
            LstmUnit::load(params, &scope, config.nin, config.dim, config.context_dim)
        })?;
        Ok(Self {
            component,
            dim: config.dim,
            context_dim: config.context_dim,
            units,
            stack,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn forward(&self, req: ForwardRequest<'_>) -> Result<LayerOutput> {
        req.check_mode()?;
        let input = req.input;
        let (steps, batch, dim) = (input.steps(), input.batch(), self.dim);
        let context = check_context(&self.component, self.context_dim, req.context3()?, steps, batch)?;

        tracing::debug!(
            component = %self.component,
            mode = ?req.mode,
            steps,
            batch,
            units = self.stack.len(),
            "lstm forward"
        );

        let inputs = project_steps(input, |t, x| {
            Ok(LstmStepInput {
                projections: self.stack.project(x)?,
                context: context.map(|c| c.index_axis(Axis(0), t).to_owned()),
            })
        })?;

        let init = initial_memory_state(req.init_state.as_ref(), batch, dim)?
            .map(|(h, c)| LstmStepState::start(h, c));
        let states = SequenceDriver::new(self).run(req.mode, &inputs, input.mask().view(), init, || {
            LstmStepState::start(Array2::zeros((batch, dim)), Array2::zeros((batch, dim)))
        })?;

        let hidden: Vec<Array2<f32>> = states.iter().map(|s| s.hidden.clone()).collect();
        let memory: Vec<Array2<f32>> = states.iter().map(|s| s.memory.clone()).collect();

        let mut out = LayerOutput::from_hidden(&hidden, req.dropout)?;
        out.memory = Some(stack_steps(&memory)?);
        if req.collect_gates {
            let per_step: Vec<&[GateActivations]> = states.iter().map(|s| s.gates.as_slice()).collect();
            out.gates = Some(gate_traces("lstm", &self.units, &per_step)?);
        }
        Ok(out)
    }
}

impl StepFunction for LstmLayer<'_> {
    type Input = LstmStepInput;
    type State = LstmStepState;

    fn step(&self, input: &LstmStepInput, mask: ArrayView1<'_, f32>, prev: &LstmStepState) -> Result<LstmStepState> {
        let context = input.context.as_ref().map(|c| c.view());
        let out = self.stack.step(
            mask,
            &input.projections,
            context,
            prev.hidden.view(),
            prev.memory.view(),
        )?;
        Ok(LstmStepState {
            hidden: out.hidden,
            memory: out.memory,
            gates: out.gates,
        })
    }
}
