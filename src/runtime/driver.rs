//! Temporal iteration of a step function.
//!
//! Every recurrent layer exposes one [`StepFunction`]; the driver runs it
//! either over the whole time axis ([`Mode::Replay`]) or exactly once from a
//! caller-supplied state ([`Mode::SingleStep`]).  Both paths call the same
//! `step`, so a generation loop of single steps reproduces replay output.
//!
//! Input projections carry no recurrence and are computed per timestep in
//! parallel ([`project_steps`]).  The recurrence itself is strictly
//! sequential: step `t` reads the state written by step `t - 1`.

use ndarray::{ArrayView1, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::SequenceBatch;
use crate::error::{Result, RnnError};

/// Execution mode of a forward pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Iterate over every timestep of a known-length sequence.
    #[default]
    Replay,
    /// Run one step from an externally owned previous state.
    SingleStep,
}

/// One timestep of a recurrent layer.
///
/// `State` is the full per-step record: the recurrent tensors that feed the
/// next step plus any per-step outputs (attention context, alignment,
/// gate activations) the layer reports.
pub trait StepFunction {
    /// Precomputed projections of one input slice.
    type Input;
    type State: Clone;

    fn step(&self, input: &Self::Input, mask: ArrayView1<'_, f32>, prev: &Self::State) -> Result<Self::State>;
}

/// Project every timestep of `input`, in parallel over time.
///
/// `project` receives the step index and the `(B, F)` slice.
pub fn project_steps<I, F>(input: &SequenceBatch, project: F) -> Result<Vec<I>>
where
    I: Send,
    F: Fn(usize, ArrayView2<'_, f32>) -> Result<I> + Sync,
{
    (0..input.steps())
        .into_par_iter()
        .map(|t| project(t, input.step(t)))
        .collect()
}

/// Runs a step function in replay or single-step mode.
pub struct SequenceDriver<'f, F: StepFunction> {
    step_fn: &'f F,
}

impl<'f, F: StepFunction> SequenceDriver<'f, F> {
    pub fn new(step_fn: &'f F) -> Self {
        Self { step_fn }
    }

    /// Thread `init` through every timestep; returns one state per step.
    pub fn replay(&self, inputs: &[F::Input], mask: ArrayView2<'_, f32>, init: F::State) -> Result<Vec<F::State>> {
        if inputs.len() != mask.nrows() {
            return Err(RnnError::shape("replay", &[inputs.len()], &[mask.nrows()]));
        }
        let mut states = Vec::with_capacity(inputs.len());
        let mut state = init;
        for (t, input) in inputs.iter().enumerate() {
            state = self.step_fn.step(input, mask.row(t), &state)?;
            tracing::trace!(step = t, "replay step");
            states.push(state.clone());
        }
        Ok(states)
    }

    /// One step from `prev`.
    pub fn single_step(&self, input: &F::Input, mask: ArrayView1<'_, f32>, prev: &F::State) -> Result<F::State> {
        let state = self.step_fn.step(input, mask, prev)?;
        tracing::trace!("single step");
        Ok(state)
    }

    /// Dispatch on `mode`.
    ///
    /// Replay starts from `init` or, when absent, from `zero()`.  Single-step
    /// mode needs exactly one input step and an explicit `init`.
    pub fn run(
        &self,
        mode: Mode,
        inputs: &[F::Input],
        mask: ArrayView2<'_, f32>,
        init: Option<F::State>,
        zero: impl FnOnce() -> F::State,
    ) -> Result<Vec<F::State>> {
        match mode {
            Mode::Replay => self.replay(inputs, mask, init.unwrap_or_else(zero)),
            Mode::SingleStep => {
                if inputs.len() != 1 || mask.nrows() != 1 {
                    return Err(RnnError::SingleStepLength { steps: inputs.len() });
                }
                let prev = init.ok_or(RnnError::MissingPreviousState)?;
                let state = self.single_step(&inputs[0], mask.row(0), &prev)?;
                Ok(vec![state])
            }
        }
    }
}
