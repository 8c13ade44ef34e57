//! Arguments of a layer forward pass.

use ndarray::{ArrayView, ArrayView2, ArrayView3, ArrayViewD, Dimension, Ix3};

use crate::core::{RecurrentState, SequenceBatch};
use crate::error::{Result, RnnError};

use super::driver::Mode;
use super::dropout::Dropout;

/// Everything a [`Layer::forward`](crate::layers::Layer::forward) call reads.
#[derive(Debug)]
pub struct ForwardRequest<'a> {
    pub input: &'a SequenceBatch,
    pub mode: Mode,
    /// Source annotations `(S, B, C)` for conditional layers, or a per-step
    /// context sequence `(T, B, C)` for plain layers built with a context dim.
    pub context: Option<ArrayViewD<'a, f32>>,
    /// `(S, B)` source mask.
    pub context_mask: Option<ArrayView2<'a, f32>>,
    /// Starting state; mandatory in single-step mode.
    pub init_state: Option<RecurrentState>,
    pub dropout: Option<Dropout<'a>>,
    /// Report gate activations (LSTM kinds).
    pub collect_gates: bool,
}

impl<'a> ForwardRequest<'a> {
    pub fn replay(input: &'a SequenceBatch) -> Self {
        Self {
            input,
            mode: Mode::Replay,
            context: None,
            context_mask: None,
            init_state: None,
            dropout: None,
            collect_gates: false,
        }
    }

    /// One generation step continuing from `prev`.
    pub fn single_step(input: &'a SequenceBatch, prev: RecurrentState) -> Self {
        Self {
            mode: Mode::SingleStep,
            init_state: Some(prev),
            ..Self::replay(input)
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_context<D: Dimension>(mut self, context: ArrayView<'a, f32, D>) -> Self {
        self.context = Some(context.into_dyn());
        self
    }

    pub fn with_context_mask(mut self, mask: ArrayView2<'a, f32>) -> Self {
        self.context_mask = Some(mask);
        self
    }

    pub fn with_init_state(mut self, state: RecurrentState) -> Self {
        self.init_state = Some(state);
        self
    }

    pub fn with_dropout(mut self, dropout: Dropout<'a>) -> Self {
        self.dropout = Some(dropout);
        self
    }

    pub fn with_gates(mut self) -> Self {
        self.collect_gates = true;
        self
    }

    /// Reject a single-step call that cannot run, before any projection.
    pub(crate) fn check_mode(&self) -> Result<()> {
        if self.mode != Mode::SingleStep {
            return Ok(());
        }
        if self.input.steps() != 1 {
            return Err(RnnError::SingleStepLength {
                steps: self.input.steps(),
            });
        }
        if self.init_state.is_none() {
            return Err(RnnError::MissingPreviousState);
        }
        Ok(())
    }

    /// The context as a rank-3 view, if one was given.
    pub(crate) fn context3(&self) -> Result<Option<ArrayView3<'a, f32>>> {
        match &self.context {
            None => Ok(None),
            Some(ctx) => {
                let rank = ctx.ndim();
                ctx.clone()
                    .into_dimensionality::<Ix3>()
                    .map(Some)
                    .map_err(|_| RnnError::ContextRank { rank })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3};

    #[test]
    fn test_single_step_carries_state() {
        let input = SequenceBatch::single_step(Array2::zeros((2, 3)), None).unwrap();
        let req = ForwardRequest::single_step(&input, RecurrentState::zeros(2, 4, false));
        assert_eq!(req.mode, Mode::SingleStep);
        assert!(req.init_state.is_some());
    }

    #[test]
    fn test_check_mode() {
        let step = SequenceBatch::single_step(Array2::zeros((2, 3)), None).unwrap();
        assert!(ForwardRequest::replay(&step).check_mode().is_ok());
        assert!(ForwardRequest::single_step(&step, RecurrentState::zeros(2, 4, false))
            .check_mode()
            .is_ok());

        let missing = ForwardRequest::replay(&step).with_mode(Mode::SingleStep);
        assert_eq!(missing.check_mode().unwrap_err(), RnnError::MissingPreviousState);

        let seq = SequenceBatch::new(Array3::zeros((3, 2, 3)), None).unwrap();
        let long = ForwardRequest::single_step(&seq, RecurrentState::zeros(2, 4, false));
        assert_eq!(long.check_mode().unwrap_err(), RnnError::SingleStepLength { steps: 3 });
    }

    #[test]
    fn test_context_rank_checked() {
        let input = SequenceBatch::single_step(Array2::zeros((2, 3)), None).unwrap();
        let flat = Array2::<f32>::zeros((2, 3));
        let req = ForwardRequest::replay(&input).with_context(flat.view());
        assert_eq!(req.context3().unwrap_err(), RnnError::ContextRank { rank: 2 });

        let source = Array3::<f32>::zeros((4, 2, 3));
        let req = ForwardRequest::replay(&input).with_context(source.view());
        assert_eq!(req.context3().unwrap().map(|c| c.dim()), Some((4, 2, 3)));
    }
}
