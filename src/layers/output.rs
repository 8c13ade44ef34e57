//! What a forward pass hands back.

use ndarray::{Array2, Array3, Axis};

use crate::cells::GateActivations;
use crate::core::ops::stack_steps;
use crate::core::RecurrentState;
use crate::error::Result;
use crate::runtime::Dropout;

/// Gate activations of one LSTM unit over a whole pass, each `(T, B, dim)`.
#[derive(Clone, Debug)]
pub struct GateTrace {
    /// `"lstm"`, or `"pre_attention"` / `"post_attention"` in conditional layers.
    pub stage: &'static str,
    pub unit: Option<usize>,
    pub input: Array3<f32>,
    pub forget: Array3<f32>,
    pub output: Array3<f32>,
}

/// Per-step outputs of one forward pass, all time-major.
#[derive(Clone, Debug)]
pub struct LayerOutput {
    /// `(T, B, dim)`, after dropout when dropout was requested.
    pub hidden: Array3<f32>,
    /// `(T, B, dim)`, the recurrent state itself.
    pub hidden_without_dropout: Array3<f32>,
    /// `(T, B, dim)`, LSTM kinds only.
    pub memory: Option<Array3<f32>>,
    /// `(T, B, C)`, conditional kinds only.
    pub context: Option<Array3<f32>>,
    /// `(T, B, S)`, conditional kinds only.
    pub alignment: Option<Array3<f32>>,
    /// One trace per LSTM stage and unit, when requested.
    pub gates: Option<Vec<GateTrace>>,
}

impl LayerOutput {
    pub fn steps(&self) -> usize {
        self.hidden.len_of(Axis(0))
    }

    /// State after the last step, ready to seed the next single-step call.
    ///
    /// Taken from the undropped hidden sequence, which is what the
    /// recurrence itself carried.
    pub fn final_state(&self) -> RecurrentState {
        let last = self.steps().saturating_sub(1);
        RecurrentState {
            hidden: self.hidden_without_dropout.index_axis(Axis(0), last).to_owned(),
            memory: self
                .memory
                .as_ref()
                .map(|m| m.index_axis(Axis(0), last).to_owned()),
        }
    }

    /// Assemble an output from per-step hidden states, applying dropout.
    pub(crate) fn from_hidden(steps: &[Array2<f32>], dropout: Option<Dropout<'_>>) -> Result<Self> {
        let clean = stack_steps(steps)?;
        let hidden = match dropout {
            Some(mut dropout) => dropout.apply(&clean)?,
            None => clean.clone(),
        };
        Ok(Self {
            hidden,
            hidden_without_dropout: clean,
            memory: None,
            context: None,
            alignment: None,
            gates: None,
        })
    }
}

/// Stack per-step gate activations into one trace per unit.
///
/// `per_step[t][i]` holds unit `i`'s gates at step `t`.
pub(crate) fn gate_traces(
    stage: &'static str,
    units: &[Option<usize>],
    per_step: &[&[GateActivations]],
) -> Result<Vec<GateTrace>> {
    units
        .iter()
        .enumerate()
        .map(|(i, &unit)| {
            Ok(GateTrace {
                stage,
                unit,
                input: stack_gate(per_step, i, |g| &g.input)?,
                forget: stack_gate(per_step, i, |g| &g.forget)?,
                output: stack_gate(per_step, i, |g| &g.output)?,
            })
        })
        .collect()
}

fn stack_gate(
    per_step: &[&[GateActivations]],
    unit: usize,
    pick: impl Fn(&GateActivations) -> &Array2<f32>,
) -> Result<Array3<f32>> {
    let steps: Vec<Array2<f32>> = per_step.iter().map(|g| pick(&g[unit]).clone()).collect();
    stack_steps(&steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_state_takes_last_step() {
        let steps: Vec<Array2<f32>> = (0..3).map(|t| Array2::from_elem((2, 4), t as f32)).collect();
        let out = LayerOutput::from_hidden(&steps, None).unwrap();
        let state = out.final_state();
        assert!(state.hidden.iter().all(|&v| v == 2.0));
        assert!(state.memory.is_none());
    }

    #[test]
    fn test_dropout_leaves_clean_sequence() {
        let steps = vec![Array2::from_elem((1, 2), 4.0)];
        let dropout = Dropout::deterministic(0.5).unwrap();
        let out = LayerOutput::from_hidden(&steps, Some(dropout)).unwrap();
        assert!(out.hidden.iter().all(|&v| v == 2.0));
        assert!(out.hidden_without_dropout.iter().all(|&v| v == 4.0));
        assert!(out.final_state().hidden.iter().all(|&v| v == 4.0));
    }

    #[test]
    fn test_gate_traces_per_unit() {
        let gates = |v: f32| GateActivations {
            input: Array2::from_elem((1, 2), v),
            forget: Array2::from_elem((1, 2), v + 0.1),
            output: Array2::from_elem((1, 2), v + 0.2),
        };
        let t0 = vec![gates(0.0), gates(0.5)];
        let t1 = vec![gates(1.0), gates(1.5)];
        let per_step = vec![t0.as_slice(), t1.as_slice()];
        let traces = gate_traces("lstm", &[Some(1), Some(2)], &per_step).unwrap();
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[1].unit, Some(2));
        assert_eq!(traces[1].input.dim(), (2, 1, 2));
        assert_eq!(traces[1].input[[1, 0, 0]], 1.5);
    }
}
