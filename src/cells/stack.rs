//! Stacked composition of cell units inside one timestep.
//!
//! A stack holds one or more units, each with its own parameter block.  Per
//! step the hidden state (and memory) produced by unit `i` is the "previous"
//! state of unit `i + 1`; every unit applies the step mask on its own.  A
//! one-unit stack is the plain cell.

use ndarray::{Array2, ArrayView1, ArrayView2};

use crate::error::{Result, RnnError};

use super::gru::{GruCondUnit, GruProjection, GruUnit};
use super::lstm::{GateActivations, LstmCondUnit, LstmUnit};

/// Ordered units of a stacked cell.
#[derive(Clone, Debug)]
pub struct Stack<U> {
    units: Vec<U>,
}

impl<U> Stack<U> {
    pub fn new(units: Vec<U>) -> Result<Self> {
        if units.is_empty() {
            return Err(RnnError::InvalidConfig("a stack needs at least one unit"));
        }
        Ok(Self { units })
    }

    /// Load one unit per index (`None` for an unstacked layer, `Some(1..=n)` otherwise).
    pub fn load<F>(indices: &[Option<usize>], mut load_unit: F) -> Result<Self>
    where
        F: FnMut(Option<usize>) -> Result<U>,
    {
        let units = indices
            .iter()
            .map(|&unit| load_unit(unit))
            .collect::<Result<Vec<_>>>()?;
        Self::new(units)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn units(&self) -> &[U] {
        &self.units
    }
}

/// Hidden and memory state after a stacked LSTM step, plus per-unit gates.
#[derive(Clone, Debug)]
pub struct StackedLstmOutput {
    pub hidden: Array2<f32>,
    pub memory: Array2<f32>,
    pub gates: Vec<GateActivations>,
}

impl Stack<GruUnit<'_>> {
    /// Each unit's projection of the same input slice.
    pub fn project(&self, x: ArrayView2<'_, f32>) -> Result<Vec<GruProjection>> {
        self.units.iter().map(|unit| unit.project(x)).collect()
    }

    pub fn step(
        &self,
        mask: ArrayView1<'_, f32>,
        inputs: &[GruProjection],
        context: Option<ArrayView2<'_, f32>>,
        h_prev: ArrayView2<'_, f32>,
    ) -> Result<Array2<f32>> {
        check_inputs(inputs.len(), self.units.len())?;
        let mut h = h_prev.to_owned();
        for (unit, input) in self.units.iter().zip(inputs) {
            h = unit.step(mask, input, context, h.view())?;
        }
        Ok(h)
    }
}

impl Stack<GruCondUnit<'_>> {
    /// Every unit starts its candidate from `query`, the pre-attention
    /// output; the running state threads from unit to unit starting at it.
    pub fn step(
        &self,
        mask: ArrayView1<'_, f32>,
        context: ArrayView2<'_, f32>,
        query: ArrayView2<'_, f32>,
    ) -> Result<Array2<f32>> {
        let mut h = query.to_owned();
        for unit in &self.units {
            h = unit.step(mask, context, query, h.view())?;
        }
        Ok(h)
    }
}

impl Stack<LstmUnit<'_>> {
    pub fn project(&self, x: ArrayView2<'_, f32>) -> Result<Vec<Array2<f32>>> {
        self.units.iter().map(|unit| unit.project(x)).collect()
    }

    pub fn step(
        &self,
        mask: ArrayView1<'_, f32>,
        inputs: &[Array2<f32>],
        context: Option<ArrayView2<'_, f32>>,
        h_prev: ArrayView2<'_, f32>,
        c_prev: ArrayView2<'_, f32>,
    ) -> Result<StackedLstmOutput> {
        check_inputs(inputs.len(), self.units.len())?;
        let mut h = h_prev.to_owned();
        let mut c = c_prev.to_owned();
        let mut gates = Vec::with_capacity(self.units.len());
        for (unit, input) in self.units.iter().zip(inputs) {
            let out = unit.step(mask, input, context, h.view(), c.view())?;
            h = out.hidden;
            c = out.memory;
            gates.push(out.gates);
        }
        Ok(StackedLstmOutput {
            hidden: h,
            memory: c,
            gates,
        })
    }
}

impl Stack<LstmCondUnit<'_>> {
    pub fn step(
        &self,
        mask: ArrayView1<'_, f32>,
        context: ArrayView2<'_, f32>,
        h_prev: ArrayView2<'_, f32>,
        c_prev: ArrayView2<'_, f32>,
    ) -> Result<StackedLstmOutput> {
        let mut h = h_prev.to_owned();
        let mut c = c_prev.to_owned();
        let mut gates = Vec::with_capacity(self.units.len());
        for unit in &self.units {
            let out = unit.step(mask, context, h.view(), c.view())?;
            h = out.hidden;
            c = out.memory;
            gates.push(out.gates);
        }
        Ok(StackedLstmOutput {
            hidden: h,
            memory: c,
            gates,
        })
    }
}

fn check_inputs(inputs: usize, units: usize) -> Result<()> {
    if inputs != units {
        return Err(RnnError::shape("stack inputs", &[inputs], &[units]));
    }
    Ok(())
}
