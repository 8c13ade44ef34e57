//! Memory-gate (LSTM) cell steps.
//!
//! Gate blocks are laid out `[input | forget | output | candidate]`.  Every
//! LSTM unit in the crate funnels into [`lstm_kernel`]; the units differ only
//! in how they build the `4·dim` preactivation.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use crate::config::LSTM_GATES;
use crate::core::ops::{add, add_bias, affine, gate_block, mask_blend, matmul, sigmoid, tanh};
use crate::error::{Result, RnnError};
use crate::params::{KeyScope, ParameterSet, Role};

/// Sigmoid gate activations of one step, each `(B, dim)`.
#[derive(Clone, Debug, PartialEq)]
pub struct GateActivations {
    pub input: Array2<f32>,
    pub forget: Array2<f32>,
    pub output: Array2<f32>,
}

/// Result of one LSTM step.
#[derive(Clone, Debug)]
pub struct LstmCellOutput {
    pub hidden: Array2<f32>,
    pub memory: Array2<f32>,
    pub gates: GateActivations,
}

/// Gate math shared by every LSTM unit.
///
/// ```text
/// c' = f ⊙ c + i ⊙ tanh(ĉ)      c_out = m · c' + (1 − m) · c
/// h' = o ⊙ tanh(c_out)          h_out = m · h' + (1 − m) · h
/// ```
///
/// The hidden state is read from the already-blended memory, so a frozen
/// row reproduces both `h` and `c` exactly.
pub fn lstm_kernel(
    preact: &Array2<f32>,
    mask: ArrayView1<'_, f32>,
    h_prev: ArrayView2<'_, f32>,
    c_prev: ArrayView2<'_, f32>,
) -> Result<LstmCellOutput> {
    let dim = h_prev.ncols();
    if preact.ncols() != LSTM_GATES * dim {
        return Err(RnnError::shape("lstm gates", preact.shape(), h_prev.shape()));
    }

    let i = sigmoid(gate_block(preact, 0, dim));
    let f = sigmoid(gate_block(preact, 1, dim));
    let o = sigmoid(gate_block(preact, 2, dim));
    let candidate = tanh(gate_block(preact, 3, dim));

    let c = &f * &c_prev + &i * &candidate;
    let c = mask_blend(mask, &c, c_prev)?;

    let h = &o * &c.mapv(f32::tanh);
    let h = mask_blend(mask, &h, h_prev)?;

    Ok(LstmCellOutput {
        hidden: h,
        memory: c,
        gates: GateActivations {
            input: i,
            forget: f,
            output: o,
        },
    })
}

/// Input-driven LSTM unit.
#[derive(Clone, Debug)]
pub struct LstmUnit<'p> {
    w: &'p Array2<f32>,
    b: &'p Array1<f32>,
    u: &'p Array2<f32>,
    wc: Option<&'p Array2<f32>>,
}

impl<'p> LstmUnit<'p> {
    pub fn load(
        params: &'p ParameterSet,
        scope: &KeyScope,
        nin: usize,
        dim: usize,
        context_dim: Option<usize>,
    ) -> Result<Self> {
        let k = LSTM_GATES;
        let wc = match context_dim {
            Some(ctx) => Some(params.matrix_shaped(&scope.key(Role::Wc), ctx, k * dim)?),
            None => None,
        };
        Ok(Self {
            w: params.matrix_shaped(&scope.key(Role::W), nin, k * dim)?,
            b: params.vector_len(&scope.key(Role::B), k * dim)?,
            u: params.matrix_shaped(&scope.key(Role::U), dim, k * dim)?,
            wc,
        })
    }

    pub fn dim(&self) -> usize {
        self.u.nrows()
    }

    pub fn is_conditioned(&self) -> bool {
        self.wc.is_some()
    }

    /// `x · W + b` for one input slice.
    pub fn project(&self, x: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        affine(x, self.w.view(), self.b.view())
    }

    /// `preact = h · U + x_proj (+ ctx · Wc)`, then the shared kernel.
    pub fn step(
        &self,
        mask: ArrayView1<'_, f32>,
        x_proj: &Array2<f32>,
        context: Option<ArrayView2<'_, f32>>,
        h_prev: ArrayView2<'_, f32>,
        c_prev: ArrayView2<'_, f32>,
    ) -> Result<LstmCellOutput> {
        let mut preact = add(matmul(h_prev, self.u.view())?, x_proj.view())?;
        match (context, self.wc) {
            (Some(ctx), Some(wc)) => preact = add(preact, matmul(ctx, wc.view())?.view())?,
            (None, None) => {}
            (None, Some(_)) => return Err(RnnError::MissingContext),
            (Some(_), None) => {
                return Err(RnnError::InvalidConfig(
                    "context given to an LSTM unit built without context weights",
                ))
            }
        }
        lstm_kernel(&preact, mask, h_prev, c_prev)
    }
}

/// Context-driven LSTM unit of a conditional layer.
#[derive(Clone, Debug)]
pub struct LstmCondUnit<'p> {
    u_nl: &'p Array2<f32>,
    b_nl: &'p Array1<f32>,
    wc: &'p Array2<f32>,
}

impl<'p> LstmCondUnit<'p> {
    pub fn load(
        params: &'p ParameterSet,
        scope: &KeyScope,
        dim: usize,
        context_dim: usize,
    ) -> Result<Self> {
        let k = LSTM_GATES;
        Ok(Self {
            u_nl: params.matrix_shaped(&scope.key(Role::UNl), dim, k * dim)?,
            b_nl: params.vector_len(&scope.key(Role::BNl), k * dim)?,
            wc: params.matrix_shaped(&scope.key(Role::Wc), context_dim, k * dim)?,
        })
    }

    /// `preact = h · U_nl + b_nl + ctx · Wc`, then the shared kernel.
    pub fn step(
        &self,
        mask: ArrayView1<'_, f32>,
        context: ArrayView2<'_, f32>,
        h_prev: ArrayView2<'_, f32>,
        c_prev: ArrayView2<'_, f32>,
    ) -> Result<LstmCellOutput> {
        let preact = add_bias(matmul(h_prev, self.u_nl.view())?, self.b_nl.view())?;
        let preact = add(preact, matmul(context, self.wc.view())?.view())?;
        lstm_kernel(&preact, mask, h_prev, c_prev)
    }
}
