//! Plain-gate (GRU) cell steps.
//!
//! ```text
//! [r | u] = σ(h · U + x_gates)              (per-slice sigmoid)
//! h̃       = tanh((h · Ux) ⊙ r + x_cand)
//! h'      = u ⊙ h + (1 − u) ⊙ h̃
//! h_out   = m · h' + (1 − m) · h
//! ```
//!
//! The context-augmented sibling adds `context · Wc` to the gate
//! preactivation and `context · Wcx` to the candidate, and applies the
//! sigmoid to the whole concatenated preactivation before slicing.  Both
//! forms are kept as written; they are separate code paths on purpose.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use crate::config::GRU_GATES;
use crate::core::ops::{add, add_bias, affine, complement, gate_block, mask_blend, matmul, sigmoid, tanh};
use crate::error::{Result, RnnError};
use crate::params::{KeyScope, ParameterSet, Role};

/// Input projections of one step for one unit.
#[derive(Clone, Debug)]
pub struct GruProjection {
    /// `x · W + b`, width `2·dim` (reset | update).
    pub gates: Array2<f32>,
    /// `x · Wx + bx`, width `dim`.
    pub candidate: Array2<f32>,
}

/// Context → gate weights of an attention-augmented unit.
#[derive(Clone, Copy, Debug)]
pub struct GruContextWeights<'p> {
    pub wc: &'p Array2<f32>,
    pub wcx: &'p Array2<f32>,
}

/// Input-driven GRU unit, borrowed from a parameter set.
#[derive(Clone, Debug)]
pub struct GruUnit<'p> {
    w: &'p Array2<f32>,
    b: &'p Array1<f32>,
    u: &'p Array2<f32>,
    wx: &'p Array2<f32>,
    bx: &'p Array1<f32>,
    ux: &'p Array2<f32>,
    context: Option<GruContextWeights<'p>>,
}

impl<'p> GruUnit<'p> {
    /// Borrow a unit's tensors, checking each shape against `nin`/`dim`.
    pub fn load(
        params: &'p ParameterSet,
        scope: &KeyScope,
        nin: usize,
        dim: usize,
        context_dim: Option<usize>,
    ) -> Result<Self> {
        let k = GRU_GATES;
        let context = match context_dim {
            Some(ctx) => Some(GruContextWeights {
                wc: params.matrix_shaped(&scope.key(Role::Wc), ctx, k * dim)?,
                wcx: params.matrix_shaped(&scope.key(Role::Wcx), ctx, dim)?,
            }),
            None => None,
        };
        Ok(Self {
            w: params.matrix_shaped(&scope.key(Role::W), nin, k * dim)?,
            b: params.vector_len(&scope.key(Role::B), k * dim)?,
            u: params.matrix_shaped(&scope.key(Role::U), dim, k * dim)?,
            wx: params.matrix_shaped(&scope.key(Role::Wx), nin, dim)?,
            bx: params.vector_len(&scope.key(Role::Bx), dim)?,
            ux: params.matrix_shaped(&scope.key(Role::Ux), dim, dim)?,
            context,
        })
    }

    pub fn dim(&self) -> usize {
        self.ux.ncols()
    }

    pub fn is_conditioned(&self) -> bool {
        self.context.is_some()
    }

    /// Project one input slice `(B, nin)`.
    pub fn project(&self, x: ArrayView2<'_, f32>) -> Result<GruProjection> {
        Ok(GruProjection {
            gates: affine(x, self.w.view(), self.b.view())?,
            candidate: affine(x, self.wx.view(), self.bx.view())?,
        })
    }

    /// One recurrence step from `h_prev`.
    pub fn step(
        &self,
        mask: ArrayView1<'_, f32>,
        input: &GruProjection,
        context: Option<ArrayView2<'_, f32>>,
        h_prev: ArrayView2<'_, f32>,
    ) -> Result<Array2<f32>> {
        match (context, self.context) {
            (None, None) => gru_step(
                mask,
                input.gates.view(),
                input.candidate.view(),
                h_prev,
                self.u.view(),
                self.ux.view(),
            ),
            (Some(ctx), Some(weights)) => gru_step_attention(
                mask,
                input.gates.view(),
                input.candidate.view(),
                ctx,
                h_prev,
                self.u.view(),
                self.ux.view(),
                weights,
            ),
            (None, Some(_)) => Err(RnnError::MissingContext),
            (Some(_), None) => Err(RnnError::InvalidConfig(
                "context given to a GRU unit built without context weights",
            )),
        }
    }
}

/// Plain GRU step with per-slice gate sigmoids.
pub fn gru_step(
    mask: ArrayView1<'_, f32>,
    x_gates: ArrayView2<'_, f32>,
    x_cand: ArrayView2<'_, f32>,
    h_prev: ArrayView2<'_, f32>,
    u: ArrayView2<'_, f32>,
    ux: ArrayView2<'_, f32>,
) -> Result<Array2<f32>> {
    let dim = ux.ncols();

    let preact = add(matmul(h_prev, u)?, x_gates)?;

    // reset and update gates
    let r = sigmoid(gate_block(&preact, 0, dim));
    let z = sigmoid(gate_block(&preact, 1, dim));

    let proposal = tanh(add(matmul(h_prev, ux)? * &r, x_cand)?.view());

    let h = &z * &h_prev + &complement(z.view()) * &proposal;
    mask_blend(mask, &h, h_prev)
}

/// GRU step with a context vector; sigmoid over the raw concatenation.
#[allow(clippy::too_many_arguments)]
pub fn gru_step_attention(
    mask: ArrayView1<'_, f32>,
    x_gates: ArrayView2<'_, f32>,
    x_cand: ArrayView2<'_, f32>,
    context: ArrayView2<'_, f32>,
    h_prev: ArrayView2<'_, f32>,
    u: ArrayView2<'_, f32>,
    ux: ArrayView2<'_, f32>,
    weights: GruContextWeights<'_>,
) -> Result<Array2<f32>> {
    let dim = ux.ncols();

    let raw = add(matmul(h_prev, u)?, x_gates)?;
    let raw = add(raw, matmul(context, weights.wc.view())?.view())?;
    let preact = sigmoid(raw.view());

    let r = gate_block(&preact, 0, dim);
    let z = gate_block(&preact, 1, dim);

    let inner = add(matmul(h_prev, ux)? * &r, x_cand)?;
    let inner = add(inner, matmul(context, weights.wcx.view())?.view())?;
    let proposal = tanh(inner.view());

    let h = &z * &h_prev + &complement(z) * &proposal;
    mask_blend(mask, &h, h_prev)
}

/// Context-driven GRU unit of a conditional layer (runs after attention).
///
/// It has no input projection: the gates see only the previous hidden
/// state and the attention context.
#[derive(Clone, Debug)]
pub struct GruCondUnit<'p> {
    u_nl: &'p Array2<f32>,
    b_nl: &'p Array1<f32>,
    ux_nl: &'p Array2<f32>,
    bx_nl: &'p Array1<f32>,
    wc: &'p Array2<f32>,
    wcx: &'p Array2<f32>,
}

impl<'p> GruCondUnit<'p> {
    pub fn load(
        params: &'p ParameterSet,
        scope: &KeyScope,
        dim: usize,
        context_dim: usize,
    ) -> Result<Self> {
        let k = GRU_GATES;
        Ok(Self {
            u_nl: params.matrix_shaped(&scope.key(Role::UNl), dim, k * dim)?,
            b_nl: params.vector_len(&scope.key(Role::BNl), k * dim)?,
            ux_nl: params.matrix_shaped(&scope.key(Role::UxNl), dim, dim)?,
            bx_nl: params.vector_len(&scope.key(Role::BxNl), dim)?,
            wc: params.matrix_shaped(&scope.key(Role::Wc), context_dim, k * dim)?,
            wcx: params.matrix_shaped(&scope.key(Role::Wcx), context_dim, dim)?,
        })
    }

    /// `query` is the pre-attention output `h1`; it drives the candidate,
    /// while `h_prev` (the running state of the post-attention stack) drives
    /// the gates and both blends.
    ///
    /// ```text
    /// [r | u] = σ(h · U_nl + b_nl + ctx · Wc)
    /// h̃       = tanh((h1 · Ux_nl + bx_nl) ⊙ r + ctx · Wcx)
    /// ```
    pub fn step(
        &self,
        mask: ArrayView1<'_, f32>,
        context: ArrayView2<'_, f32>,
        query: ArrayView2<'_, f32>,
        h_prev: ArrayView2<'_, f32>,
    ) -> Result<Array2<f32>> {
        let dim = self.ux_nl.ncols();

        let raw = add_bias(matmul(h_prev, self.u_nl.view())?, self.b_nl.view())?;
        let raw = add(raw, matmul(context, self.wc.view())?.view())?;
        let preact = sigmoid(raw.view());

        let r = gate_block(&preact, 0, dim);
        let z = gate_block(&preact, 1, dim);

        let recurrent = affine(query, self.ux_nl.view(), self.bx_nl.view())?;
        let inner = add(recurrent * &r, matmul(context, self.wcx.view())?.view())?;
        let proposal = tanh(inner.view());

        let h = &z * &h_prev + &complement(z) * &proposal;
        mask_blend(mask, &h, h_prev)
    }
}
