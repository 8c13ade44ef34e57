//! Additive attention over a source sequence.
//!
//! ```text
//! P      = values · Wc_att + b_att                 (once per forward pass)
//! e      = tanh(P + h · W_comb_att) · U_att + c_tt (S, B)
//! α      = exp(e) ⊙ mask / Σ_s exp(e) ⊙ mask
//! ctx    = Σ_s α_s · values_s                      (B, C)
//! ```
//!
//! The normalisation is a plain division with no floor.  A column whose
//! weights are all zero (every source position masked, or every `exp`
//! underflowed) divides 0 by 0 and comes back as NaN; such columns are
//! reported in [`AttentionOutput::degenerate_columns`] and logged.

use ndarray::{Array1, Array2, Array3, ArrayView2, ArrayView3, Axis};

use crate::core::ops::{add_bias, matmul};
use crate::core::sequence::validate_mask;
use crate::error::{Result, RnnError};
use crate::params::{KeyScope, ParameterSet, Role};

/// Source annotations with their step-invariant projection.
#[derive(Clone, Debug)]
pub struct ProjectedSource {
    /// `values · Wc_att + b_att`, `(S, B, C)`.
    projected: Array3<f32>,
    /// Raw annotations, `(S, B, C)`.
    values: Array3<f32>,
    /// `(S, B)` source mask.
    mask: Option<Array2<f32>>,
}

impl ProjectedSource {
    pub fn source_len(&self) -> usize {
        self.values.len_of(Axis(0))
    }

    pub fn batch(&self) -> usize {
        self.values.len_of(Axis(1))
    }

    pub fn context_dim(&self) -> usize {
        self.values.len_of(Axis(2))
    }

    pub fn projected(&self) -> &Array3<f32> {
        &self.projected
    }

    pub fn mask(&self) -> Option<&Array2<f32>> {
        self.mask.as_ref()
    }
}

/// One attention read.
#[derive(Clone, Debug)]
pub struct AttentionOutput {
    /// Weighted source sum, `(B, C)`.
    pub context: Array2<f32>,
    /// Alignment weights, `(B, S)`.
    pub weights: Array2<f32>,
    degenerate: Vec<usize>,
}

impl AttentionOutput {
    /// Batch rows whose weights summed to zero before normalisation.
    pub fn degenerate_columns(&self) -> &[usize] {
        &self.degenerate
    }
}

/// Borrowed attention parameters of one conditional layer.
#[derive(Clone, Debug)]
pub struct AttentionScorer<'p> {
    w_comb: &'p Array2<f32>,
    wc_att: &'p Array2<f32>,
    b_att: &'p Array1<f32>,
    u_att: &'p Array2<f32>,
    c_tt: f32,
}

impl<'p> AttentionScorer<'p> {
    /// Load the layer-level (unit-less) attention tensors.
    pub fn load(
        params: &'p ParameterSet,
        scope: &KeyScope,
        dim: usize,
        context_dim: usize,
    ) -> Result<Self> {
        let shared = scope.shared();
        let c_tt = params.vector_len(&shared.key(Role::CTt), 1)?;
        Ok(Self {
            w_comb: params.matrix_shaped(&shared.key(Role::WCombAtt), dim, context_dim)?,
            wc_att: params.matrix_shaped(&shared.key(Role::WcAtt), context_dim, context_dim)?,
            b_att: params.vector_len(&shared.key(Role::BAtt), context_dim)?,
            u_att: params.matrix_shaped(&shared.key(Role::UAtt), context_dim, 1)?,
            c_tt: c_tt[0],
        })
    }

    pub fn context_dim(&self) -> usize {
        self.wc_att.ncols()
    }

    /// Project the source once; every step of the forward pass reuses it.
    pub fn project_source(
        &self,
        values: ArrayView3<'_, f32>,
        mask: Option<ArrayView2<'_, f32>>,
    ) -> Result<ProjectedSource> {
        let (source_len, batch, width) = values.dim();
        if width != self.context_dim() {
            return Err(RnnError::shape(
                "attention source",
                values.shape(),
                self.wc_att.shape(),
            ));
        }
        if let Some(mask) = mask {
            validate_mask(mask, source_len, batch)?;
        }

        let mut projected = Array3::zeros((source_len, batch, width));
        for (s, slice) in values.outer_iter().enumerate() {
            let p = add_bias(matmul(slice, self.wc_att.view())?, self.b_att.view())?;
            projected.index_axis_mut(Axis(0), s).assign(&p);
        }

        Ok(ProjectedSource {
            projected,
            values: values.to_owned(),
            mask: mask.map(|m| m.to_owned()),
        })
    }

    /// Score every source position against `query` `(B, dim)`.
    pub fn score(&self, source: &ProjectedSource, query: ArrayView2<'_, f32>) -> Result<AttentionOutput> {
        if query.nrows() != source.batch() {
            return Err(RnnError::shape(
                "attention query",
                query.shape(),
                source.values.shape(),
            ));
        }

        let q = matmul(query, self.w_comb.view())?;
        let hidden = (&source.projected + &q.insert_axis(Axis(0))).mapv(f32::tanh);

        let u = self.u_att.column(0);
        let logits = hidden.map_axis(Axis(2), |row| row.dot(&u) + self.c_tt);

        let mut weights = logits.mapv(f32::exp);
        if let Some(mask) = &source.mask {
            weights *= mask;
        }

        let totals = weights.sum_axis(Axis(0));
        let degenerate: Vec<usize> = totals
            .iter()
            .enumerate()
            .filter(|&(_, &total)| total == 0.0)
            .map(|(b, _)| b)
            .collect();
        if !degenerate.is_empty() {
            tracing::warn!(
                columns = ?degenerate,
                "attention weights sum to zero; normalisation yields NaN"
            );
        }

        let weights = &weights / &totals.insert_axis(Axis(0));
        let context = (&source.values * &weights.view().insert_axis(Axis(2))).sum_axis(Axis(0));

        Ok(AttentionOutput {
            context,
            weights: weights.reversed_axes(),
            degenerate,
        })
    }
}
