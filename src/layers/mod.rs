//! Layers built from a parameter set.
//!
//! The variant is picked once, from the [`LayerConfig`] kind, when the layer
//! is built; a forward pass never looks a step function up by name.  Every
//! layer borrows the [`ParameterSet`] for its lifetime, so the set cannot be
//! mutated while a layer exists.

pub mod conditional;
pub mod feed_forward;
pub mod gru;
pub mod lstm;
pub mod output;

use std::sync::Arc;

use ndarray::{Array2, ArrayView3};

use crate::core::RecurrentState;
use crate::error::{Result, RnnError};
use crate::params::{LayerConfig, LayerKind, ParameterSet};
use crate::runtime::ForwardRequest;

pub use conditional::{ConditionalGru, ConditionalLstm};
pub use feed_forward::FeedForward;
pub use gru::GruLayer;
pub use lstm::LstmLayer;
pub use output::{GateTrace, LayerOutput};

/// A built layer of any kind.
#[derive(Clone, Debug)]
pub enum Layer<'p> {
    FeedForward(FeedForward<'p>),
    Gru(GruLayer<'p>),
    Lstm(LstmLayer<'p>),
    GruCond(ConditionalGru<'p>),
    LstmCond(ConditionalLstm<'p>),
}

impl<'p> Layer<'p> {
    /// Borrow and shape-check every tensor `config` names.
    pub fn build(params: &'p ParameterSet, config: &LayerConfig) -> Result<Self> {
        config.validate()?;
        let layer = match config.kind {
            LayerKind::FeedForward { activation, .. } => {
                Layer::FeedForward(FeedForward::load(params, config, activation)?)
            }
            LayerKind::Gru => Layer::Gru(GruLayer::load(params, config)?),
            LayerKind::Lstm => Layer::Lstm(LstmLayer::load(params, config)?),
            LayerKind::GruCond => Layer::GruCond(ConditionalGru::load(params, config)?),
            LayerKind::LstmCond => Layer::LstmCond(ConditionalLstm::load(params, config)?),
        };
        Ok(layer)
    }

    pub fn forward(&self, req: ForwardRequest<'_>) -> Result<LayerOutput> {
        match self {
            Layer::FeedForward(layer) => layer.forward(req),
            Layer::Gru(layer) => layer.forward(req),
            Layer::Lstm(layer) => layer.forward(req),
            Layer::GruCond(layer) => layer.forward(req),
            Layer::LstmCond(layer) => layer.forward(req),
        }
    }

    pub fn is_recurrent(&self) -> bool {
        !matches!(self, Layer::FeedForward(_))
    }
}

/// Match a supplied context against the context dim the layer was built with.
///
/// A per-step context must be `(T, B, C)` for `T` input steps.
pub(crate) fn check_context<'a>(
    component: &Arc<str>,
    context_dim: Option<usize>,
    context: Option<ArrayView3<'a, f32>>,
    steps: usize,
    batch: usize,
) -> Result<Option<ArrayView3<'a, f32>>> {
    match (context_dim, context) {
        (None, None) => Ok(None),
        (None, Some(_)) => Err(RnnError::MissingContextDim {
            component: component.to_string(),
        }),
        (Some(_), None) => Err(RnnError::MissingContext),
        (Some(width), Some(ctx)) => {
            if ctx.dim() != (steps, batch, width) {
                return Err(RnnError::shape("context", ctx.shape(), &[steps, batch, width]));
            }
            Ok(Some(ctx))
        }
    }
}

/// Caller-supplied hidden state, shape-checked.
pub(crate) fn initial_hidden(
    init: Option<&RecurrentState>,
    batch: usize,
    dim: usize,
) -> Result<Option<Array2<f32>>> {
    init.map(|state| -> Result<Array2<f32>> {
        state.expect_shape(batch, dim)?;
        Ok(state.hidden.clone())
    })
    .transpose()
}

/// Caller-supplied hidden and memory state; missing memory starts at zero.
pub(crate) fn initial_memory_state(
    init: Option<&RecurrentState>,
    batch: usize,
    dim: usize,
) -> Result<Option<(Array2<f32>, Array2<f32>)>> {
    init.map(|state| -> Result<(Array2<f32>, Array2<f32>)> {
        state.expect_shape(batch, dim)?;
        let memory = state
            .memory
            .clone()
            .unwrap_or_else(|| Array2::zeros((batch, dim)));
        Ok((state.hidden.clone(), memory))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SequenceBatch;
    use crate::params::{Activation, ParameterSchema};
    use ndarray::{Array2, Array3};

    #[test]
    fn test_build_every_kind() {
        let configs = vec![
            LayerConfig::feed_forward("ff", 3, 4, Activation::Tanh),
            LayerConfig::gru("gru", 3, 4),
            LayerConfig::lstm("lstm", 3, 4).with_units(2),
            LayerConfig::gru_cond("gru_cond", 3, 4, 5),
            LayerConfig::lstm_cond("lstm_cond", 3, 4, 5).with_units(2),
        ];
        let mut params = ParameterSet::new();
        for config in &configs {
            params.merge(ParameterSchema::new(config).unwrap().init_seeded(1).unwrap());
        }
        for config in &configs {
            let layer = Layer::build(&params, config).unwrap();
            assert_eq!(layer.is_recurrent(), config.kind.is_recurrent());
        }
    }

    #[test]
    fn test_build_reports_missing_tensor() {
        let config = LayerConfig::gru("encoder", 3, 4);
        let params = ParameterSet::new();
        let err = Layer::build(&params, &config).unwrap_err();
        assert!(matches!(err, RnnError::MissingParameter { .. }));
    }

    #[test]
    fn test_build_reports_wrong_shape() {
        let small = LayerConfig::gru("encoder", 3, 4);
        let params = ParameterSchema::new(&small).unwrap().init_seeded(0).unwrap();
        let wide = LayerConfig::gru("encoder", 3, 6);
        let err = Layer::build(&params, &wide).unwrap_err();
        assert!(matches!(err, RnnError::ParameterShape { .. }));
    }

    #[test]
    fn test_single_step_requires_previous_state() {
        let config = LayerConfig::lstm("encoder", 3, 4);
        let params = ParameterSchema::new(&config).unwrap().init_seeded(0).unwrap();
        let layer = Layer::build(&params, &config).unwrap();
        let step = SequenceBatch::single_step(Array2::zeros((2, 3)), None).unwrap();
        let mut req = ForwardRequest::replay(&step);
        req.mode = crate::runtime::Mode::SingleStep;
        assert_eq!(layer.forward(req).unwrap_err(), RnnError::MissingPreviousState);
    }

    #[test]
    fn test_single_step_rejects_sequences() {
        let config = LayerConfig::gru("encoder", 3, 4);
        let params = ParameterSchema::new(&config).unwrap().init_seeded(0).unwrap();
        let layer = Layer::build(&params, &config).unwrap();
        let seq = SequenceBatch::new(Array3::zeros((2, 1, 3)), None).unwrap();
        let req = ForwardRequest::single_step(&seq, RecurrentState::zeros(1, 4, false));
        assert_eq!(layer.forward(req).unwrap_err(), RnnError::SingleStepLength { steps: 2 });
    }

    #[test]
    fn test_initial_state_shape_checked() {
        let config = LayerConfig::gru("encoder", 3, 4);
        let params = ParameterSchema::new(&config).unwrap().init_seeded(0).unwrap();
        let layer = Layer::build(&params, &config).unwrap();
        let seq = SequenceBatch::new(Array3::zeros((2, 1, 3)), None).unwrap();
        let req = ForwardRequest::replay(&seq).with_init_state(RecurrentState::zeros(1, 5, false));
        assert!(matches!(layer.forward(req), Err(RnnError::ShapeMismatch { .. })));
    }
}
