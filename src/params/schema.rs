//! Per-layer parameter schemas.
//!
//! A [`LayerConfig`] is turned into an ordered list of [`ParamSpec`]s, one per
//! tensor the matching layer reads.  `init` materialises those specs into a
//! [`ParameterSet`]; layer construction later checks every key and shape
//! against the same config, so a set built by this schema is always complete.
//!
//! | kind        | per unit                                         | shared                       |
//! |-------------|--------------------------------------------------|------------------------------|
//! | `FeedForward` | W, b                                           |                              |
//! | `Gru`       | W, b, U, Wx, bx, Ux (+ Wc, Wcx with context)     |                              |
//! | `Lstm`      | W, U, b (+ Wc with context)                      |                              |
//! | `GruCond`   | W, b, U, Wx, Ux, bx, U_nl, b_nl, Ux_nl, bx_nl, Wc, Wcx | W_comb_att, Wc_att, b_att, U_att, c_tt |
//! | `LstmCond`  | W, b, U, U_nl, b_nl, Wc                          | W_comb_att, Wc_att, b_att, U_att, c_tt |

use std::sync::Arc;

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::{GRU_GATES, INIT_SCALE, LSTM_GATES};
use crate::error::{Result, RnnError};

use super::init::{concat_columns, normal_weight, orthogonal_weight};
use super::key::{ParamKey, Role};
use super::set::{ParamTensor, ParameterSet};

/// Output nonlinearity of a feed-forward layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    Tanh,
    Linear,
}

/// Layer variants the engine knows how to build.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerKind {
    /// `activ(x · W + b)`; `W` is orthogonal when square and `orthogonal` is set.
    FeedForward { activation: Activation, orthogonal: bool },
    /// Plain-gate recurrent layer.
    Gru,
    /// Memory-gate recurrent layer.
    Lstm,
    /// GRU stack, attention, then context-driven GRU stack.
    GruCond,
    /// LSTM stack, attention, then context-driven LSTM stack.
    LstmCond,
}

impl LayerKind {
    /// Conditional layers attend over a source sequence every step.
    pub fn is_conditional(self) -> bool {
        matches!(self, LayerKind::GruCond | LayerKind::LstmCond)
    }

    pub fn is_recurrent(self) -> bool {
        !matches!(self, LayerKind::FeedForward { .. })
    }

    pub fn has_memory(self) -> bool {
        matches!(self, LayerKind::Lstm | LayerKind::LstmCond)
    }

    /// Gate blocks in the combined gate projection.
    pub fn gate_count(self) -> usize {
        match self {
            LayerKind::FeedForward { .. } => 1,
            LayerKind::Gru | LayerKind::GruCond => GRU_GATES,
            LayerKind::Lstm | LayerKind::LstmCond => LSTM_GATES,
        }
    }
}

/// Build-time description of one layer instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LayerConfig {
    /// Namespace of the layer's keys, e.g. `"encoder"`.
    pub component: String,
    pub kind: LayerKind,
    pub layer_id: usize,
    /// Input feature width.
    pub nin: usize,
    /// Hidden width (output width for feed-forward layers).
    pub dim: usize,
    /// Width of the context / source annotations.
    pub context_dim: Option<usize>,
    /// `None` for an unstacked layer; `Some(n)` for `n` units keyed `1..=n`.
    pub unit_size: Option<usize>,
}

impl LayerConfig {
    pub fn new(component: &str, kind: LayerKind, nin: usize, dim: usize) -> Self {
        Self {
            component: component.to_string(),
            kind,
            layer_id: 0,
            nin,
            dim,
            context_dim: None,
            unit_size: None,
        }
    }

    pub fn gru(component: &str, nin: usize, dim: usize) -> Self {
        Self::new(component, LayerKind::Gru, nin, dim)
    }

    pub fn lstm(component: &str, nin: usize, dim: usize) -> Self {
        Self::new(component, LayerKind::Lstm, nin, dim)
    }

    pub fn gru_cond(component: &str, nin: usize, dim: usize, context_dim: usize) -> Self {
        Self::new(component, LayerKind::GruCond, nin, dim).with_context_dim(context_dim)
    }

    pub fn lstm_cond(component: &str, nin: usize, dim: usize, context_dim: usize) -> Self {
        Self::new(component, LayerKind::LstmCond, nin, dim).with_context_dim(context_dim)
    }

    pub fn feed_forward(component: &str, nin: usize, nout: usize, activation: Activation) -> Self {
        Self::new(
            component,
            LayerKind::FeedForward {
                activation,
                orthogonal: true,
            },
            nin,
            nout,
        )
    }

    pub fn with_layer_id(mut self, layer_id: usize) -> Self {
        self.layer_id = layer_id;
        self
    }

    pub fn with_context_dim(mut self, context_dim: usize) -> Self {
        self.context_dim = Some(context_dim);
        self
    }

    pub fn with_units(mut self, unit_size: usize) -> Self {
        self.unit_size = Some(unit_size);
        self
    }

    /// Validate that configuration is consistent.
    ///
    /// # Errors
    /// Conditional kinds without a context dimension fail with
    /// `MissingContextDim`; zero widths and empty stacks with `InvalidConfig`.
    pub fn validate(&self) -> Result<()> {
        if self.nin == 0 || self.dim == 0 {
            return Err(RnnError::InvalidConfig("nin and dim must be positive"));
        }
        if self.context_dim == Some(0) {
            return Err(RnnError::InvalidConfig("context_dim must be positive"));
        }
        if self.unit_size == Some(0) {
            return Err(RnnError::InvalidConfig("unit_size must be at least 1"));
        }
        if self.kind.is_conditional() && self.context_dim.is_none() {
            return Err(RnnError::MissingContextDim {
                component: self.component.clone(),
            });
        }
        if !self.kind.is_recurrent() && (self.unit_size.is_some() || self.context_dim.is_some()) {
            return Err(RnnError::InvalidConfig(
                "feed-forward layers take neither units nor context",
            ));
        }
        Ok(())
    }

    /// Unit indices of the stack: `[None]` unstacked, `[Some(1), .., Some(n)]` stacked.
    pub fn units(&self) -> Vec<Option<usize>> {
        match self.unit_size {
            None => vec![None],
            Some(n) => (1..=n).map(Some).collect(),
        }
    }

    pub(crate) fn component_name(&self) -> Arc<str> {
        Arc::from(self.component.as_str())
    }
}

/// How a tensor is initialised.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitKind {
    Zeros { len: usize },
    /// Scaled normal `(nin, nout)`.
    Normal { nin: usize, nout: usize },
    /// `blocks` independent scaled normal `(nin, dim)` draws side by side.
    NormalBlocks { nin: usize, dim: usize, blocks: usize },
    /// `blocks` independent orthogonal `(dim, dim)` draws side by side.
    OrthogonalBlocks { dim: usize, blocks: usize },
}

impl InitKind {
    pub fn shape(&self) -> Vec<usize> {
        match *self {
            InitKind::Zeros { len } => vec![len],
            InitKind::Normal { nin, nout } => vec![nin, nout],
            InitKind::NormalBlocks { nin, dim, blocks } => vec![nin, dim * blocks],
            InitKind::OrthogonalBlocks { dim, blocks } => vec![dim, dim * blocks],
        }
    }

    fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<ParamTensor> {
        let tensor = match *self {
            InitKind::Zeros { len } => ParamTensor::Vector(Array1::zeros(len)),
            InitKind::Normal { nin, nout } => {
                ParamTensor::Matrix(normal_weight(rng, nin, nout, INIT_SCALE))
            }
            InitKind::NormalBlocks { nin, dim, blocks } => {
                let parts: Vec<Array2<f32>> = (0..blocks)
                    .map(|_| normal_weight(rng, nin, dim, INIT_SCALE))
                    .collect();
                ParamTensor::Matrix(concat_columns(&parts)?)
            }
            InitKind::OrthogonalBlocks { dim, blocks } => {
                let parts: Vec<Array2<f32>> =
                    (0..blocks).map(|_| orthogonal_weight(rng, dim)).collect();
                ParamTensor::Matrix(concat_columns(&parts)?)
            }
        };
        Ok(tensor)
    }
}

/// One declared tensor.
#[derive(Clone, Debug, PartialEq)]
pub struct ParamSpec {
    pub key: ParamKey,
    pub init: InitKind,
}

/// The full tensor list of one layer.
#[derive(Clone, Debug)]
pub struct ParameterSchema {
    config: LayerConfig,
    specs: Vec<ParamSpec>,
}

impl ParameterSchema {
    /// Declare every tensor a layer built from `config` will read.
    pub fn new(config: &LayerConfig) -> Result<Self> {
        config.validate()?;
        let specs = declare(config);
        Ok(Self {
            config: config.clone(),
            specs,
        })
    }

    pub fn config(&self) -> &LayerConfig {
        &self.config
    }

    pub fn specs(&self) -> &[ParamSpec] {
        &self.specs
    }

    /// Draw every declared tensor, in declaration order.
    pub fn init<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<ParameterSet> {
        let mut params = ParameterSet::new();
        for spec in &self.specs {
            params.insert(spec.key.clone(), spec.init.draw(rng)?);
        }
        tracing::debug!(
            component = %self.config.component,
            kind = ?self.config.kind,
            layer_id = self.config.layer_id,
            tensors = params.len(),
            params = params.param_count(),
            "initialised layer parameters"
        );
        Ok(params)
    }

    pub fn init_seeded(&self, seed: u64) -> Result<ParameterSet> {
        let mut rng = StdRng::seed_from_u64(seed);
        self.init(&mut rng)
    }
}

/// `init(layer_config) -> ParameterSet`.
pub fn init<R: Rng + ?Sized>(config: &LayerConfig, rng: &mut R) -> Result<ParameterSet> {
    ParameterSchema::new(config)?.init(rng)
}

fn declare(config: &LayerConfig) -> Vec<ParamSpec> {
    let component = config.component_name();
    let mut specs = Vec::new();
    let (nin, dim) = (config.nin, config.dim);
    let k = config.kind.gate_count();

    let mut push = |role: Role, unit: Option<usize>, init: InitKind| {
        specs.push(ParamSpec {
            key: ParamKey::new(&component, role, config.layer_id).with_unit(unit),
            init,
        });
    };

    match config.kind {
        LayerKind::FeedForward { orthogonal, .. } => {
            let w = if orthogonal && nin == dim {
                InitKind::OrthogonalBlocks { dim, blocks: 1 }
            } else {
                InitKind::Normal { nin, nout: dim }
            };
            push(Role::W, None, w);
            push(Role::B, None, InitKind::Zeros { len: dim });
        }
        LayerKind::Gru => {
            for unit in config.units() {
                push(Role::W, unit, InitKind::NormalBlocks { nin, dim, blocks: k });
                push(Role::B, unit, InitKind::Zeros { len: k * dim });
                push(Role::U, unit, InitKind::OrthogonalBlocks { dim, blocks: k });
                push(Role::Wx, unit, InitKind::Normal { nin, nout: dim });
                push(Role::Bx, unit, InitKind::Zeros { len: dim });
                push(Role::Ux, unit, InitKind::OrthogonalBlocks { dim, blocks: 1 });
                if let Some(ctx) = config.context_dim {
                    push(Role::Wc, unit, InitKind::NormalBlocks { nin: ctx, dim, blocks: k });
                    push(Role::Wcx, unit, InitKind::Normal { nin: ctx, nout: dim });
                }
            }
        }
        LayerKind::Lstm => {
            for unit in config.units() {
                push(Role::W, unit, InitKind::NormalBlocks { nin, dim, blocks: k });
                push(Role::U, unit, InitKind::OrthogonalBlocks { dim, blocks: k });
                push(Role::B, unit, InitKind::Zeros { len: k * dim });
                if let Some(ctx) = config.context_dim {
                    push(Role::Wc, unit, InitKind::NormalBlocks { nin: ctx, dim, blocks: k });
                }
            }
        }
        LayerKind::GruCond => {
            let ctx = config.context_dim.unwrap_or(dim);
            for unit in config.units() {
                push(Role::W, unit, InitKind::NormalBlocks { nin, dim, blocks: k });
                push(Role::B, unit, InitKind::Zeros { len: k * dim });
                push(Role::U, unit, InitKind::OrthogonalBlocks { dim, blocks: k });
                push(Role::Wx, unit, InitKind::Normal { nin, nout: dim });
                push(Role::Ux, unit, InitKind::OrthogonalBlocks { dim, blocks: 1 });
                push(Role::Bx, unit, InitKind::Zeros { len: dim });
                push(Role::UNl, unit, InitKind::OrthogonalBlocks { dim, blocks: k });
                push(Role::BNl, unit, InitKind::Zeros { len: k * dim });
                push(Role::UxNl, unit, InitKind::OrthogonalBlocks { dim, blocks: 1 });
                push(Role::BxNl, unit, InitKind::Zeros { len: dim });
                push(Role::Wc, unit, InitKind::NormalBlocks { nin: ctx, dim, blocks: k });
                push(Role::Wcx, unit, InitKind::Normal { nin: ctx, nout: dim });
            }
            declare_attention(&mut push, dim, ctx);
        }
        LayerKind::LstmCond => {
            let ctx = config.context_dim.unwrap_or(dim);
            for unit in config.units() {
                push(Role::W, unit, InitKind::NormalBlocks { nin, dim, blocks: k });
                push(Role::B, unit, InitKind::Zeros { len: k * dim });
                push(Role::U, unit, InitKind::OrthogonalBlocks { dim, blocks: k });
                push(Role::UNl, unit, InitKind::OrthogonalBlocks { dim, blocks: k });
                push(Role::BNl, unit, InitKind::Zeros { len: k * dim });
                push(Role::Wc, unit, InitKind::NormalBlocks { nin: ctx, dim, blocks: k });
            }
            declare_attention(&mut push, dim, ctx);
        }
    }

    specs
}

fn declare_attention<F: FnMut(Role, Option<usize>, InitKind)>(push: &mut F, dim: usize, ctx: usize) {
    push(Role::WCombAtt, None, InitKind::Normal { nin: dim, nout: ctx });
    push(Role::WcAtt, None, InitKind::Normal { nin: ctx, nout: ctx });
    push(Role::BAtt, None, InitKind::Zeros { len: ctx });
    push(Role::UAtt, None, InitKind::Normal { nin: ctx, nout: 1 });
    push(Role::CTt, None, InitKind::Zeros { len: 1 });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles(schema: &ParameterSchema, unit: Option<usize>) -> Vec<Role> {
        schema
            .specs()
            .iter()
            .filter(|s| s.key.unit == unit)
            .map(|s| s.key.role)
            .collect()
    }

    #[test]
    fn test_gru_schema_shapes() {
        let schema = ParameterSchema::new(&LayerConfig::gru("encoder", 3, 5)).unwrap();
        let params = schema.init_seeded(0).unwrap();
        assert_eq!(params.len(), 6);
        let enc: Arc<str> = Arc::from("encoder");
        let w = params.matrix(&ParamKey::new(&enc, Role::W, 0)).unwrap();
        assert_eq!(w.dim(), (3, 10));
        let u = params.matrix(&ParamKey::new(&enc, Role::U, 0)).unwrap();
        assert_eq!(u.dim(), (5, 10));
        let b = params.vector(&ParamKey::new(&enc, Role::B, 0)).unwrap();
        assert!(b.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_gru_context_weights() {
        let config = LayerConfig::gru("encoder", 3, 5).with_context_dim(7);
        let schema = ParameterSchema::new(&config).unwrap();
        let r = roles(&schema, None);
        assert!(r.contains(&Role::Wc));
        assert!(r.contains(&Role::Wcx));
        let spec = schema.specs().iter().find(|s| s.key.role == Role::Wc).unwrap();
        assert_eq!(spec.init.shape(), vec![7, 10]);
    }

    #[test]
    fn test_stacked_units_are_one_based() {
        let config = LayerConfig::gru("encoder", 3, 4).with_units(3);
        let schema = ParameterSchema::new(&config).unwrap();
        assert!(roles(&schema, Some(0)).is_empty());
        for unit in 1..=3 {
            assert_eq!(roles(&schema, Some(unit)).len(), 6);
        }
        assert!(roles(&schema, None).is_empty());
    }

    #[test]
    fn test_cond_requires_context_dim() {
        let mut config = LayerConfig::gru_cond("decoder", 4, 4, 6);
        config.context_dim = None;
        let err = ParameterSchema::new(&config).unwrap_err();
        assert!(matches!(err, RnnError::MissingContextDim { .. }));
    }

    #[test]
    fn test_cond_attention_params_are_shared() {
        let config = LayerConfig::gru_cond("decoder", 4, 5, 6).with_units(2);
        let schema = ParameterSchema::new(&config).unwrap();
        let shared = roles(&schema, None);
        assert_eq!(
            shared,
            vec![Role::WCombAtt, Role::WcAtt, Role::BAtt, Role::UAtt, Role::CTt]
        );
        assert_eq!(roles(&schema, Some(1)).len(), 12);
        assert_eq!(roles(&schema, Some(2)).len(), 12);
    }

    #[test]
    fn test_lstm_gate_blocks_orthogonal() {
        let config = LayerConfig::lstm("encoder", 3, 4);
        let params = init(&config, &mut StdRng::seed_from_u64(9)).unwrap();
        let enc: Arc<str> = Arc::from("encoder");
        let u = params.matrix(&ParamKey::new(&enc, Role::U, 0)).unwrap();
        assert_eq!(u.dim(), (4, 16));
        for block in 0..4 {
            let b = u.slice(ndarray::s![.., block * 4..(block + 1) * 4]);
            let gram = b.t().dot(&b);
            for i in 0..4 {
                assert!((gram[[i, i]] - 1.0).abs() < 1e-5);
            }
        }
        // the combined matrix is not orthogonal across blocks
        let cross = u.slice(ndarray::s![.., 0..4]).t().dot(&u.slice(ndarray::s![.., 4..8]));
        assert!(cross.iter().any(|v| v.abs() > 1e-3));
    }

    #[test]
    fn test_feed_forward_square_is_orthogonal() {
        let config = LayerConfig::feed_forward("ff_state", 4, 4, Activation::Tanh);
        let schema = ParameterSchema::new(&config).unwrap();
        assert_eq!(
            schema.specs()[0].init,
            InitKind::OrthogonalBlocks { dim: 4, blocks: 1 }
        );
        let rect = LayerConfig::feed_forward("ff_state", 4, 6, Activation::Tanh);
        let schema = ParameterSchema::new(&rect).unwrap();
        assert_eq!(schema.specs()[0].init, InitKind::Normal { nin: 4, nout: 6 });
    }

    #[test]
    fn test_rejects_zero_units() {
        let config = LayerConfig::lstm("encoder", 3, 4).with_units(0);
        assert!(matches!(
            ParameterSchema::new(&config),
            Err(RnnError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_layer_id_namespaces_keys() {
        let a = ParameterSchema::new(&LayerConfig::gru("encoder", 3, 4)).unwrap();
        let b = ParameterSchema::new(&LayerConfig::gru("encoder", 3, 4).with_layer_id(1)).unwrap();
        let mut merged = a.init_seeded(1).unwrap();
        merged.merge(b.init_seeded(2).unwrap());
        assert_eq!(merged.len(), 12);
    }
}
