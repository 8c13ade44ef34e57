//! Conditional decoder layers.
//!
//! Per target step:
//!
//! 1. the pre-attention stack reads `x_t` and the previous hidden state and
//!    yields an intermediate `h1`;
//! 2. `h1` queries the attention scorer against the projected source,
//!    giving a context vector and the alignment weights;
//! 3. the post-attention stack, starting from `h1`, folds the context in
//!    through its own context-to-gate weights and yields the step's output.
//!
//! The source projection is computed once per forward pass.  Both stages
//! mask-blend on their own, so a padded target step returns the previous
//! hidden (and memory) state unchanged.

use std::sync::Arc;

use ndarray::{Array2, ArrayView1, ArrayView3};

use crate::attention::{AttentionScorer, ProjectedSource};
use crate::cells::{GateActivations, GruCondUnit, GruProjection, GruUnit, LstmCondUnit, LstmUnit, Stack};
use crate::core::ops::stack_steps;
use crate::core::SequenceBatch;
use crate::error::{Result, RnnError};
use crate::params::{KeyScope, LayerConfig, ParameterSet};
use crate::runtime::{project_steps, ForwardRequest, SequenceDriver, StepFunction};

use super::output::{gate_traces, LayerOutput};
use super::{initial_hidden, initial_memory_state};

/// The source sequence a conditional layer attends over, checked and projected.
fn prepare_source(
    attention: &AttentionScorer<'_>,
    req: &ForwardRequest<'_>,
) -> Result<ProjectedSource> {
    let source: ArrayView3<'_, f32> = req.context3()?.ok_or(RnnError::MissingContext)?;
    if source.dim().1 != req.input.batch() {
        return Err(RnnError::shape(
            "source batch",
            source.shape(),
            &[source.dim().0, req.input.batch(), source.dim().2],
        ));
    }
    attention.project_source(source, req.context_mask)
}

/// Stack the per-step context and alignment tensors.
fn attention_sequences<'s>(
    steps: impl Iterator<Item = (&'s Array2<f32>, &'s Array2<f32>)>,
) -> Result<(ndarray::Array3<f32>, ndarray::Array3<f32>)> {
    let (contexts, alignments): (Vec<Array2<f32>>, Vec<Array2<f32>>) =
        steps.map(|(c, a)| (c.clone(), a.clone())).unzip();
    Ok((stack_steps(&contexts)?, stack_steps(&alignments)?))
}

fn log_forward(component: &str, kind: &str, req: &ForwardRequest<'_>, source: &ProjectedSource) {
    tracing::debug!(
        component,
        mode = ?req.mode,
        steps = req.input.steps(),
        batch = req.input.batch(),
        source_len = source.source_len(),
        "{} forward",
        kind
    );
}

// GRU

/// Hidden state after a conditional GRU step, with its attention read.
#[derive(Clone, Debug)]
pub struct GruCondState {
    pub hidden: Array2<f32>,
    /// `(B, C)`.
    pub context: Array2<f32>,
    /// `(B, S)`.
    pub alignment: Array2<f32>,
}

#[derive(Clone, Debug)]
pub struct ConditionalGru<'p> {
    component: Arc<str>,
    dim: usize,
    pre: Stack<GruUnit<'p>>,
    attention: AttentionScorer<'p>,
    post: Stack<GruCondUnit<'p>>,
}

impl<'p> ConditionalGru<'p> {
    pub fn load(params: &'p ParameterSet, config: &LayerConfig) -> Result<Self> {
        let context_dim = config.context_dim.ok_or_else(|| RnnError::MissingContextDim {
            component: config.component.clone(),
        })?;
        let component = config.component_name();
        let scope = |unit| KeyScope::new(&component, config.layer_id, unit);
        let units = config.units();

        let pre = Stack::load(&units, |unit| {
            GruUnit::load(params, &scope(unit), config.nin, config.dim, None)
        })?;
        let post = Stack::load(&units, |unit| {
            GruCondUnit::load(params, &scope(unit), config.dim, context_dim)
        })?;
        let attention = AttentionScorer::load(params, &scope(None), config.dim, context_dim)?;

        Ok(Self {
            component,
            dim: config.dim,
            pre,
            attention,
            post,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn forward(&self, req: ForwardRequest<'_>) -> Result<LayerOutput> {
        req.check_mode()?;
        let source = prepare_source(&self.attention, &req)?;
        log_forward(&self.component, "gru_cond", &req, &source);

        let input: &SequenceBatch = req.input;
        let batch = input.batch();
        let inputs = project_steps(input, |_, x| self.pre.project(x))?;

        let step_fn = GruCondStep { layer: self, source: &source };
        let zero_read = || {
            (
                Array2::zeros((batch, source.context_dim())),
                Array2::zeros((batch, source.source_len())),
            )
        };
        let init = initial_hidden(req.init_state.as_ref(), batch, self.dim)?.map(|hidden| {
            let (context, alignment) = zero_read();
            GruCondState { hidden, context, alignment }
        });
        let states = SequenceDriver::new(&step_fn).run(req.mode, &inputs, input.mask().view(), init, || {
            let (context, alignment) = zero_read();
            GruCondState {
                hidden: Array2::zeros((batch, self.dim)),
                context,
                alignment,
            }
        })?;

        let hidden: Vec<Array2<f32>> = states.iter().map(|s| s.hidden.clone()).collect();
        let (context, alignment) = attention_sequences(states.iter().map(|s| (&s.context, &s.alignment)))?;

        let mut out = LayerOutput::from_hidden(&hidden, req.dropout)?;
        out.context = Some(context);
        out.alignment = Some(alignment);
        Ok(out)
    }
}

/// A conditional GRU bound to one projected source.
struct GruCondStep<'l, 'p> {
    layer: &'l ConditionalGru<'p>,
    source: &'l ProjectedSource,
}

impl StepFunction for GruCondStep<'_, '_> {
    type Input = Vec<GruProjection>;
    type State = GruCondState;

    fn step(&self, input: &Vec<GruProjection>, mask: ArrayView1<'_, f32>, prev: &GruCondState) -> Result<GruCondState> {
        let layer = self.layer;
        let h1 = layer.pre.step(mask, input, None, prev.hidden.view())?;
        let read = layer.attention.score(self.source, h1.view())?;
        let hidden = layer.post.step(mask, read.context.view(), h1.view())?;
        Ok(GruCondState {
            hidden,
            context: read.context,
            alignment: read.weights,
        })
    }
}

// LSTM

/// State after a conditional LSTM step.
#[derive(Clone, Debug)]
pub struct LstmCondState {
    pub hidden: Array2<f32>,
    pub memory: Array2<f32>,
    pub context: Array2<f32>,
    pub alignment: Array2<f32>,
    pub pre_gates: Vec<GateActivations>,
    pub post_gates: Vec<GateActivations>,
}

#[derive(Clone, Debug)]
pub struct ConditionalLstm<'p> {
    component: Arc<str>,
    dim: usize,
    units: Vec<Option<usize>>,
    pre: Stack<LstmUnit<'p>>,
    attention: AttentionScorer<'p>,
    post: Stack<LstmCondUnit<'p>>,
}

impl<'p> ConditionalLstm<'p> {
    pub fn load(params: &'p ParameterSet, config: &LayerConfig) -> Result<Self> {
        let context_dim = config.context_dim.ok_or_else(|| RnnError::MissingContextDim {
            component: config.component.clone(),
        })?;
        let component = config.component_name();
        let scope = |unit| KeyScope::new(&component, config.layer_id, unit);
        let units = config.units();

        let pre = Stack::load(&units, |unit| {
            LstmUnit::load(params, &scope(unit), config.nin, config.dim, None)
        })?;
        let post = Stack::load(&units, |unit| {
            LstmCondUnit::load(params, &scope(unit), config.dim, context_dim)
        })?;
        let attention = AttentionScorer::load(params, &scope(None), config.dim, context_dim)?;

        Ok(Self {
            component,
            dim: config.dim,
            units,
            pre,
            attention,
            post,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn forward(&self, req: ForwardRequest<'_>) -> Result<LayerOutput> {
        req.check_mode()?;
        let source = prepare_source(&self.attention, &req)?;
        log_forward(&self.component, "lstm_cond", &req, &source);

        let input: &SequenceBatch = req.input;
        let (batch, dim) = (input.batch(), self.dim);
        let inputs = project_steps(input, |_, x| self.pre.project(x))?;

        let step_fn = LstmCondStep { layer: self, source: &source };
        let start = |hidden: Array2<f32>, memory: Array2<f32>| LstmCondState {
            hidden,
            memory,
            context: Array2::zeros((batch, source.context_dim())),
            alignment: Array2::zeros((batch, source.source_len())),
            pre_gates: Vec::new(),
            post_gates: Vec::new(),
        };
        let init = initial_memory_state(req.init_state.as_ref(), batch, dim)?.map(|(h, c)| start(h, c));
        let states = SequenceDriver::new(&step_fn).run(req.mode, &inputs, input.mask().view(), init, || {
            start(Array2::zeros((batch, dim)), Array2::zeros((batch, dim)))
        })?;

        let hidden: Vec<Array2<f32>> = states.iter().map(|s| s.hidden.clone()).collect();
        let memory: Vec<Array2<f32>> = states.iter().map(|s| s.memory.clone()).collect();
        let (context, alignment) = attention_sequences(states.iter().map(|s| (&s.context, &s.alignment)))?;

        let mut out = LayerOutput::from_hidden(&hidden, req.dropout)?;
        out.memory = Some(stack_steps(&memory)?);
        out.context = Some(context);
        out.alignment = Some(alignment);
        if req.collect_gates {
            let pre: Vec<&[GateActivations]> = states.iter().map(|s| s.pre_gates.as_slice()).collect();
            let post: Vec<&[GateActivations]> = states.iter().map(|s| s.post_gates.as_slice()).collect();
            let mut traces = gate_traces("pre_attention", &self.units, &pre)?;
            traces.extend(gate_traces("post_attention", &self.units, &post)?);
            out.gates = Some(traces);
        }
        Ok(out)
    }
}

struct LstmCondStep<'l, 'p> {
    layer: &'l ConditionalLstm<'p>,
    source: &'l ProjectedSource,
}

impl StepFunction for LstmCondStep<'_, '_> {
    type Input = Vec<Array2<f32>>;
    type State = LstmCondState;

    fn step(&self, input: &Vec<Array2<f32>>, mask: ArrayView1<'_, f32>, prev: &LstmCondState) -> Result<LstmCondState> {
        let layer = self.layer;
        let first = layer
            .pre
            .step(mask, input, None, prev.hidden.view(), prev.memory.view())?;
        let read = layer.attention.score(self.source, first.hidden.view())?;
        let second = layer.post.step(
            mask,
            read.context.view(),
            first.hidden.view(),
            first.memory.view(),
        )?;
        Ok(LstmCondState {
            hidden: second.hidden,
            memory: second.memory,
            context: read.context,
            alignment: read.weights,
            pre_gates: first.gates,
            post_gates: second.gates,
        })
    }
}
