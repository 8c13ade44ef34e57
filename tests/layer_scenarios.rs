//! End-to-end scenarios across layer kinds.

use std::sync::Arc;

use ndarray::{array, s, Array1, Array2, Array3, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;

use nmt_layers::config::ALIGNMENT_TOLERANCE;
use nmt_layers::params::Activation;
use nmt_layers::{
    Dropout, ForwardRequest, Layer, LayerConfig, ParamKey, ParameterSchema, ParameterSet, RecurrentState, Role,
    SequenceBatch,
};

const NIN: usize = 3;
const DIM: usize = 4;
const BATCH: usize = 2;
const STEPS: usize = 3;

/// Hand-computed hidden states for `reference_gru_params` on `reference_input`.
const REFERENCE_HIDDEN: [[[f32; DIM]; BATCH]; STEPS] = [
    [
        [-0.0119722, 0.0659606, 0.0745705, -0.0355451],
        [0.0203891, 0.0313115, -0.0099987, -0.0441282],
    ],
    [
        [0.0375743, 0.033223, -0.071779, -0.0661724],
        [0.0670179, -0.010154, -0.208219, -0.0780885],
    ],
    [
        [0.0837391, -0.0312719, -0.3292479, -0.0915596],
        [0.1062109, -0.0753925, -0.4679205, -0.1048208],
    ],
];

fn pattern(rows: usize, cols: usize, modulus: usize, offset: f32, scale: f32) -> Array2<f32> {
    Array2::from_shape_fn((rows, cols), |(i, j)| scale * (((i * cols + j) % modulus) as f32 - offset))
}

fn reference_gru_params() -> ParameterSet {
    let encoder: Arc<str> = Arc::from("encoder");
    let key = |role| ParamKey::new(&encoder, role, 0);
    let mut params = ParameterSet::new();
    params.insert(key(Role::W), pattern(NIN, 2 * DIM, 7, 3.0, 0.1));
    params.insert(key(Role::B), Array1::from_shape_fn(2 * DIM, |j| 0.01 * j as f32));
    params.insert(key(Role::U), pattern(DIM, 2 * DIM, 5, 2.0, 0.05));
    params.insert(key(Role::Wx), pattern(NIN, DIM, 5, 2.0, 0.1));
    params.insert(key(Role::Bx), Array1::from_shape_fn(DIM, |j| -0.02 * j as f32));
    params.insert(key(Role::Ux), pattern(DIM, DIM, 3, 1.0, 0.1));
    params
}

fn reference_input() -> Array3<f32> {
    Array3::from_shape_fn((STEPS, BATCH, NIN), |(t, b, f)| 0.2 * (((t * BATCH + b) * NIN + f) as f32) - 1.0)
}

fn seeded(config: &LayerConfig, seed: u64) -> ParameterSet {
    ParameterSchema::new(config).unwrap().init_seeded(seed).unwrap()
}

fn attach<'a>(req: ForwardRequest<'a>, context: Option<&'a Array3<f32>>) -> ForwardRequest<'a> {
    match context {
        Some(ctx) => req.with_context(ctx.view()),
        None => req,
    }
}

fn source(len: usize, batch: usize, ctx: usize) -> Array3<f32> {
    Array3::from_shape_fn((len, batch, ctx), |(s, b, c)| ((s * 5 + b * 2 + c) % 9) as f32 * 0.2 - 0.8)
}

#[test]
fn test_gru_replay_matches_hand_computed_reference() {
    let params = reference_gru_params();
    let layer = Layer::build(&params, &LayerConfig::gru("encoder", NIN, DIM)).unwrap();
    let input = SequenceBatch::new(reference_input(), Some(Array2::ones((STEPS, BATCH)))).unwrap();
    let out = layer.forward(ForwardRequest::replay(&input)).unwrap();

    for t in 0..STEPS {
        for b in 0..BATCH {
            for d in 0..DIM {
                let got = out.hidden[[t, b, d]];
                let want = REFERENCE_HIDDEN[t][b][d];
                assert!((got - want).abs() < 1e-5, "h[{}, {}, {}] = {}, expected {}", t, b, d, got, want);
            }
        }
    }
}

#[test]
fn test_gru_single_steps_match_replay_exactly() {
    let params = reference_gru_params();
    let layer = Layer::build(&params, &LayerConfig::gru("encoder", NIN, DIM)).unwrap();
    let data = reference_input();
    let replay = layer
        .forward(ForwardRequest::replay(&SequenceBatch::new(data.clone(), None).unwrap()))
        .unwrap();

    let mut state = RecurrentState::zeros(BATCH, DIM, false);
    for t in 0..STEPS {
        let step = SequenceBatch::single_step(data.index_axis(Axis(0), t).to_owned(), None).unwrap();
        let out = layer.forward(ForwardRequest::single_step(&step, state)).unwrap();
        assert_eq!(out.hidden.index_axis(Axis(0), 0), replay.hidden.index_axis(Axis(0), t));
        state = out.final_state();
    }
}

#[test]
fn test_attention_ignores_masked_source_tail() {
    let config = LayerConfig::gru_cond("decoder", NIN, DIM, 6);
    let params = seeded(&config, 21);
    let layer = Layer::build(&params, &config).unwrap();

    let input = SequenceBatch::new(reference_input(), None).unwrap();
    let ctx = source(5, BATCH, 6);
    let mut ctx_mask = Array2::<f32>::ones((5, BATCH));
    ctx_mask.slice_mut(s![3.., ..]).fill(0.0);

    let out = layer
        .forward(
            ForwardRequest::replay(&input)
                .with_context(ctx.view())
                .with_context_mask(ctx_mask.view()),
        )
        .unwrap();
    let alignment = out.alignment.unwrap();
    for t in 0..STEPS {
        for b in 0..BATCH {
            assert_eq!(alignment[[t, b, 3]], 0.0);
            assert_eq!(alignment[[t, b, 4]], 0.0);
            let live = alignment.slice(s![t, b, ..3]).sum();
            assert!((live - 1.0).abs() < ALIGNMENT_TOLERANCE, "sum = {}", live);
        }
    }
}

#[test]
fn test_single_unit_stack_reduces_to_plain_cell() {
    // a one-unit stack keys its tensors #1; copy the unstacked draws over
    let plain = LayerConfig::gru("encoder", NIN, DIM);
    let stacked = LayerConfig::gru("encoder", NIN, DIM).with_units(1);
    let plain_params = seeded(&plain, 13);
    let mut stacked_params = ParameterSet::new();
    for (key, tensor) in plain_params.iter() {
        stacked_params.insert(key.clone().with_unit(Some(1)), tensor.clone());
    }

    let input = SequenceBatch::new(reference_input(), None).unwrap();
    let a = Layer::build(&plain_params, &plain)
        .unwrap()
        .forward(ForwardRequest::replay(&input))
        .unwrap();
    let b = Layer::build(&stacked_params, &stacked)
        .unwrap()
        .forward(ForwardRequest::replay(&input))
        .unwrap();
    assert_eq!(a.hidden, b.hidden);
}

#[test]
fn test_every_recurrent_kind_has_train_decode_parity() {
    let configs = vec![
        LayerConfig::gru("enc_gru", NIN, DIM).with_units(2),
        LayerConfig::lstm("enc_lstm", NIN, DIM),
        LayerConfig::gru_cond("dec_gru", NIN, DIM, 5),
        LayerConfig::lstm_cond("dec_lstm", NIN, DIM, 5).with_units(2),
    ];
    let data = reference_input();
    let mask = array![[1.0, 1.0], [1.0, 1.0], [1.0, 0.0]];
    let ctx = source(4, BATCH, 5);

    for (seed, config) in configs.iter().enumerate() {
        let params = seeded(config, seed as u64);
        let layer = Layer::build(&params, config).unwrap();
        let context = config.kind.is_conditional().then_some(&ctx);

        let batch = SequenceBatch::new(data.clone(), Some(mask.clone())).unwrap();
        let replay = layer.forward(attach(ForwardRequest::replay(&batch), context)).unwrap();

        let mut state = RecurrentState::zeros(BATCH, DIM, config.kind.has_memory());
        for t in 0..STEPS {
            let step = SequenceBatch::single_step(
                data.index_axis(Axis(0), t).to_owned(),
                Some(mask.index_axis(Axis(0), t).to_owned()),
            )
            .unwrap();
            let out = layer
                .forward(attach(ForwardRequest::single_step(&step, state), context))
                .unwrap();
            let diff = (&out.hidden.index_axis(Axis(0), 0) - &replay.hidden.index_axis(Axis(0), t))
                .mapv(f32::abs)
                .fold(0.0f32, |a, &b| a.max(b));
            assert!(diff < 1e-6, "{:?} step {} diverged by {}", config.kind, t, diff);
            if let (Some(m1), Some(m2)) = (&out.memory, &replay.memory) {
                assert_eq!(m1.index_axis(Axis(0), 0), m2.index_axis(Axis(0), t));
            }
            if let (Some(a1), Some(a2)) = (&out.alignment, &replay.alignment) {
                assert_eq!(a1.index_axis(Axis(0), 0), a2.index_axis(Axis(0), t));
            }
            state = out.final_state();
        }
    }
}

#[test]
fn test_noisy_dropout_only_touches_output() {
    let config = LayerConfig::lstm("encoder", NIN, DIM);
    let params = seeded(&config, 8);
    let layer = Layer::build(&params, &config).unwrap();
    let input = SequenceBatch::new(reference_input(), None).unwrap();

    let clean = layer.forward(ForwardRequest::replay(&input)).unwrap();
    let mut rng = StdRng::seed_from_u64(99);
    let noisy = layer
        .forward(ForwardRequest::replay(&input).with_dropout(Dropout::with_noise(0.5, &mut rng).unwrap()))
        .unwrap();

    assert_eq!(noisy.hidden_without_dropout, clean.hidden);
    assert_eq!(noisy.memory, clean.memory);
    for (dropped, kept) in noisy.hidden.iter().zip(clean.hidden.iter()) {
        assert!(*dropped == 0.0 || dropped == kept);
    }
}

#[test]
fn test_encoder_to_decoder_pipeline() {
    // encoder annotations → mean → ff initial state → conditional decoder
    let enc_config = LayerConfig::gru("encoder", NIN, DIM);
    let ff_config = LayerConfig::feed_forward("ff_state", DIM, 5, Activation::Tanh);
    let dec_config = LayerConfig::gru_cond("decoder", NIN, 5, DIM);

    let mut params = seeded(&enc_config, 1);
    params.merge(seeded(&ff_config, 2));
    params.merge(seeded(&dec_config, 3));

    let encoder = Layer::build(&params, &enc_config).unwrap();
    let init = match Layer::build(&params, &ff_config).unwrap() {
        Layer::FeedForward(ff) => ff,
        other => panic!("expected a feed-forward layer, got {:?}", other),
    };
    let decoder = Layer::build(&params, &dec_config).unwrap();

    let source_batch = SequenceBatch::new(reference_input(), None).unwrap();
    let annotations = encoder
        .forward(ForwardRequest::replay(&source_batch))
        .unwrap()
        .hidden;
    let mean = annotations.mean_axis(Axis(0)).unwrap();
    let h0 = init.apply(mean.view()).unwrap();
    assert_eq!(h0.dim(), (BATCH, 5));

    let target = SequenceBatch::new(Array3::from_elem((2, BATCH, NIN), 0.1), None).unwrap();
    let out = decoder
        .forward(
            ForwardRequest::replay(&target)
                .with_context(annotations.view())
                .with_init_state(RecurrentState::new(h0)),
        )
        .unwrap();
    assert_eq!(out.hidden.dim(), (2, BATCH, 5));
    assert_eq!(out.context.as_ref().unwrap().dim(), (2, BATCH, DIM));
    assert!(out.final_state().is_healthy());
}
