use rcnvgg::{
    checkpoint::{KernelLayout, PretrainedWeights},
    common::*,
    model::{ModelInput, RcnVgg16Init},
};

const FRAME_SIZE: i64 = 32;
const NUM_CLASSES: i64 = 4;

fn small_init() -> RcnVgg16Init {
    RcnVgg16Init {
        frame_size: FRAME_SIZE,
        ..RcnVgg16Init::new(NUM_CLASSES)
    }
}

fn random_input(seq_len: i64, lengths: &[i64], targets: &[i64]) -> ModelInput {
    let batch_size = lengths.len() as i64;
    let frames = Tensor::rand(
        &[seq_len, batch_size, FRAME_SIZE, FRAME_SIZE, 3],
        (Kind::Float, Device::Cpu),
    ) * 255.0;

    ModelInput {
        frames,
        lengths: Tensor::of_slice(lengths),
        targets: Tensor::of_slice(targets),
    }
}

#[test]
fn forward_produces_class_distribution() {
    tch::manual_seed(21);
    let vs = VarStore::new(Device::Cpu);
    let model = small_init()
        .build(&vs.root(), &PretrainedWeights::empty())
        .unwrap();
    let input = random_input(3, &[2, 3], &[1, 3]);

    let output = tch::no_grad(|| model.forward_t(&input, false)).unwrap();

    assert_eq!(output.prob.size(), [2, NUM_CLASSES]);
    assert!(output
        .prob
        .sum_dim_intlist(&[1], false, Kind::Float)
        .allclose(&Tensor::ones(&[2], (Kind::Float, Device::Cpu)), 1e-5, 1e-5, false));
    assert_eq!(output.predictions.size(), [2]);

    let loss = output.loss.double_value(&[]);
    let accuracy = output.accuracy.double_value(&[]);
    assert!(loss.is_finite() && loss >= 0.0);
    assert!((0.0..=1.0).contains(&accuracy));
}

#[test]
fn eval_forward_is_deterministic() {
    tch::manual_seed(22);
    let vs = VarStore::new(Device::Cpu);
    let model = small_init()
        .build(&vs.root(), &PretrainedWeights::empty())
        .unwrap();
    let input = random_input(2, &[1, 2], &[0, 2]);

    let first = tch::no_grad(|| model.forward_t(&input, false)).unwrap();
    let second = tch::no_grad(|| model.forward_t(&input, false)).unwrap();

    assert!(first.prob.equal(&second.prob));
    assert!(first.loss.equal(&second.loss));
}

#[test]
fn train_forward_applies_dropout() {
    tch::manual_seed(25);
    let vs = VarStore::new(Device::Cpu);
    let model = small_init()
        .build(&vs.root(), &PretrainedWeights::empty())
        .unwrap();
    let input = random_input(2, &[2, 1], &[3, 0]);

    let (first, second, eval) = tch::no_grad(|| {
        (
            model.forward_t(&input, true).unwrap(),
            model.forward_t(&input, true).unwrap(),
            model.forward_t(&input, false).unwrap(),
        )
    });

    // each training pass draws its own dropout mask after fc6
    assert!(!first.prob.equal(&second.prob));
    assert!(!first.prob.equal(&eval.prob));
}

#[test]
fn zero_dropout_train_forward_matches_eval() {
    tch::manual_seed(26);
    let vs = VarStore::new(Device::Cpu);
    let model = RcnVgg16Init {
        dropout: 0.0,
        ..small_init()
    }
    .build(&vs.root(), &PretrainedWeights::empty())
    .unwrap();
    let input = random_input(2, &[1, 2], &[1, 2]);

    let (train, eval) = tch::no_grad(|| {
        (
            model.forward_t(&input, true).unwrap(),
            model.forward_t(&input, false).unwrap(),
        )
    });

    assert!(train.prob.allclose(&eval.prob, 1e-6, 1e-6, false));
    assert!(train.predictions.equal(&eval.predictions));
}

fn write_batch(name: &str, tensors: &[(&str, &Tensor)]) -> PathBuf {
    let path = std::env::temp_dir().join(format!("rcnvgg-{}-{}.npz", name, std::process::id()));
    Tensor::write_npz(tensors, &path).unwrap();
    path
}

#[test]
fn opened_batch_runs_through_model() {
    tch::manual_seed(27);
    let vs = VarStore::new(Device::Cpu);
    let model = small_init()
        .build(&vs.root(), &PretrainedWeights::empty())
        .unwrap();
    assert_eq!(model.frame_size(), FRAME_SIZE);
    assert_eq!(model.num_classes(), NUM_CLASSES);

    let frames = Tensor::rand(&[3, 2, FRAME_SIZE, FRAME_SIZE, 3], (Kind::Float, Device::Cpu)) * 255.0;
    let lengths = Tensor::of_slice(&[2_i32, 3]);
    let targets = Tensor::of_slice(&[1_i64, 0]);
    let path = write_batch(
        "int-batch",
        &[("frames", &frames), ("lengths", &lengths), ("targets", &targets)],
    );

    let input = ModelInput::open(&path).unwrap();
    fs::remove_file(&path).unwrap();

    assert_eq!(input.lengths.kind(), Kind::Int);
    assert!(input.lengths.equal(&lengths));
    assert!(input.frames.allclose(&frames, 1e-6, 1e-6, false));

    let output = tch::no_grad(|| model.forward_t(&input, false)).unwrap();
    assert_eq!(output.prob.size(), [2, NUM_CLASSES]);
}

#[test]
fn opened_batch_keeps_fractional_lengths_invalid() {
    tch::manual_seed(28);
    let vs = VarStore::new(Device::Cpu);
    let model = small_init()
        .build(&vs.root(), &PretrainedWeights::empty())
        .unwrap();

    let frames = Tensor::rand(&[3, 2, FRAME_SIZE, FRAME_SIZE, 3], (Kind::Float, Device::Cpu));
    let int_lengths = Tensor::of_slice(&[2_i64, 3]);
    let float_lengths = Tensor::of_slice(&[2.7_f32, 3.0]);
    let int_targets = Tensor::of_slice(&[1_i64, 0]);
    let float_targets = Tensor::of_slice(&[1.0_f32, 0.0]);

    let bad_lengths = write_batch(
        "float-lengths",
        &[("frames", &frames), ("lengths", &float_lengths), ("targets", &int_targets)],
    );
    let bad_targets = write_batch(
        "float-targets",
        &[("frames", &frames), ("lengths", &int_lengths), ("targets", &float_targets)],
    );
    let no_targets = write_batch(
        "no-targets",
        &[("frames", &frames), ("lengths", &int_lengths)],
    );

    let bad_lengths_input = ModelInput::open(&bad_lengths).unwrap();
    let bad_targets_input = ModelInput::open(&bad_targets).unwrap();
    let no_targets_input = ModelInput::open(&no_targets);
    for path in [&bad_lengths, &bad_targets, &no_targets] {
        fs::remove_file(path).unwrap();
    }

    assert_eq!(bad_lengths_input.lengths.kind(), Kind::Float);
    assert!(no_targets_input.is_err());
    tch::no_grad(|| {
        assert!(model.forward_t(&bad_lengths_input, false).is_err());
        assert!(model.forward_t(&bad_targets_input, false).is_err());
    });
}

#[test]
fn checkpoint_initializes_layers() {
    tch::manual_seed(23);
    let opts = (Kind::Float, Device::Cpu);
    let conv1_1_kernel = Tensor::randn(&[3, 3, 3, 64], opts);
    let conv4_1_kernel = Tensor::randn(&[3, 3, 256, 512], opts);
    let conv4_1_bias = Tensor::randn(&[512], opts);
    let weights = PretrainedWeights::from_named_tensors(
        vec![
            ("conv1_1/kernel".to_owned(), conv1_1_kernel.shallow_clone()),
            ("conv1_1/bias".to_owned(), Tensor::randn(&[64], opts)),
            ("conv4_1/kernel".to_owned(), conv4_1_kernel.shallow_clone()),
            ("conv4_1/bias".to_owned(), conv4_1_bias.shallow_clone()),
            ("fc8/kernel".to_owned(), Tensor::randn(&[4096, 1000], opts)),
            ("fc8/bias".to_owned(), Tensor::randn(&[1000], opts)),
        ],
        KernelLayout::Hwio,
    )
    .unwrap();

    let vs = VarStore::new(Device::Cpu);
    let _model = small_init().build(&vs.root(), &weights).unwrap();
    let variables = vs.variables();

    // 10 trainable convs, 2 recurrent layers with 9 tensors each, 2 dense layers
    assert_eq!(vs.trainable_variables().len(), 10 * 2 + 2 * 9 + 2 * 2);
    assert!(!variables.contains_key("conv1_1.filters"));
    assert!(variables.contains_key("conv1_2.filters"));
    assert!(variables["rcn4_1.candidate.input_kernel"]
        .equal(&conv4_1_kernel.permute(&[3, 2, 0, 1])));
    assert!(variables["rcn4_1.candidate.bias"].equal(&conv4_1_bias));
    assert!(!variables["rcn4_1.update.input_kernel"]
        .equal(&conv4_1_kernel.permute(&[3, 2, 0, 1])));
}

#[test]
fn mismatched_checkpoint_fails_construction() {
    let opts = (Kind::Float, Device::Cpu);
    let weights = PretrainedWeights::from_named_tensors(
        vec![
            ("conv5_1/kernel".to_owned(), Tensor::randn(&[3, 3, 256, 512], opts)),
            ("conv5_1/bias".to_owned(), Tensor::randn(&[512], opts)),
        ],
        KernelLayout::Hwio,
    )
    .unwrap();

    let vs = VarStore::new(Device::Cpu);
    assert!(small_init().build(&vs.root(), &weights).is_err());
}

#[test]
fn invalid_model_configuration_is_rejected() {
    let vs = VarStore::new(Device::Cpu);
    let weights = PretrainedWeights::empty();

    let tiny_frames = RcnVgg16Init {
        frame_size: 16,
        ..small_init()
    };
    let no_classes = RcnVgg16Init {
        num_classes: 0,
        ..small_init()
    };
    let full_dropout = RcnVgg16Init {
        dropout: 1.0,
        ..small_init()
    };

    assert!(tiny_frames.build(&vs.root() / "tiny", &weights).is_err());
    assert!(no_classes.build(&vs.root() / "empty", &weights).is_err());
    assert!(full_dropout.build(&vs.root() / "dropout", &weights).is_err());
}

#[test]
fn malformed_inputs_are_rejected() {
    tch::manual_seed(24);
    let vs = VarStore::new(Device::Cpu);
    let model = small_init()
        .build(&vs.root(), &PretrainedWeights::empty())
        .unwrap();

    let too_long = random_input(2, &[1, 3], &[0, 1]);
    let empty = random_input(2, &[0, 2], &[0, 1]);
    let bad_target = random_input(2, &[1, 2], &[0, NUM_CLASSES]);
    let wrong_size = ModelInput {
        frames: Tensor::rand(&[2, 2, 16, 16, 3], (Kind::Float, Device::Cpu)),
        lengths: Tensor::of_slice(&[1_i64, 2]),
        targets: Tensor::of_slice(&[0_i64, 1]),
    };

    tch::no_grad(|| {
        assert!(model.forward_t(&too_long, false).is_err());
        assert!(model.forward_t(&empty, false).is_err());
        assert!(model.forward_t(&bad_target, false).is_err());
        assert!(model.forward_t(&wrong_size, false).is_err());
    });
}
