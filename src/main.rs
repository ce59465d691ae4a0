use rcnvgg::{
    checkpoint::PretrainedWeights,
    common::*,
    config::{CheckpointConfig, Config},
    model::{ModelInput, ModelOutput, RcnVgg16Init},
};

/// Video classification with a recurrent convolutional VGG16.
#[derive(FromArgs)]
struct Args {
    /// the config file.
    #[argh(option, default = "PathBuf::from(\"config.json5\")")]
    config: PathBuf,
    /// the input batch (.npz or .ot) holding "frames", "lengths" and "targets".
    #[argh(option)]
    input: PathBuf,
    /// run the forward pass in training mode.
    #[argh(switch)]
    train: bool,
}

#[derive(Debug, Serialize)]
struct Report {
    loss: f64,
    accuracy: f64,
    lengths: Vec<i64>,
    targets: Vec<i64>,
    predictions: Vec<i64>,
}

fn main() -> Fallible<()> {
    pretty_env_logger::init();

    // Parse arguments
    let args: Args = argh::from_env();

    // load config
    let config = Config::open(&args.config)?;
    info!("running on {:?}", config.device);

    // load pretrained weights
    let weights = match &config.checkpoint {
        Some(CheckpointConfig {
            path,
            kernel_layout,
        }) => {
            let weights = PretrainedWeights::open(path, *kernel_layout)?;
            if weights.is_empty() {
                warn!("checkpoint {} holds no layers", path.display());
            }
            weights
        }
        None => {
            info!("no checkpoint configured, all layers are randomly initialized");
            PretrainedWeights::empty()
        }
    };

    // init model
    let mut vs = VarStore::new(config.device);
    let model = RcnVgg16Init::from_config(&config.model).build(&vs.root(), &weights)?;
    drop(weights);
    info!(
        "model built for {}x{} frames, {} classes",
        model.frame_size(),
        model.frame_size(),
        model.num_classes()
    );

    if let Some(path) = &config.model_file {
        if path.is_file() {
            info!("load model file {}", path.display());
            vs.load(path)?;
        } else {
            warn!("model file {} does not exist, skip loading", path.display());
        }
    }

    // run model
    let input = ModelInput::open(&args.input)?.to_device(config.device);
    let output = if args.train {
        model.forward_t(&input, true)?
    } else {
        tch::no_grad(|| model.forward_t(&input, false))?
    };

    let report = make_report(&input, &output);
    info!(
        "loss: {:.4}\taccuracy: {:.4}\tpredictions: [{}]",
        report.loss,
        report.accuracy,
        report.predictions.iter().join(", ")
    );

    if let Some(path) = &config.report_file {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, &report)?;
        info!("report written to {}", path.display());
    }

    if config.save_model {
        match &config.model_file {
            Some(path) => {
                vs.save(path)?;
                info!("model saved to {}", path.display());
            }
            None => warn!("save_model is set but model_file is missing, skip saving"),
        }
    }

    Ok(())
}

fn make_report(input: &ModelInput, output: &ModelOutput) -> Report {
    Report {
        loss: output.loss.double_value(&[]),
        accuracy: output.accuracy.double_value(&[]),
        lengths: Vec::<i64>::from(&input.lengths.to_kind(Kind::Int64).to_device(Device::Cpu)),
        targets: Vec::<i64>::from(&input.targets.to_kind(Kind::Int64).to_device(Device::Cpu)),
        predictions: Vec::<i64>::from(&output.predictions.to_device(Device::Cpu)),
    }
}
