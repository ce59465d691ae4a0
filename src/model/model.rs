use super::{
    padding::Padding,
    params,
    rnn::{self, GateInit, GruRcnCell, GruRcnCellInit, GruRcnInitializers},
    vgg::{self, ConvLayer, FcLayer},
};
use crate::{
    checkpoint::{self, PretrainedWeights},
    common::*,
    config::ModelConfig,
    objective,
};

// input type

#[derive(Debug, TensorLike)]
pub struct ModelInput {
    /// RGB pixels in [0, 255], shape (time, batch, height, width, 3).
    pub frames: Tensor,
    /// Valid frames per example, shape (batch,).
    pub lengths: Tensor,
    /// Target class per example, shape (batch,).
    pub targets: Tensor,
}

impl ModelInput {
    /// Loads a batch from a `.npz` or `.ot` archive with entries named
    /// `frames`, `lengths` and `targets`.
    ///
    /// Lengths and targets keep their stored kind and are validated by the
    /// forward pass.
    pub fn open<P>(path: P) -> Fallible<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let mut tensors = checkpoint::read_named_tensors(path)?
            .into_iter()
            .collect::<HashMap<_, _>>();
        let mut take = |name: &str| {
            tensors
                .remove(name)
                .ok_or_else(|| format_err!("{} is missing in {}", name, path.display()))
        };

        let input = Self {
            frames: take("frames")?.to_kind(Kind::Float),
            lengths: take("lengths")?,
            targets: take("targets")?,
        };
        debug!(
            "loaded input batch from {}, frames shape {:?}",
            path.display(),
            input.frames.size()
        );
        Ok(input)
    }
}

// output type

#[derive(Debug, TensorLike)]
pub struct ModelOutput {
    pub prob: Tensor,
    pub loss: Tensor,
    pub accuracy: Tensor,
    pub predictions: Tensor,
}

#[derive(Debug, Clone)]
pub struct RcnVgg16Init {
    pub frame_size: i64,
    pub num_classes: i64,
    pub rcn_kernel_size: i64,
    pub rcn_hidden_kernel_size: i64,
    pub dropout: f64,
}

impl RcnVgg16Init {
    pub fn new(num_classes: i64) -> Self {
        Self {
            frame_size: params::FRAME_SIZE,
            num_classes,
            rcn_kernel_size: params::RCN_KERNEL_SIZE,
            rcn_hidden_kernel_size: params::RCN_HIDDEN_KERNEL_SIZE,
            dropout: params::DROPOUT,
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        let ModelConfig {
            frame_size,
            num_classes,
            rcn_kernel_size,
            rcn_hidden_kernel_size,
            dropout,
        } = *config;

        Self {
            frame_size,
            num_classes,
            rcn_kernel_size,
            rcn_hidden_kernel_size,
            dropout,
        }
    }

    pub fn build<'p, P>(self, path: P, weights: &PretrainedWeights) -> Fallible<RcnVgg16>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();

        let Self {
            frame_size,
            num_classes,
            rcn_kernel_size,
            rcn_hidden_kernel_size,
            dropout,
        } = self;

        ensure!(
            frame_size >= params::MIN_FRAME_SIZE,
            "frame size must be at least {}, got {}",
            params::MIN_FRAME_SIZE,
            frame_size
        );
        ensure!(num_classes > 0, "num_classes must be positive, got {}", num_classes);
        ensure!(
            (0.0..1.0).contains(&dropout),
            "dropout must lie in [0, 1), got {}",
            dropout
        );

        let conv = |name: &str, in_channels, out_channels| {
            ConvLayer::new(path, name, in_channels, out_channels, weights)
        };
        let rcn = |name: &str, input_shape, nb_filter| {
            rcn_layer(
                path,
                name,
                input_shape,
                nb_filter,
                rcn_kernel_size,
                rcn_hidden_kernel_size,
                weights,
            )
        };
        let pooled = |size| Padding::Same.output_size(size, params::POOL_SIZE, params::POOL_SIZE);

        let conv1_1 = conv("conv1_1", params::FRAME_CHANNELS, 64)?;
        let conv1_2 = conv("conv1_2", 64, 64)?;

        let conv2_1 = conv("conv2_1", 64, 128)?;
        let conv2_2 = conv("conv2_2", 128, 128)?;

        let conv3_1 = conv("conv3_1", 128, 256)?;
        let conv3_2 = conv("conv3_2", 256, 256)?;
        let conv3_3 = conv("conv3_3", 256, 256)?;

        let size3 = pooled(pooled(pooled(frame_size)));
        let rcn4_1 = rcn("rcn4_1", [256, size3, size3], 512)?;
        let conv4_2 = conv("conv4_2", 512, 512)?;
        let conv4_3 = conv("conv4_3", 512, 512)?;

        let size4 = pooled(size3);
        let rcn5_1 = rcn("rcn5_1", [512, size4, size4], 512)?;
        let conv5_2 = conv("conv5_2", 512, 512)?;
        let conv5_3 = conv("conv5_3", 512, 512)?;

        let size5 = pooled(size4);
        let fc6 = FcLayer::new(
            path,
            "fc6",
            size5 * size5 * 512,
            params::FC_CHANNELS,
            weights,
        )?;
        let fc_end = FcLayer::new(path, "fc_end", params::FC_CHANNELS, num_classes, weights)?;

        let convs = [
            &conv1_1, &conv1_2, &conv2_1, &conv2_2, &conv3_1, &conv3_2, &conv3_3, &conv4_2,
            &conv4_3, &conv5_2, &conv5_3,
        ];
        info!(
            "{} of {} conv layers frozen from checkpoint",
            convs.iter().filter(|layer| layer.is_frozen()).count(),
            convs.len()
        );

        Ok(RcnVgg16 {
            frame_size,
            num_classes,
            dropout,
            conv1_1,
            conv1_2,
            conv2_1,
            conv2_2,
            conv3_1,
            conv3_2,
            conv3_3,
            rcn4_1,
            conv4_2,
            conv4_3,
            rcn5_1,
            conv5_2,
            conv5_3,
            fc6,
            fc_end,
        })
    }
}

/// VGG16 whose conv4_1 and conv5_1 are replaced by recurrent convolutions.
#[derive(Debug)]
pub struct RcnVgg16 {
    frame_size: i64,
    num_classes: i64,
    dropout: f64,
    conv1_1: ConvLayer,
    conv1_2: ConvLayer,
    conv2_1: ConvLayer,
    conv2_2: ConvLayer,
    conv3_1: ConvLayer,
    conv3_2: ConvLayer,
    conv3_3: ConvLayer,
    rcn4_1: GruRcnCell,
    conv4_2: ConvLayer,
    conv4_3: ConvLayer,
    rcn5_1: GruRcnCell,
    conv5_2: ConvLayer,
    conv5_3: ConvLayer,
    fc6: FcLayer,
    fc_end: FcLayer,
}

impl RcnVgg16 {
    pub fn frame_size(&self) -> i64 {
        self.frame_size
    }

    pub fn num_classes(&self) -> i64 {
        self.num_classes
    }

    pub fn forward_t(&self, input: &ModelInput, train: bool) -> Fallible<ModelOutput> {
        let ModelInput {
            frames,
            lengths,
            targets,
        } = input;

        // get sizes and sanity check
        let (seq_len, batch_size) = match frames.size().as_slice() {
            &[seq_len, batch_size, height, width, channels] => {
                ensure!(
                    height == self.frame_size
                        && width == self.frame_size
                        && channels == params::FRAME_CHANNELS,
                    "expect {}x{}x{} frames, got {}x{}x{}",
                    self.frame_size,
                    self.frame_size,
                    params::FRAME_CHANNELS,
                    height,
                    width,
                    channels
                );
                (seq_len, batch_size)
            }
            other => bail!(
                "expect (time, batch, height, width, channels) frames, got shape {:?}",
                other
            ),
        };
        rnn::check_lengths(lengths, seq_len, batch_size)?;
        ensure!(
            targets.size() == [batch_size],
            "expect {} target classes, got shape {:?}",
            batch_size,
            targets.size()
        );
        debug!(
            "forward {} sequences of {} frames, train: {}",
            batch_size, seq_len, train
        );

        // RGB to mean-centered BGR, channels first
        let bgr = {
            let mean = Tensor::of_slice(&params::VGG_MEAN).to_device(frames.device());
            (frames.to_kind(Kind::Float).flip(&[4]) - mean).permute(&[0, 1, 4, 2, 3])
        };

        let pool3 = vgg::map_frames(&bgr, |frames| {
            let net = self.conv1_2.forward(&self.conv1_1.forward(frames));
            let net = vgg::max_pool(&net);
            let net = self.conv2_2.forward(&self.conv2_1.forward(&net));
            let net = vgg::max_pool(&net);
            let net = self.conv3_1.forward(&net);
            let net = self.conv3_3.forward(&self.conv3_2.forward(&net));
            vgg::max_pool(&net)
        });

        let rcn4 = rnn::dynamic_rcn(&self.rcn4_1, &pool3, lengths)?.states;
        let pool4 = vgg::map_frames(&rcn4, |frames| {
            let net = self.conv4_3.forward(&self.conv4_2.forward(frames));
            vgg::max_pool(&net)
        });

        let rcn5 = rnn::dynamic_rcn(&self.rcn5_1, &pool4, lengths)?.states;
        let last_frame = rnn::last_valid_frame(&rcn5, lengths)?;
        let pool5 = {
            let net = self.conv5_3.forward(&self.conv5_2.forward(&last_frame));
            vgg::max_pool(&net)
        };

        // flatten in (height, width, channels) order to match channels-last checkpoints
        let flat = pool5.permute(&[0, 2, 3, 1]).reshape(&[batch_size, -1]);
        let fc6 = self
            .fc6
            .forward(&flat)
            .relu()
            .dropout(self.dropout, train);
        let logits = self.fc_end.forward(&fc6);
        let prob = logits.softmax(-1, Kind::Float);

        let loss = objective::cross_entropy(&prob, targets)?;
        let accuracy = objective::accuracy(&prob, targets)?;
        let predictions = objective::predictions(&prob);

        Ok(ModelOutput {
            prob,
            loss,
            accuracy,
            predictions,
        })
    }
}

fn rcn_layer<'p, P>(
    path: P,
    name: &str,
    input_shape: [i64; 3],
    nb_filter: i64,
    kernel_size: i64,
    hidden_kernel_size: i64,
    weights: &PretrainedWeights,
) -> Fallible<GruRcnCell>
where
    P: Borrow<nn::Path<'p>>,
{
    let path = path.borrow();

    // rcnN_1 takes the place of convN_1 in the plain network
    let conv_name = name.replacen("rcn", "conv", 1);
    let candidate = match weights.get(&conv_name) {
        Some(layer) => {
            info!("{}: candidate gate initialized from {}", name, conv_name);
            GateInit {
                input_kernel: Some(layer.kernel.shallow_clone()),
                hidden_kernel: None,
                bias: Some(layer.bias.shallow_clone()),
            }
        }
        None => {
            info!("{}: no pretrained {}, randomly initialized", name, conv_name);
            GateInit::default()
        }
    };

    GruRcnCellInit {
        kernel_size,
        hidden_kernel_size,
        initializers: GruRcnInitializers {
            candidate,
            ..Default::default()
        },
        ..GruRcnCellInit::new(input_shape, nb_filter)
    }
    .build(path / name)
    .map_err(|err| format_err!("{}: {}", name, err))
}
