use super::{
    padding::Padding,
    param::{self, Param},
    params, rnn,
};
use crate::{checkpoint::PretrainedWeights, common::*};

/// 3x3 "same" convolution followed by bias and ReLU.
///
/// Layers found in the checkpoint are frozen, the others are trainable and
/// randomly initialized.
#[derive(Debug)]
pub struct ConvLayer {
    kernel: Param,
    bias: Param,
}

impl ConvLayer {
    pub fn new<'p, P>(
        path: P,
        name: &str,
        in_channels: i64,
        out_channels: i64,
        weights: &PretrainedWeights,
    ) -> Fallible<Self>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let kernel_size = params::CONV_KERNEL_SIZE;

        let (kernel, bias) = match weights.get(name) {
            Some(layer) => {
                check_shape(
                    name,
                    &layer.kernel,
                    &[out_channels, in_channels, kernel_size, kernel_size],
                )?;
                check_shape(name, &layer.bias, &[out_channels])?;
                info!("{}: frozen, loaded from checkpoint", name);
                (
                    Param::frozen(path, &layer.kernel),
                    Param::frozen(path, &layer.bias),
                )
            }
            None => {
                info!("{}: trainable, randomly initialized", name);
                let device = path.device();
                let path = path / name;
                (
                    Param::trainable(
                        &path,
                        "filters",
                        &param::random_kernel(out_channels, in_channels, kernel_size, device),
                    ),
                    Param::trainable(
                        &path,
                        "biases",
                        &param::constant_bias(out_channels, device),
                    ),
                )
            }
        };

        Ok(Self { kernel, bias })
    }

    pub fn is_frozen(&self) -> bool {
        !self.kernel.is_trainable()
    }

    /// Expects a (batch, channels, height, width) input.
    pub(crate) fn forward(&self, input: &Tensor) -> Tensor {
        Padding::Same
            .conv2d(input, self.kernel.tensor(), Some(self.bias.tensor()), 1)
            .relu()
    }
}

/// Dense layer, always trainable. Starts from checkpoint values when present.
#[derive(Debug)]
pub struct FcLayer {
    weight: Param,
    bias: Param,
}

impl FcLayer {
    pub fn new<'p, P>(
        path: P,
        name: &str,
        in_size: i64,
        out_size: i64,
        weights: &PretrainedWeights,
    ) -> Fallible<Self>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let device = path.device();

        let (weight, bias) = match weights.get(name) {
            Some(layer) => {
                check_shape(name, &layer.kernel, &[out_size, in_size])?;
                check_shape(name, &layer.bias, &[out_size])?;
                info!("{}: trainable, loaded from checkpoint", name);
                (layer.kernel.shallow_clone(), layer.bias.shallow_clone())
            }
            None => {
                info!("{}: trainable, randomly initialized", name);
                (
                    param::truncated_normal(&[out_size, in_size], 0.0, params::INIT_STDDEV, device),
                    param::constant_bias(out_size, device),
                )
            }
        };

        let path = path / name;
        Ok(Self {
            weight: Param::trainable(&path, "weights", &weight),
            bias: Param::trainable(&path, "biases", &bias),
        })
    }

    pub(crate) fn forward(&self, input: &Tensor) -> Tensor {
        input.matmul(&self.weight.tensor().transpose(0, 1)) + self.bias.tensor()
    }
}

/// 2x2 max pooling with stride 2 and "same" padding.
pub(crate) fn max_pool(input: &Tensor) -> Tensor {
    let size = params::POOL_SIZE;
    input.max_pool2d(&[size, size], &[size, size], &[0, 0], &[1, 1], true)
}

/// Runs a per-frame network over a (time, batch, ...) sequence in a single
/// batched call by folding time into the batch axis. The sequence must have
/// at least two axes.
pub(crate) fn map_frames<F>(sequence: &Tensor, f: F) -> Tensor
where
    F: FnOnce(&Tensor) -> Tensor,
{
    let size = sequence.size();
    let (seq_len, batch_size) = (size[0], size[1]);

    let output = f(&sequence.reshape(&rnn::fold_time_size(&size)));

    let output_size = [seq_len, batch_size]
        .iter()
        .chain(output.size()[1..].iter())
        .cloned()
        .collect::<Vec<_>>();
    output.reshape(&output_size)
}

fn check_shape(layer: &str, tensor: &Tensor, expect: &[i64]) -> Fallible<()> {
    ensure!(
        tensor.size() == expect,
        "checkpoint layer {} has shape {:?}, expect {:?}",
        layer,
        tensor.size(),
        expect
    );
    Ok(())
}
