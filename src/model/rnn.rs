use super::{
    padding::Padding,
    param::{self, Param},
    params,
};
use crate::common::*;

// gate initializers

/// Initial values of one gate. Missing entries are initialized randomly.
#[derive(Debug, Default)]
pub struct GateInit {
    pub input_kernel: Option<Tensor>,
    pub hidden_kernel: Option<Tensor>,
    pub bias: Option<Tensor>,
}

impl GateInit {
    pub fn is_empty(&self) -> bool {
        self.input_kernel.is_none() && self.hidden_kernel.is_none() && self.bias.is_none()
    }
}

#[derive(Debug, Default)]
pub struct GruRcnInitializers {
    pub update: GateInit,
    pub reset: GateInit,
    pub candidate: GateInit,
}

// gru rcn cell

#[derive(Debug)]
pub struct GruRcnCellInit {
    pub in_channels: i64,
    pub height: i64,
    pub width: i64,
    pub nb_filter: i64,
    pub kernel_size: i64,
    pub hidden_kernel_size: i64,
    pub stride: i64,
    pub padding: Padding,
    pub initializers: GruRcnInitializers,
}

impl GruRcnCellInit {
    /// Cell over inputs of shape (channels, height, width) with "same" padding and stride 1.
    pub fn new(input_shape: [i64; 3], nb_filter: i64) -> Self {
        let [in_channels, height, width] = input_shape;

        Self {
            in_channels,
            height,
            width,
            nb_filter,
            kernel_size: params::RCN_KERNEL_SIZE,
            hidden_kernel_size: params::RCN_HIDDEN_KERNEL_SIZE,
            stride: 1,
            padding: Padding::Same,
            initializers: Default::default(),
        }
    }

    pub fn build<'p, P>(self, path: P) -> Fallible<GruRcnCell>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();

        let Self {
            in_channels,
            height,
            width,
            nb_filter,
            kernel_size,
            hidden_kernel_size,
            stride,
            padding,
            initializers,
        } = self;

        ensure!(
            in_channels > 0 && height > 0 && width > 0,
            "invalid input shape [{}, {}, {}]",
            in_channels,
            height,
            width
        );
        ensure!(nb_filter > 0, "nb_filter must be positive, got {}", nb_filter);
        ensure!(
            kernel_size > 0 && hidden_kernel_size > 0,
            "kernel sizes must be positive, got {} and {}",
            kernel_size,
            hidden_kernel_size
        );
        ensure!(stride > 0, "stride must be positive, got {}", stride);

        let out_height = padding.output_size(height, kernel_size, stride);
        let out_width = padding.output_size(width, kernel_size, stride);
        ensure!(
            out_height > 0 && out_width > 0,
            "{:?} padding with kernel size {} leaves no output for input {}x{}",
            padding,
            kernel_size,
            height,
            width
        );

        let GruRcnInitializers {
            update,
            reset,
            candidate,
        } = initializers;
        let gate_shape = GateShape {
            in_channels,
            nb_filter,
            kernel_size,
            hidden_kernel_size,
        };

        let update = ConvGate::new(path / "update", update, &gate_shape)?;
        let reset = ConvGate::new(path / "reset", reset, &gate_shape)?;
        let candidate = ConvGate::new(path / "candidate", candidate, &gate_shape)?;

        Ok(GruRcnCell {
            in_channels,
            in_height: height,
            in_width: width,
            nb_filter,
            out_height,
            out_width,
            stride,
            padding,
            update,
            reset,
            candidate,
            device: path.device(),
        })
    }
}

/// Convolutional analogue of a GRU cell.
///
/// Hidden states are channels-first tensors of shape
/// (batch, nb_filter, out_height, out_width). The input convolutions follow
/// the configured stride and padding, the hidden-to-hidden convolutions keep
/// the state shape with stride 1 and "same" padding.
#[derive(Debug)]
pub struct GruRcnCell {
    in_channels: i64,
    in_height: i64,
    in_width: i64,
    nb_filter: i64,
    out_height: i64,
    out_width: i64,
    stride: i64,
    padding: Padding,
    update: ConvGate,
    reset: ConvGate,
    candidate: ConvGate,
    device: Device,
}

impl GruRcnCell {
    pub fn input_shape(&self) -> [i64; 3] {
        [self.in_channels, self.in_height, self.in_width]
    }

    pub fn output_shape(&self, batch: i64) -> [i64; 4] {
        [batch, self.nb_filter, self.out_height, self.out_width]
    }

    pub fn zero_state(&self, batch: i64) -> Tensor {
        Tensor::zeros(&self.output_shape(batch), (Kind::Float, self.device))
    }

    pub fn step(&self, input: &Tensor, prev_state: &Tensor) -> Tensor {
        debug_assert_eq!(input.size()[1..], self.input_shape());
        debug_assert_eq!(prev_state.size()[1..], self.output_shape(0)[1..]);

        let update_gate = (self.input_conv(input, &self.update)
            + self.hidden_conv(prev_state, &self.update))
        .sigmoid();
        let reset_gate = (self.input_conv(input, &self.reset)
            + self.hidden_conv(prev_state, &self.reset))
        .sigmoid();
        let candidate = (self.input_conv(input, &self.candidate)
            + self.hidden_conv(&(reset_gate * prev_state), &self.candidate))
        .tanh();

        (1.0 - &update_gate) * prev_state + update_gate * candidate
    }

    fn input_conv(&self, input: &Tensor, gate: &ConvGate) -> Tensor {
        self.padding.conv2d(
            input,
            gate.input_kernel.tensor(),
            Some(gate.bias.tensor()),
            self.stride,
        )
    }

    fn hidden_conv(&self, state: &Tensor, gate: &ConvGate) -> Tensor {
        Padding::Same.conv2d(state, gate.hidden_kernel.tensor(), None, 1)
    }
}

// gate

#[derive(Debug, Clone, Copy)]
struct GateShape {
    in_channels: i64,
    nb_filter: i64,
    kernel_size: i64,
    hidden_kernel_size: i64,
}

#[derive(Debug)]
struct ConvGate {
    input_kernel: Param,
    hidden_kernel: Param,
    bias: Param,
}

impl ConvGate {
    fn new<'p, P>(path: P, init: GateInit, shape: &GateShape) -> Fallible<Self>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let device = path.device();
        let GateShape {
            in_channels,
            nb_filter,
            kernel_size,
            hidden_kernel_size,
        } = *shape;

        if !init.is_empty() {
            debug!(
                "gate initialized from given values (input kernel: {}, hidden kernel: {}, bias: {})",
                init.input_kernel.is_some(),
                init.hidden_kernel.is_some(),
                init.bias.is_some()
            );
        }

        let GateInit {
            input_kernel,
            hidden_kernel,
            bias,
        } = init;

        let input_kernel = init_or_else(
            input_kernel,
            &[nb_filter, in_channels, kernel_size, kernel_size],
            "input kernel",
            || param::random_kernel(nb_filter, in_channels, kernel_size, device),
        )?;
        let hidden_kernel = init_or_else(
            hidden_kernel,
            &[nb_filter, nb_filter, hidden_kernel_size, hidden_kernel_size],
            "hidden kernel",
            || param::random_kernel(nb_filter, nb_filter, hidden_kernel_size, device),
        )?;
        let bias = init_or_else(bias, &[nb_filter], "bias", || {
            param::constant_bias(nb_filter, device)
        })?;

        Ok(Self {
            input_kernel: Param::trainable(path, "input_kernel", &input_kernel),
            hidden_kernel: Param::trainable(path, "hidden_kernel", &hidden_kernel),
            bias: Param::trainable(path, "bias", &bias),
        })
    }
}

fn init_or_else<F>(init: Option<Tensor>, shape: &[i64], what: &str, default: F) -> Fallible<Tensor>
where
    F: FnOnce() -> Tensor,
{
    match init {
        Some(tensor) => {
            ensure!(
                tensor.size() == shape,
                "{} must have shape {:?}, got {:?}",
                what,
                shape,
                tensor.size()
            );
            Ok(tensor)
        }
        None => Ok(default()),
    }
}

// sequence driver

/// Hidden states of a full unroll.
#[derive(Debug)]
pub struct RcnOutput {
    /// States h_1..h_T stacked on a leading time axis, padded steps included.
    pub states: Tensor,
    /// h_T, the state after the full padded length.
    pub last_state: Tensor,
}

/// Unrolls `cell` over a (time, batch, channels, height, width) sequence.
///
/// Every example runs all T steps. Steps beyond an example's length are
/// computed and kept in `states`; use [`last_valid_frame`] to pick the state
/// at each example's final valid step.
pub fn dynamic_rcn(cell: &GruRcnCell, sequence: &Tensor, lengths: &Tensor) -> Fallible<RcnOutput> {
    let (seq_len, batch_size) = match sequence.size().as_slice() {
        &[seq_len, batch_size, channels, height, width] => {
            ensure!(
                [channels, height, width] == cell.input_shape(),
                "frame shape {:?} does not match cell input shape {:?}",
                [channels, height, width],
                cell.input_shape()
            );
            (seq_len, batch_size)
        }
        other => bail!(
            "expect a (time, batch, channels, height, width) sequence, got shape {:?}",
            other
        ),
    };
    check_lengths(lengths, seq_len, batch_size)?;
    debug!(
        "unroll {} steps over batch of {}, state shape {:?}",
        seq_len,
        batch_size,
        cell.output_shape(batch_size)
    );

    let mut state = cell.zero_state(batch_size);
    let states = (0..seq_len)
        .map(|step| {
            state = cell.step(&sequence.select(0, step), &state);
            state.shallow_clone()
        })
        .collect::<Vec<_>>();

    Ok(RcnOutput {
        states: Tensor::stack(&states, 0),
        last_state: state,
    })
}

/// Picks `states[lengths[i] - 1][i]` for every example `i`.
pub fn last_valid_frame(states: &Tensor, lengths: &Tensor) -> Fallible<Tensor> {
    let size = states.size();
    ensure!(
        size.len() >= 2,
        "expect states with leading (time, batch) axes, got shape {:?}",
        size
    );
    let (seq_len, batch_size) = (size[0], size[1]);
    let lengths = check_lengths(lengths, seq_len, batch_size)?;

    let device = states.device();
    let time_index = lengths.to_device(device) - 1;
    let batch_index = Tensor::arange(batch_size, (Kind::Int64, device));
    let flat_index = time_index * batch_size + batch_index;

    Ok(states
        .reshape(&fold_time_size(&size))
        .index_select(0, &flat_index))
}

/// Merges the leading (time, batch) axes of `size` into one.
pub(crate) fn fold_time_size(size: &[i64]) -> Vec<i64> {
    std::iter::once(size[0] * size[1])
        .chain(size[2..].iter().cloned())
        .collect()
}

/// Checks 1 <= length <= seq_len for a batch of lengths, returns them as Int64.
pub fn check_lengths(lengths: &Tensor, seq_len: i64, batch_size: i64) -> Fallible<Tensor> {
    ensure!(
        seq_len > 0 && batch_size > 0,
        "empty sequence batch ({} steps, {} examples)",
        seq_len,
        batch_size
    );
    ensure!(
        matches!(lengths.kind(), Kind::Int64 | Kind::Int),
        "sequence lengths must be integers, got {:?}",
        lengths.kind()
    );
    ensure!(
        lengths.size() == [batch_size],
        "expect {} sequence lengths, got shape {:?}",
        batch_size,
        lengths.size()
    );

    let lengths = lengths.to_kind(Kind::Int64);
    let min_len = lengths.min().int64_value(&[]);
    let max_len = lengths.max().int64_value(&[]);
    ensure!(
        min_len >= 1 && max_len <= seq_len,
        "sequence lengths must lie in [1, {}], got values in [{}, {}]",
        seq_len,
        min_len,
        max_len
    );

    Ok(lengths)
}
