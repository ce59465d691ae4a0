use super::params;
use crate::common::*;

/// erf(sqrt(2)), the probability mass of a standard normal within two standard deviations.
const TWO_SIGMA_MASS: f64 = 0.954_499_736_103_641_6;

/// A model parameter, either updated by the optimizer or fixed at construction.
#[derive(Debug)]
pub enum Param {
    /// Registered in the var store, receives gradients.
    Trainable(Tensor),
    /// Kept outside of the var store, never receives gradients.
    Frozen(Tensor),
}

impl Param {
    pub fn trainable<'p, P>(path: P, name: &str, init: &Tensor) -> Param
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        Param::Trainable(path.var_copy(name, &init.to_kind(Kind::Float)))
    }

    pub fn frozen<'p, P>(path: P, init: &Tensor) -> Param
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let tensor = init
            .to_kind(Kind::Float)
            .to_device(path.device())
            .detach()
            .set_requires_grad(false);
        Param::Frozen(tensor)
    }

    pub fn tensor(&self) -> &Tensor {
        match self {
            Param::Trainable(tensor) => tensor,
            Param::Frozen(tensor) => tensor,
        }
    }

    pub fn is_trainable(&self) -> bool {
        matches!(self, Param::Trainable(_))
    }
}

/// Samples a normal distribution truncated to two standard deviations around the mean.
pub fn truncated_normal(dims: &[i64], mean: f64, stddev: f64, device: Device) -> Tensor {
    // inverse CDF of a uniform sample restricted to the central 2-sigma mass
    Tensor::empty(dims, (Kind::Float, device))
        .uniform_(-TWO_SIGMA_MASS, TWO_SIGMA_MASS)
        .erfinv()
        * (std::f64::consts::SQRT_2 * stddev)
        + mean
}

/// Random convolution kernel in output-channels-first layout.
pub fn random_kernel(
    out_channels: i64,
    in_channels: i64,
    kernel_size: i64,
    device: Device,
) -> Tensor {
    truncated_normal(
        &[out_channels, in_channels, kernel_size, kernel_size],
        0.0,
        params::INIT_STDDEV,
        device,
    )
}

pub fn constant_bias(channels: i64, device: Device) -> Tensor {
    Tensor::ones(&[channels], (Kind::Float, device)) * params::INIT_BIAS
}
