use crate::common::*;

/// Padding rule of a strided convolution.
///
/// `Same` pads so that the output spatial size is `ceil(input / stride)`,
/// putting the odd pixel of padding at the bottom/right. `Valid` applies no
/// padding and only keeps windows that fully overlap the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Padding {
    Same,
    Valid,
}

impl Default for Padding {
    fn default() -> Self {
        Padding::Same
    }
}

impl Padding {
    /// Output length along one spatial axis. Non-positive means no window fits.
    pub fn output_size(&self, input: i64, kernel: i64, stride: i64) -> i64 {
        match self {
            Padding::Same => (input + stride - 1) / stride,
            Padding::Valid => {
                if input < kernel {
                    0
                } else {
                    (input - kernel) / stride + 1
                }
            }
        }
    }

    /// Zero padding (before, after) along one spatial axis.
    pub fn pads(&self, input: i64, kernel: i64, stride: i64) -> (i64, i64) {
        match self {
            Padding::Same => {
                let output = self.output_size(input, kernel, stride);
                let total = ((output - 1) * stride + kernel - input).max(0);
                (total / 2, total - total / 2)
            }
            Padding::Valid => (0, 0),
        }
    }

    /// 2-D convolution over a channels-first batch following this padding rule.
    ///
    /// Both `input` and `kernel` must be 4-D; callers check shapes beforehand.
    pub(crate) fn conv2d(
        &self,
        input: &Tensor,
        kernel: &Tensor,
        bias: Option<&Tensor>,
        stride: i64,
    ) -> Tensor {
        let (height, width) = match input.size().as_slice() {
            &[_, _, height, width] => (height, width),
            other => panic!("expect a 4-D input, got shape {:?}", other),
        };
        let (kernel_height, kernel_width) = match kernel.size().as_slice() {
            &[_, _, kernel_height, kernel_width] => (kernel_height, kernel_width),
            other => panic!("expect a 4-D kernel, got shape {:?}", other),
        };
        let (top, bottom) = self.pads(height, kernel_height, stride);
        let (left, right) = self.pads(width, kernel_width, stride);

        if top == bottom && left == right {
            input.conv2d(kernel, bias, &[stride, stride], &[top, left], &[1, 1], 1)
        } else {
            input
                .constant_pad_nd(&[left, right, top, bottom])
                .conv2d(kernel, bias, &[stride, stride], &[0, 0], &[1, 1], 1)
        }
    }
}
