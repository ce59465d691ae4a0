// input frames
pub const FRAME_SIZE: i64 = 224;
pub const FRAME_CHANNELS: i64 = 3;
pub const VGG_MEAN: [f32; 3] = [103.939, 116.779, 123.68]; // BGR order

// classifier head
pub const NUM_CLASSES: i64 = 10;
pub const FC_CHANNELS: i64 = 4096;
pub const DROPOUT: f64 = 0.5;

// recurrent convolution
pub const RCN_KERNEL_SIZE: i64 = 3;
pub const RCN_HIDDEN_KERNEL_SIZE: i64 = 3;

// vgg convolution and pooling
pub const CONV_KERNEL_SIZE: i64 = 3;
pub const POOL_SIZE: i64 = 2;
pub const MIN_FRAME_SIZE: i64 = 32; // five 2x2 poolings must leave at least one pixel

// random initialization
pub const INIT_STDDEV: f64 = 0.01;
pub const INIT_BIAS: f64 = 1.0;
