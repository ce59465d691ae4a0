mod model;
pub mod padding;
pub mod param;
pub mod params;
pub mod rnn;
pub(crate) mod vgg;

pub use model::{ModelInput, ModelOutput, RcnVgg16, RcnVgg16Init};
pub use padding::Padding;
pub use rnn::{
    dynamic_rcn, last_valid_frame, GateInit, GruRcnCell, GruRcnCellInit, GruRcnInitializers,
    RcnOutput,
};
