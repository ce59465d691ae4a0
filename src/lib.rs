pub mod checkpoint;
pub mod common;
pub mod config;
pub mod model;
pub mod objective;
