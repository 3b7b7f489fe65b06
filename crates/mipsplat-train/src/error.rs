//! Error types for filtering and density control

use mipsplat_data::SplatError;
use thiserror::Error;

/// Result type for training-side operations
pub type TrainResult<T> = Result<T, TrainError>;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("no viewpoints supplied")]
    NoViewpoints,

    #[error("none of the {0} splats is visible from any viewpoint")]
    NoVisibleSplats(usize),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] SplatError),
}
