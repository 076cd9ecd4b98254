use std::io;

use tch::TchError;
use thiserror::Error;

/// Main library error type.
#[derive(Error, Debug)]
pub enum FaceError {
    /// The IR backbone only exists in 50, 100 and 152 layer variants.
    #[error("unsupported backbone depth {0}, expected 50, 100 or 152")]
    UnsupportedDepth(i64),

    /// Unknown bottleneck flavour.
    #[error("unknown backbone mode {0:?}, expected \"ir\" or \"ir_se\"")]
    UnknownMode(String),

    /// Invalid input shape.
    #[error("invalid shape: {0}")]
    Shape(String),

    /// Tensor kind error.
    #[error("tensor kind error: {0}")]
    Kind(String),

    /// A stage index outside of the model.
    #[error("stage {stage} out of range, the model has {count} stages")]
    StageOutOfRange { stage: i64, count: usize },

    /// Invalid configuration value.
    #[error("invalid config: {0}")]
    Config(String),

    /// Errors returned by tch/libtorch.
    #[error(transparent)]
    Torch(#[from] TchError),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Config (de)serialization error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FaceError>;
