use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VisualizerError {
    #[error("failed to launch analyzer {}: {source}", .path.display())]
    Launch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("analyzer stream closed")]
    StreamClosed,

    #[error("decoder thread did not exit within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("render failed: {0}")]
    Render(#[from] anyhow::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Why a single analyzer line was discarded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("empty line")]
    Empty,

    #[error("line does not end with the field separator")]
    MissingTerminator,

    #[error("token {index} is not a number: {token:?}")]
    InvalidToken { index: usize, token: String },

    #[error("token {index} is NaN")]
    NotANumber { index: usize },

    #[error("line is not valid UTF-8")]
    NotUtf8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("bin count changed from {expected} to {actual}")]
pub struct BinCountMismatch {
    pub expected: usize,
    pub actual: usize,
}
