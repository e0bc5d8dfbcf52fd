use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the conversion engine. Per-file problems during a
/// batch (hash failures, probe failures, transcode failures) are handled
/// where they occur and never reach the caller as an `Err`; only structural
/// problems do.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("path does not exist: {0:?}")]
    NotFound(PathBuf),

    #[error("invalid input {path:?}: {reason}")]
    InvalidInput { path: PathBuf, reason: String },

    #[error("unable to hash {path:?}: {source}")]
    Hash {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("duration probe failed for {path:?}: {reason}")]
    Probe { path: PathBuf, reason: String },

    #[error("transcode failed for {path:?}: {reason}")]
    Transcode { path: PathBuf, reason: String },

    #[error("ffmpeg binary {0:?} is not runnable")]
    FfmpegUnavailable(PathBuf),

    #[error("bad configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConvertError>;
