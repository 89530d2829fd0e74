//! Error taxonomy shared by every subcommand.
//!
//! Usage and configuration failures terminate before any work starts
//! (exit 1); I/O and index-corruption failures exit 2. Input failures are
//! per-record and never surface here; they are logged and skipped.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SigmerError>;

#[derive(Debug, Error)]
pub enum SigmerError {
    #[error("usage error: {0}")]
    Usage(String),

    #[error("invalid input at line {line} (id '{id}'): {msg}")]
    Input { line: usize, id: String, msg: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("index corrupted: {0}")]
    IndexCorrupt(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SigmerError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SigmerError::Io {
            path: path.into(),
            source,
        }
    }

    /// Process exit code mandated for this class of failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            SigmerError::Usage(_) | SigmerError::Config(_) => 1,
            SigmerError::Io { .. } | SigmerError::IndexCorrupt(_) => 2,
            SigmerError::Input { .. } | SigmerError::Internal(_) => 2,
        }
    }
}
