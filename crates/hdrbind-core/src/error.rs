//! Error types for hdrbind
//!
//! Only run-fatal conditions are errors. Everything that degrades a single
//! header or declaration is a [`Diagnostic`](crate::Diagnostic) instead.

use std::path::PathBuf;
use thiserror::Error;

/// hdrbind error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot read {}: {source}", path.display())]
    FatalIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("No include search paths were provided")]
    NoSearchPaths,

    #[error("Duplicate symbol `{name}`: defined in {first} and again in {second}")]
    DuplicateSymbol {
        name: String,
        first: String,
        second: String,
    },

    #[error("Unknown architecture: {0}")]
    UnknownArchitecture(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap an IO failure on a path that the run cannot continue without
    pub fn fatal_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::FatalIo {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for hdrbind
pub type Result<T> = std::result::Result<T, Error>;
