use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of every failure the pipeline can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AccessDenied,
    NotFound,
    IoFailure,
    CacheCorrupt,
    PreconditionFailed,
    InvalidArgument,
}

impl ErrorKind {
    pub fn from_io(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::PermissionDenied => ErrorKind::AccessDenied,
            io::ErrorKind::NotFound => ErrorKind::NotFound,
            _ => ErrorKind::IoFailure,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AccessDenied => "access denied",
            ErrorKind::NotFound => "not found",
            ErrorKind::IoFailure => "I/O failure",
            ErrorKind::CacheCorrupt => "cache corrupt",
            ErrorKind::PreconditionFailed => "precondition failed",
            ErrorKind::InvalidArgument => "invalid argument",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Permission denied: {path}")]
    AccessDenied { path: PathBuf, source: io::Error },

    #[error("Not found: {path}")]
    NotFound { path: PathBuf },

    #[error("I/O error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("Corrupt data in {path}: {reason}")]
    CacheCorrupt { path: PathBuf, reason: String },

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Operation {0} not found")]
    OperationNotFound(u64),

    #[error("Batch {0} not found")]
    BatchNotFound(u64),

    #[error("Operation {0} already undone")]
    AlreadyUndone(u64),

    #[error("Operation {0} cannot be undone")]
    NotUndoable(u64),
}

impl Error {
    /// Wrap an I/O error observed on `path`, classifying it by its `io::ErrorKind`.
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        match source.kind() {
            io::ErrorKind::PermissionDenied => Error::AccessDenied { path, source },
            io::ErrorKind::NotFound => Error::NotFound { path },
            _ => Error::Io { path, source },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::AccessDenied { .. } => ErrorKind::AccessDenied,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Io { .. } => ErrorKind::IoFailure,
            Error::CacheCorrupt { .. } => ErrorKind::CacheCorrupt,
            Error::PreconditionFailed(_)
            | Error::AlreadyUndone(_)
            | Error::NotUndoable(_) => ErrorKind::PreconditionFailed,
            Error::InvalidArgument(_) | Error::OperationNotFound(_) | Error::BatchNotFound(_) => {
                ErrorKind::InvalidArgument
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
