//! Error types for PrefStore operations
//!
//! Every failure surfaces as a `StoreError`. Validation errors are raised
//! before any mutation; storage errors are raised after the committed state
//! has been left untouched.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// PrefStore error types with context for logging and host reporting
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Key is missing, empty, too long, or malformed inside a batch entry
    #[error("invalid key: {reason}")]
    InvalidKey {
        /// What was wrong with the key, including batch position when known
        reason: String,
    },

    /// Value is missing where one is required, too long, or a batch entry
    /// has the wrong arity
    #[error("invalid value: {reason}")]
    InvalidValue {
        /// What was wrong with the value, including batch position when known
        reason: String,
    },

    /// Backing medium could not be read or written. The operation had no effect.
    #[error("storage unavailable{}: {message} ({kind})", location(.path))]
    StorageUnavailable {
        /// Backing file involved, if any
        path: Option<PathBuf>,
        /// Underlying I/O error kind
        kind: io::ErrorKind,
        /// Original diagnostic text
        message: String,
    },

    /// Backing medium holds data that cannot be parsed
    #[error("storage corrupt{} at offset {offset}: {reason}", location(.path))]
    StorageCorrupt {
        /// Backing file involved, if any
        path: Option<PathBuf>,
        /// Byte offset where parsing failed
        offset: u64,
        /// Description of the corruption
        reason: String,
    },

    /// Configuration rejected by `Config::validate`
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Namespace name cannot be mapped to a backing file
    #[error("invalid namespace {0:?}")]
    InvalidNamespace(String),
}

fn location(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => format!(" in {}", path.display()),
        None => String::new(),
    }
}

impl StoreError {
    pub(crate) fn invalid_key(reason: impl Into<String>) -> Self {
        StoreError::InvalidKey { reason: reason.into() }
    }

    pub(crate) fn invalid_value(reason: impl Into<String>) -> Self {
        StoreError::InvalidValue { reason: reason.into() }
    }

    pub(crate) fn corrupt(offset: u64, reason: impl Into<String>) -> Self {
        StoreError::StorageCorrupt { path: None, offset, reason: reason.into() }
    }

    /// Wrap an I/O failure on `path` with a short description of the step.
    pub(crate) fn io_at(path: &Path, step: &str, err: &io::Error) -> Self {
        StoreError::StorageUnavailable {
            path: Some(path.to_path_buf()),
            kind: err.kind(),
            message: format!("{}: {}", step, err),
        }
    }

    /// Wrap a failure that has no better classification.
    pub fn unclassified(message: impl Into<String>) -> Self {
        StoreError::StorageUnavailable {
            path: None,
            kind: io::ErrorKind::Other,
            message: message.into(),
        }
    }

    /// Attach the backing file path to storage errors that lack one.
    pub(crate) fn with_path(self, at: Option<&Path>) -> Self {
        match (self, at) {
            (StoreError::StorageUnavailable { path: None, kind, message }, Some(p)) => {
                StoreError::StorageUnavailable { path: Some(p.to_path_buf()), kind, message }
            }
            (StoreError::StorageCorrupt { path: None, offset, reason }, Some(p)) => {
                StoreError::StorageCorrupt { path: Some(p.to_path_buf()), offset, reason }
            }
            (err, _) => err,
        }
    }

    /// Stable identifier for reporting the error across a host boundary.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::InvalidKey { .. } => "INVALID_KEY",
            StoreError::InvalidValue { .. } => "INVALID_VALUE",
            StoreError::StorageUnavailable { .. } => "STORAGE_UNAVAILABLE",
            StoreError::StorageCorrupt { .. } => "STORAGE_CORRUPT",
            StoreError::InvalidConfig(_) => "INVALID_CONFIG",
            StoreError::InvalidNamespace(_) => "INVALID_NAMESPACE",
        }
    }

    /// True for errors raised before any mutation was attempted.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidKey { .. }
                | StoreError::InvalidValue { .. }
                | StoreError::InvalidConfig(_)
                | StoreError::InvalidNamespace(_)
        )
    }
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        StoreError::StorageUnavailable {
            path: None,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for PrefStore operations
pub type StoreResult<T> = Result<T, StoreError>;
