use std::{io, path::Path};

use arrow::error::ArrowError;
use parquet::errors::ParquetError;
use thiserror::Error;

/// Result type shared across sweepstore operations.
pub type SweepResult<T> = Result<T, SweepError>;

/// Errors surfaced by sweep storage, chunking and consolidation.
///
/// Validation variants (`Shape`, `Schema`, `SchemaMismatch`, `KeyExists`,
/// `KeyNotFound`) are always raised before anything is written, so the
/// target table is left in its pre-call state.
#[derive(Debug, Error)]
pub enum SweepError {
    /// An index array has no length or a data block has the wrong shape.
    #[error("shape error: {0}")]
    Shape(String),
    /// Column names are inconsistent with the values they describe.
    #[error("schema error: {0}")]
    Schema(String),
    /// The existing table under `key` has an incompatible column schema.
    #[error("schema mismatch for key `{key}`: {reason}")]
    SchemaMismatch {
        /// Table or dictionary key.
        key: String,
        /// What differs.
        reason: String,
    },
    /// Create was requested but the key is already present.
    #[error("key `{key}` already exists")]
    KeyExists {
        /// Table or dictionary key.
        key: String,
    },
    /// The key is not present in the container file.
    #[error("key `{key}` does not exist, available keys: {available:?}")]
    KeyNotFound {
        /// Requested key.
        key: String,
        /// Keys present in the container.
        available: Vec<String>,
    },
    /// File or directory access failed.
    #[error("io error: failed to {context}: {source}")]
    Io {
        /// Action and path that failed.
        context: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// A container file holds bytes that cannot be decoded.
    #[error("container is corrupt: {0}")]
    Corrupt(String),
    /// The series state file could not be encoded or decoded.
    #[error("series state error: {0}")]
    State(#[from] serde_json::Error),
    /// Arrow encoding or kernel failure.
    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),
    /// Parquet export failure.
    #[error("parquet error: {0}")]
    Parquet(#[from] ParquetError),
}

impl SweepError {
    pub(crate) fn mismatch(key: &str, reason: impl Into<String>) -> Self {
        SweepError::SchemaMismatch {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Build a closure mapping an [`io::Error`] to [`SweepError::Io`] for `action` on `path`.
pub(crate) fn io_err<'a>(action: &'a str, path: &'a Path) -> impl FnOnce(io::Error) -> SweepError + 'a {
    move |source| SweepError::Io {
        context: format!("{action} {}", path.display()),
        source,
    }
}
