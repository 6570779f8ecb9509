//! Error types for content store operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while reading or modifying the content store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O error with path context.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The data is not a ticket this store understands.
    #[error("Invalid ticket: {reason}")]
    InvalidTicket { reason: String },

    /// The requested record does not exist.
    #[error("{what} not found")]
    NotFound { what: String },

    /// More records than one operation can address.
    #[error("Too many items for one operation: {count}")]
    TooManyItems { count: usize },
}

impl StoreError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            return Self::NotFound {
                what: path.display().to_string(),
            };
        }
        Self::Io { path, source }
    }

    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub(crate) fn invalid_ticket(reason: impl Into<String>) -> Self {
        Self::InvalidTicket {
            reason: reason.into(),
        }
    }
}

impl From<StoreError> for io::Error {
    fn from(err: StoreError) -> Self {
        let kind = match &err {
            StoreError::Io { source, .. } => source.kind(),
            StoreError::InvalidTicket { .. } => io::ErrorKind::InvalidData,
            StoreError::NotFound { .. } => io::ErrorKind::NotFound,
            StoreError::TooManyItems { .. } => io::ErrorKind::InvalidInput,
        };
        io::Error::new(kind, err)
    }
}
