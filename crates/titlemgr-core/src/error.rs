//! Error types for data operations.

use std::path::PathBuf;

use thiserror::Error;

use crate::ItemStep;

/// Errors that can occur while building, dispatching or running a data operation.
#[derive(Debug, Error)]
pub enum DataOpError {
    /// A backend primitive failed for an item.
    #[error("Item {index}: {step} failed: {source}")]
    BackendIo {
        index: u32,
        step: ItemStep,
        #[source]
        source: std::io::Error,
    },

    /// The source ended before its reported size was read.
    #[error("Item {index}: source ended at offset {offset}, expected {expected} bytes")]
    ShortRead { index: u32, offset: u64, expected: u64 },

    /// The destination accepted no bytes.
    #[error("Item {index}: destination accepted no bytes at offset {offset}")]
    ShortWrite { index: u32, offset: u64 },

    /// The operation was cancelled by the caller.
    #[error("Operation cancelled")]
    Cancelled,

    /// The transfer buffer could not be allocated.
    #[error("Out of memory allocating {requested} bytes")]
    OutOfMemory { requested: usize },

    /// The worker thread could not be created.
    #[error("Failed to spawn worker thread: {source}")]
    ResourceExhausted {
        #[source]
        source: std::io::Error,
    },

    /// The worker thread panicked before finishing.
    #[error("Worker thread panicked")]
    WorkerPanicked,

    /// Invalid engine configuration.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl DataOpError {
    /// Wrap a backend I/O error with the item and step it happened in.
    pub fn backend(index: u32, step: ItemStep, source: std::io::Error) -> Self {
        Self::BackendIo {
            index,
            step,
            source,
        }
    }

    /// Whether this error is the user-initiated cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The item index the error is attached to, if any.
    pub fn index(&self) -> Option<u32> {
        match self {
            Self::BackendIo { index, .. }
            | Self::ShortRead { index, .. }
            | Self::ShortWrite { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// The underlying I/O error kind, if this wraps one.
    pub fn io_kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            Self::BackendIo { source, .. } | Self::ResourceExhausted { source } => {
                Some(source.kind())
            }
            _ => None,
        }
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[error("Failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A value failed validation.
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}
