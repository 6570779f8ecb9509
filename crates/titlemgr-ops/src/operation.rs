//! Operation descriptor types.

use std::io;

use serde::{Deserialize, Serialize};

use crate::DataOpBackend;

/// The kind of data operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum OperationKind {
    /// Transfer each item from source to destination.
    Copy,
    /// Delete each item.
    Delete,
}

/// Convert the length of an item list to an item count.
///
/// Operations address items with `u32` indices; longer lists are rejected
/// rather than truncated.
pub fn item_count(len: usize) -> io::Result<u32> {
    u32::try_from(len).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{len} items exceed the limit of {} per operation", u32::MAX),
        )
    })
}

/// A full description of one data operation: its kind, its fixed item set
/// and the backend that performs the work.
///
/// Item indices are `0..item_count` and are processed in ascending order.
pub struct OperationDescriptor<B> {
    kind: OperationKind,
    item_count: u32,
    copy_empty: bool,
    backend: B,
}

impl<B: DataOpBackend> OperationDescriptor<B> {
    /// Create a copy operation over `item_count` items.
    pub fn copy(item_count: u32, backend: B) -> Self {
        Self {
            kind: OperationKind::Copy,
            item_count,
            copy_empty: false,
            backend,
        }
    }

    /// Create a delete operation over `item_count` items.
    pub fn delete(item_count: u32, backend: B) -> Self {
        Self {
            kind: OperationKind::Delete,
            item_count,
            copy_empty: false,
            backend,
        }
    }

    /// Whether zero-length items are still created at the destination.
    pub fn with_copy_empty(mut self, copy_empty: bool) -> Self {
        self.copy_empty = copy_empty;
        self
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn item_count(&self) -> u32 {
        self.item_count
    }

    pub fn copy_empty(&self) -> bool {
        self.copy_empty
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Consume the descriptor, returning its backend.
    pub fn into_backend(self) -> B {
        self.backend
    }
}

impl<B> std::fmt::Debug for OperationDescriptor<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationDescriptor")
            .field("kind", &self.kind)
            .field("item_count", &self.item_count)
            .field("copy_empty", &self.copy_empty)
            .finish_non_exhaustive()
    }
}
