//! Progress reporting types for data operations.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use titlemgr_core::DataOpError;

use crate::{OperationDescriptor, OperationKind};

/// Shared progress of a running operation.
///
/// The worker is the only writer; any number of threads may read. Every
/// field is independently atomic, so a reader may see a slightly stale but
/// never torn value. `finished` is stored last.
#[derive(Debug, Default)]
pub struct ProgressRecord {
    processed: AtomicU32,
    total: AtomicU32,
    failed: AtomicU32,
    current_processed: AtomicU64,
    current_total: AtomicU64,
    finished: AtomicBool,
    premature_stop: AtomicBool,
}

impl ProgressRecord {
    /// Create a record for an operation over `total` items.
    pub fn new(total: u32) -> Self {
        Self {
            total: AtomicU32::new(total),
            ..Default::default()
        }
    }

    /// Take a point-in-time copy of every field.
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            processed: self.processed.load(Ordering::Acquire),
            total: self.total.load(Ordering::Acquire),
            failed: self.failed.load(Ordering::Acquire),
            current_processed: self.current_processed.load(Ordering::Acquire),
            current_total: self.current_total.load(Ordering::Acquire),
            finished: self.finished.load(Ordering::Acquire),
            premature_stop: self.premature_stop.load(Ordering::Acquire),
        }
    }

    /// Whether the worker has finished, cleanly or not.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub(crate) fn begin_item(&self) {
        self.current_processed.store(0, Ordering::Release);
        self.current_total.store(0, Ordering::Release);
    }

    pub(crate) fn set_current_total(&self, bytes: u64) {
        self.current_total.store(bytes, Ordering::Release);
    }

    pub(crate) fn set_current_processed(&self, bytes: u64) {
        self.current_processed.store(bytes, Ordering::Release);
    }

    pub(crate) fn complete_item(&self) {
        self.processed.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::AcqRel);
    }

    /// Mark the operation finished. Only the first call has any effect.
    pub(crate) fn finish(&self, premature: bool) {
        if self.finished.load(Ordering::Acquire) {
            return;
        }
        self.premature_stop.store(premature, Ordering::Release);
        self.finished.store(true, Ordering::Release);
    }
}

/// A plain copy of a [`ProgressRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Items processed so far, including skipped ones.
    pub processed: u32,
    /// Items in the operation.
    pub total: u32,
    /// Items that failed and were handed to the error policy.
    pub failed: u32,
    /// Bytes transferred for the current item.
    pub current_processed: u64,
    /// Size of the current item (0 if unknown or not a transfer).
    pub current_total: u64,
    /// The worker has stopped.
    pub finished: bool,
    /// The worker stopped before processing every item.
    pub premature_stop: bool,
}

impl ProgressSnapshot {
    /// Fraction of the current item transferred, in `0.0..=1.0`.
    pub fn fraction(&self) -> f64 {
        if self.current_total == 0 {
            return 0.0;
        }
        (self.current_processed as f64 / self.current_total as f64).min(1.0)
    }

    /// Percentage of the current item transferred (0.0 to 100.0).
    pub fn percentage(&self) -> f64 {
        self.fraction() * 100.0
    }

    /// Fraction of items processed, in `0.0..=1.0`.
    pub fn overall_fraction(&self) -> f64 {
        if self.total == 0 {
            return if self.finished { 1.0 } else { 0.0 };
        }
        (self.processed as f64 / self.total as f64).min(1.0)
    }

    /// Finished without being cut short.
    pub fn is_clean_finish(&self) -> bool {
        self.finished && !self.premature_stop
    }
}

/// An item that failed and was handed to the error policy.
#[derive(Debug)]
pub struct ItemFailure {
    pub index: u32,
    pub error: DataOpError,
}

/// Result of a completed operation, returned when the worker is joined.
pub struct OperationReport<B> {
    /// The type of operation.
    pub kind: OperationKind,
    /// Final progress.
    pub progress: ProgressSnapshot,
    /// Failures in the order they happened.
    pub failures: Vec<ItemFailure>,
    /// The operation stopped because cancellation was requested.
    pub cancelled: bool,
    /// The descriptor, handed back so the backend can be inspected or the
    /// operation dispatched again.
    pub descriptor: OperationDescriptor<B>,
}

impl<B> OperationReport<B> {
    /// Check if every item was processed without failure.
    pub fn is_success(&self) -> bool {
        self.progress.is_clean_finish() && self.failures.is_empty()
    }

    /// Get a human-readable summary of the operation.
    pub fn summary(&self) -> String {
        let action = match self.kind {
            OperationKind::Copy => "Copied",
            OperationKind::Delete => "Deleted",
        };
        // A failure that stopped the operation is not part of `processed`.
        let skipped = self
            .failures
            .iter()
            .filter(|f| f.index < self.progress.processed)
            .count();
        let done = (self.progress.processed as usize).saturating_sub(skipped);

        if self.cancelled {
            format!(
                "Cancelled after {} of {} items",
                self.progress.processed, self.progress.total
            )
        } else if self.progress.premature_stop {
            format!(
                "{} {} of {} items, stopped after an error",
                action, done, self.progress.total
            )
        } else if self.failures.is_empty() {
            format!("{} {} items", action, done)
        } else {
            format!("{} {} items, {} failed", action, done, self.failures.len())
        }
    }
}

impl<B> std::fmt::Debug for OperationReport<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationReport")
            .field("kind", &self.kind)
            .field("progress", &self.progress)
            .field("failures", &self.failures)
            .field("cancelled", &self.cancelled)
            .finish_non_exhaustive()
    }
}
