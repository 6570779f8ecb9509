//! Data-operation engine for titlemgr.
//!
//! This crate runs batch copy and delete operations against pluggable
//! backends on a worker thread. The caller gets a cancel handle and a shared
//! progress record back immediately and polls the record once per tick.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//!
//! use titlemgr_ops::{copy_files, dispatch, CopyOptions};
//!
//! let descriptor = copy_files(
//!     &[PathBuf::from("/sd/tickets")],
//!     &PathBuf::from("/backup"),
//!     CopyOptions::default(),
//! )
//! .unwrap();
//!
//! let task = dispatch(descriptor).unwrap();
//! while !task.is_finished() {
//!     let progress = task.poll_progress();
//!     println!("{} / {}", progress.processed, progress.total);
//!     std::thread::sleep(std::time::Duration::from_millis(50));
//! }
//! let report = task.join().unwrap();
//! println!("{}", report.summary());
//! ```

mod backend;
mod backends;
mod conflict;
mod engine;
mod operation;
mod policy;
mod progress;
mod task;

pub use backend::DataOpBackend;
pub use backends::{
    copy_files, delete_files, extract_archive, remove_path, sanitize_entry_path, ArchiveEntry,
    ArchiveExtractBackend, ArchiveFormat, ArchiveSource, CopyEntry, CopyOptions, FsCopyBackend,
    FsDeleteBackend, FsDestination, FsSource,
};
pub use conflict::{auto_rename_path, is_same_file, resolve_destination, ConflictResolution};
pub use engine::{DataOpEngine, EngineOutcome};
pub use operation::{item_count, OperationDescriptor, OperationKind};
pub use policy::{ErrorCallback, ErrorPolicy};
pub use progress::{ItemFailure, OperationReport, ProgressRecord, ProgressSnapshot};
pub use task::{dispatch, CancelHandle, Dispatcher, OperationTask};

// Re-export core types for convenience
pub use titlemgr_core::{DataOpError, EngineConfig, ItemStep};
