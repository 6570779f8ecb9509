//! Concrete backends for host filesystems and archives.

mod archive;
mod fs;

pub use archive::{
    extract_archive, sanitize_entry_path, ArchiveEntry, ArchiveExtractBackend, ArchiveFormat,
    ArchiveSource,
};
pub use fs::{
    copy_files, delete_files, remove_path, CopyEntry, CopyOptions, FsCopyBackend,
    FsDeleteBackend, FsDestination, FsSource,
};
