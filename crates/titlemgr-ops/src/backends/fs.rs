//! Filesystem copy and delete backends.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use titlemgr_core::DataOpError;
use tracing::{debug, warn};

use crate::conflict::{is_same_file, resolve_destination, ConflictResolution};
use crate::policy::ErrorPolicy;
use crate::operation::item_count;
use crate::{DataOpBackend, OperationDescriptor};

/// Options for filesystem copy operations.
#[derive(Debug, Default)]
pub struct CopyOptions {
    /// How to handle destinations that already exist.
    pub conflict_resolution: ConflictResolution,
    /// Create zero-length files at the destination.
    pub copy_empty: bool,
    /// What to do when an item fails.
    pub policy: ErrorPolicy,
}

/// One planned copy item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyEntry {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub is_dir: bool,
}

/// An open source file.
#[derive(Debug)]
pub struct FsSource {
    file: File,
}

/// An open destination file. Removed on close unless the copy succeeded.
#[derive(Debug)]
pub struct FsDestination {
    file: File,
    path: PathBuf,
}

impl FsDestination {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Copies files and directory trees into a destination directory.
#[derive(Debug)]
pub struct FsCopyBackend {
    entries: Vec<CopyEntry>,
    conflict: ConflictResolution,
    policy: ErrorPolicy,
}

impl FsCopyBackend {
    /// Plan a copy of `sources` into `destination`.
    ///
    /// Directories are expanded recursively in pre-order: a directory comes
    /// before its contents, siblings are sorted by name.
    pub fn plan(sources: &[PathBuf], destination: &Path) -> io::Result<Self> {
        let mut entries = Vec::new();

        for source in sources {
            let name = source.file_name().ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{} has no file name", source.display()),
                )
            })?;

            let metadata = fs::metadata(source)?;
            if metadata.is_dir() && destination.starts_with(source) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "cannot copy {} into itself ({})",
                        source.display(),
                        destination.display()
                    ),
                ));
            }

            let target = destination.join(name);
            if is_same_file(source, &target) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "{} and {} are the same file",
                        source.display(),
                        target.display()
                    ),
                ));
            }

            if metadata.is_dir() {
                plan_dir(source, &target, &mut entries)?;
            } else {
                entries.push(CopyEntry {
                    source: source.clone(),
                    destination: target,
                    is_dir: false,
                });
            }
        }

        Ok(Self::from_entries(entries))
    }

    /// Use an explicit item list.
    pub fn from_entries(entries: Vec<CopyEntry>) -> Self {
        Self {
            entries,
            conflict: ConflictResolution::default(),
            policy: ErrorPolicy::default(),
        }
    }

    pub fn with_conflict_resolution(mut self, conflict: ConflictResolution) -> Self {
        self.conflict = conflict;
        self
    }

    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn entries(&self) -> &[CopyEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, index: u32) -> io::Result<&CopyEntry> {
        self.entries.get(index as usize).ok_or_else(|| index_out_of_range(index))
    }
}

fn plan_dir(source: &Path, target: &Path, entries: &mut Vec<CopyEntry>) -> io::Result<()> {
    entries.push(CopyEntry {
        source: source.to_path_buf(),
        destination: target.to_path_buf(),
        is_dir: true,
    });

    let mut children: Vec<_> = fs::read_dir(source)?.collect::<Result<_, _>>()?;
    children.sort_by_key(|entry| entry.file_name());

    for child in children {
        let path = child.path();
        let child_target = target.join(child.file_name());
        if child.file_type()?.is_dir() {
            plan_dir(&path, &child_target, entries)?;
        } else {
            entries.push(CopyEntry {
                source: path,
                destination: child_target,
                is_dir: false,
            });
        }
    }
    Ok(())
}

pub(crate) fn index_out_of_range(index: u32) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("item index {index} out of range"),
    )
}

/// Open `path` for writing under the given conflict resolution.
///
/// `source` is the file being copied, if it lives on the same filesystem;
/// it is never opened as its own destination.
pub(crate) fn open_fs_destination(
    path: &Path,
    source: Option<&Path>,
    conflict: ConflictResolution,
) -> io::Result<FsDestination> {
    let path = resolve_destination(path, source, conflict)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(&path)?;
    Ok(FsDestination { file, path })
}

pub(crate) fn write_fs_destination(
    destination: &mut FsDestination,
    offset: u64,
    data: &[u8],
) -> io::Result<usize> {
    destination.file.seek(SeekFrom::Start(offset))?;
    destination.file.write(data)
}

pub(crate) fn close_fs_destination(destination: FsDestination, succeeded: bool) -> io::Result<()> {
    let FsDestination { mut file, path } = destination;
    if succeeded {
        file.flush()?;
        return file.sync_all();
    }

    drop(file);
    debug!(path = %path.display(), "removing partial destination");
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// `Abort` conflicts always stop; everything else goes to the policy.
pub(crate) fn decide_with_conflict(
    conflict: ConflictResolution,
    policy: &mut ErrorPolicy,
    index: u32,
    error: &DataOpError,
) -> bool {
    if conflict == ConflictResolution::Abort
        && error.io_kind() == Some(io::ErrorKind::AlreadyExists)
    {
        return false;
    }
    policy.decide(index, error)
}

impl DataOpBackend for FsCopyBackend {
    type Source = FsSource;
    type Destination = FsDestination;

    fn is_source_directory(&mut self, index: u32) -> io::Result<bool> {
        Ok(self.entry(index)?.is_dir)
    }

    fn make_destination_directory(&mut self, index: u32) -> io::Result<()> {
        fs::create_dir_all(&self.entry(index)?.destination)
    }

    fn open_source(&mut self, index: u32) -> io::Result<FsSource> {
        let file = File::open(&self.entry(index)?.source)?;
        Ok(FsSource { file })
    }

    fn source_size(&mut self, source: &mut FsSource) -> io::Result<u64> {
        Ok(source.file.metadata()?.len())
    }

    fn read_source(&mut self, source: &mut FsSource, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        source.file.seek(SeekFrom::Start(offset))?;
        source.file.read(buf)
    }

    fn open_destination(&mut self, index: u32, _first_block: &[u8]) -> io::Result<FsDestination> {
        let conflict = self.conflict;
        let entry = self.entry(index)?;
        open_fs_destination(&entry.destination, Some(&entry.source), conflict)
    }

    fn write_destination(
        &mut self,
        destination: &mut FsDestination,
        offset: u64,
        data: &[u8],
    ) -> io::Result<usize> {
        write_fs_destination(destination, offset, data)
    }

    fn close_destination(
        &mut self,
        _index: u32,
        destination: FsDestination,
        succeeded: bool,
    ) -> io::Result<()> {
        close_fs_destination(destination, succeeded)
    }

    fn on_item_error(&mut self, index: u32, error: &DataOpError) -> bool {
        decide_with_conflict(self.conflict, &mut self.policy, index, error)
    }
}

/// Deletes files and directory trees.
#[derive(Debug)]
pub struct FsDeleteBackend {
    targets: Vec<PathBuf>,
    policy: ErrorPolicy,
}

impl FsDeleteBackend {
    pub fn new(targets: Vec<PathBuf>) -> Self {
        Self {
            targets,
            policy: ErrorPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn targets(&self) -> &[PathBuf] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl DataOpBackend for FsDeleteBackend {
    type Source = ();
    type Destination = ();

    fn delete_item(&mut self, index: u32) -> io::Result<()> {
        let path = self
            .targets
            .get(index as usize)
            .ok_or_else(|| index_out_of_range(index))?;
        remove_path(path)
    }

    fn on_item_error(&mut self, index: u32, error: &DataOpError) -> bool {
        self.policy.decide(index, error)
    }
}

/// Remove a file, or a directory and everything under it.
pub fn remove_path(path: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Build a copy descriptor for `sources` into `destination`.
pub fn copy_files(
    sources: &[PathBuf],
    destination: &Path,
    options: CopyOptions,
) -> io::Result<OperationDescriptor<FsCopyBackend>> {
    let backend = FsCopyBackend::plan(sources, destination)?
        .with_conflict_resolution(options.conflict_resolution)
        .with_policy(options.policy);
    if backend.is_empty() {
        warn!(destination = %destination.display(), "copy has no items");
    }
    let total = item_count(backend.len())?;
    Ok(OperationDescriptor::copy(total, backend).with_copy_empty(options.copy_empty))
}

/// Build a delete descriptor for `targets`.
pub fn delete_files(
    targets: Vec<PathBuf>,
    policy: ErrorPolicy,
) -> io::Result<OperationDescriptor<FsDeleteBackend>> {
    let backend = FsDeleteBackend::new(targets).with_policy(policy);
    let total = item_count(backend.len())?;
    Ok(OperationDescriptor::delete(total, backend))
}
