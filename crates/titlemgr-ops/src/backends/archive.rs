//! Extracting zip and tar archives through the engine.

use std::fs::{self, File};
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use titlemgr_core::DataOpError;
use tracing::debug;
use zip::ZipArchive;

use super::fs::{
    close_fs_destination, decide_with_conflict, index_out_of_range, open_fs_destination,
    write_fs_destination, FsDestination,
};
use crate::conflict::ConflictResolution;
use crate::operation::item_count;
use crate::policy::ErrorPolicy;
use crate::{DataOpBackend, OperationDescriptor};

/// Supported archive containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ArchiveFormat {
    Zip,
    Tar,
    #[strum(to_string = "tar.gz")]
    TarGz,
}

impl ArchiveFormat {
    /// Guess the format from the file name.
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name.ends_with(".zip") {
            Some(Self::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }
}

/// One extractable archive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Sanitized path relative to the extraction root.
    pub path: PathBuf,
    pub is_dir: bool,
    /// Size declared by the archive header.
    pub size: u64,
    location: EntryLocation,
}

/// Where an entry's data lives in the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryLocation {
    /// Position in the zip central directory.
    Zip(usize),
    /// Offset of the entry data in the (decompressed) tar stream.
    Tar(u64),
}

/// Make an archive entry name safe to join onto the extraction root.
///
/// Rejects absolute paths and `..`; drops `.` components.
pub fn sanitize_entry_path(name: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in name.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if clean.as_os_str().is_empty() {
        None
    } else {
        Some(clean)
    }
}

fn unsafe_entry(name: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("unsafe archive entry path: {name}"),
    )
}

/// Largest up-front reservation for a buffered entry; the buffer grows with
/// the bytes actually read beyond this.
const INITIAL_ENTRY_CAPACITY: usize = 1024 * 1024;

/// Read at most `declared` bytes from `reader`.
///
/// The declared size comes from the archive and is not trusted for the
/// allocation.
pub(crate) fn read_declared(reader: impl Read, declared: u64) -> io::Result<Vec<u8>> {
    let hint = usize::try_from(declared).unwrap_or(usize::MAX).min(INITIAL_ENTRY_CAPACITY);
    let mut data = Vec::with_capacity(hint);
    reader.take(declared).read_to_end(&mut data)?;
    Ok(data)
}

/// An open archive entry.
#[derive(Debug)]
pub enum ArchiveSource {
    /// A zip entry, decompressed into memory.
    Buffered(Cursor<Vec<u8>>),
    /// A tar entry, read from the backend's sequential stream.
    Streamed { data_offset: u64, size: u64 },
}

/// A decompressed tar stream and how far into it we are.
struct TarStream {
    reader: Box<dyn Read + Send>,
    position: u64,
}

impl TarStream {
    fn open(archive: &Path, format: ArchiveFormat) -> io::Result<Self> {
        Ok(Self {
            reader: open_tar_reader(archive, format)?,
            position: 0,
        })
    }

    /// Read into `buf` from absolute stream offset `at`.
    ///
    /// Moving forward skips data; offsets behind the current position need a
    /// fresh stream. Returns 0 at end of stream.
    fn read_at(&mut self, at: u64, buf: &mut [u8]) -> io::Result<usize> {
        let skip = at - self.position;
        if skip > 0 {
            let skipped = io::copy(&mut (&mut self.reader).take(skip), &mut io::sink())?;
            self.position += skipped;
            if skipped < skip {
                return Ok(0);
            }
        }
        let read = self.reader.read(buf)?;
        self.position += read as u64;
        Ok(read)
    }
}

/// Extracts an archive's entries into a directory.
pub struct ArchiveExtractBackend {
    archive: PathBuf,
    format: ArchiveFormat,
    zip: Option<ZipArchive<File>>,
    tar: Option<TarStream>,
    entries: Vec<ArchiveEntry>,
    destination: PathBuf,
    conflict: ConflictResolution,
    policy: ErrorPolicy,
}

impl ArchiveExtractBackend {
    /// List `archive` and plan extraction into `destination`.
    pub fn open(archive: &Path, destination: &Path) -> io::Result<Self> {
        let format = ArchiveFormat::detect(archive).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unrecognised archive format: {}", archive.display()),
            )
        })?;

        let (zip, entries) = match format {
            ArchiveFormat::Zip => {
                let mut zip = ZipArchive::new(File::open(archive)?).map_err(io::Error::other)?;
                let entries = list_zip(&mut zip)?;
                (Some(zip), entries)
            }
            ArchiveFormat::Tar | ArchiveFormat::TarGz => (None, list_tar(archive, format)?),
        };

        debug!(archive = %archive.display(), %format, entries = entries.len(), "archive listed");

        Ok(Self {
            archive: archive.to_path_buf(),
            format,
            zip,
            tar: None,
            entries,
            destination: destination.to_path_buf(),
            conflict: ConflictResolution::default(),
            policy: ErrorPolicy::default(),
        })
    }

    pub fn with_conflict_resolution(mut self, conflict: ConflictResolution) -> Self {
        self.conflict = conflict;
        self
    }

    pub fn with_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, index: u32) -> io::Result<&ArchiveEntry> {
        self.entries.get(index as usize).ok_or_else(|| index_out_of_range(index))
    }

    /// Read from the tar stream, reopening it only when asked to go back.
    fn read_tar(&mut self, at: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut stream = match self.tar.take() {
            Some(stream) if stream.position <= at => stream,
            _ => {
                debug!(archive = %self.archive.display(), at, "opening tar stream");
                TarStream::open(&self.archive, self.format)?
            }
        };
        let read = stream.read_at(at, buf)?;
        self.tar = Some(stream);
        Ok(read)
    }
}

fn list_zip(zip: &mut ZipArchive<File>) -> io::Result<Vec<ArchiveEntry>> {
    let mut entries = Vec::with_capacity(zip.len());
    for archive_index in 0..zip.len() {
        let file = zip.by_index(archive_index).map_err(io::Error::other)?;
        let path = sanitize_entry_path(Path::new(file.name())).ok_or_else(|| unsafe_entry(file.name()))?;
        entries.push(ArchiveEntry {
            path,
            is_dir: file.is_dir(),
            size: file.size(),
            location: EntryLocation::Zip(archive_index),
        });
    }
    Ok(entries)
}

fn open_tar_reader(archive: &Path, format: ArchiveFormat) -> io::Result<Box<dyn Read + Send>> {
    let file = File::open(archive)?;
    Ok(match format {
        ArchiveFormat::TarGz => Box::new(GzDecoder::new(file)),
        _ => Box::new(file),
    })
}

fn list_tar(archive: &Path, format: ArchiveFormat) -> io::Result<Vec<ArchiveEntry>> {
    let mut tar = tar::Archive::new(open_tar_reader(archive, format)?);
    let mut entries = Vec::new();

    for entry in tar.entries()? {
        let entry = entry?;
        let kind = entry.header().entry_type();
        if !kind.is_file() && !kind.is_dir() {
            debug!(?kind, "skipping special tar entry");
            continue;
        }
        let raw = entry.path()?.into_owned();
        let path = sanitize_entry_path(&raw).ok_or_else(|| unsafe_entry(&raw.to_string_lossy()))?;
        entries.push(ArchiveEntry {
            path,
            is_dir: kind.is_dir(),
            size: entry.size(),
            location: EntryLocation::Tar(entry.raw_file_position()),
        });
    }
    Ok(entries)
}

impl DataOpBackend for ArchiveExtractBackend {
    type Source = ArchiveSource;
    type Destination = FsDestination;

    fn is_source_directory(&mut self, index: u32) -> io::Result<bool> {
        Ok(self.entry(index)?.is_dir)
    }

    fn make_destination_directory(&mut self, index: u32) -> io::Result<()> {
        let path = self.destination.join(&self.entry(index)?.path);
        fs::create_dir_all(path)
    }

    fn open_source(&mut self, index: u32) -> io::Result<ArchiveSource> {
        let entry = self.entry(index)?.clone();
        match entry.location {
            EntryLocation::Zip(archive_index) => {
                let zip = self.zip.as_mut().ok_or_else(|| {
                    io::Error::other("zip entry listed without an open zip archive")
                })?;
                let file = zip.by_index(archive_index).map_err(io::Error::other)?;
                Ok(ArchiveSource::Buffered(Cursor::new(read_declared(file, entry.size)?)))
            }
            EntryLocation::Tar(data_offset) => Ok(ArchiveSource::Streamed {
                data_offset,
                size: entry.size,
            }),
        }
    }

    fn source_size(&mut self, source: &mut ArchiveSource) -> io::Result<u64> {
        Ok(match source {
            ArchiveSource::Buffered(cursor) => cursor.get_ref().len() as u64,
            ArchiveSource::Streamed { size, .. } => *size,
        })
    }

    fn read_source(&mut self, source: &mut ArchiveSource, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        match source {
            ArchiveSource::Buffered(cursor) => {
                cursor.seek(SeekFrom::Start(offset))?;
                cursor.read(buf)
            }
            ArchiveSource::Streamed { data_offset, size } => {
                let remaining = size.saturating_sub(offset);
                let want = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
                self.read_tar(*data_offset + offset, &mut buf[..want])
            }
        }
    }

    fn open_destination(&mut self, index: u32, _first_block: &[u8]) -> io::Result<FsDestination> {
        let path = self.destination.join(&self.entry(index)?.path);
        open_fs_destination(&path, None, self.conflict)
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

impl std::fmt::Debug for ArchiveExtractBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveExtractBackend")
            .field("archive", &self.archive)
            .field("format", &self.format)
            .field("entries", &self.entries.len())
            .field("destination", &self.destination)
            .field("conflict", &self.conflict)
            .finish_non_exhaustive()
    }
}

/// Build a copy descriptor that extracts `archive` into `destination`.
pub fn extract_archive(
    archive: &Path,
    destination: &Path,
    conflict: ConflictResolution,
    policy: ErrorPolicy,
    copy_empty: bool,
) -> io::Result<OperationDescriptor<ArchiveExtractBackend>> {
    let backend = ArchiveExtractBackend::open(archive, destination)?
        .with_conflict_resolution(conflict)
        .with_policy(policy);
    let total = item_count(backend.len())?;
    Ok(OperationDescriptor::copy(total, backend).with_copy_empty(copy_empty))
}
