//! Conflict resolution for filesystem destinations.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// How to resolve a destination that already exists.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Default,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum ConflictResolution {
    /// Fail the item; the error policy decides what happens next.
    #[default]
    Skip,
    /// Overwrite the existing item.
    Overwrite,
    /// Automatically rename the new item (e.g., "file (1).txt").
    #[strum(to_string = "rename")]
    AutoRename,
    /// Fail the item and stop the operation.
    Abort,
}

/// Whether `a` and `b` name the same existing file.
pub fn is_same_file(a: &Path, b: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        if let (Ok(a), Ok(b)) = (a.metadata(), b.metadata()) {
            return a.dev() == b.dev() && a.ino() == b.ino();
        }
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn same_file_error(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("source and destination are the same file: {}", path.display()),
    )
}

/// Pick the path to write to for `path` under `resolution`.
///
/// Returns an `AlreadyExists` error for `Skip` and `Abort` when the path is
/// taken. When `source` is given, a destination that is the source itself is
/// refused whatever the resolution.
pub fn resolve_destination(
    path: &Path,
    source: Option<&Path>,
    resolution: ConflictResolution,
) -> io::Result<PathBuf> {
    if !path.exists() {
        return Ok(path.to_path_buf());
    }
    if source.is_some_and(|source| is_same_file(source, path)) {
        return Err(same_file_error(path));
    }

    match resolution {
        ConflictResolution::Overwrite => Ok(path.to_path_buf()),
        ConflictResolution::AutoRename => Ok(auto_rename_path(path)),
        ConflictResolution::Skip | ConflictResolution::Abort => Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", path.display()),
        )),
    }
}

/// Generate an auto-renamed path to avoid conflicts.
///
/// For "file.txt", tries "file (1).txt", "file (2).txt", etc.
pub fn auto_rename_path(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or(Path::new(""));
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    let extension = path.extension().and_then(|e| e.to_str());

    for i in 1..1000 {
        let new_name = if let Some(ext) = extension {
            format!("{} ({}).{}", stem, i, ext)
        } else {
            format!("{} ({})", stem, i)
        };

        let new_path = parent.join(&new_name);
        if !new_path.exists() {
            return new_path;
        }
    }

    // Fallback: use timestamp
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let new_name = if let Some(ext) = extension {
        format!("{}_{}.{}", stem, timestamp, ext)
    } else {
        format!("{}_{}", stem, timestamp)
    };

    parent.join(&new_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_rename_path() {
        let path = PathBuf::from("/tmp/titlemgr-missing/test.tik");
        let renamed = auto_rename_path(&path);
        assert!(renamed.to_string_lossy().ends_with("test (1).tik"));
    }

    #[test]
    fn test_resolution_names() {
        assert_eq!("rename".parse::<ConflictResolution>().unwrap(), ConflictResolution::AutoRename);
        assert_eq!(ConflictResolution::Overwrite.to_string(), "overwrite");
    }

    #[test]
    fn test_skip_reports_already_exists() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        let err = resolve_destination(temp.path(), None, ConflictResolution::Skip).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);

        let same = resolve_destination(temp.path(), None, ConflictResolution::Overwrite).unwrap();
        assert_eq!(same, temp.path());
    }

    #[test]
    fn test_overwrite_refuses_the_source_itself() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("save.bin");
        std::fs::write(&file, b"keep").unwrap();
        let alias = dir.path().join(".").join("save.bin");

        assert!(is_same_file(&file, &alias));
        let err = resolve_destination(&alias, Some(&file), ConflictResolution::Overwrite).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert_eq!(std::fs::read(&file).unwrap(), b"keep");

        let other = dir.path().join("other.bin");
        std::fs::write(&other, b"x").unwrap();
        assert!(!is_same_file(&file, &other));
    }
}
