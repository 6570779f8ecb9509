//! Directory-backed content store.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use strum::IntoEnumIterator;
use titlemgr_core::{
    ExtSaveDataInfo, MediaType, PendingTitleInfo, SaveId, SystemSaveDataInfo, TicketInfo, TitleId,
};
use tracing::{debug, warn};

use crate::ticket::parse_title_id;
use crate::StoreError;

const TICKETS_DIR: &str = "tickets";
const PENDING_DIR: &str = "pending";
const SAVEDATA_DIR: &str = "savedata/system";
const EXTDATA_DIR: &str = "extdata";
const BOSS_EXTDATA_DIR: &str = "bossextdata";
const TICKET_EXTENSION: &str = "tik";

/// Media that can hold ext save data.
const EXTDATA_MEDIA: [MediaType; 2] = [MediaType::Nand, MediaType::Sd];

/// Tickets, pending titles and save data kept under one root directory.
///
/// ```text
/// <root>/tickets/<title id>.tik
/// <root>/pending/<media>/<title id>/
/// <root>/savedata/system/<save id>/
/// <root>/extdata/<media>/<ext id>/
/// <root>/bossextdata/<media>/<ext id>/
/// ```
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    /// Open a store rooted at `root`, creating the layout if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self { root: root.into() };
        for dir in [TICKETS_DIR, SAVEDATA_DIR] {
            let path = store.root.join(dir);
            fs::create_dir_all(&path).map_err(|e| StoreError::io(&path, e))?;
        }
        debug!(root = %store.root.display(), "content store opened");
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ticket_path(&self, title_id: TitleId) -> PathBuf {
        self.root
            .join(TICKETS_DIR)
            .join(format!("{:016x}.{TICKET_EXTENSION}", title_id.0))
    }

    pub fn pending_title_path(&self, media: MediaType, title_id: TitleId) -> PathBuf {
        self.root
            .join(PENDING_DIR)
            .join(media.to_string())
            .join(format!("{:016x}", title_id.0))
    }

    pub fn system_save_data_path(&self, save_id: SaveId) -> PathBuf {
        self.root.join(SAVEDATA_DIR).join(format!("{:08x}", save_id.0))
    }

    pub fn ext_save_data_path(&self, media: MediaType, ext_id: TitleId) -> PathBuf {
        self.root
            .join(EXTDATA_DIR)
            .join(media.to_string())
            .join(format!("{:016x}", ext_id.0))
    }

    /// Where the BOSS archive for `info` lives, if it has one.
    pub fn boss_ext_save_data_path(&self, info: &ExtSaveDataInfo) -> Option<PathBuf> {
        let path = self.boss_path(info.media, info.ext_id);
        path.is_dir().then_some(path)
    }

    /// Files inside a system save data container, relative to it and sorted.
    pub fn browse_system_save_data(&self, save_id: SaveId) -> Result<Vec<PathBuf>, StoreError> {
        let path = self.system_save_data_path(save_id);
        if !path.is_dir() {
            return Err(StoreError::not_found(format!("System save data {save_id}")));
        }
        list_files(&path)
    }

    /// Files inside the BOSS archive of `info`, relative to it and sorted.
    pub fn browse_boss_ext_save_data(&self, info: &ExtSaveDataInfo) -> Result<Vec<PathBuf>, StoreError> {
        let Some(path) = self.boss_ext_save_data_path(info) else {
            return Err(StoreError::not_found(format!(
                "BOSS archive of ext save data {} on {}",
                info.ext_id, info.media
            )));
        };
        list_files(&path)
    }

    fn boss_path(&self, media: MediaType, ext_id: TitleId) -> PathBuf {
        self.root
            .join(BOSS_EXTDATA_DIR)
            .join(media.to_string())
            .join(format!("{:016x}", ext_id.0))
    }

    /// Installed tickets, ordered by title id.
    pub fn list_tickets(&self) -> Result<Vec<TicketInfo>, StoreError> {
        let dir = self.root.join(TICKETS_DIR);
        let mut tickets = Vec::new();

        for (name, path) in read_names(&dir)? {
            let Some(stem) = name.strip_suffix(&format!(".{TICKET_EXTENSION}")) else {
                continue;
            };
            let Some(title_id) = parse_id::<TitleId>(stem, &path) else {
                continue;
            };
            let size = fs::metadata(&path).map_err(|e| StoreError::io(&path, e))?.len();
            tickets.push(TicketInfo { title_id, size });
        }

        tickets.sort_by_key(|t| t.title_id);
        Ok(tickets)
    }

    /// Pending titles on every medium, ordered by medium then title id.
    pub fn list_pending_titles(&self) -> Result<Vec<PendingTitleInfo>, StoreError> {
        let mut titles = Vec::new();
        for media in MediaType::iter() {
            titles.extend(self.list_pending_titles_on(media)?);
        }
        Ok(titles)
    }

    /// Pending titles on one medium, ordered by title id.
    pub fn list_pending_titles_on(&self, media: MediaType) -> Result<Vec<PendingTitleInfo>, StoreError> {
        let dir = self.root.join(PENDING_DIR).join(media.to_string());
        let mut titles = Vec::new();

        for (name, path) in read_names(&dir)? {
            if !path.is_dir() {
                continue;
            }
            let Some(title_id) = parse_id::<TitleId>(&name, &path) else {
                continue;
            };
            titles.push(PendingTitleInfo {
                title_id,
                media,
                size: dir_size(&path)?,
            });
        }

        titles.sort_by_key(|t| t.title_id);
        Ok(titles)
    }

    /// System save data containers, ordered by save id.
    pub fn list_system_save_data(&self) -> Result<Vec<SystemSaveDataInfo>, StoreError> {
        let dir = self.root.join(SAVEDATA_DIR);
        let mut saves = Vec::new();

        for (name, path) in read_names(&dir)? {
            if !path.is_dir() {
                continue;
            }
            let Some(save_id) = parse_id::<SaveId>(&name, &path) else {
                continue;
            };
            saves.push(SystemSaveDataInfo {
                save_id,
                size: dir_size(&path)?,
            });
        }

        saves.sort_by_key(|s| s.save_id);
        Ok(saves)
    }

    /// Ext save data containers on NAND and SD, ordered by medium then id.
    pub fn list_ext_save_data(&self) -> Result<Vec<ExtSaveDataInfo>, StoreError> {
        let mut containers = Vec::new();

        for media in EXTDATA_MEDIA {
            let dir = self.root.join(EXTDATA_DIR).join(media.to_string());
            let mut on_media = Vec::new();

            for (name, path) in read_names(&dir)? {
                if !path.is_dir() {
                    continue;
                }
                let Some(ext_id) = parse_id::<TitleId>(&name, &path) else {
                    continue;
                };
                on_media.push(ExtSaveDataInfo {
                    ext_id,
                    media,
                    has_boss: self.boss_path(media, ext_id).is_dir(),
                    size: dir_size(&path)?,
                });
            }

            on_media.sort_by_key(|e| e.ext_id);
            containers.extend(on_media);
        }

        Ok(containers)
    }

    /// Start installing a ticket whose first bytes are `first_block`.
    ///
    /// The title id is taken from the ticket header. Data goes to a staging
    /// file and only replaces the installed ticket on [`TicketInstall::finish`].
    pub fn begin_ticket_install(&self, first_block: &[u8]) -> Result<TicketInstall, StoreError> {
        let title_id = parse_title_id(first_block)?;
        let final_path = self.ticket_path(title_id);
        let staging_path = self
            .root
            .join(TICKETS_DIR)
            .join(format!(".{:016x}.{TICKET_EXTENSION}.part", title_id.0));

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&staging_path)
            .map_err(|e| StoreError::io(&staging_path, e))?;

        debug!(%title_id, "ticket install started");
        Ok(TicketInstall {
            title_id,
            file,
            staging_path,
            final_path,
        })
    }

    pub fn delete_ticket(&self, title_id: TitleId) -> Result<(), StoreError> {
        let path = self.ticket_path(title_id);
        fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))
    }

    pub fn delete_pending_title(&self, media: MediaType, title_id: TitleId) -> Result<(), StoreError> {
        remove_dir(&self.pending_title_path(media, title_id))
    }

    pub fn delete_system_save_data(&self, save_id: SaveId) -> Result<(), StoreError> {
        remove_dir(&self.system_save_data_path(save_id))
    }

    /// Delete an ext save data container and its BOSS archive, if any.
    pub fn delete_ext_save_data(&self, media: MediaType, ext_id: TitleId) -> Result<(), StoreError> {
        remove_dir(&self.ext_save_data_path(media, ext_id))?;
        let boss = self.boss_path(media, ext_id);
        if boss.is_dir() {
            remove_dir(&boss)?;
        }
        Ok(())
    }
}

/// A ticket being written into the store.
#[derive(Debug)]
pub struct TicketInstall {
    title_id: TitleId,
    file: File,
    staging_path: PathBuf,
    final_path: PathBuf,
}

impl TicketInstall {
    pub fn title_id(&self) -> TitleId {
        self.title_id
    }

    /// Write `data` at `offset`, returning how many bytes were accepted.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write(data)
    }

    /// Commit the ticket, replacing any ticket installed for the same title.
    pub fn finish(self) -> Result<TicketInfo, StoreError> {
        self.file
            .sync_all()
            .map_err(|e| StoreError::io(&self.staging_path, e))?;
        let size = self
            .file
            .metadata()
            .map_err(|e| StoreError::io(&self.staging_path, e))?
            .len();
        drop(self.file);

        fs::rename(&self.staging_path, &self.final_path)
            .map_err(|e| StoreError::io(&self.final_path, e))?;

        debug!(title_id = %self.title_id, size, "ticket installed");
        Ok(TicketInfo {
            title_id: self.title_id,
            size,
        })
    }

    /// Discard the staged ticket.
    pub fn abort(self) -> Result<(), StoreError> {
        drop(self.file);
        debug!(title_id = %self.title_id, "ticket install aborted");
        fs::remove_file(&self.staging_path).map_err(|e| StoreError::io(&self.staging_path, e))
    }
}

/// Visible entry names in `dir`. A missing directory is empty.
fn read_names(dir: &Path) -> Result<Vec<(String, PathBuf)>, StoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(dir, e)),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::io(dir, e))?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        names.push((name, entry.path()));
    }
    Ok(names)
}

fn parse_id<T: std::str::FromStr>(name: &str, path: &Path) -> Option<T> {
    let parsed = name.parse().ok();
    if parsed.is_none() {
        warn!(path = %path.display(), "ignoring unrecognised store entry");
    }
    parsed
}

/// Call `visit` for every non-directory entry under `root`.
fn walk_files(
    root: &Path,
    mut visit: impl FnMut(PathBuf, &fs::Metadata),
) -> Result<(), StoreError> {
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))? {
            let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
            let metadata = entry.metadata().map_err(|e| StoreError::io(entry.path(), e))?;
            if metadata.is_dir() {
                stack.push(entry.path());
            } else {
                visit(entry.path(), &metadata);
            }
        }
    }

    Ok(())
}

/// Total size of the regular files under `path`.
fn dir_size(path: &Path) -> Result<u64, StoreError> {
    let mut total = 0;
    walk_files(path, |_, metadata| total += metadata.len())?;
    Ok(total)
}

/// Files under `root`, relative to it and sorted.
fn list_files(root: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut files = Vec::new();
    walk_files(root, |path, _| {
        if let Ok(relative) = path.strip_prefix(root) {
            files.push(relative.to_path_buf());
        }
    })?;
    files.sort();
    Ok(files)
}

fn remove_dir(path: &Path) -> Result<(), StoreError> {
    fs::remove_dir_all(path).map_err(|e| StoreError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticket::unsigned_ticket;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_layout() {
        let temp = TempDir::new().unwrap();
        let store = ContentStore::open(temp.path().join("content")).unwrap();
        assert!(store.root().join("tickets").is_dir());
        assert!(store.list_tickets().unwrap().is_empty());
        assert!(store.list_pending_titles().unwrap().is_empty());
    }

    #[test]
    fn test_ticket_install_commit_and_abort() {
        let temp = TempDir::new().unwrap();
        let store = ContentStore::open(temp.path()).unwrap();
        let ticket = unsigned_ticket(TitleId(0x0004_0000_0000_1000));

        let mut install = store.begin_ticket_install(&ticket).unwrap();
        assert_eq!(install.write_at(0, &ticket).unwrap(), ticket.len());
        let info = install.finish().unwrap();
        assert_eq!(info.size, ticket.len() as u64);
        assert_eq!(store.list_tickets().unwrap(), vec![info]);

        let other = unsigned_ticket(TitleId(0x0004_0000_0000_2000));
        let install = store.begin_ticket_install(&other).unwrap();
        install.abort().unwrap();
        assert_eq!(store.list_tickets().unwrap().len(), 1);
    }

    #[test]
    fn test_list_ignores_unrecognised_names() {
        let temp = TempDir::new().unwrap();
        let store = ContentStore::open(temp.path()).unwrap();
        fs::write(store.root().join("tickets/readme.txt"), b"x").unwrap();
        fs::write(store.root().join("tickets/nothex.tik"), b"x").unwrap();
        fs::create_dir_all(store.root().join("savedata/system/zzzz")).unwrap();

        assert!(store.list_tickets().unwrap().is_empty());
        assert!(store.list_system_save_data().unwrap().is_empty());
    }

    #[test]
    fn test_delete_missing_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = ContentStore::open(temp.path()).unwrap();
        let err = store.delete_ticket(TitleId(7)).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn test_list_files_and_size_walk_the_same_tree() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("a/b")).unwrap();
        fs::write(temp.path().join("a/b/deep"), b"12345").unwrap();
        fs::write(temp.path().join("top"), b"12").unwrap();
        fs::create_dir_all(temp.path().join("empty")).unwrap();

        assert_eq!(
            list_files(temp.path()).unwrap(),
            vec![PathBuf::from("a/b/deep"), PathBuf::from("top")]
        );
        assert_eq!(dir_size(temp.path()).unwrap(), 7);
    }
}
