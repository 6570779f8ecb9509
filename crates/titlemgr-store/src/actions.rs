//! Operation builders for content store actions.
//!
//! Each builder turns a user action into an [`OperationDescriptor`] that can
//! be handed to a `Dispatcher`. Passing `None` as the policy selects the
//! store default: keep going after a failed item unless it was the last one.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use titlemgr_core::{DataOpError, ExtSaveDataInfo, MediaType, PendingTitleInfo, SaveId, TicketInfo, TitleId};
use titlemgr_ops::{DataOpBackend, ErrorPolicy, OperationDescriptor};
use tracing::{info, warn};

use crate::store::{ContentStore, TicketInstall};
use crate::StoreError;

fn default_policy(policy: Option<ErrorPolicy>, total: u32) -> ErrorPolicy {
    policy.unwrap_or(ErrorPolicy::ContinueUnlessLast { total })
}

/// Item count for a list of targets; operations index items with `u32`.
fn item_total(len: usize) -> Result<u32, StoreError> {
    u32::try_from(len).map_err(|_| StoreError::TooManyItems { count: len })
}

fn index_out_of_range(index: u32) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("item {index} is out of range"),
    )
}

/// `.tik` files directly inside `dir`, sorted by name.
pub fn find_ticket_files(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))? {
        let entry = entry.map_err(|e| StoreError::io(dir, e))?;
        let path = entry.path();
        let is_ticket = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("tik"));
        if is_ticket && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Installs ticket files into a content store.
#[derive(Debug)]
pub struct TicketInstallBackend {
    store: ContentStore,
    sources: Vec<PathBuf>,
    policy: ErrorPolicy,
    installed: Vec<TicketInfo>,
}

impl TicketInstallBackend {
    pub fn new(store: ContentStore, sources: Vec<PathBuf>, policy: ErrorPolicy) -> Self {
        Self {
            store,
            sources,
            policy,
            installed: Vec::new(),
        }
    }

    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    /// Tickets committed so far, in install order.
    pub fn installed(&self) -> &[TicketInfo] {
        &self.installed
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl DataOpBackend for TicketInstallBackend {
    type Source = File;
    type Destination = TicketInstall;

    fn open_source(&mut self, index: u32) -> io::Result<File> {
        let path = self.sources.get(index as usize).ok_or_else(|| index_out_of_range(index))?;
        File::open(path)
    }

    fn source_size(&mut self, source: &mut File) -> io::Result<u64> {
        Ok(source.metadata()?.len())
    }

    fn read_source(&mut self, source: &mut File, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        source.seek(SeekFrom::Start(offset))?;
        source.read(buf)
    }

    fn open_destination(&mut self, _index: u32, first_block: &[u8]) -> io::Result<TicketInstall> {
        Ok(self.store.begin_ticket_install(first_block)?)
    }

    fn write_destination(
        &mut self,
        destination: &mut TicketInstall,
        offset: u64,
        data: &[u8],
    ) -> io::Result<usize> {
        destination.write_at(offset, data)
    }

    fn close_destination(
        &mut self,
        _index: u32,
        destination: TicketInstall,
        succeeded: bool,
    ) -> io::Result<()> {
        if succeeded {
            let ticket = destination.finish()?;
            info!(title_id = %ticket.title_id, "ticket installed");
            self.installed.push(ticket);
        } else {
            destination.abort()?;
        }
        Ok(())
    }

    fn on_item_error(&mut self, index: u32, error: &DataOpError) -> bool {
        if !error.is_cancelled() {
            warn!(index, source = ?self.sources.get(index as usize), %error, "ticket install failed");
        }
        self.policy.decide(index, error)
    }
}

/// Build a copy descriptor installing every `.tik` file directly in `dir`.
///
/// Empty files are skipped.
pub fn install_tickets(
    store: &ContentStore,
    dir: &Path,
    policy: Option<ErrorPolicy>,
) -> Result<OperationDescriptor<TicketInstallBackend>, StoreError> {
    let sources = find_ticket_files(dir)?;
    let total = item_total(sources.len())?;
    let backend = TicketInstallBackend::new(store.clone(), sources, default_policy(policy, total));
    Ok(OperationDescriptor::copy(total, backend).with_copy_empty(false))
}

/// One record a delete operation removes from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreItem {
    Ticket(TitleId),
    PendingTitle { media: MediaType, title_id: TitleId },
    SystemSaveData(SaveId),
    ExtSaveData { media: MediaType, ext_id: TitleId },
}

impl fmt::Display for StoreItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ticket(id) => write!(f, "ticket {id}"),
            Self::PendingTitle { media, title_id } => write!(f, "pending title {title_id} ({media})"),
            Self::SystemSaveData(id) => write!(f, "system save data {id}"),
            Self::ExtSaveData { media, ext_id } => write!(f, "ext save data {ext_id} ({media})"),
        }
    }
}

impl From<&PendingTitleInfo> for StoreItem {
    fn from(info: &PendingTitleInfo) -> Self {
        Self::PendingTitle {
            media: info.media,
            title_id: info.title_id,
        }
    }
}

impl From<&ExtSaveDataInfo> for StoreItem {
    fn from(info: &ExtSaveDataInfo) -> Self {
        Self::ExtSaveData {
            media: info.media,
            ext_id: info.ext_id,
        }
    }
}

/// Deletes records from a content store.
#[derive(Debug)]
pub struct StoreDeleteBackend {
    store: ContentStore,
    targets: Vec<StoreItem>,
    policy: ErrorPolicy,
}

impl StoreDeleteBackend {
    pub fn new(store: ContentStore, targets: Vec<StoreItem>, policy: ErrorPolicy) -> Self {
        Self {
            store,
            targets,
            policy,
        }
    }

    pub fn targets(&self) -> &[StoreItem] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl DataOpBackend for StoreDeleteBackend {
    type Source = ();
    type Destination = ();

    fn delete_item(&mut self, index: u32) -> io::Result<()> {
        let item = self.targets.get(index as usize).ok_or_else(|| index_out_of_range(index))?;
        match item {
            StoreItem::Ticket(id) => self.store.delete_ticket(*id)?,
            StoreItem::PendingTitle { media, title_id } => {
                self.store.delete_pending_title(*media, *title_id)?
            }
            StoreItem::SystemSaveData(id) => self.store.delete_system_save_data(*id)?,
            StoreItem::ExtSaveData { media, ext_id } => {
                self.store.delete_ext_save_data(*media, *ext_id)?
            }
        }
        info!(%item, "deleted");
        Ok(())
    }

    fn on_item_error(&mut self, index: u32, error: &DataOpError) -> bool {
        if !error.is_cancelled() {
            if let Some(item) = self.targets.get(index as usize) {
                warn!(%item, %error, "delete failed");
            }
        }
        self.policy.decide(index, error)
    }
}

/// Build a delete descriptor for arbitrary store records.
pub fn delete_items(
    store: &ContentStore,
    targets: Vec<StoreItem>,
    policy: Option<ErrorPolicy>,
) -> Result<OperationDescriptor<StoreDeleteBackend>, StoreError> {
    let total = item_total(targets.len())?;
    let backend = StoreDeleteBackend::new(store.clone(), targets, default_policy(policy, total));
    Ok(OperationDescriptor::delete(total, backend))
}

pub fn delete_tickets(
    store: &ContentStore,
    title_ids: &[TitleId],
    policy: Option<ErrorPolicy>,
) -> Result<OperationDescriptor<StoreDeleteBackend>, StoreError> {
    let targets = title_ids.iter().copied().map(StoreItem::Ticket).collect();
    delete_items(store, targets, policy)
}

pub fn delete_pending_titles(
    store: &ContentStore,
    titles: &[PendingTitleInfo],
    policy: Option<ErrorPolicy>,
) -> Result<OperationDescriptor<StoreDeleteBackend>, StoreError> {
    delete_items(store, titles.iter().map(StoreItem::from).collect(), policy)
}

/// Build a delete descriptor for every pending title in the store.
pub fn delete_all_pending_titles(
    store: &ContentStore,
    policy: Option<ErrorPolicy>,
) -> Result<OperationDescriptor<StoreDeleteBackend>, StoreError> {
    let titles = store.list_pending_titles()?;
    delete_pending_titles(store, &titles, policy)
}

pub fn delete_system_save_data(
    store: &ContentStore,
    save_ids: &[SaveId],
    policy: Option<ErrorPolicy>,
) -> Result<OperationDescriptor<StoreDeleteBackend>, StoreError> {
    let targets = save_ids.iter().copied().map(StoreItem::SystemSaveData).collect();
    delete_items(store, targets, policy)
}

pub fn delete_ext_save_data(
    store: &ContentStore,
    containers: &[ExtSaveDataInfo],
    policy: Option<ErrorPolicy>,
) -> Result<OperationDescriptor<StoreDeleteBackend>, StoreError> {
    delete_items(store, containers.iter().map(StoreItem::from).collect(), policy)
}
