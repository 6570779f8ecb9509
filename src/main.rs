//! titlemgr - Manage tickets, pending titles and save data in a content store.
//!
//! Usage:
//!   titlemgr tickets list                List installed tickets
//!   titlemgr tickets install DIR         Install every .tik file in DIR
//!   titlemgr pending delete-all          Delete all pending titles
//!   titlemgr savedata list               List system save data
//!   titlemgr savedata browse ID          List the files of a system save data
//!   titlemgr extdata browse ID           List the BOSS files of an ext save data
//!   titlemgr copy SRC... DEST            Copy files into a directory
//!   titlemgr --help                      Show help

use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{bail, Context, Result};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use titlemgr_core::{AppConfig, MediaType, SaveId, TitleId};
use titlemgr_ops::{
    delete_files, item_count, ArchiveExtractBackend, ConflictResolution, DataOpBackend, Dispatcher,
    ErrorPolicy, FsCopyBackend, OperationDescriptor, OperationReport, ProgressSnapshot,
};
use titlemgr_store::{
    delete_all_pending_titles, delete_ext_save_data, delete_pending_titles,
    delete_system_save_data, delete_tickets, install_tickets, ContentStore,
};

#[derive(Parser)]
#[command(
    name = "titlemgr",
    version,
    about = "Manage titles, tickets and save data in a content store",
    long_about = "titlemgr lists and manages the contents of a console content store.\n\n\
                  Copy and delete operations run on a worker thread and report \
                  progress every tick. Press Ctrl-C to cancel after the current item."
)]
struct Cli {
    /// Content store root (overrides the config file)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print listings and reports as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Copy files and directories into a destination directory
    Copy {
        /// Files or directories to copy
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        /// Destination directory
        dest: PathBuf,

        #[command(flatten)]
        options: TransferArgs,
    },

    /// Delete files and directories
    Delete {
        /// Files or directories to delete
        #[arg(required = true)]
        targets: Vec<PathBuf>,

        /// What to do when an item fails
        #[arg(long, value_enum, default_value = "abort")]
        on_error: OnError,
    },

    /// Extract a zip or tar(.gz) archive into a directory
    Extract {
        /// Archive to extract
        archive: PathBuf,

        /// Destination directory
        dest: PathBuf,

        #[command(flatten)]
        options: TransferArgs,
    },

    /// Installed tickets
    Tickets {
        #[command(subcommand)]
        action: TicketsAction,
    },

    /// Titles whose installation was never committed
    Pending {
        #[command(subcommand)]
        action: PendingAction,
    },

    /// System save data
    Savedata {
        #[command(subcommand)]
        action: SavedataAction,
    },

    /// Ext save data
    Extdata {
        #[command(subcommand)]
        action: ExtdataAction,
    },
}

#[derive(clap::Args)]
struct TransferArgs {
    /// What to do when an item fails
    #[arg(long, value_enum, default_value = "abort")]
    on_error: OnError,

    /// Create zero-length files instead of skipping them
    #[arg(long)]
    copy_empty: bool,

    /// What to do when a destination file already exists
    #[arg(long, value_enum, default_value = "skip")]
    conflict: Conflict,
}

#[derive(Subcommand)]
enum TicketsAction {
    /// List installed tickets
    List,
    /// Install every .tik file directly inside a directory
    Install {
        dir: PathBuf,
        #[arg(long, value_enum, default_value = "unless-last")]
        on_error: OnError,
    },
    /// Delete tickets by title id
    Delete {
        #[arg(required = true)]
        title_ids: Vec<TitleId>,
        #[arg(long, value_enum, default_value = "unless-last")]
        on_error: OnError,
    },
}

#[derive(Subcommand)]
enum PendingAction {
    /// List pending titles
    List,
    /// Delete pending titles by title id
    Delete {
        #[arg(required = true)]
        title_ids: Vec<TitleId>,
        /// Only match titles on this medium
        #[arg(long)]
        media: Option<MediaType>,
        #[arg(long, value_enum, default_value = "unless-last")]
        on_error: OnError,
    },
    /// Delete every pending title
    DeleteAll {
        #[arg(long, value_enum, default_value = "unless-last")]
        on_error: OnError,
    },
}

#[derive(Subcommand)]
enum SavedataAction {
    /// List system save data
    List,
    /// Delete system save data by save id
    Delete {
        #[arg(required = true)]
        save_ids: Vec<SaveId>,
        #[arg(long, value_enum, default_value = "unless-last")]
        on_error: OnError,
    },
    /// List the files of a system save data
    Browse { save_id: SaveId },
}

#[derive(Subcommand)]
enum ExtdataAction {
    /// List ext save data on NAND and SD
    List,
    /// Delete ext save data (and its BOSS archive) by id
    Delete {
        #[arg(required = true)]
        ext_ids: Vec<TitleId>,
        /// Only match containers on this medium
        #[arg(long)]
        media: Option<MediaType>,
        #[arg(long, value_enum, default_value = "unless-last")]
        on_error: OnError,
    },
    /// List the files of an ext save data's BOSS archive
    Browse {
        ext_id: TitleId,
        #[arg(long)]
        media: Option<MediaType>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OnError {
    /// Record the failure and continue with the next item
    Skip,
    /// Stop at the first failure
    Abort,
    /// Continue unless the failing item is the last one
    UnlessLast,
}

impl OnError {
    fn policy(self, total: u32) -> ErrorPolicy {
        match self {
            Self::Skip => ErrorPolicy::SkipAndContinue,
            Self::Abort => ErrorPolicy::Abort,
            Self::UnlessLast => ErrorPolicy::ContinueUnlessLast { total },
        }
    }

    /// Policy for store builders; `None` selects the store default.
    fn store_policy(self) -> Option<ErrorPolicy> {
        match self {
            Self::Skip => Some(ErrorPolicy::SkipAndContinue),
            Self::Abort => Some(ErrorPolicy::Abort),
            Self::UnlessLast => None,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Conflict {
    Skip,
    Overwrite,
    Rename,
    Abort,
}

impl From<Conflict> for ConflictResolution {
    fn from(conflict: Conflict) -> Self {
        match conflict {
            Conflict::Skip => Self::Skip,
            Conflict::Overwrite => Self::Overwrite,
            Conflict::Rename => Self::AutoRename,
            Conflict::Abort => Self::Abort,
        }
    }
}

/// Everything a command needs to run.
struct App {
    config: AppConfig,
    dispatcher: Dispatcher,
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
    let mut config = AppConfig::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    if let Some(root) = cli.root.clone() {
        config.content_root = root;
    }

    let app = App {
        dispatcher: Dispatcher::new(config.engine.clone()),
        config,
        json: cli.json,
    };

    match cli.command {
        Command::Copy {
            sources,
            dest,
            options,
        } => run_copy(&app, &sources, &dest, &options).await,
        Command::Delete { targets, on_error } => {
            let total = item_count(targets.len())?;
            let descriptor = delete_files(targets, on_error.policy(total))?;
            run_operation(&app, descriptor).await.map(drop)
        }
        Command::Extract {
            archive,
            dest,
            options,
        } => run_extract(&app, &archive, &dest, &options).await,
        Command::Tickets { action } => run_tickets(&app, action).await,
        Command::Pending { action } => run_pending(&app, action).await,
        Command::Savedata { action } => run_savedata(&app, action).await,
        Command::Extdata { action } => run_extdata(&app, action).await,
    }
}

fn open_store(app: &App) -> Result<ContentStore> {
    ContentStore::open(&app.config.content_root).with_context(|| {
        format!(
            "Failed to open content store at {}",
            app.config.content_root.display()
        )
    })
}

async fn run_copy(app: &App, sources: &[PathBuf], dest: &Path, options: &TransferArgs) -> Result<()> {
    let backend = FsCopyBackend::plan(sources, dest).context("Failed to plan copy")?;
    let total = item_count(backend.len())?;
    let backend = backend
        .with_conflict_resolution(options.conflict.into())
        .with_policy(options.on_error.policy(total));
    let descriptor = OperationDescriptor::copy(total, backend).with_copy_empty(options.copy_empty);
    run_operation(app, descriptor).await.map(drop)
}

async fn run_extract(app: &App, archive: &Path, dest: &Path, options: &TransferArgs) -> Result<()> {
    let backend = ArchiveExtractBackend::open(archive, dest)
        .with_context(|| format!("Failed to read {}", archive.display()))?;
    let total = item_count(backend.len())?;
    let backend = backend
        .with_conflict_resolution(options.conflict.into())
        .with_policy(options.on_error.policy(total));
    let descriptor = OperationDescriptor::copy(total, backend).with_copy_empty(options.copy_empty);
    run_operation(app, descriptor).await.map(drop)
}

async fn run_tickets(app: &App, action: TicketsAction) -> Result<()> {
    let store = open_store(app)?;
    match action {
        TicketsAction::List => {
            let tickets = store.list_tickets()?;
            print_listing(app, &tickets, |t| format!("{}  {:>10}", t.title_id, format_size(t.size)))
        }
        TicketsAction::Install { dir, on_error } => {
            let descriptor = install_tickets(&store, &dir, on_error.store_policy())
                .with_context(|| format!("Failed to list tickets in {}", dir.display()))?;
            if descriptor.item_count() == 0 {
                eprintln!("No .tik files found in {}", dir.display());
                return Ok(());
            }
            let report = run_operation(app, descriptor).await?;
            if !app.json {
                for ticket in report.descriptor.backend().installed() {
                    println!("Installed ticket {}", ticket.title_id);
                }
            }
            Ok(())
        }
        TicketsAction::Delete { title_ids, on_error } => {
            let descriptor = delete_tickets(&store, &title_ids, on_error.store_policy())?;
            run_operation(app, descriptor).await.map(drop)
        }
    }
}

async fn run_pending(app: &App, action: PendingAction) -> Result<()> {
    let store = open_store(app)?;
    match action {
        PendingAction::List => {
            let titles = store.list_pending_titles()?;
            print_listing(app, &titles, |t| {
                format!("{}  {:<8} {:>10}", t.title_id, t.media, format_size(t.size))
            })
        }
        PendingAction::Delete {
            title_ids,
            media,
            on_error,
        } => {
            let titles: Vec<_> = store
                .list_pending_titles()?
                .into_iter()
                .filter(|t| title_ids.contains(&t.title_id))
                .filter(|t| media.is_none_or(|m| m == t.media))
                .collect();
            if titles.is_empty() {
                bail!("No matching pending titles");
            }
            let descriptor = delete_pending_titles(&store, &titles, on_error.store_policy())?;
            run_operation(app, descriptor).await.map(drop)
        }
        PendingAction::DeleteAll { on_error } => {
            let descriptor = delete_all_pending_titles(&store, on_error.store_policy())?;
            if descriptor.item_count() == 0 {
                eprintln!("No pending titles");
                return Ok(());
            }
            run_operation(app, descriptor).await.map(drop)
        }
    }
}

async fn run_savedata(app: &App, action: SavedataAction) -> Result<()> {
    let store = open_store(app)?;
    match action {
        SavedataAction::List => {
            let saves = store.list_system_save_data()?;
            print_listing(app, &saves, |s| format!("{}  {:>10}", s.save_id, format_size(s.size)))
        }
        SavedataAction::Delete { save_ids, on_error } => {
            let descriptor = delete_system_save_data(&store, &save_ids, on_error.store_policy())?;
            run_operation(app, descriptor).await.map(drop)
        }
        SavedataAction::Browse { save_id } => {
            let files = store.browse_system_save_data(save_id)?;
            print_listing(app, &files, |path| path.display().to_string())
        }
    }
}

async fn run_extdata(app: &App, action: ExtdataAction) -> Result<()> {
    let store = open_store(app)?;
    match action {
        ExtdataAction::List => {
            let containers = store.list_ext_save_data()?;
            print_listing(app, &containers, |e| {
                format!(
                    "{}  {:<8} {:>10}{}",
                    e.ext_id,
                    e.media,
                    format_size(e.size),
                    if e.has_boss { "  boss" } else { "" }
                )
            })
        }
        ExtdataAction::Delete {
            ext_ids,
            media,
            on_error,
        } => {
            let containers: Vec<_> = store
                .list_ext_save_data()?
                .into_iter()
                .filter(|e| ext_ids.contains(&e.ext_id))
                .filter(|e| media.is_none_or(|m| m == e.media))
                .collect();
            if containers.is_empty() {
                bail!("No matching ext save data");
            }
            let descriptor = delete_ext_save_data(&store, &containers, on_error.store_policy())?;
            run_operation(app, descriptor).await.map(drop)
        }
        ExtdataAction::Browse { ext_id, media } => {
            let container = store
                .list_ext_save_data()?
                .into_iter()
                .find(|e| e.ext_id == ext_id && media.is_none_or(|m| m == e.media));
            let Some(container) = container else {
                bail!("Ext save data {ext_id} not found");
            };
            let files = store.browse_boss_ext_save_data(&container)?;
            print_listing(app, &files, |path| path.display().to_string())
        }
    }
}

/// Dispatch `descriptor`, render progress every tick and print the outcome.
///
/// The first Ctrl-C requests cancellation; the worker stops at the next item
/// boundary.
async fn run_operation<B>(app: &App, descriptor: OperationDescriptor<B>) -> Result<OperationReport<B>>
where
    B: DataOpBackend + Send + 'static,
{
    let task = app
        .dispatcher
        .dispatch(descriptor)
        .context("Failed to start operation")?;
    let cancel = task.cancel_handle();

    let mut interval = tokio::time::interval(app.config.tick());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancel_requested = false;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            signal = &mut ctrl_c, if !cancel_requested => {
                signal.context("Failed to listen for Ctrl-C")?;
                cancel.request_cancel();
                cancel_requested = true;
                if !app.json {
                    eprintln!();
                    eprintln!("Cancelling after the current item...");
                }
            }
        }

        let progress = task.poll_progress();
        if !app.json {
            render_progress(&progress);
        }
        if progress.finished {
            break;
        }
    }

    let report = task.join().context("Operation worker failed")?;
    print_report(app, &report)?;
    Ok(report)
}

/// Draw one progress line over the previous one.
fn render_progress(progress: &ProgressSnapshot) {
    let mut stderr = std::io::stderr().lock();
    let _ = write!(stderr, "\r{}   ", progress_line(progress));
    let _ = stderr.flush();
}

/// Overall bar and item count, then the current item's bytes.
fn progress_line(progress: &ProgressSnapshot) -> String {
    format!(
        "{} {} / {} items  {} / {} ({:.0}%)",
        make_bar(progress.overall_fraction(), 20),
        progress.processed,
        progress.total,
        format_size(progress.current_processed),
        format_size(progress.current_total),
        progress.percentage()
    )
}

#[derive(Serialize)]
struct FailureJson {
    index: u32,
    error: String,
}

#[derive(Serialize)]
struct ReportJson {
    kind: titlemgr_ops::OperationKind,
    progress: ProgressSnapshot,
    cancelled: bool,
    success: bool,
    summary: String,
    failures: Vec<FailureJson>,
}

fn print_report<B>(app: &App, report: &OperationReport<B>) -> Result<()> {
    if app.json {
        let json = ReportJson {
            kind: report.kind,
            progress: report.progress,
            cancelled: report.cancelled,
            success: report.is_success(),
            summary: report.summary(),
            failures: report
                .failures
                .iter()
                .map(|f| FailureJson {
                    index: f.index,
                    error: f.error.to_string(),
                })
                .collect(),
        };
        println!("{}", serde_json::to_string_pretty(&json)?);
        return Ok(());
    }

    eprintln!();
    for failure in &report.failures {
        eprintln!("  item {}: {}", failure.index, failure.error);
    }

    if report.progress.is_clean_finish() {
        println!("{}", report.summary());
    } else {
        println!("Aborted: {}", report.summary());
    }
    Ok(())
}

/// Print `items` one per line, or as a JSON array.
fn print_listing<T: Serialize>(app: &App, items: &[T], line: impl Fn(&T) -> String) -> Result<()> {
    if app.json {
        println!("{}", serde_json::to_string_pretty(items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!(" Nothing found.");
        return Ok(());
    }

    for item in items {
        println!(" {}", line(item));
    }
    println!();
    println!(" {} item(s)", items.len());
    Ok(())
}

/// Create a simple ASCII bar.
fn make_bar(ratio: f64, width: usize) -> String {
    let filled = (ratio * width as f64).round() as usize;
    let empty = width.saturating_sub(filled);
    format!("[{}{}]", "█".repeat(filled), "░".repeat(empty))
}

/// Format size in human-readable form.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_line_shows_overall_and_item_progress() {
        let progress = ProgressSnapshot {
            processed: 1,
            total: 4,
            current_processed: 512,
            current_total: 1024,
            ..Default::default()
        };
        let line = progress_line(&progress);
        assert!(line.starts_with(&make_bar(0.25, 20)));
        assert!(line.contains("1 / 4 items"));
        assert!(line.ends_with("(50%)"));
    }

    #[test]
    fn test_empty_finished_operation_shows_full_bar() {
        let progress = ProgressSnapshot {
            finished: true,
            ..Default::default()
        };
        assert!(progress_line(&progress).starts_with(&make_bar(1.0, 20)));
    }

    #[test]
    fn test_savedata_browse_parses_save_id() {
        let cli = Cli::try_parse_from(["titlemgr", "savedata", "browse", "00010022"]).unwrap();
        match cli.command {
            Command::Savedata {
                action: SavedataAction::Browse { save_id },
            } => assert_eq!(save_id, SaveId(0x0001_0022)),
            _ => panic!("unexpected command"),
        }
    }
}
