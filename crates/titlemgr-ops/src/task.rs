//! Worker-thread dispatch and cancellation.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use titlemgr_core::{DataOpError, EngineConfig};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::engine::DataOpEngine;
use crate::progress::{OperationReport, ProgressRecord, ProgressSnapshot};
use crate::{DataOpBackend, OperationDescriptor, OperationKind};

/// One-shot cancellation signal shared by the caller and the worker.
///
/// Once requested it stays requested; a new operation needs a new handle.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the worker to stop at the next item boundary. Idempotent.
    pub fn request_cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Spawns data operations on worker threads.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    config: EngineConfig,
}

impl Dispatcher {
    /// Create a dispatcher with the given engine settings.
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start `descriptor` on a new worker thread with a fresh cancel handle.
    pub fn dispatch<B>(&self, descriptor: OperationDescriptor<B>) -> Result<OperationTask<B>, DataOpError>
    where
        B: DataOpBackend + Send + 'static,
    {
        self.dispatch_with_cancel(descriptor, CancelHandle::new())
    }

    /// Start `descriptor` observing an existing cancel handle.
    ///
    /// Useful when the backend itself needs the handle before dispatch.
    pub fn dispatch_with_cancel<B>(
        &self,
        mut descriptor: OperationDescriptor<B>,
        cancel: CancelHandle,
    ) -> Result<OperationTask<B>, DataOpError>
    where
        B: DataOpBackend + Send + 'static,
    {
        self.config
            .validate()
            .map_err(|e| DataOpError::InvalidConfig {
                message: e.to_string(),
            })?;

        let mut buffer = allocate_buffer(self.config.block_size)?;
        let kind = descriptor.kind();
        let progress = Arc::new(ProgressRecord::new(descriptor.item_count()));

        let worker_progress = Arc::clone(&progress);
        let worker_cancel = cancel.clone();

        let handle = std::thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || {
                let guard = FinishGuard(&worker_progress);
                let outcome =
                    DataOpEngine::new(&mut descriptor, &worker_progress, &worker_cancel, &mut buffer)
                        .run();
                drop(guard);

                OperationReport {
                    kind,
                    progress: worker_progress.snapshot(),
                    failures: outcome.failures,
                    cancelled: outcome.cancelled,
                    descriptor,
                }
            })
            .map_err(|source| {
                error!(target: "data_op", %source, "failed to spawn worker");
                DataOpError::ResourceExhausted { source }
            })?;

        debug!(target: "data_op", %kind, total = progress.snapshot().total, "worker dispatched");

        Ok(OperationTask {
            kind,
            progress,
            cancel,
            handle: Some(handle),
            poll_interval: self.config.cancel_poll_interval(),
        })
    }
}

/// Start `descriptor` on a worker thread with the default engine settings.
pub fn dispatch<B>(descriptor: OperationDescriptor<B>) -> Result<OperationTask<B>, DataOpError>
where
    B: DataOpBackend + Send + 'static,
{
    Dispatcher::default().dispatch(descriptor)
}

fn allocate_buffer(size: usize) -> Result<Vec<u8>, DataOpError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(size)
        .map_err(|_| DataOpError::OutOfMemory { requested: size })?;
    buffer.resize(size, 0);
    Ok(buffer)
}

/// Marks the record finished if the engine unwinds before doing so itself.
struct FinishGuard<'a>(&'a ProgressRecord);

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        if !self.0.is_finished() {
            self.0.finish(true);
        }
    }
}

/// A running operation: its progress, its cancel handle and its worker.
pub struct OperationTask<B> {
    kind: OperationKind,
    progress: Arc<ProgressRecord>,
    cancel: CancelHandle,
    handle: Option<JoinHandle<OperationReport<B>>>,
    poll_interval: Duration,
}

impl<B> OperationTask<B> {
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Shared progress record, for readers on other threads.
    pub fn progress(&self) -> Arc<ProgressRecord> {
        Arc::clone(&self.progress)
    }

    /// Current progress.
    pub fn poll_progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Ask the worker to stop at the next item boundary.
    pub fn request_cancel(&self) {
        self.cancel.request_cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.progress.is_finished()
    }

    /// Request cancellation, then sleep-and-recheck until the worker reports
    /// finished. Blocks for at most the duration of the item in flight.
    pub fn cancel_and_wait(&self) -> ProgressSnapshot {
        self.cancel.request_cancel();
        while !self.progress.is_finished() {
            std::thread::sleep(self.poll_interval);
        }
        self.progress.snapshot()
    }

    /// Poll every `tick` until the worker reports finished.
    pub async fn wait(&self, tick: Duration) -> ProgressSnapshot {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        while !self.progress.is_finished() {
            interval.tick().await;
        }
        self.progress.snapshot()
    }

    /// Wait for the worker thread to exit and collect its report.
    pub fn join(mut self) -> Result<OperationReport<B>, DataOpError> {
        let handle = self.handle.take().ok_or(DataOpError::WorkerPanicked)?;
        handle.join().map_err(|_| DataOpError::WorkerPanicked)
    }
}

impl<B> std::fmt::Debug for OperationTask<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationTask")
            .field("kind", &self.kind)
            .field("progress", &self.progress.snapshot())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
