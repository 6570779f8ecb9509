//! The data-operation engine.
//!
//! Runs one [`OperationDescriptor`] to completion or abort on the calling
//! thread. Cancellation is observed only at item boundaries, so an item that
//! has started always has its handles closed before the engine stops.

use titlemgr_core::{DataOpError, ItemStep};
use tracing::{debug, info, warn};

use crate::progress::{ItemFailure, ProgressRecord};
use crate::task::CancelHandle;
use crate::{DataOpBackend, OperationDescriptor, OperationKind};

/// What happened during one engine run.
#[derive(Debug, Default)]
pub struct EngineOutcome {
    pub failures: Vec<ItemFailure>,
    pub cancelled: bool,
    pub premature_stop: bool,
}

/// Executes a descriptor item by item.
pub struct DataOpEngine<'a, B: DataOpBackend> {
    descriptor: &'a mut OperationDescriptor<B>,
    progress: &'a ProgressRecord,
    cancel: &'a CancelHandle,
    buffer: &'a mut [u8],
}

impl<'a, B: DataOpBackend> DataOpEngine<'a, B> {
    /// Create an engine. `buffer` is the transfer block; its length is the
    /// block size and must be non-zero.
    pub fn new(
        descriptor: &'a mut OperationDescriptor<B>,
        progress: &'a ProgressRecord,
        cancel: &'a CancelHandle,
        buffer: &'a mut [u8],
    ) -> Self {
        Self {
            descriptor,
            progress,
            cancel,
            buffer,
        }
    }

    /// Process every item, then mark the progress record finished.
    pub fn run(self) -> EngineOutcome {
        let kind = self.descriptor.kind();
        let total = self.descriptor.item_count();
        let copy_empty = self.descriptor.copy_empty();
        let backend = self.descriptor.backend_mut();
        let mut outcome = EngineOutcome::default();

        info!(target: "data_op", %kind, total, "operation started");

        for index in 0..total {
            if self.cancel.is_cancelled() {
                debug!(target: "data_op", index, step = %ItemStep::Aborted, "cancellation observed");
                backend.on_item_error(index, &DataOpError::Cancelled);
                outcome.cancelled = true;
                outcome.premature_stop = true;
                break;
            }

            self.progress.begin_item();
            let result = match kind {
                OperationKind::Copy => {
                    copy_item(backend, self.progress, self.buffer, index, copy_empty)
                }
                OperationKind::Delete => delete_item(backend, index),
            };

            if let Err(error) = result {
                warn!(target: "data_op", index, %error, step = %ItemStep::ErrorHandling, "item failed");
                self.progress.record_failure();
                let keep_going = !error.is_cancelled() && backend.on_item_error(index, &error);
                outcome.failures.push(ItemFailure { index, error });
                if !keep_going {
                    debug!(target: "data_op", index, step = %ItemStep::Aborted, "error policy stopped the operation");
                    outcome.premature_stop = true;
                    break;
                }
            } else {
                debug!(target: "data_op", index, step = %ItemStep::Done, "item done");
            }

            self.progress.complete_item();
        }

        self.progress.finish(outcome.premature_stop);
        info!(
            target: "data_op",
            %kind,
            processed = self.progress.snapshot().processed,
            failed = outcome.failures.len(),
            premature = outcome.premature_stop,
            "operation finished"
        );
        outcome
    }
}

fn delete_item<B: DataOpBackend>(backend: &mut B, index: u32) -> Result<(), DataOpError> {
    backend
        .delete_item(index)
        .map_err(|e| DataOpError::backend(index, ItemStep::Deleting, e))
}

fn copy_item<B: DataOpBackend>(
    backend: &mut B,
    progress: &ProgressRecord,
    buffer: &mut [u8],
    index: u32,
    copy_empty: bool,
) -> Result<(), DataOpError> {
    let is_dir = backend
        .is_source_directory(index)
        .map_err(|e| DataOpError::backend(index, ItemStep::CheckingSource, e))?;
    if is_dir {
        return backend
            .make_destination_directory(index)
            .map_err(|e| DataOpError::backend(index, ItemStep::MakingDirectory, e));
    }

    let mut source = backend
        .open_source(index)
        .map_err(|e| DataOpError::backend(index, ItemStep::OpeningSource, e))?;

    let result = transfer(backend, progress, buffer, index, &mut source, copy_empty);
    let closed = backend.close_source(index, source, result.is_ok());
    settle(index, ItemStep::ClosingSource, result, closed)
}

fn transfer<B: DataOpBackend>(
    backend: &mut B,
    progress: &ProgressRecord,
    buffer: &mut [u8],
    index: u32,
    source: &mut B::Source,
    copy_empty: bool,
) -> Result<(), DataOpError> {
    let total = backend
        .source_size(source)
        .map_err(|e| DataOpError::backend(index, ItemStep::Sizing, e))?;
    progress.set_current_total(total);

    if total == 0 {
        if !copy_empty {
            debug!(target: "data_op", index, "skipping empty item");
            return Ok(());
        }
        let destination = backend
            .open_destination(index, &[])
            .map_err(|e| DataOpError::backend(index, ItemStep::OpeningDestination, e))?;
        return backend
            .close_destination(index, destination, true)
            .map_err(|e| DataOpError::backend(index, ItemStep::ClosingDestination, e));
    }

    let first_len = read_block(backend, source, buffer, index, 0, total)?;
    let mut destination = backend
        .open_destination(index, &buffer[..first_len])
        .map_err(|e| DataOpError::backend(index, ItemStep::OpeningDestination, e))?;

    let result = write_blocks(
        backend,
        progress,
        buffer,
        index,
        source,
        &mut destination,
        first_len,
        total,
    );
    let closed = backend.close_destination(index, destination, result.is_ok());
    settle(index, ItemStep::ClosingDestination, result, closed)
}

#[allow(clippy::too_many_arguments)]
fn write_blocks<B: DataOpBackend>(
    backend: &mut B,
    progress: &ProgressRecord,
    buffer: &mut [u8],
    index: u32,
    source: &mut B::Source,
    destination: &mut B::Destination,
    first_len: usize,
    total: u64,
) -> Result<(), DataOpError> {
    let mut offset = 0u64;
    let mut pending = first_len;

    loop {
        write_all(backend, destination, index, offset, &buffer[..pending])?;
        offset += pending as u64;
        progress.set_current_processed(offset);

        if offset >= total {
            return Ok(());
        }
        pending = read_block(backend, source, buffer, index, offset, total)?;
    }
}

fn read_block<B: DataOpBackend>(
    backend: &mut B,
    source: &mut B::Source,
    buffer: &mut [u8],
    index: u32,
    offset: u64,
    total: u64,
) -> Result<usize, DataOpError> {
    let remaining = total - offset;
    let want = buffer.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
    let read = backend
        .read_source(source, offset, &mut buffer[..want])
        .map_err(|e| DataOpError::backend(index, ItemStep::Transferring, e))?;
    if read == 0 {
        return Err(DataOpError::ShortRead {
            index,
            offset,
            expected: total,
        });
    }
    Ok(read.min(want))
}

fn write_all<B: DataOpBackend>(
    backend: &mut B,
    destination: &mut B::Destination,
    index: u32,
    offset: u64,
    data: &[u8],
) -> Result<(), DataOpError> {
    let mut written = 0usize;
    while written < data.len() {
        let at = offset + written as u64;
        let accepted = backend
            .write_destination(destination, at, &data[written..])
            .map_err(|e| DataOpError::backend(index, ItemStep::Transferring, e))?;
        if accepted == 0 {
            return Err(DataOpError::ShortWrite { index, offset: at });
        }
        written += accepted.min(data.len() - written);
    }
    Ok(())
}

/// Combine a step result with the close that followed it. The step's own
/// error wins; a close error after a failure is only logged.
fn settle(
    index: u32,
    close_step: ItemStep,
    result: Result<(), DataOpError>,
    closed: std::io::Result<()>,
) -> Result<(), DataOpError> {
    match (result, closed) {
        (Ok(()), Ok(())) => Ok(()),
        (Ok(()), Err(e)) => Err(DataOpError::backend(index, close_step, e)),
        (Err(error), Ok(())) => Err(error),
        (Err(error), Err(close_error)) => {
            warn!(target: "data_op", index, step = %close_step, %close_error, "close after failure also failed");
            Err(error)
        }
    }
}
