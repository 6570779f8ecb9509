//! The capability interface the engine drives.

use std::io;

use titlemgr_core::DataOpError;

/// Storage-specific primitives for one data operation.
///
/// Items are addressed by their index in the operation's fixed item set.
/// Open handles are owned values: the engine hands each one back to the
/// matching `close_*` call exactly once, with `succeeded` telling the backend
/// whether to commit or discard.
///
/// Copy-only and delete-only backends implement the half they need; the
/// defaults for the other half report `Unsupported`.
pub trait DataOpBackend {
    /// Open source handle.
    type Source;
    /// Open destination handle.
    type Destination;

    /// Whether the item is a directory (created, never byte-transferred).
    fn is_source_directory(&mut self, index: u32) -> io::Result<bool> {
        let _ = index;
        Ok(false)
    }

    /// Create the destination directory for a directory item.
    fn make_destination_directory(&mut self, index: u32) -> io::Result<()> {
        let _ = index;
        Ok(())
    }

    /// Open the source of an item for reading.
    fn open_source(&mut self, index: u32) -> io::Result<Self::Source> {
        let _ = index;
        Err(unsupported("open_source"))
    }

    /// Total size of an open source in bytes.
    fn source_size(&mut self, source: &mut Self::Source) -> io::Result<u64> {
        let _ = source;
        Err(unsupported("source_size"))
    }

    /// Read up to `buf.len()` bytes at `offset`. Returns the number read.
    fn read_source(
        &mut self,
        source: &mut Self::Source,
        offset: u64,
        buf: &mut [u8],
    ) -> io::Result<usize> {
        let _ = (source, offset, buf);
        Err(unsupported("read_source"))
    }

    /// Release a source handle.
    fn close_source(
        &mut self,
        index: u32,
        source: Self::Source,
        succeeded: bool,
    ) -> io::Result<()> {
        let _ = (index, source, succeeded);
        Ok(())
    }

    /// Open the destination of an item.
    ///
    /// `first_block` holds the first chunk of source data (empty for
    /// zero-length items) so destinations that must inspect content before
    /// allocating, such as installers, can do so. The engine still writes
    /// that block through `write_destination` afterwards.
    fn open_destination(&mut self, index: u32, first_block: &[u8]) -> io::Result<Self::Destination> {
        let _ = (index, first_block);
        Err(unsupported("open_destination"))
    }

    /// Write `data` at `offset`. Returns the number of bytes accepted.
    fn write_destination(
        &mut self,
        destination: &mut Self::Destination,
        offset: u64,
        data: &[u8],
    ) -> io::Result<usize> {
        let _ = (destination, offset, data);
        Err(unsupported("write_destination"))
    }

    /// Release a destination handle, committing it if `succeeded`.
    fn close_destination(
        &mut self,
        index: u32,
        destination: Self::Destination,
        succeeded: bool,
    ) -> io::Result<()> {
        let _ = (index, destination, succeeded);
        Ok(())
    }

    /// Delete an item.
    fn delete_item(&mut self, index: u32) -> io::Result<()> {
        let _ = index;
        Err(unsupported("delete_item"))
    }

    /// Decide whether the operation continues after `error` on item `index`.
    ///
    /// Also called with [`DataOpError::Cancelled`] when a cancellation is
    /// observed; the answer is ignored in that case.
    fn on_item_error(&mut self, index: u32, error: &DataOpError) -> bool {
        let _ = (index, error);
        false
    }
}

fn unsupported(primitive: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("backend does not support {primitive}"),
    )
}
