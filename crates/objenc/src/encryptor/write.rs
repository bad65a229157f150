use futures::executor::block_on;
use snafu::ResultExt;
use tracing::{debug, error, warn};

use super::operation::Operation;
use super::{AbortedSnafu, EncryptorError, FileSize, IntegritySnafu, ObjectEncryptor};
use crate::object_io::{
    PartialObjectReader, PartialObjectReaderSync, PartialObjectWriter, PartialObjectWriterSync,
    SyncObjectIo,
};
use crate::storage::Storage;

/// A write of one byte range of the file.
///
/// The new leaves and file size are published by [`WriteOperation::finish`]. An operation that is
/// dropped without being finished commits as well, unless one of its writes failed or the thread
/// is panicking.
pub struct WriteOperation<'a, M: Storage> {
    op: Operation<'a, M>,
    finished: bool,
}

impl<'a, M: Storage> WriteOperation<'a, M> {
    pub(super) fn new<R, W>(
        enc: &'a mut ObjectEncryptor<M>,
        offset: u64,
        count: u64,
        reader: &R,
        writer: &W,
    ) -> Result<Self, EncryptorError>
    where
        R: PartialObjectReaderSync + ?Sized,
        W: PartialObjectWriterSync + ?Sized,
    {
        assert!(count > 0, "empty write");
        let block_size = enc.block_size;
        let object_size = enc.object_size;

        let mut op = Operation::new(enc)?;
        let old = op.old_file_size;
        let end = offset + count;
        op.file_size = op.file_size.max(end);

        let first = offset / block_size;
        let last = (end - 1) / block_size;
        op.tree.start_write(
            first,
            offset % block_size == 0,
            last,
            end % block_size == 0 || end >= old,
            old % block_size == 0,
        );
        debug!(
            mode = ?op.mode,
            offset,
            count,
            old_file_size = old,
            file_size = op.file_size,
            "write operation"
        );

        let mut this = Self {
            op,
            finished: false,
        };

        // the old final block was short and is now followed by more data
        let new = this.op.file_size;
        if new > old && old % block_size != 0 && new / block_size != old / block_size {
            debug!(block = old / block_size, "re-encrypting the old final block");
            block_on(this.op.write_object(
                &SyncObjectIo(reader),
                &SyncObjectIo(writer),
                old / object_size,
                &[],
                old % object_size,
            ))?;
        }

        Ok(this)
    }

    /// File size after this write.
    pub fn file_size(&self) -> u64 {
        self.op.file_size
    }

    /// Writes the part of the operation's range that lies in object `object_no`.
    pub async fn write<R, W>(
        &mut self,
        object_no: u64,
        buf: &[u8],
        offset_in_object: u64,
        reader: &R,
        writer: &W,
    ) -> Result<(), EncryptorError>
    where
        R: PartialObjectReader + ?Sized,
        W: PartialObjectWriter + ?Sized,
    {
        assert!(!self.finished, "write operation already finished");
        self.op
            .write_object(reader, writer, object_no, buf, offset_in_object)
            .await
    }

    pub fn write_sync<R, W>(
        &mut self,
        object_no: u64,
        buf: &[u8],
        offset_in_object: u64,
        reader: &R,
        writer: &W,
    ) -> Result<(), EncryptorError>
    where
        R: PartialObjectReaderSync + ?Sized,
        W: PartialObjectWriterSync + ?Sized,
    {
        block_on(self.write(
            object_no,
            buf,
            offset_in_object,
            &SyncObjectIo(reader),
            &SyncObjectIo(writer),
        ))
    }

    /// Commits the integrity tree and publishes the new file size.
    pub fn finish(mut self) -> Result<(), EncryptorError> {
        self.commit()
    }

    fn commit(&mut self) -> Result<(), EncryptorError> {
        self.finished = true;
        if self.op.poisoned {
            return AbortedSnafu.fail();
        }

        let op = &mut self.op;
        let result = op
            .tree
            .finish_write(&op.enc.meta_file, &op.enc.signer)
            .context(IntegritySnafu);
        // the signed header already covers the new blocks
        if op.tree.is_persisted() {
            op.enc.file_size = FileSize::Known(op.file_size);
        }
        result
    }
}

impl<M: Storage> Drop for WriteOperation<'_, M> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if self.op.poisoned {
            warn!("discarding failed write operation");
            self.finished = true;
            return;
        }
        if std::thread::panicking() {
            warn!("discarding write operation interrupted by a panic");
            self.finished = true;
            return;
        }
        if let Err(e) = self.commit() {
            error!(error = %e, "failed to commit write operation");
        }
    }
}
