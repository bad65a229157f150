use futures::executor::block_on;
use snafu::ResultExt;
use tracing::debug;

use super::operation::Operation;
use super::{EncryptorError, FileSize, IntegritySnafu, ObjectEncryptor};
use crate::object_io::{PartialObjectReaderSync, PartialObjectWriterSync, SyncObjectIo};
use crate::storage::Storage;

pub struct TruncateOperation<'a, M: Storage> {
    op: Operation<'a, M>,
    new_file_size: u64,
}

impl<'a, M: Storage> TruncateOperation<'a, M> {
    pub(super) fn new(
        enc: &'a mut ObjectEncryptor<M>,
        new_file_size: u64,
    ) -> Result<Self, EncryptorError> {
        let op = Operation::new(enc)?;
        Ok(Self { op, new_file_size })
    }

    pub fn old_file_size(&self) -> u64 {
        self.op.old_file_size
    }

    pub fn new_file_size(&self) -> u64 {
        self.new_file_size
    }

    /// Resizes the integrity tree, re-encrypts the block at the unaligned boundary if there is
    /// one and commits.
    pub fn truncate<R, W>(mut self, reader: &R, writer: &W) -> Result<(), EncryptorError>
    where
        R: PartialObjectReaderSync + ?Sized,
        W: PartialObjectWriterSync + ?Sized,
    {
        let block_size = self.op.block_size();
        let object_size = self.op.object_size();
        let old = self.op.old_file_size;
        let new = self.new_file_size;
        if new == old {
            debug!(file_size = old, "truncate to the current size");
            return Ok(());
        }

        let new_last = (new > 0).then(|| (new - 1) / block_size);
        // growing re-encrypts the old final block, shrinking the new one
        let boundary = if new > old { old } else { new };
        let aligned = boundary % block_size == 0;
        debug!(
            mode = ?self.op.mode,
            old_file_size = old,
            new_file_size = new,
            ?new_last,
            aligned,
            "truncate operation"
        );

        self.op.tree.start_truncate(new_last, aligned);
        self.op.file_size = new;
        if !aligned {
            block_on(self.op.write_object(
                &SyncObjectIo(reader),
                &SyncObjectIo(writer),
                boundary / object_size,
                &[],
                boundary % object_size,
            ))?;
        }

        let op = &mut self.op;
        let result = op
            .tree
            .finish_truncate(&op.enc.meta_file, &op.enc.signer)
            .context(IntegritySnafu);
        if op.tree.is_persisted() {
            op.enc.file_size = FileSize::Known(new);
        }
        result
    }
}
