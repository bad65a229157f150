use futures::executor::block_on;
use tracing::debug;

use super::operation::Operation;
use super::{EncryptorError, ObjectEncryptor};
use crate::object_io::{PartialObjectReader, PartialObjectReaderSync, SyncObjectIo};
use crate::storage::Storage;

pub struct ReadOperation<'a, M: Storage> {
    op: Operation<'a, M>,
}

impl<'a, M: Storage> ReadOperation<'a, M> {
    pub(super) fn new(
        enc: &'a mut ObjectEncryptor<M>,
        offset: u64,
        count: u64,
    ) -> Result<Self, EncryptorError> {
        let block_size = enc.block_size;
        let mut op = Operation::new(enc)?;
        if offset < op.file_size && count > 0 {
            let first = offset / block_size;
            let last = (offset + count - 1) / block_size;
            op.tree.start_read(first, last);
            debug!(mode = ?op.mode, first, last, "read operation");
        }
        Ok(Self { op })
    }

    /// File size seen by this operation.
    pub fn file_size(&self) -> u64 {
        self.op.file_size
    }

    /// Reads `buf.len()` plaintext bytes at `offset_in_object` of object `object_no`.
    ///
    /// Returns the number of bytes read, which is short (possibly 0) at the end of the file.
    pub async fn read<R: PartialObjectReader + ?Sized>(
        &mut self,
        object_no: u64,
        buf: &mut [u8],
        offset_in_object: u64,
        reader: &R,
    ) -> Result<usize, EncryptorError> {
        self.op
            .read_object(reader, object_no, buf, offset_in_object)
            .await
    }

    pub fn read_sync<R: PartialObjectReaderSync + ?Sized>(
        &mut self,
        object_no: u64,
        buf: &mut [u8],
        offset_in_object: u64,
        reader: &R,
    ) -> Result<usize, EncryptorError> {
        block_on(self.read(object_no, buf, offset_in_object, &SyncObjectIo(reader)))
    }
}
