//! Raw (ciphertext) access to byte ranges of single storage objects.
//!
//! The encryption layer is written once against the asynchronous traits. Blocking providers are
//! adapted with [`SyncObjectIo`], which runs the call eagerly and hands back an already completed
//! future.

use futures::future::{self, FutureExt, LocalBoxFuture};

use crate::storage::StorageError;

mod vec_object_store;

pub use vec_object_store::VecObjectStore;

pub trait PartialObjectReader {
    /// Reads up to `buf.len()` bytes at `offset_in_object` of object `object_no`.
    ///
    /// Resolves to the number of bytes read, which is smaller than requested at the end of the
    /// stored data.
    fn read_partial<'a>(
        &'a self,
        object_no: u64,
        buf: &'a mut [u8],
        offset_in_object: u64,
    ) -> LocalBoxFuture<'a, Result<usize, StorageError>>;
}

pub trait PartialObjectWriter {
    fn write_partial<'a>(
        &'a self,
        object_no: u64,
        buf: &'a [u8],
        offset_in_object: u64,
    ) -> LocalBoxFuture<'a, Result<(), StorageError>>;
}

pub trait PartialObjectReaderSync {
    fn read_partial_sync(
        &self,
        object_no: u64,
        buf: &mut [u8],
        offset_in_object: u64,
    ) -> Result<usize, StorageError>;
}

pub trait PartialObjectWriterSync {
    fn write_partial_sync(
        &self,
        object_no: u64,
        buf: &[u8],
        offset_in_object: u64,
    ) -> Result<(), StorageError>;
}

/// Exposes a blocking reader or writer through the asynchronous traits.
pub struct SyncObjectIo<'a, T: ?Sized>(pub &'a T);

impl<T: PartialObjectReaderSync + ?Sized> PartialObjectReader for SyncObjectIo<'_, T> {
    fn read_partial<'a>(
        &'a self,
        object_no: u64,
        buf: &'a mut [u8],
        offset_in_object: u64,
    ) -> LocalBoxFuture<'a, Result<usize, StorageError>> {
        future::ready(self.0.read_partial_sync(object_no, buf, offset_in_object)).boxed_local()
    }
}

impl<T: PartialObjectWriterSync + ?Sized> PartialObjectWriter for SyncObjectIo<'_, T> {
    fn write_partial<'a>(
        &'a self,
        object_no: u64,
        buf: &'a [u8],
        offset_in_object: u64,
    ) -> LocalBoxFuture<'a, Result<(), StorageError>> {
        future::ready(self.0.write_partial_sync(object_no, buf, offset_in_object)).boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use futures::FutureExt;

    #[test]
    fn sync_adapter_completes_immediately() {
        let store = VecObjectStore::new(64);
        let io = SyncObjectIo(&store);

        block_on(io.write_partial(1, b"ciphertext", 3)).unwrap();

        let mut buf = [0u8; 16];
        let read = block_on(io.read_partial(1, &mut buf, 3)).unwrap();
        assert_eq!(read, 10);
        assert_eq!(&buf[..read], b"ciphertext");

        // the future is ready on first poll
        let mut buf = [0u8; 4];
        let ready = io.read_partial(1, &mut buf, 3).now_or_never();
        assert!(matches!(ready, Some(Ok(4))));
    }
}
