use parking_lot::Mutex;
use snafu::ResultExt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use super::{IoSnafu, ReadableStorage, Storage, StorageError};

#[derive(Debug)]
struct FileStorageInner {
    file: File,
    size: u64,
}

impl FileStorageInner {
    fn check_size(&self, offset: u64, buf: &[u8]) -> Result<(), StorageError> {
        let end = offset + buf.len() as u64;
        if end > self.size {
            Err(StorageError::OutOfBounds {})
        } else {
            Ok(())
        }
    }
}

/// A storage backed by a host file, used for metadata files of a [`crate::volume::LocalVolume`].
///
/// Unlike a plain IO wrapper this one can shrink, as the integrity tree drops leaves on truncation.
#[derive(Debug)]
pub struct FileStorage(Mutex<FileStorageInner>);

impl FileStorage {
    pub fn new(mut file: File) -> Result<Self, StorageError> {
        let size = file
            .seek(SeekFrom::End(0))
            .context(IoSnafu { operation: "seek" })?;
        file.seek(SeekFrom::Start(0))
            .context(IoSnafu { operation: "seek" })?;
        Ok(Self(Mutex::new(FileStorageInner { file, size })))
    }
}

impl ReadableStorage for FileStorage {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        let mut inner = self.0.lock();
        inner.check_size(offset, buf)?;
        inner
            .file
            .seek(SeekFrom::Start(offset))
            .context(IoSnafu { operation: "seek" })?;
        inner.file.read_exact(buf).context(IoSnafu {
            operation: "read_exact",
        })?;
        Ok(())
    }

    fn get_size(&self) -> u64 {
        self.0.lock().size
    }
}

impl Storage for FileStorage {
    fn write(&self, offset: u64, buf: &[u8]) -> Result<(), StorageError> {
        let mut inner = self.0.lock();
        inner
            .file
            .seek(SeekFrom::Start(offset))
            .context(IoSnafu { operation: "seek" })?;
        inner.file.write_all(buf).context(IoSnafu {
            operation: "write_all",
        })?;
        inner.size = inner.size.max(offset + buf.len() as u64);
        Ok(())
    }

    fn flush(&self) -> Result<(), StorageError> {
        let mut inner = self.0.lock();
        inner.file.flush().context(IoSnafu { operation: "flush" })?;
        inner
            .file
            .sync_data()
            .context(IoSnafu { operation: "sync_data" })?;
        Ok(())
    }

    fn set_size(&self, new_size: u64) -> Result<(), StorageError> {
        let mut inner = self.0.lock();
        inner
            .file
            .set_len(new_size)
            .context(IoSnafu { operation: "set_len" })?;
        inner.size = new_size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ReadableStorageExt;

    #[test]
    fn write_past_end_grows_and_set_size_shrinks() {
        let file = tempfile::tempfile().unwrap();
        let storage = FileStorage::new(file).unwrap();
        assert_eq!(storage.get_size(), 0);

        storage.write(4, b"abcd").unwrap();
        assert_eq!(storage.get_size(), 8);
        assert_eq!(storage.read_all().unwrap(), b"\0\0\0\0abcd");

        storage.set_size(6).unwrap();
        assert_eq!(storage.read_all().unwrap(), b"\0\0\0\0ab");
        storage.flush().unwrap();
    }

    #[test]
    fn read_past_end_is_out_of_bounds() {
        let storage = FileStorage::new(tempfile::tempfile().unwrap()).unwrap();
        storage.write(0, b"xy").unwrap();

        let mut buf = [0; 3];
        assert!(matches!(
            storage.read(0, &mut buf),
            Err(StorageError::OutOfBounds {})
        ));
    }
}
