use snafu::Snafu;

mod file_storage;
mod vec_storage;

pub use file_storage::FileStorage;
pub use vec_storage::VecStorage;

/// Byte-addressed storage that can be read at arbitrary offsets.
///
/// Reads are exact: a read that extends past [`ReadableStorage::get_size`] fails with
/// [`StorageError::OutOfBounds`] instead of returning a short count.
pub trait ReadableStorage: Send + Sync {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError>;
    fn get_size(&self) -> u64;
}

/// Writable storage. Writes past the current end grow the storage.
pub trait Storage: ReadableStorage {
    fn write(&self, offset: u64, buf: &[u8]) -> Result<(), StorageError>;
    fn flush(&self) -> Result<(), StorageError>;
    fn set_size(&self, new_size: u64) -> Result<(), StorageError>;
}

pub trait ReadableStorageExt: ReadableStorage {
    fn read_all(&self) -> Result<Vec<u8>, StorageError> {
        let mut buf = vec![0; self.get_size() as usize];
        self.read(0, &mut buf)?;
        Ok(buf)
    }
}

impl<T: ReadableStorage + ?Sized> ReadableStorageExt for T {}

#[derive(Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    #[snafu(display("IO error during {}: {}", operation, source))]
    Io {
        source: std::io::Error,
        operation: &'static str,
    },
    #[snafu(display("Attempt to read or write to a storage out of bounds"))]
    OutOfBounds {},
}
