use crate::storage::{ReadableStorage, Storage, StorageError};
use parking_lot::RwLock;
use std::fmt::Debug;

/// In-memory storage. Mostly useful for tests and for volumes that keep metadata in memory.
#[derive(Default)]
pub struct VecStorage {
    data: RwLock<Vec<u8>>,
}

impl Debug for VecStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VecStorage")
            .field("size", &self.data.read().len())
            .finish()
    }
}

impl VecStorage {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data.into_inner()
    }
}

impl ReadableStorage for VecStorage {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        let data = self.data.read();

        let start = offset as usize;
        let end = start + buf.len();
        if end > data.len() {
            return Err(StorageError::OutOfBounds {});
        }
        buf.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn get_size(&self) -> u64 {
        self.data.read().len() as u64
    }
}

impl Storage for VecStorage {
    fn write(&self, offset: u64, buf: &[u8]) -> Result<(), StorageError> {
        let mut data = self.data.write();

        let start = offset as usize;
        let end = start + buf.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn set_size(&self, new_size: u64) -> Result<(), StorageError> {
        self.data.write().resize(new_size as usize, 0);
        Ok(())
    }
}
