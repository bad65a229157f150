use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;

use super::{PartialObjectReaderSync, PartialObjectWriterSync};
use crate::storage::StorageError;

#[derive(Default)]
struct Objects {
    data: BTreeMap<u64, Vec<u8>>,
    size: u64,
}

/// In-memory object store behaving like a storage server for sparse files.
///
/// The store keeps a logical size spanning all objects. Reads are served up to that size, and
/// ranges that were never written inside it read back as zeros.
pub struct VecObjectStore {
    object_size: u64,
    objects: RwLock<Objects>,
}

impl VecObjectStore {
    pub fn new(object_size: u64) -> Self {
        assert!(object_size > 0, "object size must be positive");
        Self {
            object_size,
            objects: RwLock::new(Objects::default()),
        }
    }

    pub fn object_size(&self) -> u64 {
        self.object_size
    }

    pub fn get_size(&self) -> u64 {
        self.objects.read().size
    }

    /// Sets the logical size, dropping everything stored past it.
    pub fn set_size(&self, new_size: u64) {
        let mut objects = self.objects.write();
        let object_size = self.object_size;
        objects
            .data
            .retain(|&object_no, _| object_no * object_size < new_size);
        for (&object_no, data) in objects.data.iter_mut() {
            let limit = (new_size - object_no * object_size).min(object_size) as usize;
            data.truncate(limit);
        }
        objects.size = new_size;
    }

    /// Bytes physically stored for an object, without zero-padding.
    pub fn object(&self, object_no: u64) -> Vec<u8> {
        self.objects
            .read()
            .data
            .get(&object_no)
            .cloned()
            .unwrap_or_default()
    }
}

impl fmt::Debug for VecObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let objects = self.objects.read();
        f.debug_struct("VecObjectStore")
            .field("object_size", &self.object_size)
            .field("objects", &objects.data.len())
            .field("size", &objects.size)
            .finish()
    }
}

impl PartialObjectReaderSync for VecObjectStore {
    fn read_partial_sync(
        &self,
        object_no: u64,
        buf: &mut [u8],
        offset_in_object: u64,
    ) -> Result<usize, StorageError> {
        if offset_in_object > self.object_size {
            return Err(StorageError::OutOfBounds {});
        }
        let objects = self.objects.read();

        let start = object_no * self.object_size + offset_in_object;
        let available = objects
            .size
            .saturating_sub(start)
            .min(self.object_size - offset_in_object)
            .min(buf.len() as u64) as usize;
        let buf = &mut buf[..available];

        let stored = objects
            .data
            .get(&object_no)
            .map(|data| data.get(offset_in_object as usize..).unwrap_or_default())
            .unwrap_or_default();
        let copied = stored.len().min(available);
        buf[..copied].copy_from_slice(&stored[..copied]);
        buf[copied..].fill(0);

        Ok(available)
    }
}

impl PartialObjectWriterSync for VecObjectStore {
    fn write_partial_sync(
        &self,
        object_no: u64,
        buf: &[u8],
        offset_in_object: u64,
    ) -> Result<(), StorageError> {
        let end = offset_in_object + buf.len() as u64;
        if end > self.object_size {
            return Err(StorageError::OutOfBounds {});
        }
        let mut objects = self.objects.write();

        let data = objects.data.entry(object_no).or_default();
        if data.len() < end as usize {
            data.resize(end as usize, 0);
        }
        data[offset_in_object as usize..end as usize].copy_from_slice(buf);

        let global_end = object_no * self.object_size + end;
        objects.size = objects.size.max(global_end);
        Ok(())
    }
}
