#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use objenc::crypto::{CipherAlgorithm, SignHash};
use objenc::object_io::{PartialObjectReaderSync, PartialObjectWriterSync, VecObjectStore};
use objenc::storage::{FileStorage, ReadableStorage, Storage, StorageError, VecStorage};
use objenc::volume::{FileAttr, LocalVolume, OpenFlags, Volume, VolumeError};
use objenc::{EncryptionOptions, FileKeys, ObjectEncryptor};
use parking_lot::Mutex;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

pub const BLOCK: u64 = 16;
pub const OBJECT: u64 = 1024;

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn options() -> EncryptionOptions {
    EncryptionOptions {
        block_size: BLOCK as u32,
        object_size_kb: (OBJECT / 1024) as u32,
        cipher: CipherAlgorithm::Aes256Ctr,
        hash: SignHash::Sha256,
    }
}

pub fn keys() -> FileKeys {
    FileKeys {
        enc_key: (0..32).collect(),
        sign_key: b"metadata signing key".to_vec(),
    }
}

pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// A volume in a fresh temporary directory.
pub fn volume() -> (TempDir, LocalVolume) {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let volume = LocalVolume::new(dir.path());
    (dir, volume)
}

pub fn open<V: Volume>(volume: &V, file_id: u64, size: u64) -> ObjectEncryptor<V::File> {
    ObjectEncryptor::new(volume, &options(), &keys(), file_id, &FileAttr { size }).unwrap()
}

/// In-memory object store remembering every ciphertext write.
pub struct RecordingStore {
    pub inner: VecObjectStore,
    writes: Mutex<Vec<(u64, u64, usize)>>,
    fail_reads: AtomicBool,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self {
            inner: VecObjectStore::new(OBJECT),
            writes: Mutex::new(Vec::new()),
            fail_reads: AtomicBool::new(false),
        }
    }

    /// `(object_no, offset_in_object, len)` of every write so far.
    pub fn writes(&self) -> Vec<(u64, u64, usize)> {
        self.writes.lock().clone()
    }

    pub fn clear_writes(&self) {
        self.writes.lock().clear();
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }
}

impl PartialObjectReaderSync for RecordingStore {
    fn read_partial_sync(
        &self,
        object_no: u64,
        buf: &mut [u8],
        offset_in_object: u64,
    ) -> Result<usize, StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(injected("read"));
        }
        self.inner.read_partial_sync(object_no, buf, offset_in_object)
    }
}

impl PartialObjectWriterSync for RecordingStore {
    fn write_partial_sync(
        &self,
        object_no: u64,
        buf: &[u8],
        offset_in_object: u64,
    ) -> Result<(), StorageError> {
        self.writes
            .lock()
            .push((object_no, offset_in_object, buf.len()));
        self.inner.write_partial_sync(object_no, buf, offset_in_object)
    }
}

fn injected(operation: &'static str) -> StorageError {
    StorageError::Io {
        source: std::io::Error::new(std::io::ErrorKind::Other, "injected failure"),
        operation,
    }
}

/// A [`LocalVolume`] whose files start failing writes or flushes on request.
pub struct FlakyVolume {
    pub inner: LocalVolume,
    pub fail_writes: Arc<AtomicBool>,
    pub fail_flushes: Arc<AtomicBool>,
}

impl FlakyVolume {
    pub fn new(inner: LocalVolume) -> Self {
        Self {
            inner,
            fail_writes: Arc::new(AtomicBool::new(false)),
            fail_flushes: Arc::new(AtomicBool::new(false)),
        }
    }
}

pub struct FlakyFile {
    inner: FileStorage,
    fail_writes: Arc<AtomicBool>,
    fail_flushes: Arc<AtomicBool>,
}

impl ReadableStorage for FlakyFile {
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), StorageError> {
        self.inner.read(offset, buf)
    }

    fn get_size(&self) -> u64 {
        self.inner.get_size()
    }
}

impl Storage for FlakyFile {
    fn write(&self, offset: u64, buf: &[u8]) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(injected("write"));
        }
        self.inner.write(offset, buf)
    }

    fn flush(&self) -> Result<(), StorageError> {
        if self.fail_flushes.load(Ordering::SeqCst) {
            return Err(injected("flush"));
        }
        self.inner.flush()
    }

    fn set_size(&self, new_size: u64) -> Result<(), StorageError> {
        self.inner.set_size(new_size)
    }
}

impl Volume for FlakyVolume {
    type File = FlakyFile;

    fn open_file(
        &self,
        path: &str,
        flags: OpenFlags,
        mode: u32,
    ) -> Result<Self::File, VolumeError> {
        Ok(FlakyFile {
            inner: self.inner.open_file(path, flags, mode)?,
            fail_writes: self.fail_writes.clone(),
            fail_flushes: self.fail_flushes.clone(),
        })
    }

    fn make_directory(&self, path: &str, mode: u32) -> Result<(), VolumeError> {
        self.inner.make_directory(path, mode)
    }

    fn get_attr(&self, path: &str) -> Result<FileAttr, VolumeError> {
        self.inner.get_attr(path)
    }

    fn unlink(&self, path: &str) -> Result<(), VolumeError> {
        self.inner.unlink(path)
    }
}

/// A volume that answers every call from a script and records the calls made.
///
/// `open_file` fails with the queued errors in order and succeeds with an empty file once the
/// queue is drained.
pub struct ScriptedVolume {
    open_errors: Mutex<VecDeque<VolumeError>>,
    mkdir_error: Mutex<Option<VolumeError>>,
    calls: Mutex<Vec<&'static str>>,
}

impl ScriptedVolume {
    pub fn new(open_errors: Vec<VolumeError>, mkdir_error: Option<VolumeError>) -> Self {
        init_logging();
        Self {
            open_errors: Mutex::new(open_errors.into()),
            mkdir_error: Mutex::new(mkdir_error),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }
}

pub fn not_found(path: &str) -> VolumeError {
    VolumeError::NotFound {
        path: path.to_string(),
    }
}

pub fn io_error(path: &str, operation: &'static str) -> VolumeError {
    VolumeError::Io {
        path: path.to_string(),
        operation,
        source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "injected failure"),
    }
}

impl Volume for ScriptedVolume {
    type File = VecStorage;

    fn open_file(
        &self,
        _path: &str,
        flags: OpenFlags,
        _mode: u32,
    ) -> Result<Self::File, VolumeError> {
        let call = if flags.contains(OpenFlags::CREATE) {
            "create"
        } else {
            "open"
        };
        self.calls.lock().push(call);
        match self.open_errors.lock().pop_front() {
            Some(e) => Err(e),
            None => Ok(VecStorage::default()),
        }
    }

    fn make_directory(&self, _path: &str, _mode: u32) -> Result<(), VolumeError> {
        self.calls.lock().push("make_directory");
        match self.mkdir_error.lock().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn get_attr(&self, path: &str) -> Result<FileAttr, VolumeError> {
        self.calls.lock().push("get_attr");
        Err(not_found(path))
    }

    fn unlink(&self, path: &str) -> Result<(), VolumeError> {
        self.calls.lock().push("unlink");
        Err(not_found(path))
    }
}
