//! Transparent per-block encryption of the objects of one file.
//!
//! An [`ObjectEncryptor`] holds the per-file state: sizes, keys, the logical file size and the
//! metadata file carrying the integrity tree. Every request runs as a short-lived operation
//! ([`ReadOperation`], [`WriteOperation`], [`TruncateOperation`]) that mutably borrows the
//! encryptor, so operations on one file never overlap.

use snafu::{ResultExt, Snafu};
use tracing::debug;

use crate::config::{EncryptionOptions, FileKeys};
use crate::crypto::{CryptoError, FileCipher, Signer};
use crate::hash_tree::{HashTreeError, TreeMode};
use crate::object_io::{PartialObjectReaderSync, PartialObjectWriterSync};
use crate::range::object_chunks;
use crate::storage::{Storage, StorageError};
use crate::volume::{FileAttr, OpenFlags, Volume, VolumeError};

mod operation;
mod read;
mod truncate;
mod write;

pub use read::ReadOperation;
pub use truncate::TruncateOperation;
pub use write::WriteOperation;

/// Directory of the volume holding one metadata file per encrypted file.
pub const META_DIR: &str = "/.objenc_meta_files";

const META_MODE: u32 = 0o777;

#[derive(Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
pub enum EncryptorError {
    /// Encryption: could not access the metadata file: {source}
    MetaFile { source: VolumeError },
    /// Encryption: object I/O failed: {source}
    ObjectIo { source: StorageError },
    /// Encryption: {source}
    Integrity { source: HashTreeError },
    /// Encryption: {source}
    Crypto { source: CryptoError },
    /// Encryption: the operation was abandoned after an earlier failure
    Aborted {},
}

impl EncryptorError {
    /// Whether stored ciphertext or metadata failed authentication.
    ///
    /// I/O failures, including those on the metadata file, are not integrity failures.
    pub fn is_integrity_failure(&self) -> bool {
        match self {
            EncryptorError::Integrity { source } => source.is_integrity_failure(),
            _ => false,
        }
    }
}

/// Logical size of the file as known to the encryption layer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FileSize {
    /// No metadata was persisted when the file was opened. Reads as an empty file.
    Unpersisted,
    Known(u64),
}

impl FileSize {
    pub fn get(self) -> u64 {
        match self {
            FileSize::Unpersisted => 0,
            FileSize::Known(size) => size,
        }
    }
}

pub struct ObjectEncryptor<M: Storage> {
    block_size: u64,
    object_size: u64,
    cipher: FileCipher,
    signer: Signer,
    file_size: FileSize,
    meta_file: M,
    meta_path: String,
}

impl<M: Storage> std::fmt::Debug for ObjectEncryptor<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectEncryptor")
            .field("block_size", &self.block_size)
            .field("object_size", &self.object_size)
            .field("cipher", &self.cipher)
            .field("file_size", &self.file_size)
            .field("meta_path", &self.meta_path)
            .finish_non_exhaustive()
    }
}

pub fn meta_file_path(file_id: u64) -> String {
    format!("{}/{}", META_DIR, file_id)
}

/// Opens the metadata file of a file, creating it (and the metadata directory) when missing.
///
/// Returns the handle and whether the file already existed.
fn open_meta_file<V: Volume>(volume: &V, path: &str) -> Result<(V::File, bool), EncryptorError> {
    match volume.open_file(path, OpenFlags::RDWR, META_MODE) {
        Ok(file) => {
            debug!(path, "opened existing metadata file");
            return Ok((file, true));
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e).context(MetaFileSnafu),
    }

    let create = OpenFlags::RDWR | OpenFlags::CREATE;
    match volume.open_file(path, create, META_MODE) {
        Ok(file) => {
            debug!(path, "created metadata file");
            return Ok((file, false));
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e).context(MetaFileSnafu),
    }

    debug!(dir = META_DIR, "creating metadata directory");
    volume
        .make_directory(META_DIR, META_MODE)
        .context(MetaFileSnafu)?;
    let file = volume
        .open_file(path, create, META_MODE)
        .context(MetaFileSnafu)?;
    debug!(path, "created metadata file");
    Ok((file, false))
}

impl<M: Storage> ObjectEncryptor<M> {
    /// Sets up encryption for one file.
    ///
    /// `attr` are the file's attributes as fetched by the caller; its size becomes the logical
    /// file size unless the metadata file has to be created.
    ///
    /// Panics if the block and object sizes are inconsistent.
    pub fn new<V: Volume<File = M>>(
        volume: &V,
        options: &EncryptionOptions,
        keys: &FileKeys,
        file_id: u64,
        attr: &FileAttr,
    ) -> Result<Self, EncryptorError> {
        let block_size = options.block_size as u64;
        let object_size = options.object_size_bytes();
        assert!(block_size > 0, "block size must not be zero");
        assert!(
            object_size >= block_size,
            "object size {} is smaller than the block size {}",
            object_size,
            block_size
        );
        assert_eq!(
            object_size % block_size,
            0,
            "object size must be a multiple of the block size"
        );

        let cipher = FileCipher::new(options.cipher, &keys.enc_key).context(CryptoSnafu)?;
        let signer = Signer::new(options.hash, &keys.sign_key).context(CryptoSnafu)?;

        let meta_path = meta_file_path(file_id);
        let (meta_file, existed) = open_meta_file(volume, &meta_path)?;
        let file_size = if existed {
            FileSize::Known(attr.size)
        } else {
            FileSize::Unpersisted
        };
        debug!(
            file_id,
            block_size,
            object_size,
            cipher = %options.cipher,
            ?file_size,
            "opened encrypted file"
        );

        Ok(Self {
            block_size,
            object_size,
            cipher,
            signer,
            file_size,
            meta_file,
            meta_path,
        })
    }

    pub fn file_size(&self) -> FileSize {
        self.file_size
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn object_size(&self) -> u64 {
        self.object_size
    }

    pub fn meta_file_path(&self) -> &str {
        &self.meta_path
    }

    /// Mode the integrity tree of the next operation is opened in.
    pub fn tree_mode(&self) -> TreeMode {
        match self.file_size {
            FileSize::Unpersisted => TreeMode::Fresh,
            FileSize::Known(0) => TreeMode::Empty,
            FileSize::Known(size) => TreeMode::Existing {
                last_block: (size - 1) / self.block_size,
            },
        }
    }

    pub fn is_enc_meta_file(path: &str) -> bool {
        path.strip_prefix(META_DIR)
            .map_or(false, |rest| rest.starts_with('/'))
    }

    /// Deletes the metadata file of `file_id`.
    pub fn unlink<V: Volume>(volume: &V, file_id: u64) -> Result<(), EncryptorError> {
        let path = meta_file_path(file_id);
        debug!(path, "removing metadata file");
        volume.unlink(&path).context(MetaFileSnafu)
    }

    /// Starts a read of `count` bytes at the absolute file offset `offset`.
    pub fn read_operation(
        &mut self,
        offset: u64,
        count: u64,
    ) -> Result<ReadOperation<'_, M>, EncryptorError> {
        ReadOperation::new(self, offset, count)
    }

    /// Starts a write of `count` bytes at the absolute file offset `offset`.
    ///
    /// `reader` and `writer` are needed up front to re-encrypt the old final block when the
    /// write grows the file past it.
    pub fn write_operation<R, W>(
        &mut self,
        offset: u64,
        count: u64,
        reader: &R,
        writer: &W,
    ) -> Result<WriteOperation<'_, M>, EncryptorError>
    where
        R: PartialObjectReaderSync + ?Sized,
        W: PartialObjectWriterSync + ?Sized,
    {
        WriteOperation::new(self, offset, count, reader, writer)
    }

    pub fn truncate_operation(
        &mut self,
        new_file_size: u64,
    ) -> Result<TruncateOperation<'_, M>, EncryptorError> {
        TruncateOperation::new(self, new_file_size)
    }

    /// Changes the logical file size, re-encrypting the block that becomes (or stops being) the
    /// final one when it is not block aligned.
    ///
    /// Shrinking the objects themselves is left to the caller.
    pub fn truncate<R, W>(
        &mut self,
        new_file_size: u64,
        reader: &R,
        writer: &W,
    ) -> Result<(), EncryptorError>
    where
        R: PartialObjectReaderSync + ?Sized,
        W: PartialObjectWriterSync + ?Sized,
    {
        self.truncate_operation(new_file_size)?
            .truncate(reader, writer)
    }

    /// Reads at an absolute file offset, spanning as many objects as needed.
    ///
    /// Returns the number of bytes read, which is short at the end of the file.
    pub fn read_at<R>(
        &mut self,
        offset: u64,
        buf: &mut [u8],
        reader: &R,
    ) -> Result<usize, EncryptorError>
    where
        R: PartialObjectReaderSync + ?Sized,
    {
        if buf.is_empty() {
            return Ok(0);
        }
        let object_size = self.object_size;
        let mut operation = self.read_operation(offset, buf.len() as u64)?;

        let mut total = 0;
        for chunk in object_chunks(object_size, offset, buf.len()) {
            let len = chunk.buf.len();
            let read = operation.read_sync(
                chunk.object_no,
                &mut buf[chunk.buf],
                chunk.offset_in_object,
                reader,
            )?;
            total += read;
            if read < len {
                break;
            }
        }
        Ok(total)
    }

    /// Writes at an absolute file offset, spanning as many objects as needed, and commits.
    pub fn write_at<R, W>(
        &mut self,
        offset: u64,
        buf: &[u8],
        reader: &R,
        writer: &W,
    ) -> Result<(), EncryptorError>
    where
        R: PartialObjectReaderSync + ?Sized,
        W: PartialObjectWriterSync + ?Sized,
    {
        if buf.is_empty() {
            return Ok(());
        }
        let object_size = self.object_size;
        let mut operation = self.write_operation(offset, buf.len() as u64, reader, writer)?;
        for chunk in object_chunks(object_size, offset, buf.len()) {
            operation.write_sync(
                chunk.object_no,
                &buf[chunk.buf],
                chunk.offset_in_object,
                reader,
                writer,
            )?;
        }
        operation.finish()
    }
}
