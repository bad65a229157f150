use num_integer::Integer;
use snafu::ResultExt;
use tracing::trace;

use super::{CryptoSnafu, EncryptorError, IntegritySnafu, ObjectEncryptor, ObjectIoSnafu};
use crate::hash_tree::{HashTree, TreeMode};
use crate::object_io::{PartialObjectReader, PartialObjectWriter};
use crate::range::BlockPlan;
use crate::storage::Storage;

/// State shared by all operations: the integrity tree session and the size bookkeeping.
pub(crate) struct Operation<'a, M: Storage> {
    pub enc: &'a mut ObjectEncryptor<M>,
    pub tree: HashTree,
    pub mode: TreeMode,
    /// Logical file size including the effect of this operation.
    pub file_size: u64,
    pub old_file_size: u64,
    /// End of the ciphertext that exists in the objects. Blocks starting past it have no
    /// previous contents.
    stored_size: u64,
    /// Set once an I/O or integrity error left the objects and the tree out of step.
    pub poisoned: bool,
}

impl<'a, M: Storage> Operation<'a, M> {
    pub fn new(enc: &'a mut ObjectEncryptor<M>) -> Result<Self, EncryptorError> {
        let mode = enc.tree_mode();
        let file_size = enc.file_size.get();
        let tree = HashTree::open(&enc.meta_file, mode, &enc.signer, enc.cipher.iv_size())
            .context(IntegritySnafu)?;
        trace!(?mode, file_size, "starting operation");

        Ok(Self {
            enc,
            tree,
            mode,
            file_size,
            old_file_size: file_size,
            stored_size: file_size,
            poisoned: false,
        })
    }

    pub fn block_size(&self) -> u64 {
        self.enc.block_size
    }

    pub fn object_size(&self) -> u64 {
        self.enc.object_size
    }

    fn global_block(&self, object_no: u64, block_in_object: u64) -> u64 {
        object_no * (self.object_size() / self.block_size()) + block_in_object
    }

    fn encrypt_block(
        &mut self,
        block: u64,
        plaintext: &[u8],
        ciphertext: &mut [u8],
    ) -> Result<(), EncryptorError> {
        let iv = self
            .enc
            .cipher
            .encrypt(plaintext, ciphertext)
            .context(CryptoSnafu)?;
        self.tree.set_leaf(block, &iv, ciphertext);
        Ok(())
    }

    fn decrypt_block(
        &self,
        block: u64,
        ciphertext: &[u8],
        plaintext: &mut [u8],
    ) -> Result<(), EncryptorError> {
        let iv = self
            .tree
            .get_leaf(block, ciphertext)
            .context(IntegritySnafu)?;
        if iv.is_empty() {
            // never written
            plaintext.fill(0);
            return Ok(());
        }
        self.enc
            .cipher
            .decrypt(&iv, ciphertext, plaintext)
            .context(CryptoSnafu)
    }

    /// Reads and decrypts `buf.len()` bytes at `offset_in_object`.
    pub async fn read_object<R: PartialObjectReader + ?Sized>(
        &mut self,
        reader: &R,
        object_no: u64,
        buf: &mut [u8],
        offset_in_object: u64,
    ) -> Result<usize, EncryptorError> {
        let result = self
            .read_object_inner(reader, object_no, buf, offset_in_object)
            .await;
        self.poisoned |= result.is_err();
        result
    }

    async fn read_object_inner<R: PartialObjectReader + ?Sized>(
        &self,
        reader: &R,
        object_no: u64,
        buf: &mut [u8],
        offset_in_object: u64,
    ) -> Result<usize, EncryptorError> {
        let block_size = self.block_size();
        let object_offset = object_no * self.object_size();
        assert!(!buf.is_empty(), "empty read");
        assert!(
            offset_in_object + buf.len() as u64 <= self.object_size(),
            "read crosses the end of object {}",
            object_no
        );

        if object_offset + offset_in_object >= self.file_size {
            return Ok(0);
        }

        let data_start = offset_in_object;
        let ct_start = Integer::prev_multiple_of(&data_start, &block_size);
        // never authenticate stale bytes past the end of the file
        let ct_end = Integer::next_multiple_of(&(data_start + buf.len() as u64), &block_size)
            .min(self.file_size - object_offset);

        let mut ciphertext = vec![0; (ct_end - ct_start) as usize];
        let read = reader
            .read_partial(object_no, &mut ciphertext, ct_start)
            .await
            .context(ObjectIoSnafu)?;
        ciphertext.truncate(read);

        let data_end = (data_start + buf.len() as u64).min(ct_start + read as u64);
        if data_end <= data_start {
            return Ok(0);
        }
        let ct_end = ct_start + read as u64;
        trace!(object_no, ct_start, ct_end, data_start, data_end, "reading object");

        let plan = BlockPlan::new(block_size, ct_start, ct_end, data_start, data_end);
        let mut scratch = Vec::new();
        for block in plan.boundaries() {
            let slot = plan.slot(block);
            let global = self.global_block(object_no, block);
            scratch.resize(slot.ct.len(), 0);
            self.decrypt_block(global, &ciphertext[slot.ct.clone()], &mut scratch)?;
            buf[slot.data].copy_from_slice(&scratch[slot.covered]);
        }
        for block in plan.interior.clone() {
            let slot = plan.slot(block);
            let global = self.global_block(object_no, block);
            self.decrypt_block(global, &ciphertext[slot.ct], &mut buf[slot.data])?;
        }

        Ok((data_end - data_start) as usize)
    }

    /// Encrypts `buf` into object `object_no` at `offset_in_object` with a single ciphertext
    /// write.
    ///
    /// An empty `buf` re-encrypts the block containing `offset_in_object` up to the current file
    /// end.
    pub async fn write_object<R, W>(
        &mut self,
        reader: &R,
        writer: &W,
        object_no: u64,
        buf: &[u8],
        offset_in_object: u64,
    ) -> Result<(), EncryptorError>
    where
        R: PartialObjectReader + ?Sized,
        W: PartialObjectWriter + ?Sized,
    {
        let result = self
            .write_object_inner(reader, writer, object_no, buf, offset_in_object)
            .await;
        self.poisoned |= result.is_err();
        result
    }

    async fn write_object_inner<R, W>(
        &mut self,
        reader: &R,
        writer: &W,
        object_no: u64,
        buf: &[u8],
        offset_in_object: u64,
    ) -> Result<(), EncryptorError>
    where
        R: PartialObjectReader + ?Sized,
        W: PartialObjectWriter + ?Sized,
    {
        let block_size = self.block_size();
        let object_offset = object_no * self.object_size();
        let data_start = offset_in_object;
        let data_end = offset_in_object + buf.len() as u64;
        assert!(
            data_end <= self.object_size(),
            "write crosses the end of object {}",
            object_no
        );
        assert!(
            object_offset + data_end <= self.file_size,
            "write ends past the file size of the operation"
        );

        let ct_start = Integer::prev_multiple_of(&data_start, &block_size);
        let ct_end = Integer::next_multiple_of(&data_end, &block_size)
            .min(self.file_size - object_offset);
        if ct_end <= ct_start {
            return Ok(());
        }
        trace!(object_no, ct_start, ct_end, data_start, data_end, "writing object");

        let plan = BlockPlan::new(block_size, ct_start, ct_end, data_start, data_end);
        let mut ciphertext = vec![0; (ct_end - ct_start) as usize];

        for block in plan.boundaries() {
            let slot = plan.slot(block);
            let global = self.global_block(object_no, block);
            let mut plaintext = self
                .read_old_block(reader, object_no, block, slot.ct.len())
                .await?;
            plaintext[slot.covered].copy_from_slice(&buf[slot.data]);
            self.encrypt_block(global, &plaintext, &mut ciphertext[slot.ct])?;
        }
        for block in plan.interior.clone() {
            let slot = plan.slot(block);
            let global = self.global_block(object_no, block);
            self.encrypt_block(global, &buf[slot.data], &mut ciphertext[slot.ct])?;
        }

        writer
            .write_partial(object_no, &ciphertext, ct_start)
            .await
            .context(ObjectIoSnafu)?;
        self.stored_size = self.stored_size.max(object_offset + ct_end);
        Ok(())
    }

    /// Previous plaintext of a block, resized to `len` bytes. Blocks past the stored data read
    /// as zeros.
    async fn read_old_block<R: PartialObjectReader + ?Sized>(
        &self,
        reader: &R,
        object_no: u64,
        block: u64,
        len: usize,
    ) -> Result<Vec<u8>, EncryptorError> {
        let mut plaintext = vec![0; len];
        let block_offset = block * self.block_size();
        let absolute = object_no * self.object_size() + block_offset;
        if absolute >= self.stored_size {
            return Ok(plaintext);
        }

        let old_len = (self.stored_size - absolute).min(self.block_size()) as usize;
        let mut ciphertext = vec![0; old_len];
        let read = reader
            .read_partial(object_no, &mut ciphertext, block_offset)
            .await
            .context(ObjectIoSnafu)?;
        ciphertext.truncate(read);

        let mut old = vec![0; ciphertext.len()];
        self.decrypt_block(self.global_block(object_no, block), &ciphertext, &mut old)?;
        let keep = old.len().min(len);
        plaintext[..keep].copy_from_slice(&old[..keep]);
        Ok(plaintext)
    }
}
