//! Per-file integrity metadata: one leaf (IV + digest) per encryption block.
//!
//! The leaves live in a signed table inside the file's metadata file. A [`HashTree`] is loaded
//! for every operation, bracketed by one of the read/write/truncate protocols and, for writes and
//! truncations, committed back before the operation completes.
//!
//! Opening a tree reads and authenticates the whole leaf table, and every commit signs all of it
//! again, so each operation costs time linear in the number of blocks of the file, however few
//! of them it touches.

mod format;

use binrw::io::Cursor;
use binrw::{BinRead, BinWrite};
use snafu::{ensure, ResultExt, Snafu};
use std::collections::BTreeSet;
use tracing::{debug, trace};

use crate::crypto::{CryptoError, Signer};
use crate::hexstring::HexData;
use crate::storage::{ReadableStorage, ReadableStorageExt, Storage, StorageError};

pub use format::{DIGEST_SIZE, HEADER_SIZE, LEAF_SIZE, MAX_IV_SIZE};
use format::{LeafRecord, TreeHeader, FORMAT_VERSION, MAX_SIGNATURE_SIZE};

/// How the persisted tree relates to the file at the start of an operation.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TreeMode {
    /// No metadata was persisted yet, start from an empty tree.
    Fresh,
    /// Metadata exists and covers no blocks.
    Empty,
    /// Metadata covers blocks `0..=last_block`.
    Existing { last_block: u64 },
}

impl TreeMode {
    pub fn leaf_count(self) -> u64 {
        match self {
            TreeMode::Fresh | TreeMode::Empty => 0,
            TreeMode::Existing { last_block } => last_block + 1,
        }
    }
}

#[derive(Snafu, Debug)]
pub enum HashTreeError {
    /// Hash tree: failed to access the metadata file: {source}
    Storage { source: StorageError },
    /// Hash tree: malformed metadata: {source}
    Format { source: binrw::Error },
    /// Hash tree: metadata is {actual} bytes long, expected at least {expected}
    Truncated { expected: u64, actual: u64 },
    /// Hash tree: metadata was written with {actual} byte IVs, the cipher uses {expected}
    IvSizeMismatch { expected: usize, actual: usize },
    /// Hash tree: signature does not match the metadata
    BadSignature {},
    /// Hash tree: metadata covers {actual} blocks but the file size implies {expected}
    LeafCountMismatch { expected: u64, actual: u64 },
    /// Hash tree: block {block} does not match its recorded digest
    LeafMismatch { block: u64 },
    /// Hash tree: signing failed: {source}
    Signing { source: CryptoError },
}

impl HashTreeError {
    /// Whether the error means the stored data or metadata failed authentication, as opposed to
    /// the metadata file being unreachable.
    pub fn is_integrity_failure(&self) -> bool {
        !matches!(
            self,
            HashTreeError::Storage { .. } | HashTreeError::Signing { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Session {
    Idle,
    Read {
        first: u64,
        last: u64,
    },
    Write {
        first: u64,
        first_aligned: bool,
        last: u64,
        last_aligned: bool,
        /// Previous final block, which may be re-encrypted once it stops being the final one.
        rehash: Option<u64>,
    },
    Truncate {
        boundary: Option<u64>,
    },
}

#[derive(Debug)]
pub struct HashTree {
    iv_size: usize,
    leaves: Vec<LeafRecord>,
    /// Leaves changed during this session.
    dirty: BTreeSet<u64>,
    /// Number of leaves currently stored in the metadata file.
    persisted: u64,
    session: Session,
}

fn signed_message(iv_size: usize, leaves: &[LeafRecord]) -> Result<Vec<u8>, HashTreeError> {
    let mut message =
        Cursor::new(Vec::with_capacity(16 + leaves.len() * LEAF_SIZE as usize));
    FORMAT_VERSION.write_le(&mut message).context(FormatSnafu)?;
    (iv_size as u8).write_le(&mut message).context(FormatSnafu)?;
    (leaves.len() as u64)
        .write_le(&mut message)
        .context(FormatSnafu)?;
    for leaf in leaves {
        leaf.write(&mut message).context(FormatSnafu)?;
    }
    Ok(message.into_inner())
}

impl HashTree {
    /// Loads the tree for one operation.
    ///
    /// For [`TreeMode::Empty`] and [`TreeMode::Existing`] the stored table is authenticated and has
    /// to cover exactly the blocks implied by the mode.
    pub fn open<M: ReadableStorage + ?Sized>(
        meta: &M,
        mode: TreeMode,
        signer: &Signer,
        iv_size: usize,
    ) -> Result<Self, HashTreeError> {
        assert!(
            (1..=MAX_IV_SIZE).contains(&iv_size),
            "unsupported IV size {}",
            iv_size
        );

        let leaves = match mode {
            TreeMode::Fresh => Vec::new(),
            TreeMode::Empty | TreeMode::Existing { .. } => {
                let leaves = Self::load(meta, signer, iv_size)?;
                ensure!(
                    leaves.len() as u64 == mode.leaf_count(),
                    LeafCountMismatchSnafu {
                        expected: mode.leaf_count(),
                        actual: leaves.len() as u64,
                    }
                );
                leaves
            }
        };
        trace!(?mode, leaves = leaves.len(), "opened hash tree");

        let persisted = leaves.len() as u64;
        Ok(Self {
            iv_size,
            leaves,
            dirty: BTreeSet::new(),
            persisted,
            session: Session::Idle,
        })
    }

    fn load<M: ReadableStorage + ?Sized>(
        meta: &M,
        signer: &Signer,
        iv_size: usize,
    ) -> Result<Vec<LeafRecord>, HashTreeError> {
        if meta.get_size() == 0 {
            // created, but never committed to
            return Ok(Vec::new());
        }

        let data = meta.read_all().context(StorageSnafu)?;
        ensure!(
            data.len() as u64 >= HEADER_SIZE,
            TruncatedSnafu {
                expected: HEADER_SIZE,
                actual: data.len() as u64,
            }
        );
        let mut cursor = Cursor::new(&data[..]);
        let header = TreeHeader::read(&mut cursor).context(FormatSnafu)?;
        ensure!(
            header.iv_size as usize == iv_size,
            IvSizeMismatchSnafu {
                expected: iv_size,
                actual: header.iv_size as usize,
            }
        );
        // leaf_count is not authenticated yet; bytes past the last leaf are an interrupted commit
        let stored_count = (data.len() as u64 - HEADER_SIZE) / LEAF_SIZE;
        ensure!(
            header.leaf_count <= stored_count,
            TruncatedSnafu {
                expected: header
                    .leaf_count
                    .saturating_mul(LEAF_SIZE)
                    .saturating_add(HEADER_SIZE),
                actual: data.len() as u64,
            }
        );

        let leaves = (0..header.leaf_count)
            .map(|_| LeafRecord::read(&mut cursor))
            .collect::<Result<Vec<_>, _>>()
            .context(FormatSnafu)?;

        let message = signed_message(iv_size, &leaves)?;
        let valid = signer
            .verify(&message, header.signature())
            .context(SigningSnafu)?;
        ensure!(
            header.version == FORMAT_VERSION && valid,
            BadSignatureSnafu
        );

        Ok(leaves)
    }

    pub fn leaf_count(&self) -> u64 {
        self.leaves.len() as u64
    }

    pub fn start_read(&mut self, first: u64, last: u64) {
        assert_eq!(self.session, Session::Idle, "hash tree session already started");
        assert!(first <= last, "invalid block range {}..={}", first, last);
        self.session = Session::Read { first, last };
    }

    pub fn start_write(
        &mut self,
        first: u64,
        first_aligned: bool,
        last: u64,
        last_aligned: bool,
        old_eof_aligned: bool,
    ) {
        assert_eq!(self.session, Session::Idle, "hash tree session already started");
        assert!(first <= last, "invalid block range {}..={}", first, last);

        let old_count = self.leaf_count();
        let rehash = (!old_eof_aligned && old_count > 0).then(|| old_count - 1);
        if last >= old_count {
            // blocks between the old end and the write become holes
            self.leaves.resize(last as usize + 1, LeafRecord::HOLE);
        }
        trace!(
            first,
            first_aligned,
            last,
            last_aligned,
            ?rehash,
            "starting hash tree write"
        );
        self.session = Session::Write {
            first,
            first_aligned,
            last,
            last_aligned,
            rehash,
        };
    }

    pub fn finish_write<M: Storage + ?Sized>(
        &mut self,
        meta: &M,
        signer: &Signer,
    ) -> Result<(), HashTreeError> {
        assert!(
            matches!(self.session, Session::Write { .. }),
            "no hash tree write in progress"
        );
        self.commit(meta, signer)?;
        self.session = Session::Idle;
        Ok(())
    }

    /// Resizes the tree to cover blocks `0..=new_last` (nothing for `None`).
    ///
    /// With `aligned == false` the new final block (when shrinking) or the old final block (when
    /// growing) has to be re-encrypted before the truncation is finished.
    pub fn start_truncate(&mut self, new_last: Option<u64>, aligned: bool) {
        assert_eq!(self.session, Session::Idle, "hash tree session already started");

        let old_count = self.leaf_count();
        let new_count = new_last.map_or(0, |last| last + 1);
        let boundary = if aligned {
            None
        } else if new_count < old_count {
            new_last
        } else {
            old_count.checked_sub(1)
        };
        self.leaves.resize(new_count as usize, LeafRecord::HOLE);
        self.dirty.retain(|&block| block < new_count);

        trace!(old_count, new_count, ?boundary, "starting hash tree truncate");
        self.session = Session::Truncate { boundary };
    }

    pub fn finish_truncate<M: Storage + ?Sized>(
        &mut self,
        meta: &M,
        signer: &Signer,
    ) -> Result<(), HashTreeError> {
        assert!(
            matches!(self.session, Session::Truncate { .. }),
            "no hash tree truncate in progress"
        );
        self.commit(meta, signer)?;
        self.session = Session::Idle;
        Ok(())
    }

    fn may_set(&self, block: u64) -> bool {
        match self.session {
            Session::Write {
                first,
                last,
                rehash,
                ..
            } => (first..=last).contains(&block) || rehash == Some(block),
            Session::Truncate { boundary } => boundary == Some(block),
            Session::Idle | Session::Read { .. } => false,
        }
    }

    fn may_get(&self, block: u64) -> bool {
        match self.session {
            Session::Read { first, last } => (first..=last).contains(&block),
            // only blocks that are partially overwritten have to be read back
            Session::Write {
                first,
                first_aligned,
                last,
                last_aligned,
                rehash,
            } => {
                (block == first && !first_aligned)
                    || (block == last && !last_aligned)
                    || rehash == Some(block)
            }
            Session::Truncate { boundary } => boundary == Some(block),
            Session::Idle => false,
        }
    }

    /// Records the IV and ciphertext of a freshly encrypted block.
    pub fn set_leaf(&mut self, block: u64, iv: &[u8], ciphertext: &[u8]) {
        assert!(
            self.may_set(block),
            "block {} is outside of the {:?} session",
            block,
            self.session
        );
        assert_eq!(iv.len(), self.iv_size, "unexpected IV length");
        assert!(
            block < self.leaf_count(),
            "block {} is past the end of the tree",
            block
        );

        self.leaves[block as usize] = LeafRecord::new(iv, ciphertext);
        self.dirty.insert(block);
    }

    /// Authenticates the stored ciphertext of a block and returns the IV to decrypt it with.
    ///
    /// An empty IV is returned for holes; `ciphertext` is not checked in that case.
    pub fn get_leaf(&self, block: u64, ciphertext: &[u8]) -> Result<Vec<u8>, HashTreeError> {
        assert!(
            self.may_get(block),
            "block {} is outside of the {:?} session",
            block,
            self.session
        );

        let leaf = match self.leaves.get(block as usize) {
            Some(leaf) if !leaf.is_hole() => leaf,
            _ => return Ok(Vec::new()),
        };
        ensure!(
            format::leaf_digest(leaf.iv(), ciphertext) == leaf.digest,
            LeafMismatchSnafu { block }
        );
        Ok(leaf.iv().to_vec())
    }

    /// Writes changed and new leaves, re-signs the header, then trims the table and flushes.
    fn commit<M: Storage + ?Sized>(&mut self, meta: &M, signer: &Signer) -> Result<(), HashTreeError> {
        let count = self.leaf_count();
        let message = signed_message(self.iv_size, &self.leaves)?;
        let signature = signer.sign(&message).context(SigningSnafu)?;
        assert!(signature.len() <= MAX_SIGNATURE_SIZE);

        let pending = self
            .dirty
            .iter()
            .copied()
            .filter(|&block| block < self.persisted)
            .chain(self.persisted.min(count)..count)
            .collect::<Vec<_>>();
        for &block in &pending {
            let mut record = Cursor::new(Vec::with_capacity(LEAF_SIZE as usize));
            self.leaves[block as usize]
                .write(&mut record)
                .context(FormatSnafu)?;
            meta.write(HEADER_SIZE + block * LEAF_SIZE, record.get_ref())
                .context(StorageSnafu)?;
        }

        let header = TreeHeader {
            version: FORMAT_VERSION,
            iv_size: self.iv_size as u8,
            leaf_count: count,
            signature_len: signature.len() as u8,
            signature: HexData::from_prefix(&signature),
        };
        let mut encoded = Cursor::new(Vec::with_capacity(HEADER_SIZE as usize));
        header.write(&mut encoded).context(FormatSnafu)?;
        meta.write(0, encoded.get_ref()).context(StorageSnafu)?;
        self.persisted = count;
        self.dirty.clear();

        meta.set_size(HEADER_SIZE + count * LEAF_SIZE)
            .context(StorageSnafu)?;
        meta.flush().context(StorageSnafu)?;

        debug!(
            leaves = count,
            written = pending.len(),
            "committed hash tree"
        );
        Ok(())
    }

    /// Whether the header in the metadata file describes the leaves held in memory.
    ///
    /// Stays true when a commit fails after its header was written, so the caller can publish
    /// the new file size together with the error.
    pub fn is_persisted(&self) -> bool {
        self.dirty.is_empty() && self.persisted == self.leaf_count()
    }
}
