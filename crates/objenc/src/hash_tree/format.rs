use binrw::{BinRead, BinWrite};
use digest::Digest;
use sha2::Sha256;

use crate::hexstring::HexData;

pub const MAX_IV_SIZE: usize = 0x10;
pub const DIGEST_SIZE: usize = 0x20;
pub const MAX_SIGNATURE_SIZE: usize = 0x40;

pub const FORMAT_VERSION: u16 = 1;

/// magic + version + iv size + leaf count + signature length + signature slot
pub const HEADER_SIZE: u64 = 8 + 2 + 1 + 8 + 1 + MAX_SIGNATURE_SIZE as u64;
/// iv length + iv slot + digest
pub const LEAF_SIZE: u64 = 1 + MAX_IV_SIZE as u64 + DIGEST_SIZE as u64;

#[derive(Debug, Clone, Copy, Eq, PartialEq, BinRead, BinWrite)]
#[brw(little, magic = b"OBJENCHT")]
pub struct TreeHeader {
    pub version: u16,
    pub iv_size: u8,
    pub leaf_count: u64,
    pub signature_len: u8,
    pub signature: HexData<MAX_SIGNATURE_SIZE>,
}

impl TreeHeader {
    pub fn signature(&self) -> &[u8] {
        self.signature
            .prefix((self.signature_len as usize).min(MAX_SIGNATURE_SIZE))
    }
}

/// One encryption block: the IV its ciphertext was produced with and a digest over both.
///
/// An empty IV marks a block that was never written (a hole reading as zeros).
#[derive(Debug, Clone, Copy, Eq, PartialEq, BinRead, BinWrite)]
#[brw(little)]
pub struct LeafRecord {
    pub iv_len: u8,
    pub iv: HexData<MAX_IV_SIZE>,
    pub digest: HexData<DIGEST_SIZE>,
}

impl LeafRecord {
    pub const HOLE: Self = Self {
        iv_len: 0,
        iv: HexData::ZERO,
        digest: HexData::ZERO,
    };

    pub fn new(iv: &[u8], ciphertext: &[u8]) -> Self {
        Self {
            iv_len: iv.len() as u8,
            iv: HexData::from_prefix(iv),
            digest: leaf_digest(iv, ciphertext),
        }
    }

    pub fn is_hole(&self) -> bool {
        self.iv_len == 0
    }

    pub fn iv(&self) -> &[u8] {
        self.iv.prefix((self.iv_len as usize).min(MAX_IV_SIZE))
    }
}

pub fn leaf_digest(iv: &[u8], ciphertext: &[u8]) -> HexData<DIGEST_SIZE> {
    let mut hasher = Sha256::new();
    hasher.update(iv);
    hasher.update(ciphertext);
    HexData(hasher.finalize().into())
}
