//! Transparent per-file encryption of objects with an authenticated per-block integrity tree.

pub mod config;
pub mod crypto;
pub mod encryptor;
pub mod hash_tree;
mod hexstring;
pub mod object_io;
mod range;
pub mod storage;
pub mod volume;

pub use config::{EncryptionConfig, EncryptionOptions, FileKeys};
pub use encryptor::{
    EncryptorError, FileSize, ObjectEncryptor, ReadOperation, TruncateOperation, WriteOperation,
    META_DIR,
};
