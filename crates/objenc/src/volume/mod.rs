//! The filesystem volume the encryption layer keeps its metadata files on.
//!
//! Only the handful of calls needed to bootstrap, open and delete metadata files are modelled.

use bitflags::bitflags;
use snafu::Snafu;

use crate::storage::{Storage, StorageError};

mod local_volume;

pub use local_volume::LocalVolume;

bitflags! {
    /// Flags for [`Volume::open_file`], mirroring the POSIX `open(2)` flags that matter here.
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
    pub struct OpenFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const CREATE = 1 << 2;
        const EXCLUSIVE = 1 << 3;
        const TRUNCATE = 1 << 4;

        const RDWR = Self::READ.bits() | Self::WRITE.bits();
    }
}

/// The subset of file attributes the encryption layer consumes.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct FileAttr {
    pub size: u64,
}

#[derive(Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
pub enum VolumeError {
    /// Volume: {path} does not exist
    NotFound { path: String },
    /// Volume: {path} is not a valid volume path
    InvalidPath { path: String },
    /// Volume: {operation} failed for {path}: {source}
    Io {
        path: String,
        operation: &'static str,
        source: std::io::Error,
    },
    /// Volume: could not access {path}: {source}
    Storage { path: String, source: StorageError },
}

impl VolumeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, VolumeError::NotFound { .. })
    }
}

/// A volume addressed by absolute, `/`-separated paths.
pub trait Volume {
    type File: Storage;

    fn open_file(&self, path: &str, flags: OpenFlags, mode: u32)
        -> Result<Self::File, VolumeError>;
    fn make_directory(&self, path: &str, mode: u32) -> Result<(), VolumeError>;
    fn get_attr(&self, path: &str) -> Result<FileAttr, VolumeError>;
    fn unlink(&self, path: &str) -> Result<(), VolumeError>;
}
