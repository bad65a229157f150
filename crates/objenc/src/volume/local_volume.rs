use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use snafu::ResultExt;
use tracing::trace;

use super::{FileAttr, OpenFlags, StorageSnafu, Volume, VolumeError};
use crate::storage::FileStorage;

/// A volume whose root is a directory on the host filesystem.
#[derive(Debug, Clone)]
pub struct LocalVolume {
    root: PathBuf,
}

impl LocalVolume {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, VolumeError> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(VolumeError::InvalidPath {
                path: path.to_string(),
            });
        }
        Ok(self.root.join(relative))
    }
}

fn map_io_error(path: &str, operation: &'static str, source: std::io::Error) -> VolumeError {
    if source.kind() == ErrorKind::NotFound {
        VolumeError::NotFound {
            path: path.to_string(),
        }
    } else {
        VolumeError::Io {
            path: path.to_string(),
            operation,
            source,
        }
    }
}

impl Volume for LocalVolume {
    type File = FileStorage;

    fn open_file(
        &self,
        path: &str,
        flags: OpenFlags,
        mode: u32,
    ) -> Result<Self::File, VolumeError> {
        let host_path = self.resolve(path)?;
        trace!(path, ?flags, mode, "opening file");

        let mut options = fs::File::options();
        options
            .read(flags.contains(OpenFlags::READ))
            .write(flags.contains(OpenFlags::WRITE))
            .truncate(flags.contains(OpenFlags::TRUNCATE));
        if flags.contains(OpenFlags::CREATE | OpenFlags::EXCLUSIVE) {
            options.create_new(true);
        } else {
            options.create(flags.contains(OpenFlags::CREATE));
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;

        let file = options
            .open(&host_path)
            .map_err(|e| map_io_error(path, "open", e))?;
        FileStorage::new(file).context(StorageSnafu { path })
    }

    fn make_directory(&self, path: &str, mode: u32) -> Result<(), VolumeError> {
        let host_path = self.resolve(path)?;
        trace!(path, mode, "creating directory");

        let mut builder = fs::DirBuilder::new();
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;

        builder
            .create(&host_path)
            .map_err(|e| map_io_error(path, "mkdir", e))
    }

    fn get_attr(&self, path: &str) -> Result<FileAttr, VolumeError> {
        let host_path = self.resolve(path)?;
        let metadata = fs::metadata(&host_path).map_err(|e| map_io_error(path, "stat", e))?;
        Ok(FileAttr {
            size: metadata.len(),
        })
    }

    fn unlink(&self, path: &str) -> Result<(), VolumeError> {
        let host_path = self.resolve(path)?;
        trace!(path, "unlinking file");
        fs::remove_file(&host_path).map_err(|e| map_io_error(path, "unlink", e))
    }
}
