//! Advisory lock guarding a driver's state files.
//!
//! Two processes running the same driver name against the same state dir
//! would interleave snapshot writes; the second one fails fast instead.
//! The lock is released on Drop.

use crate::config::{DriverConfig, PermissionsConfig};
use crate::error::{PersistError, Result};
use crate::platform;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Holds `<state_dir>/<driver-name>.lock` exclusively.
#[derive(Debug)]
pub struct StateLock {
    file: File,
    path: PathBuf,
}

impl StateLock {
    /// Take the lock without blocking.
    pub fn acquire(config: &DriverConfig) -> Result<Self> {
        let path = config.lock_path();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| PersistError::io_with_path(e, &path))?;

        platform::set_mode(&path, PermissionsConfig::SNAPSHOT_FILE_MODE)
            .map_err(|e| PersistError::io_with_path(e, &path))?;

        file.try_lock_exclusive()
            .map_err(|_| PersistError::StateLocked(path.clone()))?;

        debug!("Acquired state lock {}", path.display());
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        // Unlock errors on drop are ignored; the OS drops the lock with the fd.
        let _ = FileExt::unlock(&self.file);
    }
}
