//! Per-driver snapshot file.

use super::atomic::{atomic_read_json, atomic_write_json};
use crate::config::{DriverConfig, PermissionsConfig};
use crate::error::{PersistError, Result};
use crate::platform;
use crate::volume::VolumeMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// On-disk layout: `{ "state": { "<name>": "<mountpoint>", ... } }`.
#[derive(Debug, Serialize)]
struct SnapshotRef<'a> {
    state: &'a VolumeMap,
}

#[derive(Debug, Deserialize)]
struct SnapshotFile {
    // `null` is what an unpopulated map was historically written as.
    #[serde(default)]
    state: Option<VolumeMap>,
}

/// Reads and writes `<state_dir>/<driver-name>.json`.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    state_dir: PathBuf,
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(config: &DriverConfig) -> Self {
        Self {
            state_dir: config.state_dir.clone(),
            path: config.snapshot_path(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the state directory with owner-only permissions if absent.
    pub fn ensure_state_dir(&self) -> Result<()> {
        platform::create_dir_all_with_mode(&self.state_dir, PermissionsConfig::STATE_DIR_MODE)
            .map_err(|e| PersistError::DirectoryCreationFailed {
                path: self.state_dir.clone(),
                source: e,
            })
    }

    /// Replace the snapshot with `state`.
    pub fn save(&self, state: &VolumeMap) -> Result<()> {
        atomic_write_json(
            &self.path,
            &SnapshotRef { state },
            PermissionsConfig::SNAPSHOT_FILE_MODE,
        )?;
        debug!("Saved {} volume(s) to {}", state.len(), self.path.display());
        Ok(())
    }

    /// Load the snapshot.
    ///
    /// A missing file is [`PersistError::SnapshotNotFound`]; callers treat it
    /// as an empty state. An unparsable file is
    /// [`PersistError::SnapshotCorrupt`].
    pub fn load(&self) -> Result<VolumeMap> {
        match atomic_read_json::<SnapshotFile>(&self.path)? {
            Some(file) => Ok(file.state.unwrap_or_default()),
            None => Err(PersistError::SnapshotNotFound(self.path.clone())),
        }
    }
}
