//! Centralized configuration for the local-persist driver.
//!
//! Constants live on unit holder structs; the per-process settings are
//! gathered in [`DriverConfig`].

use crate::error::{PersistError, Result};
use crate::reconcile::ConflictPolicy;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Driver-level defaults.
pub struct DriverDefaults;

impl DriverDefaults {
    pub const DRIVER_NAME: &'static str = "local-persist";
    pub const BASE_DIR: &'static str = "/";
    pub const STATE_DIR: &'static str = "/var/lib/docker/plugin-data/";
    pub const MOUNTPOINT_OPTION: &'static str = "mountpoint";
}

/// Permission bits applied to everything the driver creates.
pub struct PermissionsConfig;

impl PermissionsConfig {
    pub const STATE_DIR_MODE: u32 = 0o700;
    pub const VOLUME_DIR_MODE: u32 = 0o755;
    pub const SNAPSHOT_FILE_MODE: u32 = 0o600;
}

/// Live source query settings.
pub struct LiveSourceConfig;

impl LiveSourceConfig {
    pub const QUERY_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DOCKER_BINARY: &'static str = "docker";
}

/// Settings for one driver instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Driver instance name; also names the snapshot file.
    pub name: String,
    /// Directory every mountpoint is resolved against.
    pub base_dir: PathBuf,
    /// Directory holding `<name>.json` and `<name>.lock`.
    pub state_dir: PathBuf,
    /// How duplicate live observations of one name are resolved.
    pub conflict_policy: ConflictPolicy,
    /// Treat a successful but empty live query as ground truth.
    pub accept_empty_live: bool,
    pub live_query_timeout: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            name: DriverDefaults::DRIVER_NAME.to_string(),
            base_dir: PathBuf::from(DriverDefaults::BASE_DIR),
            state_dir: PathBuf::from(DriverDefaults::STATE_DIR),
            conflict_policy: ConflictPolicy::default(),
            accept_empty_live: false,
            live_query_timeout: LiveSourceConfig::QUERY_TIMEOUT,
        }
    }
}

impl DriverConfig {
    pub fn new(
        name: impl Into<String>,
        base_dir: impl Into<PathBuf>,
        state_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            base_dir: base_dir.into(),
            state_dir: state_dir.into(),
            ..Self::default()
        }
    }

    /// Path of this instance's JSON snapshot.
    pub fn snapshot_path(&self) -> PathBuf {
        self.state_dir.join(format!("{}.json", self.name))
    }

    /// Path of this instance's advisory lock file.
    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join(format!("{}.lock", self.name))
    }

    /// Reject settings that would make the snapshot path ambiguous.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(PersistError::Config {
                message: "driver name must not be empty".to_string(),
            });
        }
        if self.name.contains(['/', '\\']) || self.name == "." || self.name == ".." {
            return Err(PersistError::Config {
                message: format!("driver name {:?} must be a plain file name", self.name),
            });
        }
        if !is_absolute(&self.base_dir) {
            return Err(PersistError::Config {
                message: format!("base dir {} must be absolute", self.base_dir.display()),
            });
        }
        Ok(())
    }
}

fn is_absolute(path: &Path) -> bool {
    path.is_absolute() || path.has_root()
}
