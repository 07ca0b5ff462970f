//! In-memory volume registry.
//!
//! Every operation goes through one `RwLock`: reads share it, `create` and
//! `remove` hold it exclusively across both the map mutation and the
//! snapshot flush, so a reader never sees a map that disagrees with an
//! in-flight write.

use crate::config::{DriverDefaults, PermissionsConfig};
use crate::error::{PersistError, Result};
use crate::platform;
use crate::snapshot::SnapshotStore;
use crate::volume::{join_mountpoint, validate_mountpoint, Volume, VolumeMap};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Authoritative name -> mountpoint map for one driver instance.
#[derive(Debug, Clone)]
pub struct VolumeRegistry {
    base_dir: PathBuf,
    store: SnapshotStore,
    volumes: Arc<RwLock<VolumeMap>>,
}

impl VolumeRegistry {
    /// Create a registry seeded with `initial` state.
    ///
    /// Entries whose mountpoint resolves to `base_dir` itself are dropped with
    /// a warning; they could never be told apart from unknown names.
    ///
    /// # Arguments
    ///
    /// * `base_dir` - Directory every mountpoint resolves against
    /// * `store` - Snapshot written after each mutation
    /// * `initial` - Reconciled startup state
    pub fn new(base_dir: impl Into<PathBuf>, store: SnapshotStore, mut initial: VolumeMap) -> Self {
        let base_dir = base_dir.into();
        initial.retain(|name, mountpoint| {
            let keep = join_mountpoint(&base_dir, mountpoint.as_str()) != base_dir;
            if !keep {
                warn!(
                    "Dropping volume {} whose mountpoint {:?} resolves to the base dir",
                    name, mountpoint
                );
            }
            keep
        });

        Self {
            base_dir,
            store,
            volumes: Arc::new(RwLock::new(initial)),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Look up a volume by name.
    pub async fn lookup(&self, name: &str) -> Option<Volume> {
        let volumes = self.volumes.read().await;
        volumes
            .get(name)
            .map(|mountpoint| Volume::new(name, mountpoint.clone()))
    }

    /// All registered volumes, in no particular order.
    pub async fn list_all(&self) -> Vec<Volume> {
        let volumes = self.volumes.read().await;
        volumes
            .iter()
            .map(|(name, mountpoint)| Volume::new(name.clone(), mountpoint.clone()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.volumes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.volumes.read().await.is_empty()
    }

    /// Register a new volume.
    ///
    /// Requires a non-empty `mountpoint` option. The directory
    /// `base_dir/mountpoint` is created if missing. An existing name is
    /// rejected with [`PersistError::AlreadyExists`] before anything touches
    /// the filesystem. A failed snapshot flush is logged and does not undo
    /// the registration.
    pub async fn create(&self, name: &str, options: &HashMap<String, String>) -> Result<()> {
        if name.is_empty() {
            return Err(PersistError::InvalidName);
        }

        let mountpoint = options
            .get(DriverDefaults::MOUNTPOINT_OPTION)
            .filter(|m| !m.is_empty())
            .ok_or_else(|| PersistError::MissingRequiredOption {
                option: DriverDefaults::MOUNTPOINT_OPTION.to_string(),
            })?;
        validate_mountpoint(mountpoint)?;

        let real_mountpoint = join_mountpoint(&self.base_dir, mountpoint);
        if self.is_unresolved(&real_mountpoint) {
            return Err(PersistError::InvalidMountpoint {
                mountpoint: mountpoint.clone(),
                reason: "must name a directory below the base dir".to_string(),
            });
        }

        let mut volumes = self.volumes.write().await;

        if volumes.contains_key(name) {
            return Err(PersistError::AlreadyExists {
                name: name.to_string(),
            });
        }

        debug!(
            "Ensuring directory {} exists on host",
            real_mountpoint.display()
        );
        platform::create_dir_all_with_mode(&real_mountpoint, PermissionsConfig::VOLUME_DIR_MODE)
            .map_err(|e| {
                error!("Could not create directory {}", real_mountpoint.display());
                PersistError::DirectoryCreationFailed {
                    path: real_mountpoint.clone(),
                    source: e,
                }
            })?;

        volumes.insert(name.to_string(), mountpoint.clone());
        self.flush(&volumes);

        info!(
            "Created volume {} with mountpoint {}",
            name,
            real_mountpoint.display()
        );
        Ok(())
    }

    /// Forget a volume. Absent names are a no-op; data on disk is kept.
    pub async fn remove(&self, name: &str) {
        let mut volumes = self.volumes.write().await;

        let removed = volumes.remove(name);
        self.flush(&volumes);

        match removed {
            Some(mountpoint) => info!("Removed volume {} ({})", name, mountpoint),
            None => debug!("Remove of unknown volume {}", name),
        }
    }

    /// Absolute path for `name`.
    ///
    /// An unknown name resolves to `base_dir` itself; callers treat that as
    /// "unknown volume".
    pub async fn resolve(&self, name: &str) -> PathBuf {
        let volumes = self.volumes.read().await;
        let mountpoint = volumes.get(name).map(String::as_str).unwrap_or_default();
        join_mountpoint(&self.base_dir, mountpoint)
    }

    /// Whether `path` is the "unknown volume" resolution.
    pub fn is_unresolved(&self, path: &Path) -> bool {
        path == self.base_dir
    }

    pub async fn mount(&self, name: &str) -> PathBuf {
        let path = self.resolve(name).await;
        debug!("Mounted {} at {}", name, path.display());
        path
    }

    pub async fn unmount(&self, name: &str) -> PathBuf {
        let path = self.resolve(name).await;
        debug!("Unmounted {}", name);
        path
    }

    pub async fn path(&self, name: &str) -> PathBuf {
        let path = self.resolve(name).await;
        debug!("Returned path {} for {}", path.display(), name);
        path
    }

    /// Snapshot the map while the caller still holds the write guard.
    fn flush(&self, volumes: &VolumeMap) {
        if let Err(e) = self.store.save(volumes) {
            error!("Snapshot flush failed, in-memory state kept: {}", e);
        }
    }
}
