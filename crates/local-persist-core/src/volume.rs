//! Volume model and mountpoint path handling.

use crate::error::{PersistError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

/// Registry state: volume name -> mountpoint relative to the base dir.
pub type VolumeMap = HashMap<String, String>;

/// A registered volume.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    /// Mountpoint relative to the driver's base directory.
    pub mountpoint: String,
}

impl Volume {
    pub fn new(name: impl Into<String>, mountpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mountpoint: mountpoint.into(),
        }
    }

    /// Absolute path of this volume under `base_dir`.
    pub fn resolve(&self, base_dir: &Path) -> PathBuf {
        join_mountpoint(base_dir, &self.mountpoint)
    }
}

/// Join a mountpoint onto the base dir.
///
/// An absolute mountpoint that already lies inside `base_dir` is taken as is
/// (`"/mnt/base/data"` under `/mnt/base` is `/mnt/base/data`). Anything else
/// is treated as relative, so a leading `/` does not escape `base_dir`
/// (`"/data"` under `/mnt/base` is `/mnt/base/data`). `..` never climbs above
/// `base_dir`, and the empty mountpoint resolves to `base_dir` itself.
pub fn join_mountpoint(base_dir: &Path, mountpoint: &str) -> PathBuf {
    let candidate = Path::new(mountpoint);
    let relative = if candidate.has_root() {
        candidate.strip_prefix(base_dir).unwrap_or(candidate)
    } else {
        candidate
    };

    let mut path = base_dir.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::ParentDir => {
                if path != base_dir {
                    path.pop();
                }
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    path
}

/// Check a mountpoint supplied by a caller before it touches the filesystem.
pub fn validate_mountpoint(mountpoint: &str) -> Result<()> {
    if Path::new(mountpoint)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(PersistError::InvalidMountpoint {
            mountpoint: mountpoint.to_string(),
            reason: "`..` components are not allowed".to_string(),
        });
    }
    if !Path::new(mountpoint)
        .components()
        .any(|c| matches!(c, Component::Normal(_)))
    {
        return Err(PersistError::InvalidMountpoint {
            mountpoint: mountpoint.to_string(),
            reason: "must name a directory below the base dir".to_string(),
        });
    }
    if mountpoint.contains('\0') {
        return Err(PersistError::InvalidMountpoint {
            mountpoint: mountpoint.to_string(),
            reason: "NUL bytes are not allowed".to_string(),
        });
    }
    Ok(())
}
