//! Atomic file operations for safe JSON persistence.
//!
//! Implements atomic writes using:
//! 1. Write to temp file with unique PID+TID suffix, created with final mode
//! 2. fsync to ensure data reaches disk
//! 3. Atomic rename to target path
//!
//! A reader therefore sees either the previous snapshot or the new one, never
//! a truncated file.

use crate::error::{PersistError, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::thread;
use tracing::{debug, warn};

/// Read and parse a JSON file.
///
/// Returns `None` if the file doesn't exist, [`PersistError::SnapshotCorrupt`]
/// if it exists but does not parse as `T`.
pub fn atomic_read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PersistError::io_with_path(e, path)),
    };

    let data: T = serde_json::from_str(&contents).map_err(|e| PersistError::SnapshotCorrupt {
        path: path.to_path_buf(),
        message: e.to_string(),
        source: Some(e),
    })?;

    Ok(Some(data))
}

/// Write data to a JSON file atomically with the given permission bits.
///
/// Any failure is reported as [`PersistError::SnapshotWriteFailed`] and the
/// previous file at `path`, if any, is left intact.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T, mode: u32) -> Result<()> {
    let serialized = serde_json::to_string_pretty(data).map_err(|e| write_failed(
        path,
        format!("Failed to serialize data: {}", e),
        None,
    ))?;

    let temp_path = temp_path_for(path);

    if let Err(e) = write_synced(&temp_path, serialized.as_bytes(), mode) {
        discard_temp(&temp_path);
        return Err(write_failed(
            path,
            format!("Failed to write temp file {}", temp_path.display()),
            Some(e),
        ));
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        discard_temp(&temp_path);
        return Err(write_failed(
            path,
            format!("Failed to rename {} to {}", temp_path.display(), path.display()),
            Some(e),
        ));
    }

    debug!("Atomically wrote {}", path.display());
    Ok(())
}

fn write_synced(temp_path: &Path, bytes: &[u8], mode: u32) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }

    let mut file = options.open(temp_path)?;
    file.write_all(bytes)?;
    file.flush()?;
    file.sync_all()?;

    // `mode` on open is filtered by the umask; pin the exact bits.
    crate::platform::set_mode(temp_path, mode)?;
    Ok(())
}

fn discard_temp(temp_path: &Path) {
    if let Err(e) = fs::remove_file(temp_path) {
        if e.kind() != ErrorKind::NotFound {
            warn!("Failed to remove temp file {}: {}", temp_path.display(), e);
        }
    }
}

fn write_failed(path: &Path, message: String, source: Option<std::io::Error>) -> PersistError {
    PersistError::SnapshotWriteFailed {
        path: path.to_path_buf(),
        message,
        source,
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    path.with_extension(format!("json.{}.{}.tmp", process::id(), thread_id()))
}

/// Get a unique thread identifier.
fn thread_id() -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    thread::current().id().hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestData {
        name: String,
        value: i32,
    }

    #[test]
    fn test_atomic_write_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.json");

        let data = TestData {
            name: "test".to_string(),
            value: 42,
        };

        atomic_write_json(&path, &data, 0o600).unwrap();
        assert!(path.exists());

        let read_data: Option<TestData> = atomic_read_json(&path).unwrap();
        assert_eq!(read_data, Some(data));
    }

    #[test]
    fn test_atomic_read_nonexistent() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nonexistent.json");

        let result: Option<TestData> = atomic_read_json(&path).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_atomic_read_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("corrupt.json");
        std::fs::write(&path, "{ not json").unwrap();

        let result: Result<Option<TestData>> = atomic_read_json(&path);
        assert!(matches!(result, Err(PersistError::SnapshotCorrupt { .. })));
    }

    #[test]
    fn test_write_leaves_no_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.json");

        for value in 0..3 {
            let data = TestData {
                name: "overwrite".to_string(),
                value,
            };
            atomic_write_json(&path, &data, 0o600).unwrap();
        }

        let entries: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries.len(), 1);

        let read_data: Option<TestData> = atomic_read_json(&path).unwrap();
        assert_eq!(read_data.unwrap().value, 2);
    }

    #[test]
    fn test_write_into_missing_dir_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("missing").join("test.json");

        let data = TestData {
            name: "x".to_string(),
            value: 1,
        };
        let result = atomic_write_json(&path, &data, 0o600);
        assert!(matches!(result, Err(PersistError::SnapshotWriteFailed { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_written_file_is_owner_only() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("private.json");

        let data = TestData {
            name: "secret".to_string(),
            value: 7,
        };
        atomic_write_json(&path, &data, 0o600).unwrap();
        assert_eq!(crate::platform::permissions::mode_of(&path).unwrap(), 0o600);
    }
}
