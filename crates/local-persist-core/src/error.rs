//! Error types for the local-persist driver.
//!
//! Lifecycle failures (`MissingRequiredOption`, `AlreadyExists`, ...) are
//! returned to the plugin caller. Snapshot and live-query failures are
//! mostly recovered inside the crate; see [`PersistError::is_recoverable`].

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the local-persist library.
#[derive(Debug, Error)]
pub enum PersistError {
    // Lifecycle errors
    #[error("The `{option}` option is required")]
    MissingRequiredOption { option: String },

    #[error("The volume {name} already exists")]
    AlreadyExists { name: String },

    #[error("Volume name must not be empty")]
    InvalidName,

    #[error("Invalid mountpoint {mountpoint}: {reason}")]
    InvalidMountpoint { mountpoint: String, reason: String },

    #[error("Could not create directory {path:?}: {source}")]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Snapshot errors
    #[error("No snapshot at {0:?}")]
    SnapshotNotFound(PathBuf),

    #[error("Snapshot at {path:?} is corrupt: {message}")]
    SnapshotCorrupt {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Failed to write snapshot {path:?}: {message}")]
    SnapshotWriteFailed {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("State directory {0:?} is locked by another driver process")]
    StateLocked(PathBuf),

    // Live source errors
    #[error("Live volume query failed: {message}")]
    LiveQueryFailed { message: String },

    #[error("Live source reported {count} conflicting observation(s)")]
    ConflictingObservations { count: usize },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for local-persist operations.
pub type Result<T> = std::result::Result<T, PersistError>;

impl From<std::io::Error> for PersistError {
    fn from(err: std::io::Error) -> Self {
        PersistError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl PersistError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        PersistError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a live query error from any displayable cause.
    pub fn live_query(message: impl std::fmt::Display) -> Self {
        PersistError::LiveQueryFailed {
            message: message.to_string(),
        }
    }

    /// Errors the driver degrades around instead of surfacing.
    ///
    /// Snapshot write failures are logged without rolling back the in-memory
    /// mutation; snapshot read and live query failures fall back during
    /// reconciliation.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PersistError::SnapshotNotFound(_)
                | PersistError::SnapshotCorrupt { .. }
                | PersistError::SnapshotWriteFailed { .. }
                | PersistError::LiveQueryFailed { .. }
                | PersistError::ConflictingObservations { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PersistError::MissingRequiredOption {
            option: "mountpoint".into(),
        };
        assert_eq!(err.to_string(), "The `mountpoint` option is required");

        let err = PersistError::AlreadyExists {
            name: "vol1".into(),
        };
        assert_eq!(err.to_string(), "The volume vol1 already exists");
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(PersistError::SnapshotNotFound(PathBuf::from("/tmp/x.json")).is_recoverable());
        assert!(PersistError::live_query("daemon down").is_recoverable());
        assert!(!PersistError::AlreadyExists {
            name: "vol1".into()
        }
        .is_recoverable());
        assert!(!PersistError::InvalidName.is_recoverable());
    }

    #[test]
    fn test_io_with_path_keeps_path() {
        let err = PersistError::io_with_path(
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            "/var/lib/state",
        );
        match err {
            PersistError::Io { path, .. } => {
                assert_eq!(path, Some(PathBuf::from("/var/lib/state")))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
