//! Platform-specific file permission handling.
//!
//! Every directory and file the driver creates gets explicit mode bits on
//! Unix. On other platforms the helpers only create and never chmod.

use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

/// Create `path` and any missing parents, then pin `path` itself to `mode`.
///
/// Missing parents get `mode` filtered by the process umask; only the leaf is
/// chmodded to the exact bits. Idempotent: an existing directory is left as
/// is, including its mode, so pre-existing volume data never has its
/// permissions rewritten.
pub fn create_dir_all_with_mode(path: &Path, mode: u32) -> io::Result<()> {
    if path.is_dir() {
        return Ok(());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        fs::DirBuilder::new()
            .recursive(true)
            .mode(mode)
            .create(path)?;
        set_mode(path, mode)?;
        debug!("Created directory {} (mode {:o})", path.display(), mode);
    }

    #[cfg(not(unix))]
    {
        fs::create_dir_all(path)?;
        debug!(
            "Created directory {} (mode {:o} ignored on this platform)",
            path.display(),
            mode
        );
    }

    Ok(())
}

/// Set explicit mode bits on a file or directory.
///
/// # Platform Behavior
/// - **Linux/macOS**: `chmod` to `mode`
/// - **Windows**: No-op
pub fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        debug!("Set mode {:o} on {}", mode, path.display());
    }

    #[cfg(not(unix))]
    {
        let _ = (path, mode);
    }

    Ok(())
}

/// Current permission bits of `path`, masked to `0o777`.
#[cfg(unix)]
pub fn mode_of(path: &Path) -> io::Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    Ok(fs::metadata(path)?.permissions().mode() & 0o777)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_nested_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a").join("b").join("c");

        create_dir_all_with_mode(&path, 0o755).unwrap();
        assert!(path.is_dir());

        // Second call is a no-op
        create_dir_all_with_mode(&path, 0o755).unwrap();
        assert!(path.is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn test_set_mode_private() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("state.json");
        std::fs::write(&file_path, "{}").unwrap();

        set_mode(&file_path, 0o600).unwrap();
        assert_eq!(mode_of(&file_path).unwrap(), 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_new_leaf_gets_exact_mode() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("parent").join("leaf");

        // 0o777 is never what a umask-filtered mkdir produces by default.
        create_dir_all_with_mode(&path, 0o777).unwrap();
        assert_eq!(mode_of(&path).unwrap(), 0o777);

        let private = temp_dir.path().join("private");
        create_dir_all_with_mode(&private, 0o700).unwrap();
        assert_eq!(mode_of(&private).unwrap(), 0o700);
    }

    #[cfg(unix)]
    #[test]
    fn test_existing_dir_mode_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("existing");
        std::fs::create_dir(&path).unwrap();
        set_mode(&path, 0o750).unwrap();

        create_dir_all_with_mode(&path, 0o700).unwrap();
        assert_eq!(mode_of(&path).unwrap(), 0o750);
    }
}
