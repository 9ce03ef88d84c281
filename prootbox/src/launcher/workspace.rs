use std::fs::{self, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use super::error::{CleanupError, LaunchError};
use crate::config::{NO_CLEANUP_ENV, ROOT_PREFIX};

const ROOT_MODE: u32 = 0o700;

/// Exclusively owned, uniquely named per-run directory the rootfs is unpacked into.
///
/// The directory is removed exactly once: by [`EphemeralRoot::release`] or,
/// failing that, when the guard is dropped. With `keep` set it is left in place.
#[derive(Debug)]
pub struct EphemeralRoot {
    dir: Option<TempDir>,
    path: PathBuf,
    keep: bool,
}

impl EphemeralRoot {
    /// Allocate a fresh `rootfs*` directory (mode 0700) under `base`.
    pub fn create(base: &Path, keep: bool) -> Result<Self, LaunchError> {
        let dir = tempfile::Builder::new()
            .prefix(ROOT_PREFIX)
            .permissions(Permissions::from_mode(ROOT_MODE))
            .tempdir_in(base)
            .map_err(|source| LaunchError::Workspace {
                base: base.to_path_buf(),
                source,
            })?;
        let path = dir.path().to_path_buf();
        tracing::debug!(root = %path.display(), keep, "Allocated ephemeral root");

        Ok(Self {
            dir: Some(dir),
            path,
            keep,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the directory will survive the end of the run.
    pub fn is_kept(&self) -> bool {
        self.keep
    }

    /// Remove the directory now (or leave it, when kept). Later calls do nothing.
    pub fn release(&mut self) -> Result<(), CleanupError> {
        let Some(dir) = self.dir.take() else {
            return Ok(());
        };

        if self.keep {
            let path = dir.keep();
            tracing::info!(
                "Leaving ephemeral root at {} ({} is set)",
                path.display(),
                NO_CLEANUP_ENV
            );
            return Ok(());
        }

        match dir.close() {
            Ok(()) => {
                tracing::debug!(root = %self.path.display(), "Removed ephemeral root");
                Ok(())
            }
            Err(first) => {
                // Read-only directories from the image block removal of their contents.
                tracing::debug!(
                    "Retrying removal of {} after restoring write access: {}",
                    self.path.display(),
                    first
                );
                restore_owner_access(&self.path);
                fs::remove_dir_all(&self.path).map_err(|source| CleanupError {
                    path: self.path.clone(),
                    source,
                })
            }
        }
    }
}

impl Drop for EphemeralRoot {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!("{}: {}", e, e.source);
        }
    }
}

/// Best effort: give the owner rwx on every directory below `path`.
/// Symlinks are never followed.
fn restore_owner_access(path: &Path) {
    let Ok(meta) = fs::symlink_metadata(path) else {
        return;
    };
    if !meta.is_dir() {
        return;
    }

    let mode = meta.permissions().mode();
    if mode & 0o700 != 0o700 {
        let _ = fs::set_permissions(path, Permissions::from_mode(mode | 0o700));
    }

    if let Ok(entries) = fs::read_dir(path) {
        for entry in entries.flatten() {
            restore_owner_access(&entry.path());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_removes_directory_once() {
        let base = tempfile::tempdir().unwrap();
        let mut root = EphemeralRoot::create(base.path(), false).unwrap();
        let path = root.path().to_path_buf();
        fs::write(path.join("file"), b"x").unwrap();

        assert!(path.is_dir());
        root.release().unwrap();
        assert!(!path.exists());
        // Second release is a no-op
        root.release().unwrap();
    }

    #[test]
    fn test_drop_removes_directory() {
        let base = tempfile::tempdir().unwrap();
        let path = {
            let root = EphemeralRoot::create(base.path(), false).unwrap();
            root.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_keep_leaves_directory() {
        let base = tempfile::tempdir().unwrap();
        let path = {
            let root = EphemeralRoot::create(base.path(), true).unwrap();
            assert!(root.is_kept());
            fs::write(root.path().join("marker"), b"kept").unwrap();
            root.path().to_path_buf()
        };
        assert_eq!(fs::read(path.join("marker")).unwrap(), b"kept");
    }

    #[test]
    fn test_names_are_unique_and_prefixed() {
        let base = tempfile::tempdir().unwrap();
        let a = EphemeralRoot::create(base.path(), false).unwrap();
        let b = EphemeralRoot::create(base.path(), false).unwrap();
        assert_ne!(a.path(), b.path());
        let name = a.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(ROOT_PREFIX), "unexpected name {name}");
    }

    #[test]
    fn test_root_is_private_to_owner() {
        let base = tempfile::tempdir().unwrap();
        let root = EphemeralRoot::create(base.path(), false).unwrap();
        let mode = fs::metadata(root.path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, ROOT_MODE);
    }

    #[test]
    fn test_release_handles_read_only_directories() {
        let base = tempfile::tempdir().unwrap();
        let mut root = EphemeralRoot::create(base.path(), false).unwrap();
        let locked = root.path().join("nix/store");
        fs::create_dir_all(&locked).unwrap();
        fs::write(locked.join("file"), b"x").unwrap();
        fs::set_permissions(&locked, Permissions::from_mode(0o555)).unwrap();

        let path = root.path().to_path_buf();
        root.release().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_create_fails_for_missing_base() {
        let base = tempfile::tempdir().unwrap();
        let missing = base.path().join("does-not-exist");
        let err = EphemeralRoot::create(&missing, false).unwrap_err();
        assert!(matches!(err, LaunchError::Workspace { .. }));
    }
}
