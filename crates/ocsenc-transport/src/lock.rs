use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Result, TransportError};

/// Default lock file guarding the stimulator FIFO.
pub const DEFAULT_LOCK_PATH: &str = "/tmp/.stim-lock";

/// Exclusive advisory lock on a lock file.
///
/// Prevents two readers from draining the same hardware FIFO. The lock is
/// released when the value is dropped.
pub struct DeviceLock {
    file: File,
    path: PathBuf,
}

impl DeviceLock {
    /// Take the lock without blocking.
    ///
    /// Returns [`TransportError::Locked`] if another holder already has it.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| TransportError::Open {
                path: path.clone(),
                source,
            })?;

        // SAFETY: `file` is an open descriptor owned by this function for the
        // duration of the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                return Err(TransportError::Locked(path));
            }
            return Err(TransportError::Open { path, source: err });
        }

        debug!(?path, "device lock acquired");
        Ok(Self { file, path })
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DeviceLock {
    fn drop(&mut self) {
        // SAFETY: the descriptor stays open until `self.file` is dropped after this call.
        let rc = unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
        if rc != 0 {
            warn!(path = ?self.path, error = %std::io::Error::last_os_error(), "failed to release device lock");
        }
    }
}

impl std::fmt::Debug for DeviceLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLock").field("path", &self.path).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_path(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "ocsenc-lock-{}-{}-{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir.join("enc.lock")
    }

    #[test]
    fn second_acquire_is_rejected() {
        let path = lock_path("exclusive");
        let _held = DeviceLock::acquire(&path).expect("first lock should succeed");

        let err = DeviceLock::acquire(&path).unwrap_err();
        assert!(matches!(err, TransportError::Locked(p) if p == path));

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn lock_is_released_on_drop() {
        let path = lock_path("release");
        {
            let held = DeviceLock::acquire(&path).expect("first lock should succeed");
            assert_eq!(held.path(), path.as_path());
        }
        let again = DeviceLock::acquire(&path);
        assert!(again.is_ok());

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn missing_parent_directory_is_open_error() {
        let err = DeviceLock::acquire("/nonexistent-ocsenc-dir/enc.lock").unwrap_err();
        assert!(matches!(err, TransportError::Open { .. }));
    }
}
