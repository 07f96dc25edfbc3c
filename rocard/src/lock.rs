//! Interprocess channel ownership lock.
//!
//! One channel may have at most one owner across all processes. Ownership is
//! arbitrated with a non-blocking `flock` on a deterministic lock file; the
//! kernel releases the lock when the holding file descriptor goes away, so a
//! crashed owner never wedges the channel. The lock file itself is left on
//! disk after release; other tools may still want the name.

use std::fs::OpenOptions;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};

use crate::error::{Error, Result};

/// Guard holding exclusive ownership of one channel.
///
/// Dropping the guard releases the lock.
pub struct ChannelLock {
    _flock: Flock<std::fs::File>,
    path: PathBuf,
}

impl std::fmt::Debug for ChannelLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelLock").field("path", &self.path).finish()
    }
}

impl ChannelLock {
    /// Acquires the lock at `path`, creating the file if needed.
    ///
    /// Acquisition never blocks: if another process holds the lock this
    /// fails immediately with [`Error::ChannelBusy`].
    ///
    /// # Errors
    ///
    /// `ChannelBusy` on contention; `Io` when the lock file cannot be
    /// created or opened.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| Error::Io {
                operation: "creating lock directory",
                source,
            })?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|source| Error::Io {
                operation: "opening lock file",
                source,
            })?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(flock) => {
                log::debug!("acquired channel lock {}", path.display());
                Ok(Self {
                    _flock: flock,
                    path: path.to_path_buf(),
                })
            }
            Err((_, nix::errno::Errno::EWOULDBLOCK)) => Err(Error::ChannelBusy {
                lock_path: path.display().to_string(),
            }),
            Err((_, errno)) => Err(Error::Io {
                operation: "locking channel lock file",
                source: std::io::Error::from(errno),
            }),
        }
    }

    /// Path of the lock file this guard holds.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw descriptor of the locked file (used by tests).
    #[must_use]
    pub fn as_raw_fd(&self) -> i32 {
        self._flock.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chan0.lock");

        let lock = ChannelLock::acquire(&path).unwrap();
        assert!(path.exists());

        // A second acquisition on a fresh descriptor must contend.
        match ChannelLock::acquire(&path) {
            Err(Error::ChannelBusy { lock_path }) => {
                assert!(lock_path.contains("chan0.lock"));
            }
            other => panic!("expected ChannelBusy, got {other:?}"),
        }

        drop(lock);
        // After release the channel can be taken again, and the file stays.
        let _relock = ChannelLock::acquire(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn distinct_channels_do_not_contend() {
        let dir = tempfile::tempdir().unwrap();
        let _a = ChannelLock::acquire(&dir.path().join("ch0.lock")).unwrap();
        let _b = ChannelLock::acquire(&dir.path().join("ch1.lock")).unwrap();
    }

    #[test]
    fn creates_missing_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep/nested/ch0.lock");
        let _lock = ChannelLock::acquire(&path).unwrap();
        assert!(path.exists());
    }
}
