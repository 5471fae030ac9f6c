//! Per-entry advisory locks
//!
//! Every compute-or-load call holds an exclusive lock on
//! `{base}/.locks/{dir_name}.lock` while it checks, computes and publishes
//! the entry, so two processes never build the same entry at once.
//!
//! A lock file is only unlinked by its holder. Anyone who locked an unlinked
//! file notices that the path no longer points at it and locks again.

use crate::error::{StashError, StashResult};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory holding lock files, relative to the cache base
pub const LOCKS_DIR: &str = ".locks";

/// An exclusive lock on one cache entry, released on drop
#[derive(Debug)]
pub struct EntryLock {
    file: File,
    path: PathBuf,
}

impl EntryLock {
    /// Lock file path for an entry
    pub fn lock_path(base_dir: &Path, dir_name: &str) -> PathBuf {
        base_dir.join(LOCKS_DIR).join(format!("{}.lock", dir_name))
    }

    /// Block until the entry lock is acquired
    ///
    /// The blocking `flock` runs on tokio's blocking pool.
    pub async fn acquire(base_dir: &Path, dir_name: &str) -> StashResult<Self> {
        let path = Self::lock_path(base_dir, dir_name);
        let task_path = path.clone();

        tokio::task::spawn_blocking(move || Self::acquire_blocking(task_path))
            .await
            .map_err(|e| StashError::Internal(format!("lock task failed: {}", e)))?
            .map_err(|source| StashError::CacheLock { path, source })
    }

    /// Try to acquire the lock without waiting
    pub fn try_acquire(base_dir: &Path, dir_name: &str) -> StashResult<Self> {
        let path = Self::lock_path(base_dir, dir_name);
        let locked = Self::open(&path).and_then(|file| {
            file.try_lock_exclusive()?;
            if Self::is_current(&file, &path) {
                Ok(file)
            } else {
                Err(std::io::Error::new(
                    std::io::ErrorKind::WouldBlock,
                    "lock file was removed",
                ))
            }
        });

        match locked {
            Ok(file) => {
                debug!("Acquired lock {}", path.display());
                Ok(Self { file, path })
            }
            Err(source) => Err(StashError::CacheLock { path, source }),
        }
    }

    fn acquire_blocking(path: PathBuf) -> std::io::Result<Self> {
        loop {
            let file = Self::open(&path)?;
            file.lock_exclusive()?;
            if Self::is_current(&file, &path) {
                debug!("Acquired lock {}", path.display());
                return Ok(Self { file, path });
            }
            debug!("Lock file {} was removed while waiting", path.display());
        }
    }

    /// Release the lock and delete its file
    pub fn remove(self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed lock {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => debug!("Keeping lock {}: {}", self.path.display(), e),
        }
    }

    /// Whether `path` still names the locked file
    #[cfg(unix)]
    fn is_current(file: &File, path: &Path) -> bool {
        use std::os::unix::fs::MetadataExt;

        match (file.metadata(), std::fs::metadata(path)) {
            (Ok(held), Ok(named)) => held.dev() == named.dev() && held.ino() == named.ino(),
            _ => false,
        }
    }

    #[cfg(not(unix))]
    fn is_current(_file: &File, path: &Path) -> bool {
        path.is_file()
    }

    fn open(path: &Path) -> std::io::Result<File> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for EntryLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn lock_is_exclusive() {
        let dir = TempDir::new().unwrap();

        let first = EntryLock::acquire(dir.path(), "rec_sorting").await.unwrap();
        let second = EntryLock::try_acquire(dir.path(), "rec_sorting");
        assert!(matches!(second, Err(StashError::CacheLock { .. })));

        drop(first);
        let third = EntryLock::try_acquire(dir.path(), "rec_sorting").unwrap();
        assert!(third.path().ends_with(".locks/rec_sorting.lock"));
    }

    #[tokio::test]
    async fn locks_are_per_entry() {
        let dir = TempDir::new().unwrap();

        let _a = EntryLock::acquire(dir.path(), "rec_a").await.unwrap();
        let b = EntryLock::try_acquire(dir.path(), "rec_b");
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn remove_deletes_the_lock_file() {
        let dir = TempDir::new().unwrap();

        let lock = EntryLock::acquire(dir.path(), "rec_sorting").await.unwrap();
        let path = lock.path().to_path_buf();
        lock.remove();
        assert!(!path.exists());

        let again = EntryLock::try_acquire(dir.path(), "rec_sorting").unwrap();
        assert!(again.path().exists());
    }

    #[tokio::test]
    async fn waiter_relocks_after_removal() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().to_path_buf();

        let first = EntryLock::acquire(dir.path(), "rec_sorting").await.unwrap();
        let waiter = tokio::spawn(async move { EntryLock::acquire(&base, "rec_sorting").await });
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        first.remove();

        let second = waiter.await.unwrap().unwrap();
        assert!(second.path().exists());
        // The file now on disk is the one the waiter holds
        assert!(EntryLock::try_acquire(dir.path(), "rec_sorting").is_err());
    }
}
