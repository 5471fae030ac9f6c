//! Artifact store: the compute-or-load wrapper
//!
//! `ArtifactStore::get_or_compute` either reloads the entry for a key or
//! runs the computation in a staging directory and publishes the result
//! with a single rename.

use crate::cache::entry::{CacheEntry, CacheState, EntryManifest};
use crate::cache::key::{CacheKey, KeyMode};
use crate::cache::lock::{EntryLock, LOCKS_DIR};
use crate::error::{StashError, StashResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Directory holding in-progress computations, relative to the cache base
pub const STAGING_DIR: &str = ".staging";

/// A value that can be persisted as a directory and read back
#[async_trait]
pub trait Artifact: Sized + Send + Sync {
    /// Kind recorded in the entry manifest
    const KIND: &'static str;

    /// Write this artifact into `dir` (which already exists)
    async fn save(&self, dir: &Path) -> StashResult<()>;

    /// Read an artifact previously written by `save`
    async fn load(dir: &Path) -> StashResult<Self>;
}

/// Whether a value came from disk or was just computed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Loaded from an existing entry
    Hit,
    /// Computed and published
    Computed,
}

impl CacheOutcome {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit)
    }
}

impl fmt::Display for CacheOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hit => write!(f, "loaded from cache"),
            Self::Computed => write!(f, "computed"),
        }
    }
}

/// Result of a compute-or-load call
#[derive(Debug)]
pub struct Cached<T> {
    /// The artifact, always as read back from `path`
    pub value: T,
    /// Final entry directory
    pub path: PathBuf,
    /// Key the entry was stored under
    pub key: CacheKey,
    /// Hit or computed
    pub outcome: CacheOutcome,
}

/// Store behaviour switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// How keys created through `ArtifactStore::key` render discriminators
    pub key_mode: KeyMode,
    /// Hold a per-entry file lock while checking and building
    pub lock: bool,
    /// Treat directories without a manifest as complete
    pub adopt_unmarked: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            key_mode: KeyMode::Hashed,
            lock: true,
            adopt_unmarked: false,
        }
    }
}

/// Entries and staging directories removed (or selected, in a dry run) by gc
#[derive(Debug, Default)]
pub struct GcReport {
    pub entries: Vec<CacheEntry>,
    pub stale_staging: Vec<PathBuf>,
    /// Lock files deleted because their entry no longer exists
    pub locks_removed: usize,
}

impl GcReport {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.stale_staging.is_empty() && self.locks_removed == 0
    }
}

/// File-system backed artifact cache rooted at one base directory
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    base_dir: PathBuf,
    options: StoreOptions,
}

impl ArtifactStore {
    /// Create a store with default options
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self::with_options(base_dir, StoreOptions::default())
    }

    /// Create a store with explicit options
    pub fn with_options(base_dir: impl Into<PathBuf>, options: StoreOptions) -> Self {
        Self {
            base_dir: base_dir.into(),
            options,
        }
    }

    /// Base directory of the store
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Store options
    pub fn options(&self) -> StoreOptions {
        self.options
    }

    /// Derive a key under this store's base directory
    pub fn key<T: Serialize + ?Sized>(
        &self,
        name: &str,
        label: &str,
        config: &T,
    ) -> StashResult<CacheKey> {
        CacheKey::new(&self.base_dir, name, label, config, self.options.key_mode)
    }

    /// Current state of the entry for `key`
    pub fn state(&self, key: &CacheKey) -> CacheState {
        CacheState::of(&key.path())
    }

    /// Load the entry for `key`, or compute, persist and return it.
    ///
    /// The computation receives a scratch directory that becomes the entry
    /// directory on success; anything it writes there is published along
    /// with the artifact. On failure the scratch directory is removed and
    /// the error is returned unchanged.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &CacheKey,
        compute: F,
    ) -> StashResult<Cached<T>>
    where
        T: Artifact,
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = StashResult<T>>,
    {
        let base = key.base_dir();
        let path = key.path();
        let dir_name = key.dir_name();

        fs::create_dir_all(base)
            .await
            .map_err(|e| StashError::io(format!("creating cache directory {}", base.display()), e))?;

        let _lock = if self.options.lock {
            Some(EntryLock::acquire(base, &dir_name).await?)
        } else {
            None
        };

        match CacheState::of(&path) {
            CacheState::Complete => {
                self.verify_manifest(key, T::KIND, &path).await?;
                let value = T::load(&path).await?;
                info!("{} {} loaded from {}", T::KIND, key.name(), path.display());
                return Ok(Cached {
                    value,
                    path,
                    key: key.clone(),
                    outcome: CacheOutcome::Hit,
                });
            }
            CacheState::Building if self.options.adopt_unmarked => {
                warn!(
                    "Adopting {} without a completion manifest as a cached {}",
                    path.display(),
                    T::KIND
                );
                let value = T::load(&path).await?;
                return Ok(Cached {
                    value,
                    path,
                    key: key.clone(),
                    outcome: CacheOutcome::Hit,
                });
            }
            CacheState::Building => {
                warn!("Discarding incomplete cache entry {}", path.display());
                fs::remove_dir_all(&path).await.map_err(|e| {
                    StashError::io(format!("removing incomplete entry {}", path.display()), e)
                })?;
            }
            CacheState::Miss => {}
        }

        let staging = staging_path(base, &dir_name);
        fs::create_dir_all(&staging).await.map_err(|e| {
            StashError::io(format!("creating staging directory {}", staging.display()), e)
        })?;
        debug!("Computing {} in {}", dir_name, staging.display());

        if let Err(e) = self.build::<T, F, Fut>(key, &staging, compute).await {
            let _ = fs::remove_dir_all(&staging).await;
            return Err(e);
        }

        self.publish(&staging, &path).await?;
        let value = T::load(&path).await?;
        info!("{} {} saved to {}", T::KIND, key.name(), path.display());

        Ok(Cached {
            value,
            path,
            key: key.clone(),
            outcome: CacheOutcome::Computed,
        })
    }

    async fn build<T, F, Fut>(&self, key: &CacheKey, staging: &Path, compute: F) -> StashResult<()>
    where
        T: Artifact,
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = StashResult<T>>,
    {
        let value = compute(staging.to_path_buf()).await?;
        value.save(staging).await?;
        EntryManifest::new(key, T::KIND).write(staging).await
    }

    async fn publish(&self, staging: &Path, path: &Path) -> StashResult<()> {
        match fs::rename(staging, path).await {
            Ok(()) => Ok(()),
            // Only reachable with locking disabled: another process won.
            Err(_) if CacheState::of(path) == CacheState::Complete => {
                warn!(
                    "{} was published concurrently, keeping the existing entry",
                    path.display()
                );
                let _ = fs::remove_dir_all(staging).await;
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_dir_all(staging).await;
                Err(StashError::io(
                    format!("publishing cache entry {}", path.display()),
                    e,
                ))
            }
        }
    }

    async fn verify_manifest(&self, key: &CacheKey, kind: &str, path: &Path) -> StashResult<()> {
        let manifest = EntryManifest::read(path).await?;

        if !manifest.is_compatible() {
            return Err(StashError::CacheFormat {
                path: path.to_path_buf(),
                found: manifest.format_version,
            });
        }

        if manifest.kind != kind {
            return Err(StashError::CacheConflict {
                path: path.to_path_buf(),
                expected: kind.to_string(),
                found: manifest.kind,
            });
        }

        if manifest.fingerprint != *key.fingerprint() {
            match key.mode() {
                KeyMode::Hashed => {
                    return Err(StashError::CacheConflict {
                        path: path.to_path_buf(),
                        expected: key.fingerprint().short().to_string(),
                        found: manifest.fingerprint.short().to_string(),
                    });
                }
                KeyMode::Suffix => warn!(
                    "{} was built with a different configuration ({} != {}); remove it to recompute",
                    path.display(),
                    manifest.fingerprint.short(),
                    key.fingerprint().short()
                ),
            }
        }

        Ok(())
    }

    /// List all entries under the base directory, sorted by name
    pub async fn list(&self) -> StashResult<Vec<CacheEntry>> {
        if !self.base_dir.is_dir() {
            return Ok(vec![]);
        }

        let mut entries = vec![];
        let mut dir = fs::read_dir(&self.base_dir)
            .await
            .map_err(|e| StashError::io("reading cache directory", e))?;

        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| StashError::io("reading cache entry", e))?
        {
            let path = item.path();
            let Some(dir_name) = path.file_name().and_then(|n| n.to_str()).map(String::from)
            else {
                continue;
            };
            if dir_name.starts_with('.') || !path.is_dir() {
                continue;
            }
            entries.push(self.describe(dir_name, path).await?);
        }

        entries.sort_by(|a, b| a.dir_name.cmp(&b.dir_name));
        Ok(entries)
    }

    /// Describe a single entry by directory name
    pub async fn entry(&self, dir_name: &str) -> StashResult<CacheEntry> {
        let path = self.entry_path(dir_name)?;
        if !path.is_dir() {
            return Err(StashError::CacheEntryNotFound(dir_name.to_string()));
        }
        self.describe(dir_name.to_string(), path).await
    }

    async fn describe(&self, dir_name: String, path: PathBuf) -> StashResult<CacheEntry> {
        let state = CacheState::of(&path);
        let manifest = match state {
            CacheState::Complete => EntryManifest::read(&path).await.ok(),
            _ => None,
        };
        let modified_at = fs::metadata(&path)
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from);
        let size_bytes = dir_size(&path).await.ok();

        Ok(CacheEntry {
            dir_name,
            path,
            state,
            manifest,
            modified_at,
            size_bytes,
        })
    }

    /// Remove one entry by directory name
    pub async fn remove(&self, dir_name: &str) -> StashResult<()> {
        let path = self.entry_path(dir_name)?;
        if !path.is_dir() {
            return Err(StashError::CacheEntryNotFound(dir_name.to_string()));
        }

        let lock = if self.options.lock {
            Some(EntryLock::acquire(&self.base_dir, dir_name).await?)
        } else {
            None
        };

        fs::remove_dir_all(&path)
            .await
            .map_err(|e| StashError::io(format!("removing cache entry {}", path.display()), e))?;
        if let Some(lock) = lock {
            lock.remove();
        }
        info!("Removed cache entry {}", dir_name);
        Ok(())
    }

    /// Remove every entry and all staging directories, returning the
    /// number of entries removed
    pub async fn clear(&self) -> StashResult<usize> {
        let entries = self.list().await?;
        let count = entries.len();

        for entry in entries {
            self.remove(&entry.dir_name).await?;
        }

        let staging = self.base_dir.join(STAGING_DIR);
        if staging.is_dir() {
            fs::remove_dir_all(&staging)
                .await
                .map_err(|e| StashError::io("removing staging directory", e))?;
        }
        self.sweep_locks().await?;

        Ok(count)
    }

    /// Remove entries older than `days` (0 disables age-based removal) and
    /// staging directories left behind by processes that no longer run.
    pub async fn gc(&self, days: u32, dry_run: bool) -> StashResult<GcReport> {
        let mut report = GcReport::default();

        if days > 0 {
            report.entries = self
                .list()
                .await?
                .into_iter()
                .filter(|e| e.is_older_than_days(days))
                .collect();
        }
        report.stale_staging = self.stale_staging().await?;

        if dry_run {
            return Ok(report);
        }

        for entry in &report.entries {
            debug!("Removing expired entry {}", entry.dir_name);
            self.remove(&entry.dir_name).await?;
        }
        for dir in &report.stale_staging {
            debug!("Removing stale staging directory {}", dir.display());
            fs::remove_dir_all(dir).await.map_err(|e| {
                StashError::io(format!("removing staging directory {}", dir.display()), e)
            })?;
        }
        report.locks_removed = self.sweep_locks().await?;

        Ok(report)
    }

    /// Delete lock files whose entry does not exist and that nobody holds,
    /// returning how many were deleted
    async fn sweep_locks(&self) -> StashResult<usize> {
        let locks = self.base_dir.join(LOCKS_DIR);
        if !locks.is_dir() {
            return Ok(0);
        }

        let mut removed = 0;
        let mut dir = fs::read_dir(&locks)
            .await
            .map_err(|e| StashError::io("reading lock directory", e))?;

        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| StashError::io("reading lock entry", e))?
        {
            let file_name = item.file_name();
            let Some(dir_name) = file_name.to_str().and_then(|n| n.strip_suffix(".lock")) else {
                continue;
            };
            if self.base_dir.join(dir_name).exists() {
                continue;
            }
            // Busy locks belong to a build in progress
            let Ok(lock) = EntryLock::try_acquire(&self.base_dir, dir_name) else {
                continue;
            };
            if !self.base_dir.join(dir_name).exists() {
                lock.remove();
                removed += 1;
            }
        }

        if removed > 0 {
            debug!("Removed {} orphaned lock files", removed);
        }
        Ok(removed)
    }

    /// Total size in bytes of all entries
    pub async fn total_size(&self) -> StashResult<u64> {
        Ok(self
            .list()
            .await?
            .iter()
            .filter_map(|e| e.size_bytes)
            .sum())
    }

    async fn stale_staging(&self) -> StashResult<Vec<PathBuf>> {
        let staging = self.base_dir.join(STAGING_DIR);
        if !staging.is_dir() {
            return Ok(vec![]);
        }

        let mut stale = vec![];
        let mut dir = fs::read_dir(&staging)
            .await
            .map_err(|e| StashError::io("reading staging directory", e))?;

        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|e| StashError::io("reading staging entry", e))?
        {
            let path = item.path();
            let owner = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(staging_owner);
            match owner {
                Some(pid) if process_alive(pid) => {}
                _ => stale.push(path),
            }
        }

        stale.sort();
        Ok(stale)
    }

    fn entry_path(&self, dir_name: &str) -> StashResult<PathBuf> {
        if dir_name.is_empty()
            || dir_name.starts_with('.')
            || dir_name.contains('/')
            || dir_name.contains('\\')
            || dir_name.contains("..")
        {
            return Err(StashError::InvalidCacheName {
                name: dir_name.to_string(),
                reason: "not a cache entry name".to_string(),
            });
        }
        Ok(self.base_dir.join(dir_name))
    }
}

/// Staging directory for one build: `{base}/.staging/{dir_name}-{pid}-{uuid}`
fn staging_path(base: &Path, dir_name: &str) -> PathBuf {
    base.join(STAGING_DIR).join(format!(
        "{}-{}-{}",
        dir_name,
        std::process::id(),
        uuid::Uuid::new_v4().simple()
    ))
}

/// Parse the owning pid out of a staging directory name
fn staging_owner(name: &str) -> Option<u32> {
    let mut parts = name.rsplitn(3, '-');
    let _uuid = parts.next()?;
    let pid = parts.next()?;
    parts.next()?;
    pid.parse().ok()
}

/// Check whether a process with the given pid is running
fn process_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }

    #[cfg(unix)]
    {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        // Signal 0 probes for existence; EPERM means it exists under another user.
        let rc = unsafe { libc::kill(pid, 0) };
        rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(not(unix))]
    {
        true
    }
}

/// Recursive size of a directory in bytes
async fn dir_size(path: &Path) -> StashResult<u64> {
    let mut total = 0;
    let mut stack = vec![path.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| StashError::io(format!("reading {}", dir.display()), e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StashError::io(format!("reading {}", dir.display()), e))?
        {
            let meta = entry
                .metadata()
                .await
                .map_err(|e| StashError::io("reading metadata", e))?;
            if meta.is_dir() {
                stack.push(entry.path());
            } else {
                total += meta.len();
            }
        }
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::MANIFEST_FILE;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq)]
    struct Counter {
        value: u32,
    }

    #[async_trait]
    impl Artifact for Counter {
        const KIND: &'static str = "counter";

        async fn save(&self, dir: &Path) -> StashResult<()> {
            fs::write(dir.join("value.txt"), self.value.to_string())
                .await
                .map_err(|e| StashError::io("writing value", e))
        }

        async fn load(dir: &Path) -> StashResult<Self> {
            let raw = fs::read_to_string(dir.join("value.txt"))
                .await
                .map_err(|e| StashError::io("reading value", e))?;
            let value = raw
                .trim()
                .parse()
                .map_err(|_| StashError::Internal("bad value".into()))?;
            Ok(Self { value })
        }
    }

    #[derive(Debug)]
    struct Other;

    #[async_trait]
    impl Artifact for Other {
        const KIND: &'static str = "other";

        async fn save(&self, _dir: &Path) -> StashResult<()> {
            Ok(())
        }

        async fn load(_dir: &Path) -> StashResult<Self> {
            Ok(Other)
        }
    }

    async fn counted(
        store: &ArtifactStore,
        key: &CacheKey,
        calls: &Arc<AtomicUsize>,
        value: u32,
    ) -> StashResult<Cached<Counter>> {
        let calls = Arc::clone(calls);
        store
            .get_or_compute(key, |_scratch| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Counter { value })
            })
            .await
    }

    #[tokio::test]
    async fn computes_once_then_loads() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let key = store.key("rec1", "preprocessed", &32u32).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = counted(&store, &key, &calls, 7).await.unwrap();
        let second = counted(&store, &key, &calls, 99).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.outcome, CacheOutcome::Computed);
        assert_eq!(second.outcome, CacheOutcome::Hit);
        assert_eq!(first.value, second.value);
        assert_eq!(second.value.value, 7);
        assert_eq!(store.state(&key), CacheState::Complete);
        assert!(first.path.join(MANIFEST_FILE).is_file());
    }

    #[tokio::test]
    async fn recomputes_after_deletion() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let key = store.key("rec1", "sorting", &1u8).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = counted(&store, &key, &calls, 1).await.unwrap();
        std::fs::remove_dir_all(&first.path).unwrap();
        let second = counted(&store, &key, &calls, 2).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(second.outcome, CacheOutcome::Computed);
        assert_eq!(second.value.value, 2);
    }

    #[tokio::test]
    async fn distinct_discriminators_are_independent() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let a = store.key("rec1", "sorting", &1u8).unwrap();
        let b = store.key("rec1", "sorting_v2", &1u8).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = counted(&store, &a, &calls, 1).await.unwrap();
        let second = counted(&store, &b, &calls, 2).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_ne!(first.path, second.path);
        assert_eq!(first.value.value, 1);
        assert_eq!(second.value.value, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_callers_compute_once() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let key = store.key("rec1", "sorting", &1u8).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            counted(&store, &key, &calls, 5),
            counted(&store, &key, &calls, 6)
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.value, b.value);
        assert!(a.outcome.is_hit() != b.outcome.is_hit());
    }

    #[tokio::test]
    async fn incomplete_directory_is_recomputed() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let key = store.key("rec1", "preprocessed", &1u8).unwrap();
        std::fs::create_dir_all(key.path()).unwrap();
        std::fs::write(key.path().join("value.txt"), "41").unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let result = counted(&store, &key, &calls, 42).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.value.value, 42);
    }

    #[tokio::test]
    async fn adopts_unmarked_directory_when_enabled() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::with_options(
            dir.path(),
            StoreOptions {
                key_mode: KeyMode::Suffix,
                adopt_unmarked: true,
                ..StoreOptions::default()
            },
        );
        let key = store.key("rec1", "preprocessed", &1u8).unwrap();
        std::fs::create_dir_all(key.path()).unwrap();
        std::fs::write(key.path().join("value.txt"), "41").unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let result = counted(&store, &key, &calls, 42).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(result.outcome, CacheOutcome::Hit);
        assert_eq!(result.value.value, 41);
    }

    #[tokio::test]
    async fn failed_computation_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let key = store.key("rec1", "sorting", &1u8).unwrap();

        let result: StashResult<Cached<Counter>> = store
            .get_or_compute(&key, |scratch| async move {
                std::fs::write(scratch.join("partial.bin"), b"half").unwrap();
                Err(StashError::SorterFailed {
                    sorter: "test".into(),
                    code: 1,
                    stderr: "boom".into(),
                })
            })
            .await;

        assert!(matches!(result, Err(StashError::SorterFailed { .. })));
        assert_eq!(store.state(&key), CacheState::Miss);
        let staging = dir.path().join(STAGING_DIR);
        assert_eq!(std::fs::read_dir(staging).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn scratch_files_are_published() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let key = store.key("rec1", "sorting", &1u8).unwrap();

        let result = store
            .get_or_compute(&key, |scratch| async move {
                fs::create_dir_all(scratch.join("sorter_output")).await.unwrap();
                Ok(Counter { value: 3 })
            })
            .await
            .unwrap();

        assert!(result.path.join("sorter_output").is_dir());
    }

    #[tokio::test]
    async fn fingerprint_mismatch_is_conflict_when_hashed() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let key = store.key("rec1", "sorting", &1u8).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        counted(&store, &key, &calls, 1).await.unwrap();

        // Same directory name, different full fingerprint
        let mut manifest = EntryManifest::read(&key.path()).await.unwrap();
        manifest.fingerprint = crate::cache::Fingerprint::of_bytes(b"other");
        manifest.write(&key.path()).await.unwrap();

        let result = counted(&store, &key, &calls, 2).await;
        assert!(matches!(result, Err(StashError::CacheConflict { .. })));
    }

    #[tokio::test]
    async fn fingerprint_mismatch_is_tolerated_in_suffix_mode() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::with_options(
            dir.path(),
            StoreOptions {
                key_mode: KeyMode::Suffix,
                ..StoreOptions::default()
            },
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let first = store.key("rec1", "sorting", &1u8).unwrap();
        let second = store.key("rec1", "sorting", &2u8).unwrap();
        assert_eq!(first.path(), second.path());

        counted(&store, &first, &calls, 1).await.unwrap();
        let stale = counted(&store, &second, &calls, 2).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(stale.value.value, 1);
    }

    #[tokio::test]
    async fn kind_mismatch_is_conflict() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let key = store.key("rec1", "sorting", &1u8).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        counted(&store, &key, &calls, 1).await.unwrap();

        let result = store
            .get_or_compute(&key, |_| async { Ok(Other) })
            .await;
        assert!(matches!(result, Err(StashError::CacheConflict { .. })));
    }

    #[tokio::test]
    async fn list_remove_and_clear() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let calls = Arc::new(AtomicUsize::new(0));
        let a = store.key("rec1", "preprocessed", &1u8).unwrap();
        let b = store.key("rec2", "preprocessed", &1u8).unwrap();
        counted(&store, &a, &calls, 1).await.unwrap();
        counted(&store, &b, &calls, 2).await.unwrap();

        let entries = store.list().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].dir_name, a.dir_name());
        assert_eq!(entries[0].kind(), "counter");
        assert!(entries[0].size_bytes.unwrap() > 0);
        assert!(store.total_size().await.unwrap() > 0);

        store.remove(&a.dir_name()).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);
        assert!(matches!(
            store.remove(&a.dir_name()).await,
            Err(StashError::CacheEntryNotFound(_))
        ));
        assert!(store.remove("../escape").await.is_err());

        assert_eq!(store.clear().await.unwrap(), 1);
        assert!(store.list().await.unwrap().is_empty());
        assert_eq!(lock_files(dir.path()), 0);
    }

    fn lock_files(base: &Path) -> usize {
        std::fs::read_dir(base.join(LOCKS_DIR))
            .map(|dir| dir.count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn gc_sweeps_orphaned_locks_but_not_busy_ones() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let calls = Arc::new(AtomicUsize::new(0));
        let kept = store.key("kept", "sorting", &1u8).unwrap();
        counted(&store, &kept, &calls, 1).await.unwrap();

        // A failed build leaves its lock file behind
        let failed = store.key("failed", "sorting", &1u8).unwrap();
        let result: StashResult<Cached<Counter>> = store
            .get_or_compute(&failed, |_| async { Err(StashError::Internal("boom".into())) })
            .await;
        assert!(result.is_err());
        let busy = EntryLock::acquire(dir.path(), "building_sorting").await.unwrap();
        assert_eq!(lock_files(dir.path()), 3);

        let report = store.gc(0, false).await.unwrap();
        assert_eq!(report.locks_removed, 1);
        assert!(!EntryLock::lock_path(dir.path(), &failed.dir_name()).exists());
        assert!(EntryLock::lock_path(dir.path(), &kept.dir_name()).exists());
        assert!(busy.path().exists());
        assert!(kept.path().is_dir());
    }

    #[tokio::test]
    async fn gc_removes_old_entries_and_dead_staging() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let calls = Arc::new(AtomicUsize::new(0));
        let old = store.key("old", "sorting", &1u8).unwrap();
        let fresh = store.key("fresh", "sorting", &1u8).unwrap();
        counted(&store, &old, &calls, 1).await.unwrap();
        counted(&store, &fresh, &calls, 2).await.unwrap();

        let mut manifest = EntryManifest::read(&old.path()).await.unwrap();
        manifest.created_at = Utc::now() - chrono::Duration::days(45);
        manifest.write(&old.path()).await.unwrap();

        let staging = dir.path().join(STAGING_DIR);
        let dead = staging.join(format!("x_sorting-{}-deadbeef", i32::MAX));
        let live = staging.join(format!("y_sorting-{}-cafebabe", std::process::id()));
        std::fs::create_dir_all(&dead).unwrap();
        std::fs::create_dir_all(&live).unwrap();

        let preview = store.gc(30, true).await.unwrap();
        assert_eq!(preview.entries.len(), 1);
        assert_eq!(preview.stale_staging, vec![dead.clone()]);
        assert!(old.path().is_dir());

        let report = store.gc(30, false).await.unwrap();
        assert!(!report.is_empty());
        assert!(!old.path().exists());
        assert!(fresh.path().is_dir());
        assert!(!dead.exists());
        assert!(live.exists());
    }

    #[test]
    fn staging_owner_parses_pid() {
        assert_eq!(staging_owner("rec_sorting-abc-1234-0a1b2c"), Some(1234));
        assert_eq!(staging_owner("nodashes"), None);
        assert_eq!(staging_owner("a-notapid-c"), None);
    }
}
