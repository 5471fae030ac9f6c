//! Cache entry state and completion manifests
//!
//! Tracks entry state (miss, building, complete). An entry is complete
//! only once its manifest exists; the manifest is the last file written
//! before the entry is moved into place.

use crate::cache::key::{CacheKey, Fingerprint};
use crate::error::{StashError, StashResult};
use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;

/// File name of the completion manifest inside an entry directory
pub const MANIFEST_FILE: &str = ".sortstash-entry.json";

/// Current manifest format version
pub const FORMAT_VERSION: &str = "1.0.0";

/// Format bytes as human-readable size (e.g., "1.5 GB")
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Convert GB to bytes
pub fn gb_to_bytes(gb: u32) -> u64 {
    u64::from(gb) * 1024 * 1024 * 1024
}

/// Cache size status relative to configured limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSizeStatus {
    /// Under 80% of limit
    Ok,
    /// Between 80% and 100% of limit
    Warning,
    /// At or over the limit
    Exceeded,
}

impl CacheSizeStatus {
    /// Determine status based on current size and limit
    pub fn from_usage(current_bytes: u64, limit_bytes: u64) -> Self {
        if limit_bytes == 0 {
            return Self::Ok;
        }
        let percent = Self::percentage(current_bytes, limit_bytes);
        if percent >= 100.0 {
            Self::Exceeded
        } else if percent >= 80.0 {
            Self::Warning
        } else {
            Self::Ok
        }
    }

    /// Get percentage of limit used
    pub fn percentage(current_bytes: u64, limit_bytes: u64) -> f64 {
        if limit_bytes == 0 {
            return 0.0;
        }
        (current_bytes as f64 / limit_bytes as f64) * 100.0
    }
}

/// State of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheState {
    /// No directory exists (will be computed)
    Miss,
    /// Directory exists without a manifest: crashed run or foreign folder
    Building,
    /// Manifest present, entry is finalized
    Complete,
}

impl CacheState {
    /// Inspect the directory at `path`
    pub fn of(path: &Path) -> Self {
        if !path.is_dir() {
            Self::Miss
        } else if path.join(MANIFEST_FILE).is_file() {
            Self::Complete
        } else {
            Self::Building
        }
    }
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Miss => write!(f, "miss"),
            Self::Building => write!(f, "building"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// Completion manifest written into every finalized entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryManifest {
    /// Artifact kind (recording, sorting, ...)
    pub kind: String,
    /// Logical item name
    pub name: String,
    /// Rendered discriminator
    pub discriminator: String,
    /// Full configuration fingerprint
    pub fingerprint: Fingerprint,
    /// Manifest format version
    pub format_version: String,
    /// When the entry was published
    pub created_at: DateTime<Utc>,
}

impl EntryManifest {
    /// Create a manifest for a freshly computed entry
    pub fn new(key: &CacheKey, kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            name: key.name().to_string(),
            discriminator: key.discriminator(),
            fingerprint: key.fingerprint().clone(),
            format_version: FORMAT_VERSION.to_string(),
            created_at: Utc::now(),
        }
    }

    /// Read the manifest of the entry at `dir`
    pub async fn read(dir: &Path) -> StashResult<Self> {
        let path = dir.join(MANIFEST_FILE);
        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| StashError::io(format!("reading manifest {}", path.display()), e))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write the manifest into `dir`
    pub async fn write(&self, dir: &Path) -> StashResult<()> {
        let path = dir.join(MANIFEST_FILE);
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content)
            .await
            .map_err(|e| StashError::io(format!("writing manifest {}", path.display()), e))
    }

    /// Whether this manifest's format can be read by this build
    pub fn is_compatible(&self) -> bool {
        match (
            Version::parse(&self.format_version),
            Version::parse(FORMAT_VERSION),
        ) {
            (Ok(found), Ok(current)) => found.major == current.major,
            _ => false,
        }
    }
}

/// Information about one entry on disk (for listing and gc)
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Directory name (`{name}_{discriminator}`)
    pub dir_name: String,
    /// Full path
    pub path: PathBuf,
    /// Current state
    pub state: CacheState,
    /// Manifest, when the entry is complete and readable
    pub manifest: Option<EntryManifest>,
    /// Last modification time, used when no manifest exists
    pub modified_at: Option<DateTime<Utc>>,
    /// Size in bytes (if known)
    pub size_bytes: Option<u64>,
}

impl CacheEntry {
    /// Artifact kind, or "-" when unknown
    pub fn kind(&self) -> &str {
        self.manifest.as_ref().map(|m| m.kind.as_str()).unwrap_or("-")
    }

    /// Best known creation time
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.manifest
            .as_ref()
            .map(|m| m.created_at)
            .or(self.modified_at)
    }

    /// Check if this entry is older than the given number of days
    pub fn is_older_than_days(&self, days: u32) -> bool {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
        self.created_at().is_some_and(|t| t < cutoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::key::KeyMode;
    use tempfile::TempDir;

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
        assert_eq!(format_bytes(gb_to_bytes(2)), "2.0 GB");
    }

    #[test]
    fn size_status_thresholds() {
        assert_eq!(CacheSizeStatus::from_usage(10, 100), CacheSizeStatus::Ok);
        assert_eq!(CacheSizeStatus::from_usage(85, 100), CacheSizeStatus::Warning);
        assert_eq!(CacheSizeStatus::from_usage(100, 100), CacheSizeStatus::Exceeded);
        assert_eq!(CacheSizeStatus::from_usage(100, 0), CacheSizeStatus::Ok);
    }

    #[test]
    fn state_of_directory() {
        let dir = TempDir::new().unwrap();
        let entry = dir.path().join("rec_preprocessed");

        assert_eq!(CacheState::of(&entry), CacheState::Miss);

        std::fs::create_dir(&entry).unwrap();
        assert_eq!(CacheState::of(&entry), CacheState::Building);

        std::fs::write(entry.join(MANIFEST_FILE), "{}").unwrap();
        assert_eq!(CacheState::of(&entry), CacheState::Complete);
    }

    #[tokio::test]
    async fn manifest_write_and_read() {
        let dir = TempDir::new().unwrap();
        let key = CacheKey::new(dir.path(), "rec", "sorting", &3u8, KeyMode::Hashed).unwrap();
        let manifest = EntryManifest::new(&key, "sorting");

        manifest.write(dir.path()).await.unwrap();
        let read = EntryManifest::read(dir.path()).await.unwrap();

        assert_eq!(read, manifest);
        assert!(read.is_compatible());
    }

    #[test]
    fn manifest_incompatible_major() {
        let key = CacheKey::new("/x", "rec", "sorting", &3u8, KeyMode::Hashed).unwrap();
        let mut manifest = EntryManifest::new(&key, "sorting");
        manifest.format_version = "2.0.0".to_string();
        assert!(!manifest.is_compatible());
        manifest.format_version = "garbage".to_string();
        assert!(!manifest.is_compatible());
        manifest.format_version = "1.4.0".to_string();
        assert!(manifest.is_compatible());
    }

    #[test]
    fn entry_age_falls_back_to_mtime() {
        let entry = CacheEntry {
            dir_name: "rec_sorting".to_string(),
            path: PathBuf::from("/x/rec_sorting"),
            state: CacheState::Building,
            manifest: None,
            modified_at: Some(Utc::now() - chrono::Duration::days(40)),
            size_bytes: None,
        };
        assert_eq!(entry.kind(), "-");
        assert!(entry.is_older_than_days(30));
        assert!(!entry.is_older_than_days(60));
    }
}
