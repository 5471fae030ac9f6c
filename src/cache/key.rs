//! Cache key derivation
//!
//! A cache key names one artifact directory: `{base}/{name}_{discriminator}`.
//! The discriminator is a caller-chosen label, optionally followed by a short
//! fingerprint of the configuration that produced the artifact. The full
//! fingerprint is kept alongside so stored entries can be checked against it.

use crate::error::{StashError, StashResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

/// Number of hex characters of the fingerprint embedded in directory names
const SHORT_FINGERPRINT_LEN: usize = 12;

/// How discriminators are rendered into directory names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyMode {
    /// `label-<fingerprint>`: distinct configurations get distinct paths
    #[default]
    Hashed,
    /// `label` only: compatible with folders created by hand-named runs
    Suffix,
}

impl fmt::Display for KeyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hashed => write!(f, "hashed"),
            Self::Suffix => write!(f, "suffix"),
        }
    }
}

/// SHA-256 of the canonical JSON form of a configuration value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint any serializable configuration
    ///
    /// Struct fields serialize in declaration order and maps should be
    /// `BTreeMap`s, so equal configurations produce equal bytes.
    pub fn of<T: Serialize + ?Sized>(config: &T) -> StashResult<Self> {
        let bytes = serde_json::to_vec(config)?;
        Ok(Self::of_bytes(&bytes))
    }

    /// Fingerprint raw bytes
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    /// Full 64-character hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix used inside directory names
    pub fn short(&self) -> &str {
        &self.0[..SHORT_FINGERPRINT_LEN.min(self.0.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A fully derived cache key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    base_dir: PathBuf,
    name: String,
    label: String,
    fingerprint: Fingerprint,
    mode: KeyMode,
}

impl CacheKey {
    /// Derive a key from a base directory, a logical name, a label and the
    /// configuration that identifies the computation.
    pub fn new<T: Serialize + ?Sized>(
        base_dir: impl Into<PathBuf>,
        name: &str,
        label: &str,
        config: &T,
        mode: KeyMode,
    ) -> StashResult<Self> {
        Self::with_fingerprint(base_dir, name, label, Fingerprint::of(config)?, mode)
    }

    /// Derive a key from an already computed fingerprint
    pub fn with_fingerprint(
        base_dir: impl Into<PathBuf>,
        name: &str,
        label: &str,
        fingerprint: Fingerprint,
        mode: KeyMode,
    ) -> StashResult<Self> {
        validate_component(name)?;
        validate_component(label)?;
        Ok(Self {
            base_dir: base_dir.into(),
            name: name.to_string(),
            label: label.to_string(),
            fingerprint,
            mode,
        })
    }

    /// Logical item name (e.g. the recording name)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Caller-chosen label (e.g. `preprocessed`)
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Full configuration fingerprint
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Key rendering mode
    pub fn mode(&self) -> KeyMode {
        self.mode
    }

    /// Base directory the entry lives under
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Discriminator as rendered into the directory name
    pub fn discriminator(&self) -> String {
        match self.mode {
            KeyMode::Hashed => format!("{}-{}", self.label, self.fingerprint.short()),
            KeyMode::Suffix => self.label.clone(),
        }
    }

    /// Directory name of the entry (`{name}_{discriminator}`)
    pub fn dir_name(&self) -> String {
        format!("{}_{}", self.name, self.discriminator())
    }

    /// Final path of the entry
    pub fn path(&self) -> PathBuf {
        self.base_dir.join(self.dir_name())
    }

    /// Derive a key for a follow-up artifact of this entry
    /// (e.g. an extension computed from a sorting)
    pub fn child<T: Serialize + ?Sized>(&self, label: &str, config: &T) -> StashResult<Self> {
        let child_label = format!("{}.{}", self.label, label);
        Self::new(&self.base_dir, &self.name, &child_label, config, self.mode)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}

/// Validate that a name or label is safe to embed in a directory name
pub fn validate_component(value: &str) -> StashResult<()> {
    let invalid = |reason: &str| StashError::InvalidCacheName {
        name: value.to_string(),
        reason: reason.to_string(),
    };

    if value.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if value.contains("..") || value.starts_with('.') {
        return Err(invalid("must not start with '.' or contain '..'"));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(invalid(
            "must contain only alphanumeric characters, '-', '_' or '.'",
        ));
    }
    Ok(())
}
