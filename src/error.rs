//! Error types for sortstash
//!
//! All modules use `StashResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for sortstash operations
pub type StashResult<T> = Result<T, StashError>;

/// All errors that can occur in sortstash
#[derive(Error, Debug)]
pub enum StashError {
    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Probe errors
    #[error("Electrode type is set wrong, please set to either \"probe\" or \"tetrode\" (got '{0}')")]
    InvalidElectrodeType(String),

    #[error("No probe file configured for probe electrodes")]
    ProbeFileMissing,

    #[error("Failed to parse probe file {path}: {reason}")]
    ProbeParse { path: PathBuf, reason: String },

    #[error("Probe does not match recording: {0}")]
    ProbeMismatch(String),

    // Recording errors
    #[error("Invalid recording at {path}: {reason}")]
    RecordingInvalid { path: PathBuf, reason: String },

    #[error("Requested {requested} channels but the recording only has {available}")]
    ChannelCount { requested: usize, available: usize },

    #[error("Header {path} is too short: no character at line {line}, column {column}")]
    HeaderTooShort {
        path: PathBuf,
        line: usize,
        column: usize,
    },

    #[error("Header key not found in {path}: {key}")]
    HeaderKeyMissing { path: PathBuf, key: String },

    // Sorter errors
    #[error("Sorter not available: {0}")]
    SorterNotAvailable(String),

    #[error("Sorter {sorter} failed with exit code {code}: {stderr}")]
    SorterFailed {
        sorter: String,
        code: i32,
        stderr: String,
    },

    #[error("Invalid sorting: {0}")]
    SortingInvalid(String),

    // Cache errors
    #[error("Cache entry {path} was built for a different configuration (expected {expected}, found {found})")]
    CacheConflict {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("Cache entry {path} uses unsupported format version {found}")]
    CacheFormat { path: PathBuf, found: String },

    #[error("Failed to lock cache entry {path}: {source}")]
    CacheLock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache entry not found: {0}")]
    CacheEntryNotFound(String),

    #[error("Invalid cache name '{name}': {reason}")]
    InvalidCacheName { name: String, reason: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Interrupted")]
    Interrupted,

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl StashError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a recording error for a path
    pub fn recording(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::RecordingInvalid {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::InvalidElectrodeType(_) => Some("Use --electrode tetrode or --electrode probe"),
            Self::ProbeFileMissing => Some("Run: sortstash config set probe.probe_file <path.prb>"),
            Self::SorterNotAvailable(_) => {
                Some("Set sorter.command or run: sortstash config set sorter.backend threshold")
            }
            Self::CacheConflict { .. } => {
                Some("Remove the stale entry with: sortstash cache remove <entry>")
            }
            Self::CacheFormat { .. } => Some("Run: sortstash cache clear"),
            _ => None,
        }
    }
}
