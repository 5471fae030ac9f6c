//! Configuration schema for sortstash
//!
//! Configuration is stored at `~/.config/sortstash/config.toml`

use crate::cache::{KeyMode, StoreOptions};
use crate::postprocessing::PeakSign;
use crate::sorting::SorterParams;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Artifact cache settings
    pub cache: CacheConfig,

    /// Probe layout settings
    pub probe: ProbeConfig,

    /// Sorter settings
    pub sorter: SorterConfig,

    /// Post-processing settings
    pub postprocessing: PostprocessingConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
        }
    }
}

/// Artifact cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache directory (default: platform cache dir)
    pub base_dir: Option<PathBuf>,

    /// "hashed" (label + config hash) or "suffix" (label only)
    pub key_mode: KeyMode,

    /// Treat directories without a completion manifest as complete
    pub adopt_unmarked: bool,

    /// Serialize builders of the same entry with a file lock
    pub lock: bool,

    /// `cache gc` removes entries older than N days (0 = disabled)
    pub gc_days: u32,

    /// Size above which `cache info` warns, in GB
    pub max_total_gb: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            key_mode: KeyMode::Hashed,
            adopt_unmarked: false,
            lock: true,
            gc_days: 30,
            max_total_gb: 50,
        }
    }
}

impl CacheConfig {
    /// Store options derived from this section
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            key_mode: self.key_mode,
            lock: self.lock,
            adopt_unmarked: self.adopt_unmarked,
        }
    }
}

/// Probe layout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// PRB or probeinterface JSON file used for probe electrodes
    pub probe_file: Option<PathBuf>,

    /// Vertical distance between generated tetrodes, µm
    pub tetrode_spacing_um: f64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            probe_file: None,
            tetrode_spacing_um: crate::probe::DEFAULT_TETRODE_SPACING,
        }
    }
}

/// Sorter backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SorterBackend {
    /// Built-in threshold detector
    #[default]
    Threshold,
    /// `sorter.command` run as a subprocess
    External,
}

/// Sorter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SorterConfig {
    pub backend: SorterBackend,

    /// Program for the external backend
    pub command: Option<String>,

    /// Arguments placed before the recording/output/params arguments
    pub args: Vec<String>,

    /// Parameters for tetrode recordings
    pub tetrode: SorterParams,

    /// Parameters for probe recordings
    #[serde(default = "SorterParams::probe", deserialize_with = "probe_params")]
    pub probe: SorterParams,
}

impl Default for SorterConfig {
    fn default() -> Self {
        Self {
            backend: SorterBackend::Threshold,
            command: None,
            args: vec![],
            tetrode: SorterParams::tetrode(),
            probe: SorterParams::probe(),
        }
    }
}

/// Missing `[sorter.probe]` fields come from the probe preset, not the
/// tetrode one
fn probe_params<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SorterParams, D::Error> {
    use serde::de::Error;

    let overrides = serde_json::Value::deserialize(deserializer)?;
    let mut merged = serde_json::to_value(SorterParams::probe()).map_err(D::Error::custom)?;
    if let (Some(base), serde_json::Value::Object(fields)) = (merged.as_object_mut(), overrides) {
        base.extend(fields);
    }
    serde_json::from_value(merged).map_err(D::Error::custom)
}

/// Post-processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostprocessingConfig {
    pub peak_sign: PeakSign,

    /// Report amplitudes in µV
    pub return_scaled: bool,
}

impl Default for PostprocessingConfig {
    fn default() -> Self {
        Self {
            peak_sign: PeakSign::Neg,
            return_scaled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[cache]"));
        assert!(toml.contains("[sorter.tetrode]"));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.cache.key_mode, KeyMode::Hashed);
        assert_eq!(config.sorter.probe.threshold_strong_std_factor, 5.0);
        assert_eq!(config.probe.tetrode_spacing_um, 300.0);
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [cache]
            key_mode = "suffix"

            [sorter]
            backend = "external"
            command = "run-klusta"

            [sorter.probe]
            detect_sign = 0
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.cache.key_mode, KeyMode::Suffix);
        assert!(config.cache.lock);
        assert_eq!(config.sorter.backend, SorterBackend::External);
        assert_eq!(config.sorter.probe.detect_sign, 0);
        assert_eq!(config.sorter.probe.threshold_strong_std_factor, 5.0);
        assert_eq!(config.sorter.tetrode.threshold_strong_std_factor, 3.5);
    }

    #[test]
    fn store_options_follow_cache_section() {
        let cache = CacheConfig {
            lock: false,
            adopt_unmarked: true,
            ..CacheConfig::default()
        };
        let options = cache.store_options();
        assert!(!options.lock);
        assert!(options.adopt_unmarked);
    }
}
