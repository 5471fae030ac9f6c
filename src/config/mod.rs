//! Configuration management for sortstash

pub mod schema;

pub use schema::{
    CacheConfig, Config, GeneralConfig, PostprocessingConfig, ProbeConfig, SorterBackend,
    SorterConfig,
};

use crate::error::{StashError, StashResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Project-local config file name
pub const LOCAL_CONFIG_FILE: &str = ".sortstash.toml";

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sortstash")
            .join("config.toml")
    }

    /// Default artifact cache directory
    pub fn default_cache_dir() -> PathBuf {
        dirs::cache_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sortstash")
    }

    /// Cache directory in effect: `cache.base_dir`, then the platform default
    pub fn cache_dir(config: &Config) -> PathBuf {
        config
            .cache
            .base_dir
            .clone()
            .unwrap_or_else(Self::default_cache_dir)
    }

    /// Apply `--cache-dir`, which clap also fills from `SORTSTASH_CACHE_DIR`
    pub fn override_cache_dir(config: &mut Config, dir: Option<PathBuf>) {
        if let Some(dir) = dir {
            config.cache.base_dir = Some(dir);
        }
    }

    /// Walk up from `start` looking for a `.sortstash.toml`
    pub fn find_local_config(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(LOCAL_CONFIG_FILE))
            .find(|candidate| candidate.is_file())
    }

    /// Load configuration, creating default if not exists
    pub async fn load(&self) -> StashResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load the global configuration with a local file merged on top
    ///
    /// Tables merge key by key; any other local value replaces the global one.
    pub async fn load_merged(&self, local: Option<&Path>) -> StashResult<Config> {
        let Some(local) = local else {
            return self.load().await;
        };

        let mut merged = if self.config_path.exists() {
            Self::read_table(&self.config_path).await?
        } else {
            toml::Table::new()
        };
        merge_tables(&mut merged, Self::read_table(local).await?);
        debug!("Merged local config {}", local.display());

        toml::Value::Table(merged)
            .try_into()
            .map_err(|e: toml::de::Error| StashError::ConfigInvalid {
                path: local.to_path_buf(),
                reason: e.to_string(),
            })
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> StashResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| StashError::io(format!("reading config from {}", path.display()), e))?;

        toml::from_str(&content).map_err(|e| StashError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    async fn read_table(path: &Path) -> StashResult<toml::Table> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| StashError::io(format!("reading config from {}", path.display()), e))?;

        content.parse().map_err(|e: toml::de::Error| StashError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> StashResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            StashError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    pub async fn ensure_config_dir(&self) -> StashResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StashError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming)
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
