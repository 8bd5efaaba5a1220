//! Configuration management for enrichd
//!
//! Handles loading, validation and defaults for the TOML configuration
//! file, with a small set of environment variable overrides.

use crate::cache::CacheConfig;
use crate::directory::DirectorySettings;
use crate::error::{EnrichdError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub cache: CacheSection,
    pub directory: DirectorySection,
    pub registry: RegistrySection,
    pub logging: LoggingSection,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Global asset cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
    /// NDJSON file confirmed assets are dumped to and reloaded from
    pub persist_file: Option<PathBuf>,
    pub prune: bool,
    pub prune_interval_secs: u64,
    pub prune_window_secs: u64,
    pub dump_interval_secs: u64,
}

/// Directory service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectorySection {
    pub enabled: bool,
    /// NDJSON directory table; stands in for a live endpoint
    pub table_file: Option<PathBuf>,
    /// Common prefix for the three lookup field projections
    pub field_prefix: String,
}

/// Asset registry persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySection {
    pub db_file: PathBuf,
}

/// Periodic counter logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    pub interval_secs: u64,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(EnrichdError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| EnrichdError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| EnrichdError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: ENRICHD_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("ENRICHD_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "DIRECTORY__ENABLED" => {
                self.directory.enabled =
                    value.parse().map_err(|_| EnrichdError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as boolean", value),
                    })?;
            }
            "DIRECTORY__FIELD_PREFIX" => {
                self.directory.field_prefix = value.to_string();
            }
            "CACHE__PRUNE" => {
                self.cache.prune =
                    value.parse().map_err(|_| EnrichdError::InvalidConfigValue {
                        path: path.to_string(),
                        message: format!("Cannot parse '{}' as boolean", value),
                    })?;
            }
            "REGISTRY__DB_FILE" => {
                self.registry.db_file = PathBuf::from(value);
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Translate the cache section into a runtime [`CacheConfig`]
    pub fn cache_config(&self, directory: Option<DirectorySettings>) -> CacheConfig {
        CacheConfig {
            persist_path: self.cache.persist_file.clone(),
            prune: self.cache.prune,
            prune_interval: Duration::from_secs(self.cache.prune_interval_secs),
            prune_window: Duration::from_secs(self.cache.prune_window_secs),
            dump_interval: Duration::from_secs(self.cache.dump_interval_secs),
            directory,
        }
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| EnrichdError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("enrichd").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| EnrichdError::Config("Cannot determine home directory".to_string()))?;

        Ok(home_dir.join(".enrichd"))
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("~/.enrichd");

        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            cache: CacheSection {
                persist_file: Some(data_dir.join("assets.json")),
                prune: true,
                prune_interval_secs: 30,
                prune_window_secs: 120,
                dump_interval_secs: 5,
            },
            directory: DirectorySection {
                enabled: false,
                table_file: None,
                field_prefix: "asset".to_string(),
            },
            registry: RegistrySection {
                db_file: data_dir.join("registry.db"),
            },
            logging: LoggingSection { interval_secs: 30 },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        let config = Config::default();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.cache.prune_window_secs, 120);
        assert_eq!(loaded.directory.field_prefix, "asset");
        assert!(!loaded.directory.enabled);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(matches!(err, EnrichdError::ConfigNotFound { .. }));
    }

    #[test]
    fn test_cache_config_translation() {
        let config = Config::default();
        let cache = config.cache_config(None);
        assert_eq!(cache.prune_interval, Duration::from_secs(30));
        assert_eq!(cache.prune_window, Duration::from_secs(120));
        assert_eq!(cache.dump_interval, Duration::from_secs(5));
        assert!(cache.prune);
    }
}
