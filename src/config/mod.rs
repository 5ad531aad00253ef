//! Configuration management for gator.
//!
//! Configuration is read from `~/.config/gator/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.
//! `login` and `register` write the current user name back to the same file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::fetcher::http_fetcher::DEFAULT_USER_AGENT;
use crate::fetcher::parallel::DEFAULT_WORKERS;

/// Main configuration struct.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_user_name: Option<String>,
    pub database: DatabaseConfig,
    pub aggregator: AggregatorSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file. Defaults to `<data dir>/gator/gator.db`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorSettings {
    /// Feeds refreshed per tick. 1 keeps the strict one-feed-per-tick rotation.
    pub batch_size: usize,
    /// Concurrent fetches when `batch_size` is above 1.
    pub workers: usize,
    pub request_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            batch_size: 1,
            workers: DEFAULT_WORKERS,
            request_timeout_secs: 10,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl AggregatorSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::default_config_path()?)
    }

    /// Load configuration from `path`.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// Missing fields in the config file will use default values.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            Self::create_default_config(path)?;
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Write the configuration to `path`, replacing what is there.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string(self)?;
        Self::write_file(path, &content)
    }

    /// Get the default config file path: `~/.config/gator/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("gator").join("config.toml"))
    }

    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        Self::write_file(path, Self::default_config_content())
    }

    fn write_file(path: &Path, content: &str) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(content.as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })
    }

    fn default_config_content() -> &'static str {
        r##"# gator configuration
#
# The current user is written here by `gator login` and `gator register`:
# current_user_name = "alice"

[database]
# SQLite database file (default: <data dir>/gator/gator.db)
# path = "/home/alice/.local/share/gator/gator.db"

[aggregator]
# Feeds refreshed per tick. With 1, the least recently fetched feed is
# refreshed on every tick and each feed gets its turn in rotation.
batch_size = 1

# Concurrent fetches when batch_size is above 1
workers = 4

# HTTP request timeout in seconds
request_timeout_secs = 10

# User-Agent header sent with every request
user_agent = "gator/0.1.0"
"##
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_deserializes() {
        let content = Config::default_config_content();
        let config: Config = toml::from_str(content).expect("Default config should be valid TOML");

        assert_eq!(config.current_user_name, None);
        assert_eq!(config.database.path, None);
        assert_eq!(config.aggregator.batch_size, 1);
        assert_eq!(config.aggregator.workers, 4);
        assert_eq!(config.aggregator.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_config() {
        let content = r##"
current_user_name = "alice"

[aggregator]
batch_size = 3
"##;
        let config: Config = toml::from_str(content).expect("Partial config should work");

        assert_eq!(config.current_user_name.as_deref(), Some("alice"));
        assert_eq!(config.aggregator.batch_size, 3);
        assert_eq!(config.aggregator.workers, DEFAULT_WORKERS);
    }

    #[test]
    fn test_empty_config() {
        let config: Config = toml::from_str("").expect("Empty config should work");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.current_user_name = Some("bob".into());
        config.database.path = Some(dir.path().join("gator.db"));
        config.save_to(&path).unwrap();

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[aggregator]\nbatch_size = \"many\"\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
