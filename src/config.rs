//! Finagle Configuration
//!
//! Handles parsing and management of finagle.toml configuration files.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Name of the file searched for by [`FinagleConfig::find_and_load`].
pub const CONFIG_FILE: &str = "finagle.toml";

/// Root configuration structure matching finagle.toml.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FinagleConfig {
    /// Event loop timing
    #[serde(default)]
    pub reactor: ReactorConfig,

    /// Blocking queue defaults
    #[serde(default)]
    pub queue: QueueConfig,
}

impl FinagleConfig {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: FinagleConfig = toml::from_str(&content)?;
        log::debug!("loaded {}", path.display());
        Ok(config)
    }

    /// Load configuration from the current directory or parents.
    pub fn load_from_cwd() -> ConfigResult<Self> {
        let cwd = std::env::current_dir().map_err(ConfigError::Io)?;
        Self::find_and_load(&cwd)
    }

    /// Find and load configuration by searching up from the given directory.
    /// Falls back to defaults when no file exists up to the root.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                return Self::load(&config_path);
            }
            if !dir.pop() {
                log::debug!("no {CONFIG_FILE} found, using defaults");
                return Ok(Self::default());
            }
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Event loop timing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactorConfig {
    /// Budget for one `exec()` pass in milliseconds
    #[serde(default = "default_process_time_ms")]
    pub process_time_ms: u64,

    /// Duration of `AppLoop::wait_default()` in milliseconds
    #[serde(default = "default_wait_time_ms")]
    pub wait_time_ms: u64,
}

fn default_process_time_ms() -> u64 {
    30
}

fn default_wait_time_ms() -> u64 {
    100
}

impl ReactorConfig {
    pub fn process_time(&self) -> Duration {
        Duration::from_millis(self.process_time_ms)
    }

    pub fn wait_time(&self) -> Duration {
        Duration::from_millis(self.wait_time_ms)
    }
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            process_time_ms: default_process_time_ms(),
            wait_time_ms: default_wait_time_ms(),
        }
    }
}

/// Blocking queue defaults.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueConfig {
    /// Capacity used by `SizedQueue::with_config()`
    #[serde(default = "default_capacity")]
    pub default_capacity: usize,
}

fn default_capacity() -> usize {
    1024
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            default_capacity: default_capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("finagle-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_default_config() {
        let config = FinagleConfig::default();
        assert_eq!(config.reactor.process_time(), Duration::from_millis(30));
        assert_eq!(config.reactor.wait_time(), Duration::from_millis(100));
        assert_eq!(config.queue.default_capacity, 1024);
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
[reactor]
process_time_ms = 16

[queue]
default_capacity = 8
"#;
        let config: FinagleConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.reactor.process_time_ms, 16);
        assert_eq!(config.reactor.wait_time_ms, 100);
        assert_eq!(config.queue.default_capacity, 8);
    }

    #[test]
    fn test_parse_error() {
        let err = toml::from_str::<FinagleConfig>("[reactor]\nprocess_time_ms = \"fast\"\n")
            .map_err(ConfigError::from)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = FinagleConfig::load(Path::new("/nonexistent/finagle.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_save_and_find_from_subdir() {
        let root = scratch_dir("config");
        let nested = root.join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let mut config = FinagleConfig::default();
        config.reactor.wait_time_ms = 5;
        config.queue.default_capacity = 3;
        config.save(&root.join(CONFIG_FILE)).unwrap();

        let found = FinagleConfig::find_and_load(&nested).unwrap();
        assert_eq!(found, config);

        std::fs::remove_dir_all(&root).unwrap();
    }
}
