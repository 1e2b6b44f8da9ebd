//! Configuration for filequeue.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/filequeue/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::encoding::Encoding;
use crate::registry::{RegistryOptions, RetentionPolicy};

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("encoding must be one of: utf8, utf8-lossy, latin1; got {0}")]
    InvalidEncoding(String),

    #[error("dir_mode must be at most 0o7777, got {0:#o}")]
    InvalidDirMode(u32),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Queue registry configuration.
    pub queue: QueueConfig,

    /// Defaults for file handles.
    pub file: FileConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Queue registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct QueueConfig {
    /// Whether idle path entries are evicted or kept forever.
    pub retention: RetentionPolicy,
}

/// Defaults for file handles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    /// Encoding for handles created without one.
    pub encoding: String,

    /// Mode for directories created ahead of writes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir_mode: Option<u32>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            encoding: Encoding::default().to_string(),
            dir_mode: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("filequeue")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported variables:
    /// - FILEQUEUE_LOG_LEVEL: Override log level
    /// - FILEQUEUE_ENCODING: Override default encoding
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("FILEQUEUE_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.logging.log_level = level;
            }
        }

        if let Ok(encoding) = std::env::var("FILEQUEUE_ENCODING") {
            if !encoding.is_empty() {
                tracing::info!("Overriding encoding from environment: {}", encoding);
                self.file.encoding = encoding;
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.file.encoding.parse::<Encoding>().is_err() {
            return Err(ConfigError::InvalidEncoding(self.file.encoding.clone()));
        }

        if let Some(mode) = self.file.dir_mode {
            if mode > 0o7777 {
                return Err(ConfigError::InvalidDirMode(mode));
            }
        }

        let level = self.logging.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.log_level.clone()));
        }

        Ok(())
    }

    /// Registry options described by this configuration.
    ///
    /// An unparseable encoding falls back to the default; call
    /// [`validate`](Self::validate) first to reject it instead.
    pub fn registry_options(&self) -> RegistryOptions {
        let encoding = self.file.encoding.parse().unwrap_or_else(|e| {
            tracing::warn!("{}, falling back to {}", e, Encoding::default());
            Encoding::default()
        });
        RegistryOptions {
            retention: self.queue.retention,
            encoding,
            dir_mode: self.file.dir_mode,
        }
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file, creating parent directories.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.queue.retention, RetentionPolicy::EvictIdle);
        assert_eq!(config.file.encoding, "utf8");
        assert_eq!(config.file.dir_mode, None);
        assert_eq!(config.logging.log_level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_empty() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_full() {
        let toml = r#"
[queue]
retention = "retain"

[file]
encoding = "latin1"
dir_mode = 0o750

[logging]
log_level = "trace"
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.queue.retention, RetentionPolicy::Retain);
        assert_eq!(config.file.encoding, "latin1");
        assert_eq!(config.file.dir_mode, Some(0o750));
        assert_eq!(config.logging.log_level, "trace");

        let options = config.registry_options();
        assert_eq!(options.retention, RetentionPolicy::Retain);
        assert_eq!(options.encoding, Encoding::Latin1);
        assert_eq!(options.dir_mode, Some(0o750));
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let result = Config::from_toml("[queue\nretention = \"retain\"");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_unknown_retention_rejected() {
        let result = Config::from_toml("[queue]\nretention = \"sometimes\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_roundtrip_custom() {
        let mut original = Config::default();
        original.queue.retention = RetentionPolicy::Retain;
        original.file.dir_mode = Some(0o700);
        original.logging.log_level = "warn".to_string();

        let toml = original.to_toml().unwrap();
        assert!(toml.contains("[queue]"));
        assert_eq!(Config::from_toml(&toml).unwrap(), original);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.file.encoding = "ebcdic".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidEncoding("ebcdic".to_string()))
        );

        let mut config = Config::default();
        config.file.dir_mode = Some(0o17777);
        assert_eq!(config.validate(), Err(ConfigError::InvalidDirMode(0o17777)));

        let mut config = Config::default();
        config.logging.log_level = "loud".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("loud".to_string()))
        );
    }

    #[test]
    fn test_bad_encoding_falls_back() {
        let mut config = Config::default();
        config.file.encoding = "ebcdic".to_string();
        assert_eq!(config.registry_options().encoding, Encoding::Utf8);
    }

    #[test]
    fn test_load_missing_file() {
        let config = Config::load("/nonexistent/path/config.toml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut original = Config::default();
        original.file.encoding = "utf8-lossy".to_string();

        original.save(&config_path).unwrap();
        assert_eq!(Config::load(&config_path).unwrap(), original);
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "invalid [ toml").unwrap();

        let err = Config::load(&config_path).unwrap_err().to_string();
        assert!(err.contains("Failed to parse config file"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.to_string_lossy().contains("filequeue"));
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("FILEQUEUE_LOG_LEVEL", "debug");
        std::env::set_var("FILEQUEUE_ENCODING", "latin1");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.logging.log_level, "debug");
        assert_eq!(config.file.encoding, "latin1");

        std::env::remove_var("FILEQUEUE_LOG_LEVEL");
        std::env::remove_var("FILEQUEUE_ENCODING");
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        std::env::set_var("FILEQUEUE_LOG_LEVEL", "");
        std::env::remove_var("FILEQUEUE_ENCODING");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config, Config::default());

        std::env::remove_var("FILEQUEUE_LOG_LEVEL");
    }
}
