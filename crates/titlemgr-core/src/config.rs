//! Engine and application configuration.

use std::path::{Path, PathBuf};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Default transfer block size (512 KiB).
pub const DEFAULT_BLOCK_SIZE: usize = 512 * 1024;

/// Largest accepted transfer block size (64 MiB).
pub const MAX_BLOCK_SIZE: usize = 64 * 1024 * 1024;

/// Configuration for the data-operation engine.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq, Eq)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct EngineConfig {
    /// Size of each read/write block in bytes.
    #[builder(default = "DEFAULT_BLOCK_SIZE")]
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// Sleep between checks while waiting for a cancelled worker to finish.
    #[builder(default = "1")]
    #[serde(default = "default_cancel_poll_interval_ms")]
    pub cancel_poll_interval_ms: u64,

    /// Name given to worker threads.
    #[builder(default = "default_thread_name()")]
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

fn default_cancel_poll_interval_ms() -> u64 {
    1
}

fn default_thread_name() -> String {
    "data-op".to_string()
}

impl EngineConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(block_size) = self.block_size {
            check_block_size(block_size)?;
        }
        Ok(())
    }
}

fn check_block_size(block_size: usize) -> Result<(), String> {
    if block_size == 0 {
        return Err("Block size cannot be zero".to_string());
    }
    if block_size > MAX_BLOCK_SIZE {
        return Err(format!(
            "Block size {block_size} exceeds maximum of {MAX_BLOCK_SIZE}"
        ));
    }
    Ok(())
}

impl EngineConfig {
    /// Create a new engine config builder.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Validate values that may have come from a config file.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_block_size(self.block_size).map_err(|message| ConfigError::Invalid { message })
    }

    /// Poll interval as a duration.
    pub fn cancel_poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.cancel_poll_interval_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            cancel_poll_interval_ms: default_cancel_poll_interval_ms(),
            thread_name: default_thread_name(),
        }
    }
}

/// Application settings, loaded from `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    /// Root directory of the content store.
    #[serde(default = "default_content_root")]
    pub content_root: PathBuf,

    /// Interval between progress polls in the CLI, in milliseconds.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Engine settings.
    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_content_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("titlemgr")
        .join("content")
}

fn default_tick_ms() -> u64 {
    50
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            content_root: default_content_root(),
            tick_ms: default_tick_ms(),
            engine: EngineConfig::default(),
        }
    }
}

impl AppConfig {
    /// Default location of the config file.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("titlemgr")
            .join("config.toml")
    }

    /// Load the config at `path`, falling back to defaults if it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        Self::from_toml(&contents).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Parse and validate a config from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.engine.validate()?;
        Ok(config)
    }

    /// Tick interval as a duration.
    pub fn tick(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_ms.max(1))
    }
}
