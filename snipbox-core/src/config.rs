//! Engine configuration
//!
//! Resolution order: `SNIPBOX_*` environment variables, then an optional
//! TOML file, then the defaults below.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::engine::isolation::IsolationConfig;
use crate::error::ConfigError;

pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_READY_TIMEOUT_MS: u64 = 5_000;

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Budget applied when the caller does not pass `timeout_ms`.
    pub default_timeout_ms: u64,
    /// How long `ensure_context()` waits for the boundary's ready signal.
    pub ready_timeout_ms: u64,
    /// Limits for the embedded runtime.
    pub isolation: IsolationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            ready_timeout_ms: DEFAULT_READY_TIMEOUT_MS,
            isolation: IsolationConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults, overlaid with environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load a TOML file, then overlay environment variables.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Overlay values from `lookup`. Split out so tests never touch the real
    /// process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_env(&lookup, "SNIPBOX_TIMEOUT_MS")? {
            self.default_timeout_ms = v;
        }
        if let Some(v) = parse_env(&lookup, "SNIPBOX_READY_TIMEOUT_MS")? {
            self.ready_timeout_ms = v;
        }
        if let Some(v) = parse_env(&lookup, "SNIPBOX_MEMORY_LIMIT_BYTES")? {
            self.isolation.memory_limit_bytes = v as usize;
        }
        if let Some(v) = parse_env(&lookup, "SNIPBOX_MAX_STACK_BYTES")? {
            self.isolation.max_stack_bytes = v as usize;
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

fn parse_env<F>(lookup: &F, key: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { key, value: raw }),
    }
}
