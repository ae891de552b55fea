use std::path::{Path, PathBuf};

use nova_classpath::CycleMode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tuning knobs for a [`crate::ModelManager`].
///
/// ```toml
/// [cache]
/// openable_capacity = 1000
///
/// [classpath]
/// cycle_mode = "report"
///
/// [external]
/// timestamp_cache = "/var/cache/nova/timestamps.dat"
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub classpath: ClasspathConfig,
    #[serde(default)]
    pub external: ExternalConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Soft cap on cached packages, compilation units and class files.
    #[serde(default = "CacheConfig::default_openable_capacity")]
    pub openable_capacity: usize,
}

impl CacheConfig {
    fn default_openable_capacity() -> usize {
        1000
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            openable_capacity: Self::default_openable_capacity(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClasspathConfig {
    /// How project dependency cycles found after a classpath change are treated.
    #[serde(default)]
    pub cycle_mode: CycleMode,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExternalConfig {
    /// Where external archive timestamps are persisted; `None` keeps them in memory only.
    #[serde(default)]
    pub timestamp_cache: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Toml(err.message().to_string())
    }
}

impl ModelConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}
