//! Router configuration.
//!
//! Every field has a default, so an empty TOML document is a valid config:
//!
//! ```toml
//! lazy_cache = "once"
//! cache_file_mode = 0o600
//! mirror_whole_file_reads = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

/// What a file handle does after a lazy cache open fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LazyCachePolicy {
    /// Try again on every read until an open succeeds.
    #[default]
    Retry,
    /// Give up after the first failed attempt.
    Once,
}

/// Configuration for a [`CorFs`](crate::CorFs) router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorFsConfig {
    /// Behaviour of lazy cache population on sequential reads.
    pub lazy_cache: LazyCachePolicy,
    /// Mode for cache files created by lazy caching and whole-file mirroring.
    pub cache_file_mode: u32,
    /// Whether `read_file` copies primary content into the cache.
    pub mirror_whole_file_reads: bool,
}

impl Default for CorFsConfig {
    fn default() -> Self {
        Self {
            lazy_cache: LazyCachePolicy::Retry,
            cache_file_mode: 0o644,
            mirror_whole_file_reads: true,
        }
    }
}

/// Failure to load a [`CorFsConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl CorFsConfig {
    /// Parse a config from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}
