//! Engine configuration via `trellis.toml`
//!
//! A small config file in the keyspace data directory. On first open a
//! commented default file can be written; to change settings, edit the file
//! and reopen.
//!
//! Recognized keys:
//! - `sharding.threshold` — instance-count at which a type grows a new shard
//! - `ontology.cache.timeout.ms.normal` — cache write-expiry, interactive mode
//! - `ontology.cache.timeout.ms.batch` — cache write-expiry, bulk loading
//! - `engine.url` — commit-log destination, or `IN_MEMORY`

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{GraphError, Result};

/// Config file name placed in the keyspace data directory.
pub const CONFIG_FILE_NAME: &str = "trellis.toml";

/// Sentinel `engine.url` value meaning "no engine, drop commit logs".
pub const IN_MEMORY: &str = "IN_MEMORY";

/// Engine configuration loaded from `trellis.toml`.
///
/// # Example
///
/// ```toml
/// [sharding]
/// threshold = 10000
///
/// [ontology.cache.timeout.ms]
/// normal = 600000
/// batch = 1000
///
/// [engine]
/// url = "IN_MEMORY"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TrellisConfig {
    /// `[sharding]` section
    #[serde(default)]
    pub sharding: ShardingConfig,
    /// `[ontology]` section
    #[serde(default)]
    pub ontology: OntologyConfig,
    /// `[engine]` section
    #[serde(default)]
    pub engine: EngineConfig,
}

/// The `[sharding]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardingConfig {
    /// Instance-count at which a new shard is created.
    pub threshold: u64,
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self { threshold: 10_000 }
    }
}

/// The `[ontology]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct OntologyConfig {
    /// `[ontology.cache]` subsection
    #[serde(default)]
    pub cache: OntologyCacheConfig,
}

/// The `[ontology.cache]` subsection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct OntologyCacheConfig {
    /// `[ontology.cache.timeout]` subsection
    #[serde(default)]
    pub timeout: OntologyCacheTimeout,
}

/// The `[ontology.cache.timeout]` subsection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct OntologyCacheTimeout {
    /// `[ontology.cache.timeout.ms]` values
    #[serde(default)]
    pub ms: OntologyCacheTimeoutMs,
}

/// Cache write-expiry values in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OntologyCacheTimeoutMs {
    /// Write-expiry for interactive transactions.
    pub normal: u64,
    /// Write-expiry for batch loading. Shorter, so bulk loaders re-read
    /// types mutated by concurrent loaders sooner.
    pub batch: u64,
}

impl Default for OntologyCacheTimeoutMs {
    fn default() -> Self {
        Self {
            normal: 600_000,
            batch: 1_000,
        }
    }
}

/// The `[engine]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Destination for commit-log submission, or `IN_MEMORY`.
    pub url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: IN_MEMORY.to_string(),
        }
    }
}

impl TrellisConfig {
    /// The sharding threshold.
    pub fn sharding_threshold(&self) -> u64 {
        self.sharding.threshold
    }

    /// The ontology cache write-expiry for the given loading mode.
    pub fn cache_timeout(&self, batch_loading: bool) -> Duration {
        let ms = if batch_loading {
            self.ontology.cache.timeout.ms.batch
        } else {
            self.ontology.cache.timeout.ms.normal
        };
        Duration::from_millis(ms)
    }

    /// Whether commit logs have nowhere to go.
    pub fn is_in_memory(&self) -> bool {
        self.engine.url == IN_MEMORY
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Trellis engine configuration

[sharding]
# Instance-count at which a type grows a new shard.
threshold = 10000

[ontology.cache.timeout.ms]
# Ontology cache write-expiry in milliseconds.
# "normal" applies to interactive transactions, "batch" to bulk loading.
normal = 600000
batch = 1000

[engine]
# Destination for commit-log submission. "IN_MEMORY" drops logs.
url = "IN_MEMORY"
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// sharding threshold is zero.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GraphError::substrate(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: TrellisConfig = toml::from_str(&content).map_err(|e| {
            GraphError::substrate(format!(
                "failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                GraphError::substrate(format!(
                    "failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.sharding.threshold == 0 {
            return Err(GraphError::substrate(
                "sharding.threshold must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_sensible() {
        let config = TrellisConfig::default();
        assert_eq!(config.sharding_threshold(), 10_000);
        assert_eq!(config.cache_timeout(false), Duration::from_millis(600_000));
        assert_eq!(config.cache_timeout(true), Duration::from_millis(1_000));
        assert!(config.is_in_memory());
    }

    #[test]
    fn default_toml_parses_to_default_config() {
        let parsed: TrellisConfig = toml::from_str(TrellisConfig::default_toml()).unwrap();
        assert_eq!(parsed, TrellisConfig::default());
    }

    #[test]
    fn from_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        TrellisConfig::write_default_if_missing(&path).unwrap();
        let config = TrellisConfig::from_file(&path).unwrap();
        assert_eq!(config, TrellisConfig::default());
    }

    #[test]
    fn partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[sharding]\nthreshold = 3\n").unwrap();
        let config = TrellisConfig::from_file(&path).unwrap();
        assert_eq!(config.sharding_threshold(), 3);
        assert_eq!(config.engine.url, IN_MEMORY);
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[sharding]\nthreshold = 0\n").unwrap();
        assert!(TrellisConfig::from_file(&path).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(TrellisConfig::from_file(&path).is_err());
    }
}
