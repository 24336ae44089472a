//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides the store location
pub const FACTS_DB_ENV: &str = "FACTS_DB";

/// Environment variable that overrides the config directory
pub const CONFIG_DIR_ENV: &str = "FACTGRAPH_CONFIG_DIR";

/// Factgraph configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub search: SearchConfig,
    pub activation: ActivationConfig,
    pub cache: CacheConfig,
    pub host: HostConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Explicit database path; `None` means the platform default
    pub path: Option<PathBuf>,
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub top_k: usize,
    pub min_score: u8,
    pub entity_match_threshold: u8,
    pub min_query_len: usize,
    pub identity_entity: String,
    pub fts_limit: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivationConfig {
    pub reinforcement_step: f64,
    pub decay_factor: f64,
    pub activation_floor: f64,
    pub decay_batch_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub timeout_ms: u64,
    pub max_context_chars: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_connections: 5,
            busy_timeout_ms: 5000,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_score: 40,
            entity_match_threshold: 65,
            min_query_len: 5,
            identity_entity: "User".to_string(),
            fts_limit: 20,
        }
    }
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            reinforcement_step: 0.5,
            decay_factor: 0.95,
            activation_floor: 0.01,
            decay_batch_size: 500,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            ttl_secs: 60,
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 1500,
            max_context_chars: 2000,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl HostConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl StoreConfig {
    /// Resolve the store location: `FACTS_DB`, then `store.path`, then the default
    pub fn resolved_path(&self) -> PathBuf {
        match env::var_os(FACTS_DB_ENV) {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => self
                .path
                .clone()
                .unwrap_or_else(crate::storage::default_database_path),
        }
    }
}

/// Every key understood by `get`/`set`, in display order
const KEYS: &[&str] = &[
    "store.path",
    "store.max_connections",
    "store.busy_timeout_ms",
    "search.top_k",
    "search.min_score",
    "search.entity_match_threshold",
    "search.min_query_len",
    "search.identity_entity",
    "search.fts_limit",
    "activation.reinforcement_step",
    "activation.decay_factor",
    "activation.activation_floor",
    "activation.decay_batch_size",
    "cache.capacity",
    "cache.ttl_secs",
    "host.timeout_ms",
    "host.max_context_chars",
];

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid {} value: {}", key, value))
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var(CONFIG_DIR_ENV) {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("factgraph")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or return defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to an explicit file
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.store.max_connections == 0 {
            return Err(anyhow!("store.max_connections must be at least 1"));
        }
        if self.search.top_k == 0 {
            return Err(anyhow!("search.top_k must be at least 1"));
        }
        if self.search.min_score > 100 || self.search.entity_match_threshold > 100 {
            return Err(anyhow!("Scores must be between 0 and 100"));
        }
        if self.search.min_score > self.search.entity_match_threshold {
            return Err(anyhow!(
                "search.min_score ({}) must not exceed search.entity_match_threshold ({})",
                self.search.min_score,
                self.search.entity_match_threshold
            ));
        }
        if self.search.identity_entity.trim().is_empty() {
            return Err(anyhow!("search.identity_entity must not be empty"));
        }
        if self.search.fts_limit == 0 {
            return Err(anyhow!("search.fts_limit must be at least 1"));
        }
        if !(self.activation.reinforcement_step > 0.0) {
            return Err(anyhow!("activation.reinforcement_step must be positive"));
        }
        if !(self.activation.decay_factor > 0.0 && self.activation.decay_factor < 1.0) {
            return Err(anyhow!(
                "activation.decay_factor must be strictly between 0.0 and 1.0"
            ));
        }
        if !(0.0..1.0).contains(&self.activation.activation_floor) {
            return Err(anyhow!(
                "activation.activation_floor must be between 0.0 and 1.0"
            ));
        }
        if self.activation.decay_batch_size == 0 {
            return Err(anyhow!("activation.decay_batch_size must be at least 1"));
        }
        if self.cache.capacity == 0 {
            return Err(anyhow!("cache.capacity must be at least 1"));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "store.path" => Ok(self.store.resolved_path().display().to_string()),
            "store.max_connections" => Ok(self.store.max_connections.to_string()),
            "store.busy_timeout_ms" => Ok(self.store.busy_timeout_ms.to_string()),

            "search.top_k" => Ok(self.search.top_k.to_string()),
            "search.min_score" => Ok(self.search.min_score.to_string()),
            "search.entity_match_threshold" => Ok(self.search.entity_match_threshold.to_string()),
            "search.min_query_len" => Ok(self.search.min_query_len.to_string()),
            "search.identity_entity" => Ok(self.search.identity_entity.clone()),
            "search.fts_limit" => Ok(self.search.fts_limit.to_string()),

            "activation.reinforcement_step" => Ok(self.activation.reinforcement_step.to_string()),
            "activation.decay_factor" => Ok(self.activation.decay_factor.to_string()),
            "activation.activation_floor" => Ok(self.activation.activation_floor.to_string()),
            "activation.decay_batch_size" => Ok(self.activation.decay_batch_size.to_string()),

            "cache.capacity" => Ok(self.cache.capacity.to_string()),
            "cache.ttl_secs" => Ok(self.cache.ttl_secs.to_string()),

            "host.timeout_ms" => Ok(self.host.timeout_ms.to_string()),
            "host.max_context_chars" => Ok(self.host.max_context_chars.to_string()),

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `factgraph config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    ///
    /// The new value is range-checked before it is stored.
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut next = self.clone();
        match key {
            "store.path" => {
                let value = value.trim();
                next.store.path = if value.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                };
            }
            "store.max_connections" => next.store.max_connections = parse(key, value)?,
            "store.busy_timeout_ms" => next.store.busy_timeout_ms = parse(key, value)?,

            "search.top_k" => next.search.top_k = parse(key, value)?,
            "search.min_score" => next.search.min_score = parse(key, value)?,
            "search.entity_match_threshold" => {
                next.search.entity_match_threshold = parse(key, value)?
            }
            "search.min_query_len" => next.search.min_query_len = parse(key, value)?,
            "search.identity_entity" => next.search.identity_entity = value.trim().to_string(),
            "search.fts_limit" => next.search.fts_limit = parse(key, value)?,

            "activation.reinforcement_step" => {
                next.activation.reinforcement_step = parse(key, value)?
            }
            "activation.decay_factor" => next.activation.decay_factor = parse(key, value)?,
            "activation.activation_floor" => next.activation.activation_floor = parse(key, value)?,
            "activation.decay_batch_size" => next.activation.decay_batch_size = parse(key, value)?,

            "cache.capacity" => next.cache.capacity = parse(key, value)?,
            "cache.ttl_secs" => next.cache.ttl_secs = parse(key, value)?,

            "host.timeout_ms" => next.host.timeout_ms = parse(key, value)?,
            "host.max_context_chars" => next.host.max_context_chars = parse(key, value)?,

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `factgraph config list` to see available keys.",
                    key
                ));
            }
        }
        next.validate()?;
        *self = next;
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        KEYS.iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.search.top_k, 5);
        assert_eq!(config.search.entity_match_threshold, 65);
        assert_eq!(config.cache.capacity, 10);
        assert_eq!(config.cache.ttl(), Duration::from_secs(60));
    }

    #[test]
    fn test_set_and_get() {
        let mut config = Config::default();
        config.set("search.top_k", "8").unwrap();
        config.set("activation.decay_factor", "0.9").unwrap();
        assert_eq!(config.get("search.top_k").unwrap(), "8");
        assert_eq!(config.get("activation.decay_factor").unwrap(), "0.9");
    }

    #[test]
    fn test_set_rejects_out_of_range_values() {
        let mut config = Config::default();
        assert!(config.set("activation.decay_factor", "1.0").is_err());
        assert!(config.set("activation.decay_factor", "0").is_err());
        assert!(config.set("search.min_score", "90").is_err());
        assert!(config.set("cache.capacity", "0").is_err());
        assert!(config.set("search.top_k", "many").is_err());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_unknown_key() {
        let mut config = Config::default();
        assert!(config.get("llm.model").is_err());
        assert!(config.set("llm.model", "x").is_err());
    }

    #[test]
    fn test_list_covers_every_key() {
        let config = Config::default();
        let listed = config.list().unwrap();
        assert_eq!(listed.len(), KEYS.len());
        assert!(listed.iter().any(|(k, v)| k == "search.identity_entity" && v == "User"));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.set("cache.ttl_secs", "5").unwrap();
        config.set("store.path", "/tmp/graph.db").unwrap();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[search]\ntop_k = 3\n").unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.search.top_k, 3);
        assert_eq!(loaded.search.min_score, 40);
        assert_eq!(loaded.activation, ActivationConfig::default());
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let loaded = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded, Config::default());
    }
}
