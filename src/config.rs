//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - bakery.toml (default configuration)
//! - bakery.local.toml (git-ignored local overrides)
//! - Environment variables (BAKERY_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # bakery.toml
//! [cache]
//! capacity = 1000
//! relationship_capacity = 0
//!
//! [loading]
//! bake_lazy_loaders = true
//!
//! [logging]
//! level = "debug"
//! format = "json"
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! BAKERY_CACHE__CAPACITY=5000
//! BAKERY_LOGGING__LEVEL=trace
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub loading: LoadingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Plan cache ("bakery") sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum plans held by the shared bakery (0 = unbounded)
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Maximum plans held by each relationship-scoped bakery (0 = unbounded).
    /// Their key space is bounded by code paths, not parameter values.
    #[serde(default)]
    pub relationship_capacity: usize,
}

/// Relationship loading behaviour
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadingConfig {
    /// Install the baked lazy loader as the default "select" strategy
    #[serde(default)]
    pub bake_lazy_loaders: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_capacity() -> usize {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. bakery.toml (base configuration)
    /// 2. bakery.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (BAKERY_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("bakery.toml"))
            .merge(Toml::file("bakery.local.toml"))
            .merge(Env::prefixed("BAKERY_").split("__"))
            .extract()
    }

    /// Load configuration from specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("BAKERY_").split("__"))
            .extract()
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            capacity: default_capacity(),
            relationship_capacity: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.cache.capacity, 1000);
        assert_eq!(config.cache.relationship_capacity, 0);
        assert!(!config.loading.bake_lazy_loaders);
    }

    #[test]
    fn test_default_logging_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "text");
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();

        assert!(toml_str.contains("[cache]"));
        assert!(toml_str.contains("[loading]"));
        assert!(toml_str.contains("[logging]"));
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let back: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.cache.capacity, 1000);
        assert_eq!(back.logging.level, "info");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let back: Config = toml::from_str("[loading]\nbake_lazy_loaders = true\n").unwrap();
        assert!(back.loading.bake_lazy_loaders);
        assert_eq!(back.cache.capacity, 1000);
        assert_eq!(back.logging.format, "text");
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.cache.relationship_capacity, 0);
    }
}
