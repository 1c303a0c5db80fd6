//! Configuration management

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// Cache configuration
    pub cache: CacheConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level or `EnvFilter` directive (`RUST_LOG` wins when set)
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Namespace attached to every cache log event
    pub namespace: String,
    /// Base URL relative resource URLs are resolved against
    pub base_url: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: "resource-cache".to_string(),
            base_url: None,
        }
    }
}

impl Config {
    /// Load configuration from an optional YAML file plus
    /// `RESOURCE_CACHE_`-prefixed environment variables
    /// (`RESOURCE_CACHE_CACHE__BASE_URL` sets `cache.base_url`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("RESOURCE_CACHE_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot
    pub fn validate(&self) -> Result<()> {
        if self.cache.namespace.trim().is_empty() {
            return Err(Error::Config("cache.namespace must not be empty".to_string()));
        }
        if let Some(base) = &self.cache.base_url {
            url::Url::parse(base)
                .map_err(|e| Error::Config(format!("cache.base_url '{base}' is invalid: {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.format, LogFormat::Text);
        assert_eq!(config.cache.namespace, "resource-cache");
        assert!(config.cache.base_url.is_none());
    }

    #[test]
    fn test_missing_file_is_error() {
        let result = Config::load(Some(Path::new("/nonexistent/resource-cache.yaml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_load_yaml_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                "log:\n  level: debug\n  format: json\ncache:\n  namespace: web\n  base_url: https://api.example.com/\n",
            )?;
            let config = Config::load(Some(Path::new("config.yaml"))).map_err(|e| e.to_string())?;
            assert_eq!(config.log.level, "debug");
            assert_eq!(config.log.format, LogFormat::Json);
            assert_eq!(config.cache.namespace, "web");
            assert_eq!(config.cache.base_url.as_deref(), Some("https://api.example.com/"));
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("config.yaml", "cache:\n  namespace: web\n")?;
            jail.set_env("RESOURCE_CACHE_CACHE__NAMESPACE", "worker");
            let config = Config::load(Some(Path::new("config.yaml"))).map_err(|e| e.to_string())?;
            assert_eq!(config.cache.namespace, "worker");
            Ok(())
        });
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let config = Config {
            cache: CacheConfig {
                base_url: Some("not a url".to_string()),
                ..CacheConfig::default()
            },
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
