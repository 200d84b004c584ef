use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::allocator::DEFAULT_PREFIX;

/// Registry configuration loaded from environment variables
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub db_path: PathBuf,
    pub id_prefix: String,
    pub bind_addr: String,
    pub notify_delay: Duration,
    pub require_photo: bool,
    pub export_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db_path: PathBuf::from("registry.db"),
            id_prefix: DEFAULT_PREFIX.to_string(),
            bind_addr: "0.0.0.0:3000".to_string(),
            notify_delay: Duration::from_millis(2000),
            require_photo: false,
            export_dir: PathBuf::from("."),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from any variable source; unset variables take their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let id_prefix = lookup("REGISTRY_ID_PREFIX").unwrap_or(defaults.id_prefix);
        if id_prefix.trim().is_empty() {
            anyhow::bail!("REGISTRY_ID_PREFIX must not be empty");
        }

        Ok(Config {
            db_path: lookup("REGISTRY_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            id_prefix,
            bind_addr: lookup("REGISTRY_BIND_ADDR").unwrap_or(defaults.bind_addr),
            notify_delay: match lookup("REGISTRY_NOTIFY_DELAY_MS") {
                Some(raw) => Duration::from_millis(
                    raw.trim()
                        .parse()
                        .context("REGISTRY_NOTIFY_DELAY_MS must be a number of milliseconds")?,
                ),
                None => defaults.notify_delay,
            },
            require_photo: match lookup("REGISTRY_REQUIRE_PHOTO") {
                Some(raw) => parse_bool(&raw).context("REGISTRY_REQUIRE_PHOTO must be true or false")?,
                None => defaults.require_photo,
            },
            export_dir: lookup("REGISTRY_EXPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.export_dir),
        })
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("not a boolean: {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.id_prefix, "SGC");
        assert_eq!(config.notify_delay, Duration::from_secs(2));
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("REGISTRY_DB_PATH", "/var/lib/registry/members.db"),
            ("REGISTRY_ID_PREFIX", "STG"),
            ("REGISTRY_NOTIFY_DELAY_MS", "0"),
            ("REGISTRY_REQUIRE_PHOTO", "yes"),
        ])
        .unwrap();

        assert_eq!(config.db_path, PathBuf::from("/var/lib/registry/members.db"));
        assert_eq!(config.id_prefix, "STG");
        assert_eq!(config.notify_delay, Duration::ZERO);
        assert!(config.require_photo);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = config_from(&[("REGISTRY_NOTIFY_DELAY_MS", "soon")]).unwrap_err();
        assert!(err.to_string().contains("REGISTRY_NOTIFY_DELAY_MS"));

        assert!(config_from(&[("REGISTRY_REQUIRE_PHOTO", "maybe")]).is_err());
        assert!(config_from(&[("REGISTRY_ID_PREFIX", " ")]).is_err());
    }
}
