//! Configuration management for the client.

use std::env;
use std::time::Duration;

/// Tunables of the sync coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOptions {
    /// Upper bound for a single remote write; expiry rolls the mutation back
    pub write_timeout: Duration,
    /// Pause before resubscribing after the change stream dropped
    pub reconnect_delay: Duration,
    /// How long an idle per-record dispatch lane is kept around
    pub lane_idle: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(1),
            lane_idle: Duration::from_secs(30),
        }
    }
}

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Shape stream endpoint
    pub shape_url: String,
    /// Base URL of the write API
    pub api_url: String,
    /// Table the shape is subscribed to
    pub table: String,
    /// Coordinator tunables
    pub sync: SyncOptions,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let shape_url = lookup("SHAPE_URL")
            .unwrap_or_else(|| "http://localhost:3000/v1/shape".to_string());
        let api_url = lookup("API_URL").unwrap_or_else(|| "http://localhost:3000".to_string());
        let table = lookup("SHAPE_TABLE").unwrap_or_else(|| "todos".to_string());

        let defaults = SyncOptions::default();
        let sync = SyncOptions {
            write_timeout: millis(&lookup, "WRITE_TIMEOUT_MS")?.unwrap_or(defaults.write_timeout),
            reconnect_delay: millis(&lookup, "RECONNECT_DELAY_MS")?
                .unwrap_or(defaults.reconnect_delay),
            lane_idle: defaults.lane_idle,
        };

        Ok(Self {
            shape_url,
            api_url: api_url.trim_end_matches('/').to_string(),
            table,
            sync,
        })
    }
}

fn millis<F>(lookup: &F, var: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|_| ConfigError::InvalidNumber { var, value }),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid {var} value: {value}")]
    InvalidNumber { var: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.shape_url, "http://localhost:3000/v1/shape");
        assert_eq!(config.api_url, "http://localhost:3000");
        assert_eq!(config.table, "todos");
        assert_eq!(config.sync, SyncOptions::default());
    }

    #[test]
    fn overrides() {
        let config = Config::from_lookup(lookup(&[
            ("API_URL", "http://10.0.2.2:3000/"),
            ("WRITE_TIMEOUT_MS", "2500"),
            ("RECONNECT_DELAY_MS", " 50 "),
        ]))
        .unwrap();
        assert_eq!(config.api_url, "http://10.0.2.2:3000");
        assert_eq!(config.sync.write_timeout, Duration::from_millis(2500));
        assert_eq!(config.sync.reconnect_delay, Duration::from_millis(50));
    }

    #[test]
    fn invalid_number() {
        let err = Config::from_lookup(lookup(&[("WRITE_TIMEOUT_MS", "soon")])).unwrap_err();
        assert_eq!(err.to_string(), "Invalid WRITE_TIMEOUT_MS value: soon");
    }
}
