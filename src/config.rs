use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use chrono_tz::Tz;
use thiserror::Error;

use crate::comparison::{DEFAULT_COMPARISON_TTL, DEFAULT_LIVE_TTL};
use crate::metrics::RENEWABLE_TECHNOLOGIES;

const DEFAULT_TIMEZONE: Tz = chrono_tz::Europe::Kyiv;
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3044";

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Clone)]
pub struct Config {
    pub api_key: String,
    pub access_secret: String,
    pub timezone: Tz,
    pub bind_addr: SocketAddr,
    pub live_ttl: Duration,
    pub comparison_ttl: Duration,
    /// Upstream technology names counted as renewable
    pub renewable_technologies: Vec<String>,
}

impl Config {
    /// Reads the process environment, with a `.env` file in the working
    /// directory taking part if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let setting = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| lookup(name))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let api_key = setting(&["ENTSOE_API_KEY", "entsoe_key"])
            .ok_or(ConfigError::Missing("ENTSOE_API_KEY"))?;
        let access_secret = setting(&["APP_PASSWORD", "app_password"])
            .ok_or(ConfigError::Missing("APP_PASSWORD"))?;

        let timezone = match setting(&["DISPLAY_TIMEZONE"]) {
            Some(name) => name.parse::<Tz>().map_err(|e| ConfigError::Invalid {
                name: "DISPLAY_TIMEZONE",
                reason: e.to_string(),
            })?,
            None => DEFAULT_TIMEZONE,
        };

        let bind_addr = setting(&["BIND_ADDR"])
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                name: "BIND_ADDR",
                reason: e.to_string(),
            })?;

        let live_ttl = ttl(
            "LIVE_CACHE_TTL_SECS",
            setting(&["LIVE_CACHE_TTL_SECS"]),
            DEFAULT_LIVE_TTL,
        )?;
        let comparison_ttl = ttl(
            "COMPARISON_CACHE_TTL_SECS",
            setting(&["COMPARISON_CACHE_TTL_SECS"]),
            DEFAULT_COMPARISON_TTL,
        )?;

        let renewable_technologies = match setting(&["RENEWABLE_TECHNOLOGIES"]) {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|tech| !tech.is_empty())
                .map(String::from)
                .collect(),
            None => RENEWABLE_TECHNOLOGIES.iter().map(|tech| tech.to_string()).collect(),
        };

        Ok(Self {
            api_key,
            access_secret,
            timezone,
            bind_addr,
            live_ttl,
            comparison_ttl,
            renewable_technologies,
        })
    }
}

fn ttl(
    name: &'static str,
    value: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let Some(value) = value else {
        return Ok(default);
    };
    value
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        })
}

// Secrets stay out of logs
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &"<redacted>")
            .field("access_secret", &"<redacted>")
            .field("timezone", &self.timezone)
            .field("bind_addr", &self.bind_addr)
            .field("live_ttl", &self.live_ttl)
            .field("comparison_ttl", &self.comparison_ttl)
            .field("renewable_technologies", &self.renewable_technologies)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[("ENTSOE_API_KEY", "token"), ("APP_PASSWORD", "secret")]).unwrap();

        assert_eq!(config.timezone, chrono_tz::Europe::Kyiv);
        assert_eq!(config.bind_addr, "0.0.0.0:3044".parse().unwrap());
        assert_eq!(config.live_ttl, Duration::from_secs(300));
        assert_eq!(config.comparison_ttl, Duration::from_secs(3600));
        assert!(config.renewable_technologies.iter().any(|t| t == "Solar"));
    }

    #[test]
    fn test_lowercase_names_accepted() {
        let config = config(&[("entsoe_key", "token"), ("app_password", "secret")]).unwrap();
        assert_eq!(config.api_key, "token");
        assert_eq!(config.access_secret, "secret");
    }

    #[test]
    fn test_missing_credentials() {
        assert_eq!(
            config(&[("APP_PASSWORD", "secret")]).unwrap_err(),
            ConfigError::Missing("ENTSOE_API_KEY")
        );
        assert_eq!(
            config(&[("ENTSOE_API_KEY", "token"), ("APP_PASSWORD", "  ")]).unwrap_err(),
            ConfigError::Missing("APP_PASSWORD")
        );
    }

    #[test]
    fn test_invalid_values() {
        let base = [("ENTSOE_API_KEY", "token"), ("APP_PASSWORD", "secret")];

        let err = config(&[base[0], base[1], ("DISPLAY_TIMEZONE", "Mars/Olympus")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "DISPLAY_TIMEZONE", .. }));

        let err = config(&[base[0], base[1], ("LIVE_CACHE_TTL_SECS", "five")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "LIVE_CACHE_TTL_SECS", .. }));
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("ENTSOE_API_KEY", "token"),
            ("APP_PASSWORD", "secret"),
            ("DISPLAY_TIMEZONE", "Europe/Warsaw"),
            ("BIND_ADDR", "127.0.0.1:8080"),
            ("COMPARISON_CACHE_TTL_SECS", "60"),
            ("RENEWABLE_TECHNOLOGIES", "Solar, Wind Onshore,"),
        ])
        .unwrap();

        assert_eq!(config.timezone, chrono_tz::Europe::Warsaw);
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.comparison_ttl, Duration::from_secs(60));
        assert_eq!(config.renewable_technologies, vec!["Solar", "Wind Onshore"]);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = config(&[
            ("ENTSOE_API_KEY", "token-123"),
            ("APP_PASSWORD", "hunter2"),
        ])
        .unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("token-123"));
        assert!(!debug.contains("hunter2"));
    }
}
