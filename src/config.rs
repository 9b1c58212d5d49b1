use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

pub const DEFAULT_DATABASE_URL: &str = "sqlite:weather.db";
pub const DEFAULT_OPEN_METEO_URL: &str = "https://api.open-meteo.com/v1/forecast";
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8000";
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 15 * 60;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub open_meteo_url: String,
    pub bind_address: String,
    pub refresh_interval_secs: u64,
    pub http_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            open_meteo_url: DEFAULT_OPEN_METEO_URL.to_string(),
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Config {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            open_meteo_url: env::var("OPEN_METEO_URL")
                .unwrap_or_else(|_| DEFAULT_OPEN_METEO_URL.to_string()),
            bind_address: env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_string()),
            refresh_interval_secs: parse_secs("REFRESH_INTERVAL_SECS", DEFAULT_REFRESH_INTERVAL_SECS)?,
            http_timeout_secs: parse_secs("HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?,
        })
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn parse_secs(key: &str, default: u64) -> anyhow::Result<u64> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .with_context(|| format!("{} must be a whole number of seconds, got {:?}", key, raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_service_constants() {
        let config = Config::default();
        assert_eq!(config.database_url, "sqlite:weather.db");
        assert_eq!(config.open_meteo_url, "https://api.open-meteo.com/v1/forecast");
        assert_eq!(config.refresh_interval(), Duration::from_secs(900));
        assert_eq!(config.http_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_parse_secs_falls_back_when_unset() {
        let value = parse_secs("WEATHER_AGGREGATOR_TEST_UNSET_SECS", 42).unwrap();
        assert_eq!(value, 42);
    }
}
