pub mod mock;
pub mod open_meteo;
pub mod types;

use async_trait::async_trait;
use thiserror::Error;
use types::{CurrentConditions, HourlySeries};

#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("JSON parsing failed: {0}")]
    JsonParsing(#[from] serde_json::Error),
    #[error("API error: {0}")]
    ApiError(String),
    #[error("Hourly forecast has no time array")]
    MissingTime,
    #[error("Invalid coordinates: {0}")]
    InvalidCoordinates(String),
}

/// Anything that can produce forecasts for a coordinate pair.
#[async_trait]
pub trait ForecastSource: Send + Sync {
    /// Hourly forecast for the configured variables. An upstream response
    /// without an `hourly` block is an empty series.
    async fn fetch_hourly(&self, latitude: f64, longitude: f64) -> Result<HourlySeries, ForecastError>;

    /// Current conditions; absent upstream fields come back as `None`.
    async fn fetch_current(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<CurrentConditions, ForecastError>;
}
