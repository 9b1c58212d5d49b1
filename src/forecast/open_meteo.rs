use super::types::*;
use super::{ForecastError, ForecastSource};
use crate::config::Config;
use crate::utils::validate_coordinates;
use async_trait::async_trait;
use reqwest::Client;

pub struct OpenMeteoClient {
    client: Client,
    base_url: String,
}

impl OpenMeteoClient {
    pub fn new(config: &Config) -> Result<Self, ForecastError> {
        let client = Client::builder()
            .user_agent(concat!("WeatherAggregator/", env!("CARGO_PKG_VERSION")))
            .timeout(config.http_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.open_meteo_url.clone(),
        })
    }

    async fn get_forecast(&self, params: &[(&str, String)]) -> Result<ForecastResponse, ForecastError> {
        let response = self.client.get(&self.base_url).query(params).send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ForecastError::ApiError(format!("HTTP {}: {}", status, error_text)));
        }

        let body = response.bytes().await?;
        let forecast: ForecastResponse = serde_json::from_slice(&body)?;
        Ok(forecast)
    }
}

#[async_trait]
impl ForecastSource for OpenMeteoClient {
    async fn fetch_hourly(&self, latitude: f64, longitude: f64) -> Result<HourlySeries, ForecastError> {
        validate_coordinates(latitude, longitude).map_err(ForecastError::InvalidCoordinates)?;

        let response = self
            .get_forecast(&[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                ("hourly", HOURLY_VARIABLES.to_string()),
                ("timezone", "auto".to_string()),
            ])
            .await?;

        match response.hourly {
            Some(raw) => into_series(raw),
            None => {
                tracing::warn!(latitude, longitude, "Open-Meteo returned no hourly block");
                Ok(HourlySeries::default())
            }
        }
    }

    async fn fetch_current(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<CurrentConditions, ForecastError> {
        validate_coordinates(latitude, longitude).map_err(ForecastError::InvalidCoordinates)?;

        let response = self
            .get_forecast(&[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                ("current", CURRENT_VARIABLES.to_string()),
            ])
            .await?;

        Ok(CurrentConditions::from(response.current))
    }
}

fn into_series(raw: RawHourly) -> Result<HourlySeries, ForecastError> {
    let time = raw.time.ok_or(ForecastError::MissingTime)?;

    Ok(HourlySeries {
        time,
        temperature_2m: raw.temperature_2m,
        relative_humidity_2m: raw.relative_humidity_2m,
        wind_speed_10m: raw.wind_speed_10m,
        precipitation: raw.precipitation,
        surface_pressure: raw.surface_pressure,
    })
}
