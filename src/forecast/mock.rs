use super::types::*;
use super::{ForecastError, ForecastSource};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

const MOCK_DATE: &str = "2024-01-01";

/// Deterministic stand-in for the upstream API. Produces one day of hourly
/// data, can be told to fail or stall for given coordinates, and records
/// every hourly fetch it serves.
pub struct MockForecastSource {
    hours: usize,
    failing: Vec<(f64, f64)>,
    panicking: Vec<(f64, f64)>,
    delays: Vec<((f64, f64), Duration)>,
    calls: Mutex<Vec<HourlyCall>>,
}

#[derive(Debug, Clone, Copy)]
pub struct HourlyCall {
    pub latitude: f64,
    pub longitude: f64,
    pub at: Instant,
}

impl MockForecastSource {
    pub fn new() -> Self {
        Self {
            hours: 24,
            failing: Vec::new(),
            panicking: Vec::new(),
            delays: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_hours(mut self, hours: usize) -> Self {
        self.hours = hours.min(24);
        self
    }

    pub fn failing_at(mut self, latitude: f64, longitude: f64) -> Self {
        self.failing.push((latitude, longitude));
        self
    }

    /// Hourly fetches for these coordinates panic instead of returning.
    pub fn panicking_at(mut self, latitude: f64, longitude: f64) -> Self {
        self.panicking.push((latitude, longitude));
        self
    }

    pub fn delayed_at(mut self, latitude: f64, longitude: f64, delay: Duration) -> Self {
        self.delays.push(((latitude, longitude), delay));
        self
    }

    pub fn hourly_calls(&self) -> Vec<HourlyCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    /// The series this source hands out for a coordinate pair.
    pub fn series_for(&self, latitude: f64, longitude: f64) -> HourlySeries {
        let mut series = HourlySeries::default();
        for hour in 0..self.hours {
            let h = hour as f64;
            series.time.push(format!("{}T{:02}:00", MOCK_DATE, hour));
            // Diurnal variation around a latitude-dependent baseline
            series.temperature_2m.push(Some(round1(25.0 - latitude.abs() * 0.3 + 5.0 * (h * 0.26).sin())));
            series.relative_humidity_2m.push(Some(round1(60.0 + 20.0 * (h * 0.13).cos())));
            series.wind_speed_10m.push(Some(round1(8.0 + (longitude.abs() % 5.0) + h * 0.1)));
            series.precipitation.push(Some(if hour % 8 == 0 { 0.4 } else { 0.0 }));
            series.surface_pressure.push(Some(round1(1013.0 - h * 0.2)));
        }
        series
    }

    fn is_failing(&self, latitude: f64, longitude: f64) -> bool {
        self.failing.iter().any(|&(lat, lon)| lat == latitude && lon == longitude)
    }

    fn delay_for(&self, latitude: f64, longitude: f64) -> Option<Duration> {
        self.delays
            .iter()
            .find(|((lat, lon), _)| *lat == latitude && *lon == longitude)
            .map(|(_, delay)| *delay)
    }
}

impl Default for MockForecastSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ForecastSource for MockForecastSource {
    async fn fetch_hourly(&self, latitude: f64, longitude: f64) -> Result<HourlySeries, ForecastError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(HourlyCall {
                latitude,
                longitude,
                at: Instant::now(),
            });
        }

        if let Some(delay) = self.delay_for(latitude, longitude) {
            tokio::time::sleep(delay).await;
        }

        if self.panicking.iter().any(|&(lat, lon)| lat == latitude && lon == longitude) {
            panic!("forecast source crashed for {},{}", latitude, longitude);
        }

        if self.is_failing(latitude, longitude) {
            return Err(ForecastError::ApiError(format!(
                "HTTP 503 Service Unavailable: no forecast for {},{}",
                latitude, longitude
            )));
        }

        Ok(self.series_for(latitude, longitude))
    }

    async fn fetch_current(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<CurrentConditions, ForecastError> {
        if self.is_failing(latitude, longitude) {
            return Err(ForecastError::ApiError("HTTP 503 Service Unavailable".to_string()));
        }

        let series = self.series_for(latitude, longitude);
        Ok(CurrentConditions {
            temperature: series.temperature_2m.first().copied().flatten(),
            wind_speed: series.wind_speed_10m.first().copied().flatten(),
            pressure: series.surface_pressure.first().copied().flatten(),
        })
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
