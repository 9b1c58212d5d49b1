use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::database::ForecastPoint;

/// Hourly variables requested from Open-Meteo, in the order they are stored.
pub const HOURLY_VARIABLES: &str =
    "temperature_2m,relative_humidity_2m,wind_speed_10m,precipitation,surface_pressure";

/// Current-condition variables requested from Open-Meteo.
pub const CURRENT_VARIABLES: &str = "temperature_2m,wind_speed_10m,surface_pressure";

/// Parallel arrays aligned by `time`, one entry per forecast hour.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HourlySeries {
    pub time: Vec<String>,
    #[serde(default)]
    pub temperature_2m: Vec<Option<f64>>,
    #[serde(default)]
    pub relative_humidity_2m: Vec<Option<f64>>,
    #[serde(default)]
    pub wind_speed_10m: Vec<Option<f64>>,
    #[serde(default)]
    pub precipitation: Vec<Option<f64>>,
    #[serde(default)]
    pub surface_pressure: Vec<Option<f64>>,
}

impl HourlySeries {
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Flattens the arrays into one point per timestamp. Metric arrays shorter
    /// than `time` yield `None` for the missing hours.
    pub fn points(&self, city: &str) -> Vec<ForecastPoint> {
        self.time
            .iter()
            .enumerate()
            .map(|(i, time)| ForecastPoint {
                city: city.to_string(),
                time: time.clone(),
                temperature: metric_at(&self.temperature_2m, i),
                humidity: metric_at(&self.relative_humidity_2m, i),
                wind_speed: metric_at(&self.wind_speed_10m, i),
                precipitation: metric_at(&self.precipitation, i),
                pressure: metric_at(&self.surface_pressure, i),
            })
            .collect()
    }
}

fn metric_at(values: &[Option<f64>], index: usize) -> Option<f64> {
    values.get(index).copied().flatten()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CurrentConditions {
    pub temperature: Option<f64>,
    pub wind_speed: Option<f64>,
    pub pressure: Option<f64>,
}

// Raw Open-Meteo payloads

#[derive(Debug, Clone, Deserialize)]
pub struct ForecastResponse {
    #[serde(default)]
    pub hourly: Option<RawHourly>,
    #[serde(default)]
    pub current: Option<RawCurrent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawHourly {
    #[serde(default)]
    pub time: Option<Vec<String>>,
    #[serde(default)]
    pub temperature_2m: Vec<Option<f64>>,
    #[serde(default)]
    pub relative_humidity_2m: Vec<Option<f64>>,
    #[serde(default)]
    pub wind_speed_10m: Vec<Option<f64>>,
    #[serde(default)]
    pub precipitation: Vec<Option<f64>>,
    #[serde(default)]
    pub surface_pressure: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCurrent {
    #[serde(default)]
    pub temperature_2m: Option<f64>,
    #[serde(default)]
    pub wind_speed_10m: Option<f64>,
    #[serde(default)]
    pub surface_pressure: Option<f64>,
}

impl From<Option<RawCurrent>> for CurrentConditions {
    fn from(current: Option<RawCurrent>) -> Self {
        let current = current.unwrap_or_default();
        Self {
            temperature: current.temperature_2m,
            wind_speed: current.wind_speed_10m,
            pressure: current.surface_pressure,
        }
    }
}
