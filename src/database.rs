use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use utoipa::ToSchema;

use crate::forecast::types::HourlySeries;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),
    #[error("No data found")]
    NotFound,
    #[error("No valid fields selected")]
    InvalidFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct City {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ForecastPoint {
    pub city: String,
    pub time: String,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub wind_speed: Option<f64>,
    pub precipitation: Option<f64>,
    pub pressure: Option<f64>,
}

/// Metrics a caller may project out of a stored forecast point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastField {
    Temperature,
    Humidity,
    WindSpeed,
    Precipitation,
    Pressure,
}

impl ForecastField {
    pub const ALL: [ForecastField; 5] = [
        ForecastField::Temperature,
        ForecastField::Humidity,
        ForecastField::WindSpeed,
        ForecastField::Precipitation,
        ForecastField::Pressure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ForecastField::Temperature => "temperature",
            ForecastField::Humidity => "humidity",
            ForecastField::WindSpeed => "wind_speed",
            ForecastField::Precipitation => "precipitation",
            ForecastField::Pressure => "pressure",
        }
    }

    pub fn value(&self, point: &ForecastPoint) -> Option<f64> {
        match self {
            ForecastField::Temperature => point.temperature,
            ForecastField::Humidity => point.humidity,
            ForecastField::WindSpeed => point.wind_speed,
            ForecastField::Precipitation => point.precipitation,
            ForecastField::Pressure => point.pressure,
        }
    }

    /// Keeps the known names, drops everything else and collapses repeats.
    pub fn select<S: AsRef<str>>(names: &[S]) -> Vec<ForecastField> {
        let mut selected = Vec::new();
        for field in names.iter().filter_map(|name| name.as_ref().parse::<ForecastField>().ok()) {
            if !selected.contains(&field) {
                selected.push(field);
            }
        }
        selected
    }
}

impl FromStr for ForecastField {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ForecastField::ALL
            .into_iter()
            .find(|field| field.as_str() == s)
            .ok_or(())
    }
}

/// Projection of one forecast point onto the requested fields.
pub type FieldValues = BTreeMap<ForecastField, Option<f64>>;

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (creating if needed) the SQLite file behind `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self, DatabaseError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;

        Ok(Self::new(pool))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn init_tables(&self) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cities (
                name TEXT PRIMARY KEY,
                latitude REAL,
                longitude REAL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // No foreign key to cities: orphaned points are tolerated
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS forecasts (
                city TEXT,
                time TEXT,
                temperature REAL,
                humidity REAL,
                wind_speed REAL,
                precipitation REAL,
                pressure REAL,
                PRIMARY KEY (city, time)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // Cities

    pub async fn save_city(&self, name: &str, latitude: f64, longitude: f64) -> Result<(), DatabaseError> {
        sqlx::query("INSERT OR REPLACE INTO cities (name, latitude, longitude) VALUES ($1, $2, $3)")
            .bind(name)
            .bind(latitude)
            .bind(longitude)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn list_cities(&self) -> Result<Vec<City>, DatabaseError> {
        let cities = sqlx::query_as::<_, City>(
            "SELECT name, latitude, longitude FROM cities ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(cities)
    }

    pub async fn list_city_names(&self) -> Result<Vec<String>, DatabaseError> {
        let names = sqlx::query_scalar::<_, String>("SELECT name FROM cities ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        Ok(names)
    }

    // Forecasts

    /// Upserts every hour of `series` for `city` in a single transaction and
    /// returns the number of points written.
    pub async fn save_forecast(&self, city: &str, series: &HourlySeries) -> Result<usize, DatabaseError> {
        let points = series.points(city);
        let mut tx = self.pool.begin().await?;

        for point in &points {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO forecasts (
                    city, time, temperature, humidity, wind_speed, precipitation, pressure
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(&point.city)
            .bind(&point.time)
            .bind(point.temperature)
            .bind(point.humidity)
            .bind(point.wind_speed)
            .bind(point.precipitation)
            .bind(point.pressure)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(points.len())
    }

    /// Finds the earliest point of `city` whose timestamp contains
    /// `time_fragment` and projects it onto the known names in `fields`.
    pub async fn query_point<S: AsRef<str>>(
        &self,
        city: &str,
        time_fragment: &str,
        fields: &[S],
    ) -> Result<FieldValues, DatabaseError> {
        let selected = ForecastField::select(fields);
        if selected.is_empty() {
            return Err(DatabaseError::InvalidFields);
        }

        // instr() rather than LIKE so '%' and '_' in the fragment stay literal
        let point = sqlx::query_as::<_, ForecastPoint>(
            r#"
            SELECT city, time, temperature, humidity, wind_speed, precipitation, pressure
            FROM forecasts
            WHERE city = $1 AND instr(time, $2) > 0
            ORDER BY time
            LIMIT 1
            "#,
        )
        .bind(city)
        .bind(time_fragment)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DatabaseError::NotFound)?;

        Ok(selected
            .into_iter()
            .map(|field| (field, field.value(&point)))
            .collect())
    }

    pub async fn count_forecasts(&self, city: &str) -> Result<i64, DatabaseError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM forecasts WHERE city = $1")
            .bind(city)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    pub async fn health_check(&self) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }
}
