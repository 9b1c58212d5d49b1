//! Periodic forecast refresh.
//!
//! Each cycle snapshots the registered cities, refreshes every one of them
//! concurrently and waits for all of them before sleeping. The sleep starts
//! when the fan-out finishes, so a slow cycle pushes the next one back.

use crate::database::{City, Database, DatabaseError};
use crate::forecast::{ForecastError, ForecastSource};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{self, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Listing,
    FetchingAll,
    Sleeping,
    Stopped,
}

#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("Forecast fetch failed: {0}")]
    Upstream(#[from] ForecastError),
    #[error("Forecast save failed: {0}")]
    Database(#[from] DatabaseError),
    #[error("Refresh task failed: {0}")]
    TaskFailed(String),
}

/// Outcome of one fan-out over the city list.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// City name and number of points written.
    pub refreshed: Vec<(String, usize)>,
    pub failed: Vec<(String, RefreshError)>,
}

/// Fetch the hourly forecast for one city and upsert it.
pub async fn refresh_city(
    database: &Database,
    source: &dyn ForecastSource,
    city: &City,
) -> Result<usize, RefreshError> {
    let series = source.fetch_hourly(city.latitude, city.longitude).await?;
    let saved = database.save_forecast(&city.name, &series).await?;
    Ok(saved)
}

pub struct RefreshScheduler {
    database: Arc<Database>,
    source: Arc<dyn ForecastSource>,
    interval: Duration,
    state: watch::Sender<SchedulerState>,
}

impl RefreshScheduler {
    pub fn new(database: Arc<Database>, source: Arc<dyn ForecastSource>, interval: Duration) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            database,
            source,
            interval,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(token).await })
    }

    /// Runs cycles until `token` is cancelled. Failures never end the loop.
    pub async fn run(&self, token: CancellationToken) {
        tracing::info!(
            "Refresh scheduler started, interval {} seconds",
            self.interval.as_secs()
        );

        loop {
            let cycle = tokio::select! {
                _ = token.cancelled() => break,
                cycle = self.refresh_all() => cycle,
            };

            match cycle {
                Ok(report) => tracing::info!(
                    refreshed = report.refreshed.len(),
                    failed = report.failed.len(),
                    "Forecast refresh finished, next run in {} seconds",
                    self.interval.as_secs()
                ),
                Err(e) => tracing::error!("Could not list cities for refresh: {}", e),
            }

            self.set_state(SchedulerState::Sleeping);
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
            self.set_state(SchedulerState::Idle);
        }

        self.set_state(SchedulerState::Stopped);
        tracing::info!("Refresh scheduler stopped");
    }

    /// One cycle: snapshot the cities and refresh them all concurrently.
    /// Only a failure to list the cities is returned as an error; per-city
    /// failures are collected in the report.
    pub async fn refresh_all(&self) -> Result<CycleReport, DatabaseError> {
        self.set_state(SchedulerState::Listing);
        tracing::info!("{}: Updating forecasts for all cities...", chrono::Utc::now());
        let cities = self.database.list_cities().await?;

        self.set_state(SchedulerState::FetchingAll);
        tracing::debug!(cities = cities.len(), "Refreshing forecasts");

        let mut set = JoinSet::new();
        let mut names: HashMap<task::Id, String> = HashMap::with_capacity(cities.len());
        for city in cities {
            let database = Arc::clone(&self.database);
            let source = Arc::clone(&self.source);
            let name = city.name.clone();
            let handle = set.spawn(async move {
                let result = refresh_city(&database, source.as_ref(), &city).await;
                (city.name, result)
            });
            names.insert(handle.id(), name);
        }

        let mut report = CycleReport::default();
        while let Some(joined) = set.join_next_with_id().await {
            match joined {
                Ok((_, (name, Ok(points)))) => {
                    tracing::info!(points, "Forecast for {} updated", name);
                    report.refreshed.push((name, points));
                }
                Ok((_, (name, Err(e)))) => {
                    tracing::error!("Forecast refresh for {} failed: {}", name, e);
                    report.failed.push((name, e));
                }
                Err(e) => {
                    let name = names.remove(&e.id()).unwrap_or_default();
                    tracing::error!("Forecast refresh task for {} failed: {}", name, e);
                    report.failed.push((name, RefreshError::TaskFailed(e.to_string())));
                }
            }
        }

        Ok(report)
    }

    fn set_state(&self, state: SchedulerState) {
        tracing::debug!(?state, "Scheduler state changed");
        self.state.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::mock::{HourlyCall, MockForecastSource};
    use tempfile::TempDir;

    const BERLIN: (f64, f64) = (52.52, 13.41);
    const PARIS: (f64, f64) = (48.85, 2.35);
    const ROME: (f64, f64) = (41.9, 12.5);

    async fn seeded_db(dir: &TempDir) -> Arc<Database> {
        let url = format!("sqlite:{}", dir.path().join("weather.db").display());
        let database = Database::connect(&url).await.unwrap();
        database.init_tables().await.unwrap();
        database.save_city("Berlin", BERLIN.0, BERLIN.1).await.unwrap();
        database.save_city("Paris", PARIS.0, PARIS.1).await.unwrap();
        database.save_city("Rome", ROME.0, ROME.1).await.unwrap();
        Arc::new(database)
    }

    async fn wait_for_calls(source: &MockForecastSource, count: usize) -> Vec<HourlyCall> {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let calls = source.hourly_calls();
                if calls.len() >= count {
                    return calls;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_one_failing_city_does_not_stop_the_others() {
        let dir = TempDir::new().unwrap();
        let database = seeded_db(&dir).await;
        let source = Arc::new(MockForecastSource::new().failing_at(PARIS.0, PARIS.1));
        let scheduler = RefreshScheduler::new(database.clone(), source, Duration::from_secs(900));

        let report = scheduler.refresh_all().await.unwrap();

        let mut refreshed: Vec<_> = report.refreshed.iter().map(|(name, _)| name.as_str()).collect();
        refreshed.sort();
        assert_eq!(refreshed, vec!["Berlin", "Rome"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "Paris");
        assert!(matches!(report.failed[0].1, RefreshError::Upstream(_)));

        assert_eq!(database.count_forecasts("Berlin").await.unwrap(), 24);
        assert_eq!(database.count_forecasts("Rome").await.unwrap(), 24);
        assert_eq!(database.count_forecasts("Paris").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_panicked_refresh_is_reported_under_its_city() {
        let dir = TempDir::new().unwrap();
        let database = seeded_db(&dir).await;
        let source = Arc::new(MockForecastSource::new().panicking_at(ROME.0, ROME.1));
        let scheduler = RefreshScheduler::new(database, source, Duration::from_secs(900));

        let report = scheduler.refresh_all().await.unwrap();

        assert_eq!(report.refreshed.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "Rome");
        assert!(matches!(report.failed[0].1, RefreshError::TaskFailed(_)));
    }

    #[tokio::test]
    async fn test_empty_city_list_is_a_quiet_cycle() {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite:{}", dir.path().join("empty.db").display());
        let database = Database::connect(&url).await.unwrap();
        database.init_tables().await.unwrap();
        let source = Arc::new(MockForecastSource::new());
        let scheduler =
            RefreshScheduler::new(Arc::new(database), source.clone(), Duration::from_secs(900));

        let report = scheduler.refresh_all().await.unwrap();

        assert!(report.refreshed.is_empty());
        assert!(report.failed.is_empty());
        assert!(source.hourly_calls().is_empty());
    }

    #[tokio::test]
    async fn test_loop_sleeps_full_interval_after_failed_cycle() {
        let dir = TempDir::new().unwrap();
        let database = seeded_db(&dir).await;
        let source = Arc::new(MockForecastSource::new().failing_at(ROME.0, ROME.1));
        let interval = Duration::from_millis(300);
        let scheduler = RefreshScheduler::new(database.clone(), source.clone(), interval);
        let token = CancellationToken::new();
        let handle = scheduler.spawn(token.clone());

        let mut calls = wait_for_calls(&source, 6).await;
        token.cancel();
        handle.await.unwrap();

        calls.sort_by_key(|call| call.at);
        let first_cycle_end = calls[2].at;
        let second_cycle_start = calls[3].at;
        assert!(second_cycle_start.duration_since(first_cycle_end) >= interval);
        assert_eq!(database.count_forecasts("Berlin").await.unwrap(), 24);
        assert_eq!(database.count_forecasts("Paris").await.unwrap(), 24);
    }

    #[tokio::test]
    async fn test_sleep_starts_after_slowest_city() {
        let dir = TempDir::new().unwrap();
        let database = seeded_db(&dir).await;
        let slow = Duration::from_millis(200);
        let interval = Duration::from_millis(300);
        let source = Arc::new(MockForecastSource::new().delayed_at(BERLIN.0, BERLIN.1, slow));
        let scheduler = RefreshScheduler::new(database, source.clone(), interval);
        let token = CancellationToken::new();
        let handle = scheduler.spawn(token.clone());

        let mut calls = wait_for_calls(&source, 4).await;
        token.cancel();
        handle.await.unwrap();

        calls.sort_by_key(|call| call.at);
        let first_cycle_start = calls[0].at;
        let second_cycle_start = calls[3].at;
        assert!(second_cycle_start.duration_since(first_cycle_start) >= slow + interval);
    }

    #[tokio::test]
    async fn test_cancel_stops_a_sleeping_scheduler() {
        let dir = TempDir::new().unwrap();
        let database = seeded_db(&dir).await;
        let source = Arc::new(MockForecastSource::new());
        let scheduler = RefreshScheduler::new(database, source.clone(), Duration::from_secs(900));
        let mut state = scheduler.subscribe();
        let token = CancellationToken::new();
        let handle = scheduler.spawn(token.clone());

        state
            .wait_for(|s| *s == SchedulerState::Sleeping)
            .await
            .unwrap();
        token.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*state.borrow(), SchedulerState::Stopped);
        assert_eq!(source.hourly_calls().len(), 3);
    }
}
