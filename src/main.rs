use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use weather_aggregator::config::Config;
use weather_aggregator::database::Database;
use weather_aggregator::forecast::open_meteo::OpenMeteoClient;
use weather_aggregator::forecast::ForecastSource;
use weather_aggregator::routes::{create_router, AppState};
use weather_aggregator::scheduler::RefreshScheduler;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weather_aggregator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    // Initialize database
    let database = Arc::new(Database::connect(&config.database_url).await?);
    database.init_tables().await?;
    tracing::info!("Database ready at {}", config.database_url);

    let forecast_source: Arc<dyn ForecastSource> = Arc::new(OpenMeteoClient::new(&config)?);

    // Background refresh runs until shutdown
    let shutdown = CancellationToken::new();
    let scheduler = RefreshScheduler::new(
        database.clone(),
        forecast_source.clone(),
        config.refresh_interval(),
    )
    .spawn(shutdown.clone());

    let state = AppState {
        database: database.clone(),
        forecast_source,
    };

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    tracing::info!("Server starting on http://{}", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    scheduler.await?;
    database.close().await;
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal(token: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown requested"),
        Err(e) => {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            token.cancelled().await;
        }
    }
    token.cancel();
}
