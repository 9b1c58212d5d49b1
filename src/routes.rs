use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    database::{City, Database, DatabaseError, FieldValues},
    forecast::{types::CurrentConditions, ForecastSource},
    scheduler::refresh_city,
    utils::parse_field_list,
};

// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub database: Arc<Database>,
    pub forecast_source: Arc<dyn ForecastSource>,
}

// Request/Response types
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CoordinatesQuery {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AddCityQuery {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct WeatherQuery {
    pub city: String,
    /// Fragment of the forecast timestamp, e.g. `14:00` or `2024-01-01T14`
    pub time: String,
    /// Comma-separated subset of temperature, humidity, wind_speed, precipitation, pressure.
    /// Whitespace around each name is ignored, so `temperature, wind_speed` selects both.
    pub fields: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

/// Lookup failures are reported in the body with a 200 status.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum WeatherResponse {
    Values(FieldValues),
    Error(ErrorResponse),
}

impl WeatherResponse {
    fn error(message: &str) -> Self {
        WeatherResponse::Error(ErrorResponse {
            error: message.to_string(),
        })
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(root, health, current_weather, add_city, list_cities, weather_at_time),
    components(schemas(
        StatusResponse,
        HealthResponse,
        MessageResponse,
        ErrorResponse,
        CurrentConditions,
        City
    )),
    tags((name = "weather", description = "Registered cities and their stored hourly forecasts"))
)]
pub struct ApiDoc;

// Route handlers
#[utoipa::path(
    get,
    path = "/",
    tag = "weather",
    responses((status = 200, description = "Service is up", body = StatusResponse))
)]
pub async fn root() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "server is running".to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "weather",
    responses(
        (status = 200, description = "Store reachable", body = HealthResponse),
        (status = 503, description = "Store unreachable")
    )
)]
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, StatusCode> {
    if let Err(e) = state.database.health_check().await {
        tracing::error!("Health check failed: {}", e);
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

#[utoipa::path(
    get,
    path = "/current-weather",
    tag = "weather",
    params(CoordinatesQuery),
    responses(
        (status = 200, description = "Current conditions, null where upstream has no value", body = CurrentConditions),
        (status = 500, description = "Upstream request failed")
    )
)]
pub async fn current_weather(
    State(state): State<AppState>,
    Query(params): Query<CoordinatesQuery>,
) -> Result<Json<CurrentConditions>, StatusCode> {
    match state
        .forecast_source
        .fetch_current(params.latitude, params.longitude)
        .await
    {
        Ok(current) => Ok(Json(current)),
        Err(e) => {
            tracing::error!("Current weather request failed: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[utoipa::path(
    post,
    path = "/add-city",
    tag = "weather",
    params(AddCityQuery),
    responses(
        (status = 200, description = "City registered and forecast stored", body = MessageResponse),
        (status = 500, description = "Forecast fetch or save failed")
    )
)]
pub async fn add_city(
    State(state): State<AppState>,
    Query(params): Query<AddCityQuery>,
) -> Result<Json<MessageResponse>, StatusCode> {
    if let Err(e) = state
        .database
        .save_city(&params.name, params.latitude, params.longitude)
        .await
    {
        tracing::error!("Failed to save city {}: {}", params.name, e);
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    // The city stays registered even if this first fetch fails
    let city = City {
        name: params.name,
        latitude: params.latitude,
        longitude: params.longitude,
    };
    match refresh_city(&state.database, state.forecast_source.as_ref(), &city).await {
        Ok(points) => {
            tracing::info!(points, "City {} added", city.name);
            Ok(Json(MessageResponse {
                message: format!("City {} added and forecast saved", city.name),
            }))
        }
        Err(e) => {
            tracing::error!("Initial forecast for {} failed: {}", city.name, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[utoipa::path(
    get,
    path = "/cities",
    tag = "weather",
    responses(
        (status = 200, description = "Names of all registered cities", body = [String]),
        (status = 500, description = "Store query failed")
    )
)]
pub async fn list_cities(State(state): State<AppState>) -> Result<Json<Vec<String>>, StatusCode> {
    match state.database.list_city_names().await {
        Ok(names) => Ok(Json(names)),
        Err(e) => {
            tracing::error!("Failed to list cities: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[utoipa::path(
    get,
    path = "/weather",
    tag = "weather",
    params(WeatherQuery),
    responses(
        (status = 200, description = "Requested fields of the first matching hour, or an `error` object"),
        (status = 500, description = "Store query failed")
    )
)]
pub async fn weather_at_time(
    State(state): State<AppState>,
    Query(params): Query<WeatherQuery>,
) -> Result<Json<WeatherResponse>, StatusCode> {
    let fields = parse_field_list(&params.fields);

    match state
        .database
        .query_point(&params.city, &params.time, &fields)
        .await
    {
        Ok(values) => Ok(Json(WeatherResponse::Values(values))),
        Err(DatabaseError::InvalidFields) => Ok(Json(WeatherResponse::error("No valid fields selected"))),
        Err(DatabaseError::NotFound) => Ok(Json(WeatherResponse::error("No data found"))),
        Err(e) => {
            tracing::error!("Weather lookup for {} failed: {}", params.city, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

// Create the router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/current-weather", get(current_weather))
        .route("/add-city", post(add_city))
        .route("/cities", get(list_cities))
        .route("/weather", get(weather_at_time))
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .with_state(state)
}
