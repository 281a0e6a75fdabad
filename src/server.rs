//! ==============================================================================
//! server.rs - JSON HTTP surface
//! ==============================================================================
//!
//! purpose:
//!     exposes the Telemetry facade over HTTP for a dashboard or scripts.
//!     every route is JSON; the live view is also pushed as server-sent
//!     events so a browser does not have to poll /api/latest.
//!
//! routes:
//!     GET  /api/latest          current LatestState
//!     GET  /api/history         ?hours=24&max_points=0
//!     GET  /api/stats           24h aggregates
//!     GET  /api/system          host cpu / memory / temperature
//!     GET  /api/alerts/config   alert config, token masked
//!     POST /api/alerts/config   partial update
//!     POST /api/alerts/test     send a test message
//!     GET  /api/stream          SSE, event `sensor_update`
//!
//! errors come back as {"error": "..."} with 400 for a rejected config, 502
//! when the notification channel failed and 500 for storage trouble.
//!
//! ==============================================================================

use std::convert::Infallible;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt as _};
use tower_http::cors::CorsLayer;

use crate::alerts::{AlertConfig, AlertConfigPatch};
use crate::domain::{LatestState, StoredReading};
use crate::error::{ConfigError, NotifyError, StorageError};
use crate::query::Telemetry;
use crate::store::WindowStats;
use crate::system::SystemReport;

const SENSOR_EVENT: &str = "sensor_update";

#[derive(Clone)]
struct ApiState {
    telemetry: Telemetry,
    updates: broadcast::Sender<LatestState>,
}

pub fn router(telemetry: Telemetry, updates: broadcast::Sender<LatestState>) -> Router {
    Router::new()
        .route("/api/latest", get(latest))
        .route("/api/history", get(history))
        .route("/api/stats", get(stats))
        .route("/api/system", get(system))
        .route("/api/alerts/config", get(alert_config).post(update_alert_config))
        .route("/api/alerts/test", post(test_alert))
        .route("/api/stream", get(stream))
        .layer(CorsLayer::permissive())
        .with_state(ApiState { telemetry, updates })
}

pub async fn serve(bind: &str, app: Router) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(%bind, "http server listening");
    axum::serve(listener, app).await
}

// ==============================================================================
// errors
// ==============================================================================

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Notify(#[from] NotifyError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Config(ConfigError::Storage(_)) | ApiError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Config(_) => StatusCode::BAD_REQUEST,
            ApiError::Notify(_) => StatusCode::BAD_GATEWAY,
        };
        if status.is_server_error() {
            tracing::warn!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

// ==============================================================================
// handlers
// ==============================================================================

async fn latest(State(state): State<ApiState>) -> Json<LatestState> {
    Json(state.telemetry.latest().await)
}

#[derive(Deserialize)]
struct HistoryParams {
    #[serde(default = "default_hours")]
    hours: u32,
    #[serde(default)]
    max_points: Option<usize>,
}

fn default_hours() -> u32 {
    24
}

async fn history(
    State(state): State<ApiState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<StoredReading>>, ApiError> {
    let rows = state.telemetry.history(params.hours, params.max_points).await?;
    Ok(Json(rows))
}

async fn stats(State(state): State<ApiState>) -> Result<Json<WindowStats>, ApiError> {
    Ok(Json(state.telemetry.stats_24h().await?))
}

async fn system(State(state): State<ApiState>) -> Json<SystemReport> {
    Json(state.telemetry.system_metrics().await)
}

async fn alert_config(State(state): State<ApiState>) -> Json<AlertConfig> {
    Json(state.telemetry.alert_config().await)
}

/// takes a raw value so unknown keys surface as a 400 with our own message
async fn update_alert_config(
    State(state): State<ApiState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<AlertConfig>, ApiError> {
    let patch = AlertConfigPatch::from_json(body)?;
    Ok(Json(state.telemetry.set_alert_config(patch).await?))
}

async fn test_alert(State(state): State<ApiState>) -> Result<Json<serde_json::Value>, ApiError> {
    let detail = state.telemetry.send_test_notification().await?;
    Ok(Json(json!({ "status": "sent", "detail": detail })))
}

/// current snapshot first, then every update; lagging clients skip ahead
async fn stream(State(state): State<ApiState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let updates = BroadcastStream::new(state.updates.subscribe()).filter_map(|update| update.ok());
    let current = tokio_stream::once(state.telemetry.latest().await);
    let events = current.chain(updates).map(|snapshot| Ok(sensor_event(&snapshot)));
    Sse::new(events).keep_alive(KeepAlive::default())
}

fn sensor_event(snapshot: &LatestState) -> Event {
    Event::default()
        .event(SENSOR_EVENT)
        .json_data(snapshot)
        .unwrap_or_else(|_| Event::default().event(SENSOR_EVENT).data("{}"))
}
