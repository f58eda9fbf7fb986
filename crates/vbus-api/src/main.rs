//! VBUS dashboard API: read-only JSON endpoints over the measurement store

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vbus_storage::MeasurementStore;

#[derive(Parser)]
#[command(version, about = "Serves collected VBUS measurements over HTTP")]
struct Args {
    /// SQLite database path written by the collector
    #[arg(long, default_value = "data/vbus.db")]
    db: String,
    /// Listen address
    #[arg(long, default_value = "0.0.0.0:8080")]
    listen: String,
}

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    store: MeasurementStore,
}

/// API response wrapper
#[derive(Serialize)]
struct ApiResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ApiResponse {
    fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: Some(serde_json::to_value(data).unwrap_or(serde_json::Value::Null)),
            error: None,
        }
    }

    fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// All rows of the most recent snapshot
async fn latest(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.latest_snapshot().await {
        Ok(rows) => {
            let ts = rows.first().map(|r| r.ts.clone());
            (
                StatusCode::OK,
                Json(ApiResponse::success(serde_json::json!({
                    "ts": ts,
                    "measurements": rows,
                }))),
            )
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

#[derive(Deserialize)]
struct MeasurementQuery {
    device: Option<String>,
    limit: Option<i64>,
}

/// Recent measurements, newest first
async fn measurements(
    State(state): State<AppState>,
    Query(query): Query<MeasurementQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    match state
        .store
        .recent_measurements(query.device.as_deref(), limit)
        .await
    {
        Ok(rows) => (StatusCode::OK, Json(ApiResponse::success(rows))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

/// Device names seen so far
async fn devices(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.devices().await {
        Ok(names) => (StatusCode::OK, Json(ApiResponse::success(names))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(e.to_string())),
        ),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vbus_api=debug,vbus_storage=debug,info".into()),
        )
        .init();

    let args = Args::parse();

    tracing::info!("starting VBUS API server");
    let store = MeasurementStore::open(&args.db).await?;
    let state = AppState { store };

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/v1/latest", get(latest))
        .route("/api/v1/measurements", get(measurements))
        .route("/api/v1/devices", get(devices))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    tracing::info!("listening on {}", args.listen);
    axum::serve(listener, app).await?;

    Ok(())
}
