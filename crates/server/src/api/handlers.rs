use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use vidpress_core::{Config, MediaInfo, PoolStatus};

use super::jobs::{engine_error_response, ErrorResponse};
use crate::metrics::{collect_dynamic_metrics, encode_metrics};
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<Config> {
    Json(state.config().clone())
}

/// Request body for probing a media file
#[derive(Debug, Deserialize)]
pub struct ProbeBody {
    pub path: PathBuf,
}

/// Read metadata of a media file
pub async fn probe(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ProbeBody>,
) -> Result<Json<MediaInfo>, (StatusCode, Json<ErrorResponse>)> {
    state
        .engine()
        .probe(&body.path)
        .await
        .map(Json)
        .map_err(engine_error_response)
}

/// Worker pool status
pub async fn engine_status(State(state): State<Arc<AppState>>) -> Json<PoolStatus> {
    Json(state.engine().pool_status())
}

/// Prometheus scrape endpoint
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    collect_dynamic_metrics(&state);
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        encode_metrics(),
    )
}
