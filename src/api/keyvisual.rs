//! Key visual HTTP handlers

use crate::api::ApiState;
use crate::heatmap::{HeatmapParams, HeatmapQuery};
use crate::matrix::Matrix;
use crate::service::KeyVisualConfig;
use crate::Error;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{error, info};

/// Error response: `{"error": "..."}` with a status derived from the error kind.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::ServiceNotRunning => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            error!(error = %self.0, "Request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// `GET /api/v1/keyvisual/heatmaps`
pub async fn heatmaps(
    State(state): State<ApiState>,
    Query(params): Query<HeatmapParams>,
) -> Result<Json<Matrix>, ApiError> {
    let query = HeatmapQuery::from_params(&params, chrono::Utc::now().timestamp())?;
    info!(
        start_time = query.start_time,
        end_time = query.end_time,
        start_key = %hex::encode(&query.start_key),
        end_key = %hex::encode(&query.end_key),
        tag = %query.tag,
        "Request matrix"
    );

    let service = state.service.clone();
    let matrix = tokio::task::spawn_blocking(move || service.heatmap(&query))
        .await
        .map_err(|e| Error::Internal(format!("heatmap task failed: {}", e)))??;
    Ok(Json(matrix))
}

/// `GET /api/v1/keyvisual/config`
pub async fn get_config(State(state): State<ApiState>) -> Json<KeyVisualConfig> {
    Json(state.service.dynamic_config())
}

/// `PUT /api/v1/keyvisual/config`
pub async fn set_config(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<KeyVisualConfig>, ApiError> {
    let config: KeyVisualConfig = serde_json::from_slice(&body)
        .map_err(|e| Error::InvalidInput(format!("invalid key visual config: {}", e)))?;
    state.service.update_dynamic_config(config.clone());
    Ok(Json(config))
}

/// `GET /health`
pub async fn health_check(State(state): State<ApiState>) -> Response {
    let service = &state.service;
    let layers = service.stat().map(|stat| stat.layer_lens()).unwrap_or_default();
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": service.state(),
            "layers": layers,
        })),
    )
        .into_response()
}
