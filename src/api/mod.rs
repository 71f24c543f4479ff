//! HTTP API
//!
//! - `GET /api/v1/keyvisual/heatmaps`: render a heatmap
//! - `GET|PUT /api/v1/keyvisual/config`: read or replace the dynamic config
//! - `GET /health`: liveness plus service state

mod keyvisual;
mod telemetry;

pub use keyvisual::ApiError;

use crate::service::Service;

use axum::routing::get;
use axum::Router;
use std::sync::Arc;

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// HTTP port
    pub http_port: u16,
    /// Enable CORS
    pub enable_cors: bool,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            enable_cors: true,
        }
    }
}

/// Shared API state
#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<Service>,
}

/// Build the HTTP API router
pub fn build_http_router(service: Arc<Service>, config: &ApiServerConfig) -> Router {
    use axum::middleware;
    use tower_http::cors::{Any, CorsLayer};

    let router = Router::new()
        .route("/health", get(keyvisual::health_check))
        .route("/api/v1/keyvisual/heatmaps", get(keyvisual::heatmaps))
        .route(
            "/api/v1/keyvisual/config",
            get(keyvisual::get_config).put(keyvisual::set_config),
        )
        .with_state(ApiState { service })
        .layer(middleware::from_fn(telemetry::http_observability_middleware));

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        router.layer(cors)
    } else {
        router
    }
}
