//! Health endpoint.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;

/// Default health route.
pub const DEFAULT_HEALTH_PATH: &str = "/health";

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub hostname: String,
    pub status: &'static str,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
}

/// Hostname lookup failure; surfaces as a plain 500.
#[derive(Debug, thiserror::Error)]
#[error("hostname lookup failed: {0}")]
pub struct HealthError(#[from] std::io::Error);

impl IntoResponse for HealthError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "health check failed");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }
}

pub async fn get_health() -> Result<Json<HealthStatus>, HealthError> {
    let hostname = hostname::get()?.to_string_lossy().into_owned();
    Ok(Json(HealthStatus {
        hostname,
        status: "success",
        timestamp: Utc::now().timestamp_micros() as f64 / 1_000_000.0,
    }))
}
