use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;
use crate::services::engine::{HealthReport, HealthStatus};

#[derive(Serialize)]
pub struct HealthResponse {
    pub version: &'static str,
    #[serde(flatten)]
    pub report: HealthReport,
}

/// GET /health: engine health. 503 only when `unhealthy`; `degraded` still serves.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let report = state.engine.health();
    let status_code = match report.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };

    (
        status_code,
        Json(HealthResponse {
            version: env!("CARGO_PKG_VERSION"),
            report,
        }),
    )
}
