pub mod health;
pub mod jobs;
pub mod metrics;
pub mod stats;

use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

/// Full HTTP surface. `/metrics` is mounted only when a Prometheus handle is given.
pub fn build_router(state: AppState, prometheus: Option<Arc<PrometheusHandle>>) -> Router {
    let mut app = Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/stats", get(stats::engine_stats))
        .route(
            "/api/v1/jobs",
            post(jobs::submit_job)
                .get(jobs::list_jobs)
                .delete(jobs::clear_old_jobs),
        )
        .route("/api/v1/jobs/{job_id}", get(jobs::get_job))
        .route("/api/v1/jobs/{job_id}/cancel", post(jobs::cancel_job))
        .route("/api/v1/jobs/{job_id}/retry", post(jobs::retry_job))
        .with_state(state);

    if let Some(handle) = prometheus {
        app = app.route(
            "/metrics",
            get(metrics::prometheus_metrics).with_state(handle),
        );
    }

    app.layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024))
}
