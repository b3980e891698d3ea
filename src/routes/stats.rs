use axum::extract::State;
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::services::engine::EngineMetrics;
use crate::services::orchestrator::OrchestratorStats;

#[derive(Serialize)]
pub struct StatsResponse {
    pub engine: EngineMetrics,
    pub orchestrator: OrchestratorStats,
    pub queued: Vec<Uuid>,
    pub running: Vec<Uuid>,
}

/// GET /api/v1/stats
pub async fn engine_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let engine = &state.engine;
    Json(StatsResponse {
        engine: engine.metrics(),
        orchestrator: engine.orchestrator_stats(),
        queued: engine.queued_job_ids(),
        running: engine.running_job_ids(),
    })
}
