use serde::Serialize;
use uuid::Uuid;

/// Transition notifications broadcast by the engine.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    Submitted { job_id: Uuid },
    Started { job_id: Uuid, attempt: u32 },
    Progress { job_id: Uuid, progress: u8 },
    Completed { job_id: Uuid },
    Failed { job_id: Uuid, error: String },
    Retried { job_id: Uuid, retry_count: u32, delay_ms: u64 },
    Cancelled { job_id: Uuid },
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::Submitted { .. } => "job:submitted",
            EngineEvent::Started { .. } => "job:started",
            EngineEvent::Progress { .. } => "job:progress",
            EngineEvent::Completed { .. } => "job:completed",
            EngineEvent::Failed { .. } => "job:failed",
            EngineEvent::Retried { .. } => "job:retried",
            EngineEvent::Cancelled { .. } => "job:cancelled",
        }
    }

    pub fn job_id(&self) -> Uuid {
        match self {
            EngineEvent::Submitted { job_id }
            | EngineEvent::Started { job_id, .. }
            | EngineEvent::Progress { job_id, .. }
            | EngineEvent::Completed { job_id }
            | EngineEvent::Failed { job_id, .. }
            | EngineEvent::Retried { job_id, .. }
            | EngineEvent::Cancelled { job_id } => *job_id,
        }
    }
}
