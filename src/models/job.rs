use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::pipeline::{GenerationRequest, PipelineResult};

/// Status of a job in the engine's state machine.
///
/// `pending -> running -> {completed | pending (retry) | failed}` and
/// `pending -> cancelled`. The last three are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobType {
    SingleGeneration,
    BatchGeneration,
}

/// Queue priority, fixed at submission.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobPriority {
    Urgent,
    High,
    #[default]
    Normal,
    Low,
}

impl JobPriority {
    /// Sort rank; lower starts first.
    pub fn rank(self) -> u8 {
        match self {
            JobPriority::Urgent => 0,
            JobPriority::High => 1,
            JobPriority::Normal => 2,
            JobPriority::Low => 3,
        }
    }
}

/// Work carried by a job, keyed by job type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobRequest {
    SingleGeneration(GenerationRequest),
    BatchGeneration(BatchRequest),
}

/// Sub-requests of a batch job, executed in order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct BatchRequest {
    #[garde(length(min = 1, max = 100), dive)]
    pub requests: Vec<GenerationRequest>,
}

impl JobRequest {
    pub fn job_type(&self) -> JobType {
        match self {
            JobRequest::SingleGeneration(_) => JobType::SingleGeneration,
            JobRequest::BatchGeneration(_) => JobType::BatchGeneration,
        }
    }

    /// Validate the embedded generation request(s).
    pub fn validate(&self) -> Result<(), garde::Report> {
        match self {
            JobRequest::SingleGeneration(request) => request.validate(),
            JobRequest::BatchGeneration(batch) => batch.validate(),
        }
    }
}

/// Options accepted by `Engine::submit`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SubmitOptions {
    #[serde(default)]
    pub priority: JobPriority,
    /// Falls back to the engine's configured default when absent.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

/// A queued unit of generate-then-publish work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: Uuid,
    /// Monotonic submission ordinal; breaks ties within a priority band.
    pub sequence: u64,
    pub job_type: JobType,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub request: JobRequest,
    pub result: Option<PipelineResult>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// When a pending job waiting out its backoff becomes eligible again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_at: Option<DateTime<Utc>>,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(sequence: u64, request: JobRequest, priority: JobPriority, max_retries: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence,
            job_type: request.job_type(),
            priority,
            status: JobStatus::Pending,
            request,
            result: None,
            error: None,
            retry_count: 0,
            max_retries,
            retry_at: None,
            progress: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Backoff left before the job may start again, zero when it is due.
    pub fn remaining_backoff(&self, now: DateTime<Utc>) -> std::time::Duration {
        self.retry_at
            .and_then(|at| (at - now).to_std().ok())
            .unwrap_or_default()
    }

    /// Wall-clock run time of the last attempt, if it finished.
    pub fn run_time_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0)),
            _ => None,
        }
    }

    /// Timestamp used for retention: completion time, or creation time if never finished.
    pub fn settled_at(&self) -> DateTime<Utc> {
        self.completed_at.unwrap_or(self.created_at)
    }
}
