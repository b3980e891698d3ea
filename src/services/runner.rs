use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::JobRequest;
use crate::models::pipeline::PipelineResult;
use crate::services::orchestrator::{FanOutOrchestrator, PipelineError};

/// Result of one execution attempt.
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    Succeeded(PipelineResult),
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-queue after `delay`; `retry_count` is the job's new count.
    Retry { delay: Duration, retry_count: u32 },
    GiveUp,
}

/// Executes single attempts and owns the timeout and backoff policy.
#[derive(Clone)]
pub struct JobRunner {
    orchestrator: Arc<FanOutOrchestrator>,
    job_timeout: Duration,
    retry_delay: Duration,
}

impl JobRunner {
    pub fn new(orchestrator: Arc<FanOutOrchestrator>, job_timeout: Duration, retry_delay: Duration) -> Self {
        Self {
            orchestrator,
            job_timeout,
            retry_delay,
        }
    }

    pub fn orchestrator(&self) -> &Arc<FanOutOrchestrator> {
        &self.orchestrator
    }

    /// Run one attempt against the job timeout. Never panics or propagates errors.
    pub async fn execute<F>(&self, job_id: Uuid, request: &JobRequest, progress: F) -> AttemptOutcome
    where
        F: Fn(u8) + Send + Sync,
    {
        let attempt = tokio::time::timeout(self.job_timeout, self.run_request(request, &progress)).await;

        match attempt {
            Ok(Ok(result)) if result.is_success() => AttemptOutcome::Succeeded(result),
            Ok(Ok(result)) => {
                let detail = if result.errors.is_empty() {
                    "no assets produced".to_string()
                } else {
                    result.errors.join("; ")
                };
                AttemptOutcome::Failed(format!("no platform publish succeeded: {detail}"))
            }
            Ok(Err(e)) => AttemptOutcome::Failed(e.to_string()),
            Err(_) => {
                tracing::warn!(job_id = %job_id, timeout_secs = self.job_timeout.as_secs(), "Job attempt timed out");
                AttemptOutcome::Failed(format!(
                    "job timed out after {}ms",
                    self.job_timeout.as_millis()
                ))
            }
        }
    }

    async fn run_request<F>(&self, request: &JobRequest, progress: &F) -> Result<PipelineResult, PipelineError>
    where
        F: Fn(u8) + Send + Sync,
    {
        match request {
            JobRequest::SingleGeneration(generation) => {
                self.orchestrator.run(generation, |p| progress(p)).await
            }
            JobRequest::BatchGeneration(batch) => {
                let total = batch.requests.len().max(1);
                let mut merged = PipelineResult::default();
                let mut last_error = None;
                let mut failures = 0;

                for (index, generation) in batch.requests.iter().enumerate() {
                    let scaled = move |p: u8| progress(((index * 100 + p as usize) / total) as u8);
                    match self.orchestrator.run(generation, scaled).await {
                        Ok(result) => merged.merge(result),
                        Err(e) => {
                            failures += 1;
                            merged.errors.push(format!("batch item {}: {}", index + 1, e));
                            last_error = Some(e);
                        }
                    }
                    progress((((index + 1) * 100) / total) as u8);
                }

                match last_error {
                    Some(e) if failures == batch.requests.len() => Err(e),
                    _ => Ok(merged),
                }
            }
        }
    }

    pub fn decide(&self, retry_count: u32, max_retries: u32) -> RetryDecision {
        decide_retry(self.retry_delay, retry_count, max_retries)
    }
}

/// `base * 2^retry_count`, where `retry_count` is the count before this retry.
pub fn backoff_delay(base: Duration, retry_count: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(retry_count))
}

pub fn decide_retry(base: Duration, retry_count: u32, max_retries: u32) -> RetryDecision {
    if retry_count < max_retries {
        RetryDecision::Retry {
            delay: backoff_delay(base, retry_count),
            retry_count: retry_count + 1,
        }
    } else {
        RetryDecision::GiveUp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_per_retry() {
        let base = Duration::from_millis(5000);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(5000));
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(10_000));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(40_000));
        assert!(backoff_delay(base, 64) >= backoff_delay(base, 31));
    }

    #[test]
    fn test_retry_budget() {
        let base = Duration::from_millis(100);
        assert_eq!(
            decide_retry(base, 0, 3),
            RetryDecision::Retry {
                delay: Duration::from_millis(100),
                retry_count: 1
            }
        );
        assert_eq!(
            decide_retry(base, 2, 3),
            RetryDecision::Retry {
                delay: Duration::from_millis(400),
                retry_count: 3
            }
        );
        assert_eq!(decide_retry(base, 3, 3), RetryDecision::GiveUp);
        assert_eq!(decide_retry(base, 0, 0), RetryDecision::GiveUp);
    }
}
