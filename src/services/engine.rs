//! Job engine: submission, scheduling under a concurrency cap, retry with
//! backoff, persistence, metrics and health.
//!
//! Every queue/table mutation and the running-count check that decides whether
//! to start another job happen under a single lock.
//!
//! Scheduling is strictly by priority band, FIFO within a band. Nothing ages
//! lower bands, so sustained `urgent` traffic can starve `low` jobs.
//!
//! Execution is at-least-once across restarts: a job persisted while running
//! is re-queued on load and runs again from the start, which can repeat its
//! side effects (for example a second product on a storefront).

use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use strum::Display;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::db::snapshot::{self, EngineSnapshot, SnapshotError};
use crate::db::table::JobTable;
use crate::models::event::EngineEvent;
use crate::models::job::{Job, JobRequest, JobStatus, SubmitOptions};
use crate::services::circuit_breaker::BreakerState;
use crate::services::orchestrator::{FanOutOrchestrator, OrchestratorStats};
use crate::services::queue::PriorityQueue;
use crate::services::runner::{AttemptOutcome, JobRunner, RetryDecision};

/// Window of finished jobs considered by `health`.
const HEALTH_WINDOW: usize = 10;
const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_concurrent_jobs: usize,
    pub job_timeout: Duration,
    /// Base delay of the exponential retry backoff.
    pub retry_delay: Duration,
    pub default_max_retries: u32,
    /// Snapshot file; persistence is disabled when `None`.
    pub persistence_path: Option<PathBuf>,
    pub persist_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 3,
            job_timeout: Duration::from_secs(600),
            retry_delay: Duration::from_secs(5),
            default_max_retries: 3,
            persistence_path: None,
            persist_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub image_backend: BreakerState,
    pub recent_jobs: usize,
    pub recent_failures: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineMetrics {
    pub total_submitted: u64,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// `completed / (completed + failed)`, 0 when nothing has finished.
    pub success_rate: f64,
    pub mean_run_time_ms: f64,
    pub uptime_secs: u64,
    pub paused: bool,
}

struct EngineState {
    table: JobTable,
    queue: PriorityQueue,
    running: HashSet<Uuid>,
    next_sequence: u64,
    total_submitted: u64,
    paused: bool,
}

struct EngineInner {
    config: EngineConfig,
    state: Mutex<EngineState>,
    runner: JobRunner,
    events: broadcast::Sender<EngineEvent>,
    started: std::time::Instant,
    shutdown: watch::Sender<bool>,
    background: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the job engine. Cheap to clone; all clones share one engine.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

enum Transition {
    Completed { run_ms: Option<i64> },
    Retry { retry_count: u32, delay: Duration },
    Failed { error: String },
}

impl Engine {
    /// Build an engine, restoring the persisted snapshot when one exists.
    ///
    /// The engine starts paused: jobs can be submitted but nothing runs until
    /// [`Engine::start`].
    pub async fn new(config: EngineConfig, orchestrator: Arc<FanOutOrchestrator>) -> Result<Self, EngineError> {
        let restored = match &config.persistence_path {
            Some(path) => snapshot::load(path).await?,
            None => None,
        };

        let (table, total_submitted) = match restored {
            Some(snapshot) => {
                tracing::info!(jobs = snapshot.jobs.len(), saved_at = %snapshot.saved_at, "Restoring engine snapshot");
                (JobTable::restore(snapshot.jobs), snapshot.total_submitted)
            }
            None => (JobTable::new(), 0),
        };

        let mut queue = PriorityQueue::new();
        let (now, wall_now) = (Instant::now(), Utc::now());
        for job in table.iter().filter(|job| job.status == JobStatus::Pending) {
            queue.push_at(job.id, job.priority, job.sequence, now + job.remaining_backoff(wall_now));
        }
        let next_sequence = table.max_sequence().map_or(0, |max| max + 1);

        let runner = JobRunner::new(orchestrator, config.job_timeout, config.retry_delay);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                state: Mutex::new(EngineState {
                    table,
                    queue,
                    running: HashSet::new(),
                    next_sequence,
                    total_submitted,
                    paused: true,
                }),
                runner,
                events,
                started: std::time::Instant::now(),
                shutdown,
                background: Mutex::new(None),
            }),
        })
    }

    /// Begin scheduling and spawn the periodic persist/metrics loop.
    pub fn start(&self) {
        let mut background = self
            .inner
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if background.is_none() {
            *background = Some(spawn_background(Arc::downgrade(&self.inner)));
        }
        drop(background);

        tracing::info!(
            max_concurrent_jobs = self.inner.config.max_concurrent_jobs,
            "Job engine started"
        );
        let waits: Vec<Duration> = {
            let state = self.lock();
            let now = Utc::now();
            state
                .table
                .iter()
                .filter(|job| job.status == JobStatus::Pending)
                .map(|job| job.remaining_backoff(now))
                .filter(|wait| !wait.is_zero())
                .collect()
        };
        for wait in waits {
            self.wake_after(wait);
        }
        self.resume();
    }

    /// Stop scheduling, stop the background loop and write a final snapshot.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.pause();
        let _ = self.inner.shutdown.send(true);
        let handle = self
            .inner
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.persist().await?;
        tracing::info!("Job engine stopped");
        Ok(())
    }

    /// Stop starting new jobs; running attempts finish normally.
    pub fn pause(&self) {
        self.lock().paused = true;
    }

    pub fn resume(&self) {
        self.lock().paused = false;
        self.pump();
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    pub fn orchestrator(&self) -> &Arc<FanOutOrchestrator> {
        self.inner.runner.orchestrator()
    }

    pub fn orchestrator_stats(&self) -> OrchestratorStats {
        self.orchestrator().stats()
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: EngineEvent) {
        tracing::debug!(event = event.name(), job_id = %event.job_id(), "Engine event");
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    /// Queue a job. Always succeeds; must be called inside a Tokio runtime.
    pub fn submit(&self, request: JobRequest, options: SubmitOptions) -> Uuid {
        let max_retries = options
            .max_retries
            .unwrap_or(self.inner.config.default_max_retries);

        let job_id = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let job = Job::new(state.next_sequence, request, options.priority, max_retries);
            state.next_sequence += 1;
            state.total_submitted += 1;
            state.queue.push(&job);
            let job_id = job.id;
            tracing::info!(
                job_id = %job_id,
                job_type = %job.job_type,
                priority = %job.priority,
                max_retries,
                "Job submitted"
            );
            state.table.insert(job);
            job_id
        };

        metrics::counter!("jobs_submitted_total").increment(1);
        self.emit(EngineEvent::Submitted { job_id });
        self.pump();
        job_id
    }

    /// Cancel a job that has not started yet. Running jobs cannot be cancelled.
    pub fn cancel(&self, job_id: Uuid) -> bool {
        let cancelled = {
            let mut guard = self.lock();
            let state = &mut *guard;
            match state.table.get_mut(job_id) {
                Some(job) if job.status == JobStatus::Pending => {
                    state.queue.remove(job_id);
                    job.status = JobStatus::Cancelled;
                    job.completed_at = Some(Utc::now());
                    true
                }
                _ => false,
            }
        };

        if cancelled {
            tracing::info!(job_id = %job_id, "Job cancelled");
            self.emit(EngineEvent::Cancelled { job_id });
        }
        cancelled
    }

    /// Re-queue a permanently failed job with a fresh retry budget and its original priority.
    pub fn retry(&self, job_id: Uuid) -> bool {
        let requeued = {
            let mut guard = self.lock();
            let state = &mut *guard;
            match state.table.get_mut(job_id) {
                Some(job) if job.status == JobStatus::Failed => {
                    job.status = JobStatus::Pending;
                    job.retry_count = 0;
                    job.retry_at = None;
                    job.progress = 0;
                    job.error = None;
                    job.result = None;
                    job.started_at = None;
                    job.completed_at = None;
                    state.queue.push(job);
                    true
                }
                _ => false,
            }
        };

        if requeued {
            tracing::info!(job_id = %job_id, "Failed job re-queued manually");
            self.emit(EngineEvent::Retried {
                job_id,
                retry_count: 0,
                delay_ms: 0,
            });
            self.pump();
        }
        requeued
    }

    pub fn get_job(&self, job_id: Uuid) -> Option<Job> {
        self.lock().table.get(job_id).cloned()
    }

    pub fn list_jobs(&self) -> Vec<Job> {
        self.lock().table.list()
    }

    pub fn list_jobs_by_status(&self, status: JobStatus) -> Vec<Job> {
        self.lock().table.list_by_status(status)
    }

    /// Pending job ids in start order.
    pub fn queued_job_ids(&self) -> Vec<Uuid> {
        self.lock().queue.ids()
    }

    pub fn running_job_ids(&self) -> Vec<Uuid> {
        self.lock().running.iter().copied().collect()
    }

    pub fn metrics(&self) -> EngineMetrics {
        let state = self.lock();
        let completed = state.table.count_by_status(JobStatus::Completed);
        let failed = state.table.count_by_status(JobStatus::Failed);

        let run_times: Vec<i64> = state
            .table
            .iter()
            .filter(|job| job.status == JobStatus::Completed)
            .filter_map(Job::run_time_ms)
            .collect();
        let mean_run_time_ms = if run_times.is_empty() {
            0.0
        } else {
            run_times.iter().sum::<i64>() as f64 / run_times.len() as f64
        };

        EngineMetrics {
            total_submitted: state.total_submitted,
            pending: state.table.count_by_status(JobStatus::Pending),
            running: state.table.count_by_status(JobStatus::Running),
            completed,
            failed,
            cancelled: state.table.count_by_status(JobStatus::Cancelled),
            success_rate: if completed + failed == 0 {
                0.0
            } else {
                completed as f64 / (completed + failed) as f64
            },
            mean_run_time_ms,
            uptime_secs: self.inner.started.elapsed().as_secs(),
            paused: state.paused,
        }
    }

    /// `unhealthy` when most recent finished jobs failed, `degraded` while the
    /// image backend's breaker is open, `healthy` otherwise.
    pub fn health(&self) -> HealthReport {
        let recent = self.lock().table.recent_outcomes(HEALTH_WINDOW);
        let recent_failures = recent.iter().filter(|ok| !**ok).count();
        let image_backend = self.orchestrator().image_breaker().state();

        let status = if recent_failures * 2 > recent.len() {
            HealthStatus::Unhealthy
        } else if image_backend == BreakerState::Open {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthReport {
            status,
            image_backend,
            recent_jobs: recent.len(),
            recent_failures,
        }
    }

    /// Evict terminal jobs that settled more than `max_age` ago.
    pub fn clear_old_jobs(&self, max_age: Duration) -> usize {
        let Ok(age) = chrono::Duration::from_std(max_age) else {
            return 0;
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(age) else {
            return 0;
        };

        let removed = self.lock().table.evict_terminal_before(cutoff);
        if removed > 0 {
            tracing::info!(removed, max_age_secs = max_age.as_secs(), "Old jobs evicted");
        }
        removed
    }

    /// Write the job table to the snapshot file, if persistence is enabled.
    pub async fn persist(&self) -> Result<(), EngineError> {
        let Some(path) = &self.inner.config.persistence_path else {
            return Ok(());
        };
        let snapshot = {
            let state = self.lock();
            EngineSnapshot::new(state.total_submitted, state.table.list())
        };
        snapshot::save(path, &snapshot).await?;
        Ok(())
    }

    fn publish_gauges(&self) {
        let state = self.lock();
        metrics::gauge!("jobs_pending").set(state.queue.len() as f64);
        metrics::gauge!("jobs_running").set(state.running.len() as f64);
    }

    /// Start as many eligible pending jobs as free slots allow.
    fn pump(&self) {
        let mut launches = Vec::new();
        {
            let mut guard = self.lock();
            let state = &mut *guard;
            if state.paused {
                return;
            }

            let now = Instant::now();
            let limit = self.inner.config.max_concurrent_jobs.max(1);
            while state.running.len() < limit {
                let Some(job_id) = state.queue.pop_eligible(now) else {
                    break;
                };
                let Some(job) = state.table.get_mut(job_id) else {
                    continue;
                };
                job.status = JobStatus::Running;
                job.retry_at = None;
                job.progress = 0;
                job.started_at = Some(Utc::now());
                job.completed_at = None;
                state.running.insert(job_id);
                launches.push((job_id, job.request.clone(), job.retry_count + 1));
            }
        }

        for (job_id, request, attempt) in launches {
            tracing::info!(job_id = %job_id, attempt, "Job started");
            self.emit(EngineEvent::Started { job_id, attempt });
            self.spawn_attempt(job_id, request);
        }
    }

    /// Pump again once a backoff has elapsed.
    fn wake_after(&self, delay: Duration) {
        let engine = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine.pump();
        });
    }

    fn spawn_attempt(&self, job_id: Uuid, request: JobRequest) {
        let engine = self.clone();
        tokio::spawn(async move {
            let runner = engine.inner.runner.clone();
            let reporter = engine.clone();
            // Separate task so a panic inside the attempt becomes a failed attempt.
            let attempt = tokio::spawn(async move {
                runner
                    .execute(job_id, &request, move |p| reporter.report_progress(job_id, p))
                    .await
            });
            let outcome = match attempt.await {
                Ok(outcome) => outcome,
                Err(e) => AttemptOutcome::Failed(format!("execution attempt aborted: {e}")),
            };
            engine.finish_attempt(job_id, outcome);
            engine.pump();
        });
    }

    fn report_progress(&self, job_id: Uuid, progress: u8) {
        let progress = progress.min(100);
        let advanced = {
            let mut state = self.lock();
            match state.table.get_mut(job_id) {
                Some(job) if job.status == JobStatus::Running && progress > job.progress => {
                    job.progress = progress;
                    true
                }
                _ => false,
            }
        };
        if advanced {
            self.emit(EngineEvent::Progress { job_id, progress });
        }
    }

    fn finish_attempt(&self, job_id: Uuid, outcome: AttemptOutcome) {
        let transition = {
            let mut guard = self.lock();
            let state = &mut *guard;
            state.running.remove(&job_id);
            let Some(job) = state.table.get_mut(job_id) else {
                return;
            };
            if job.status != JobStatus::Running {
                return;
            }

            match outcome {
                AttemptOutcome::Succeeded(result) => {
                    job.status = JobStatus::Completed;
                    job.progress = 100;
                    job.result = Some(result);
                    job.error = None;
                    job.completed_at = Some(Utc::now());
                    Transition::Completed {
                        run_ms: job.run_time_ms(),
                    }
                }
                AttemptOutcome::Failed(error) => {
                    job.error = Some(error.clone());
                    match self.inner.runner.decide(job.retry_count, job.max_retries) {
                        RetryDecision::Retry { delay, retry_count } => {
                            job.retry_count = retry_count;
                            job.status = JobStatus::Pending;
                            job.retry_at = chrono::Duration::from_std(delay)
                                .ok()
                                .map(|backoff| Utc::now() + backoff);
                            job.progress = 0;
                            state
                                .queue
                                .push_at(job.id, job.priority, job.sequence, Instant::now() + delay);
                            Transition::Retry { retry_count, delay }
                        }
                        RetryDecision::GiveUp => {
                            job.status = JobStatus::Failed;
                            job.completed_at = Some(Utc::now());
                            Transition::Failed { error }
                        }
                    }
                }
            }
        };

        match transition {
            Transition::Completed { run_ms } => {
                tracing::info!(job_id = %job_id, run_ms, "Job completed");
                metrics::counter!("jobs_completed_total").increment(1);
                if let Some(ms) = run_ms {
                    metrics::histogram!("job_run_seconds").record(ms as f64 / 1000.0);
                }
                self.emit(EngineEvent::Completed { job_id });
            }
            Transition::Retry { retry_count, delay } => {
                tracing::warn!(
                    job_id = %job_id,
                    retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Job attempt failed, re-queued with backoff"
                );
                metrics::counter!("jobs_retried_total").increment(1);
                self.emit(EngineEvent::Retried {
                    job_id,
                    retry_count,
                    delay_ms: delay.as_millis() as u64,
                });
                self.wake_after(delay);
            }
            Transition::Failed { error } => {
                tracing::error!(job_id = %job_id, error = %error, "Job failed permanently");
                metrics::counter!("jobs_failed_total").increment(1);
                self.emit(EngineEvent::Failed { job_id, error });
            }
        }
    }
}

fn spawn_background(inner: Weak<EngineInner>) -> JoinHandle<()> {
    let Some(strong) = inner.upgrade() else {
        return tokio::spawn(async {});
    };
    let period = strong.config.persist_interval.max(Duration::from_millis(10));
    let mut shutdown = strong.shutdown.subscribe();
    drop(strong);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            let Some(inner) = inner.upgrade() else {
                break;
            };
            let engine = Engine { inner };
            engine.publish_gauges();
            if let Err(e) = engine.persist().await {
                tracing::error!(error = %e, "Failed to persist engine snapshot");
            }
        }
    })
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Engine persistence error: {0}")]
    Snapshot(#[from] SnapshotError),
}
