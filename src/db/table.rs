use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::job::{Job, JobStatus};

/// In-memory table of every job the engine knows about.
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: HashMap<Uuid, Job>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from persisted jobs.
    ///
    /// A job persisted as `running` may or may not have finished before the
    /// process stopped, so it is reset to `pending` and will execute again.
    pub fn restore(jobs: Vec<Job>) -> Self {
        let jobs = jobs
            .into_iter()
            .map(|mut job| {
                if job.status == JobStatus::Running {
                    job.status = JobStatus::Pending;
                    job.progress = 0;
                    job.started_at = None;
                }
                (job.id, job)
            })
            .collect();
        Self { jobs }
    }

    pub fn insert(&mut self, job: Job) {
        self.jobs.insert(job.id, job);
    }

    pub fn get(&self, job_id: Uuid) -> Option<&Job> {
        self.jobs.get(&job_id)
    }

    pub fn get_mut(&mut self, job_id: Uuid) -> Option<&mut Job> {
        self.jobs.get_mut(&job_id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    /// All jobs in submission order.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.values().cloned().collect();
        jobs.sort_by_key(|job| job.sequence);
        jobs
    }

    pub fn list_by_status(&self, status: JobStatus) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.sequence);
        jobs
    }

    pub fn count_by_status(&self, status: JobStatus) -> usize {
        self.jobs.values().filter(|job| job.status == status).count()
    }

    /// Largest sequence number in the table, if any.
    pub fn max_sequence(&self) -> Option<u64> {
        self.jobs.values().map(|job| job.sequence).max()
    }

    /// Evict terminal jobs settled before `cutoff`. Pending and running jobs are never evicted.
    pub fn evict_terminal_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.jobs.len();
        self.jobs
            .retain(|_, job| !(job.status.is_terminal() && job.settled_at() < cutoff));
        before - self.jobs.len()
    }

    /// Outcomes of the most recent `limit` completed-or-failed jobs, newest first.
    pub fn recent_outcomes(&self, limit: usize) -> Vec<bool> {
        let mut finished: Vec<&Job> = self
            .jobs
            .values()
            .filter(|job| matches!(job.status, JobStatus::Completed | JobStatus::Failed))
            .collect();
        finished.sort_by(|a, b| b.settled_at().cmp(&a.settled_at()));
        finished
            .into_iter()
            .take(limit)
            .map(|job| job.status == JobStatus::Completed)
            .collect()
    }
}
