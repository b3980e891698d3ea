use std::collections::{BTreeSet, HashMap};
use tokio::time::Instant;
use uuid::Uuid;

use crate::models::job::{Job, JobPriority};

/// Ordering key: priority rank first, then submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    rank: u8,
    sequence: u64,
    job_id: Uuid,
}

#[derive(Debug, Clone, Copy)]
struct QueueEntry {
    key: QueueKey,
    /// A retried job waits out its backoff before it is eligible again.
    available_at: Instant,
}

/// Pending jobs ordered by (priority, submission order).
///
/// There is no aging across bands: a steady stream of `urgent` work starves
/// `low` work. Retried jobs keep their original priority and sequence.
#[derive(Debug, Default)]
pub struct PriorityQueue {
    order: BTreeSet<QueueKey>,
    entries: HashMap<Uuid, QueueEntry>,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a job that is eligible to start immediately.
    pub fn push(&mut self, job: &Job) {
        self.push_at(job.id, job.priority, job.sequence, Instant::now());
    }

    /// Enqueue a job that becomes eligible at `available_at`.
    pub fn push_at(&mut self, job_id: Uuid, priority: JobPriority, sequence: u64, available_at: Instant) {
        self.remove(job_id);
        let key = QueueKey {
            rank: priority.rank(),
            sequence,
            job_id,
        };
        self.order.insert(key);
        self.entries.insert(job_id, QueueEntry { key, available_at });
    }

    /// Remove and return the highest-priority, oldest job that is eligible at `now`.
    pub fn pop_eligible(&mut self, now: Instant) -> Option<Uuid> {
        let key = self
            .order
            .iter()
            .find(|key| {
                self.entries
                    .get(&key.job_id)
                    .is_some_and(|entry| entry.available_at <= now)
            })
            .copied()?;
        self.order.remove(&key);
        self.entries.remove(&key.job_id);
        Some(key.job_id)
    }

    pub fn remove(&mut self, job_id: Uuid) -> bool {
        match self.entries.remove(&job_id) {
            Some(entry) => {
                self.order.remove(&entry.key);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, job_id: Uuid) -> bool {
        self.entries.contains_key(&job_id)
    }

    /// Job ids in the order they would start, ignoring backoff windows.
    pub fn ids(&self) -> Vec<Uuid> {
        self.order.iter().map(|key| key.job_id).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
