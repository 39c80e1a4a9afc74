//! Shared background job queue (SPEC_FULL.md §2 Implementation Notes):
//! async URL refresh, backup rotation, and the metadata self-resolution
//! cadence all dispatch through one generic priority queue rather than each
//! growing its own ad hoc timer loop.
//!
//! Generalized from the teacher's `job_scheduling/types.rs`
//! (`ScheduledJob`'s priority/dedup-key ordering) collapsed down from five
//! files into one: this domain has three job kinds, not a full
//! ingestion/executor/runner pipeline, so the teacher's `JobExecutor`/
//! `JobQueueRunner` split (dispatch vs. actually running HTTP ingestion
//! jobs) has no counterpart here — `main.rs` drains the queue directly on a
//! tick.

pub mod types;

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use chrono::Utc;
use tokio::sync::Mutex;

pub use types::{JobPriority, JobType, ScheduledJob};

/// Thread-safe, deduplicating priority queue of [`ScheduledJob`]s.
pub struct JobQueue {
    heap: Mutex<BinaryHeap<Reverse<ScheduledJob>>>,
    keys: Mutex<HashSet<String>>,
    next_id: AtomicU64,
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            keys: Mutex::new(HashSet::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Enqueue `job_type` unless an equivalent job (same dedup key) is
    /// already pending.
    pub async fn enqueue(&self, job_type: JobType, priority: JobPriority) -> bool {
        let key = job_type.job_key();
        let mut keys = self.keys.lock().await;
        if !keys.insert(key) {
            return false;
        }
        let id = self.next_id.fetch_add(1, AtomicOrdering::SeqCst);
        self.heap
            .lock()
            .await
            .push(Reverse(ScheduledJob::new(id, job_type, priority)));
        true
    }

    /// Pop the highest-priority job whose `scheduled_time` has passed, if
    /// any. Frees its dedup key so a future occurrence of the same job can
    /// be enqueued again.
    pub async fn pop_ready(&self) -> Option<ScheduledJob> {
        let mut heap = self.heap.lock().await;
        let now = Utc::now();
        if !heap.peek().is_some_and(|Reverse(job)| job.is_ready(now)) {
            return None;
        }
        let Reverse(job) = heap.pop()?;
        self.keys.lock().await.remove(&job.job_key());
        Some(job)
    }

    pub async fn len(&self) -> usize {
        self.heap.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dedups_by_job_key() {
        let queue = JobQueue::new();
        assert!(queue.enqueue(JobType::UrlRefresh(1), JobPriority::High).await);
        assert!(!queue.enqueue(JobType::UrlRefresh(1), JobPriority::Normal).await);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn pop_ready_respects_scheduled_time() {
        let queue = JobQueue::new();
        queue.enqueue(JobType::BackupRotation, JobPriority::Maintenance).await;
        let job = queue.pop_ready().await.expect("job should be immediately ready");
        assert_eq!(job.job_type, JobType::BackupRotation);
        assert!(queue.pop_ready().await.is_none());
    }

    #[tokio::test]
    async fn pop_ready_prefers_higher_priority() {
        let queue = JobQueue::new();
        queue.enqueue(JobType::MetadataSelfResolution, JobPriority::Low).await;
        queue.enqueue(JobType::BackupRotation, JobPriority::Critical).await;
        let job = queue.pop_ready().await.unwrap();
        assert_eq!(job.job_type, JobType::BackupRotation);
    }
}
