//! Job type definitions for the shared background job queue (SPEC_FULL.md
//! §2 Implementation Notes): async URL refresh, backup rotation, and the
//! metadata self-resolution cadence all dispatch through the same
//! priority/dedup-key model, generalized from the teacher's
//! `job_scheduling/types.rs` (there: per-source ingestion jobs keyed by
//! `Uuid`; here: per-media-item/global jobs keyed by `i64`, matching this
//! crate's integer-id catalog).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Priority levels for job execution. Ordering is the enum's declaration
/// order: `Critical` sorts before `Maintenance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobPriority {
    Critical = 0,
    High = 1,
    Normal = 2,
    Low = 3,
    Maintenance = 4,
}

impl PartialOrd for JobPriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for JobPriority {
    fn cmp(&self, other: &Self) -> Ordering {
        (*self as u8).cmp(&(*other as u8))
    }
}

/// Type of background job dispatched by [`super::JobQueue`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobType {
    /// Re-resolve a media item's upstream URL before it expires, or after a
    /// `ResolverError::Unresolvable { kind: Expired, .. }` (spec §7).
    UrlRefresh(i64),
    /// Rotate the gzip catalog backup per the configured retention (§6
    /// "Persisted state").
    BackupRotation,
    /// One run of the metadata self-resolution cadence (spec §4.6,
    /// `MetadataSelfResolution`), gated by `metadata_failure_ratio > 0.2`.
    MetadataSelfResolution,
}

impl JobType {
    /// Deduplication key: jobs sharing a key collapse into one queue entry.
    pub fn job_key(&self) -> String {
        match self {
            JobType::UrlRefresh(media_item_id) => format!("url_refresh:{media_item_id}"),
            JobType::BackupRotation => "backup_rotation".to_string(),
            JobType::MetadataSelfResolution => "metadata_self_resolution".to_string(),
        }
    }

    pub fn media_item_id(&self) -> Option<i64> {
        match self {
            JobType::UrlRefresh(id) => Some(*id),
            JobType::BackupRotation | JobType::MetadataSelfResolution => None,
        }
    }
}

/// A job instance ready for execution once `scheduled_time` has passed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: u64,
    pub job_type: JobType,
    pub scheduled_time: DateTime<Utc>,
    pub priority: JobPriority,
}

impl ScheduledJob {
    pub fn new(id: u64, job_type: JobType, priority: JobPriority) -> Self {
        Self {
            id,
            job_type,
            scheduled_time: Utc::now(),
            priority,
        }
    }

    pub fn new_scheduled(
        id: u64,
        job_type: JobType,
        priority: JobPriority,
        scheduled_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            job_type,
            scheduled_time,
            priority,
        }
    }

    pub fn job_key(&self) -> String {
        self.job_type.job_key()
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_time <= now
    }
}

impl PartialEq for ScheduledJob {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ScheduledJob {}

impl PartialOrd for ScheduledJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledJob {
    /// Earlier priority first, then earlier scheduled time first — a
    /// `BinaryHeap` is a max-heap, so [`super::JobQueue`] pops the
    /// `Reverse`-wrapped minimum to get "most urgent next".
    fn cmp(&self, other: &Self) -> Ordering {
        match self.priority.cmp(&other.priority) {
            Ordering::Equal => self.scheduled_time.cmp(&other.scheduled_time),
            ord => ord,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn priority_orders_critical_first() {
        assert!(JobPriority::Critical < JobPriority::High);
        assert!(JobPriority::High < JobPriority::Normal);
        assert!(JobPriority::Normal < JobPriority::Low);
        assert!(JobPriority::Low < JobPriority::Maintenance);
    }

    #[test]
    fn job_type_key_dedups_by_target() {
        assert_eq!(JobType::UrlRefresh(42).job_key(), "url_refresh:42");
        assert_eq!(JobType::UrlRefresh(42).job_key(), JobType::UrlRefresh(42).job_key());
        assert_ne!(JobType::UrlRefresh(1).job_key(), JobType::UrlRefresh(2).job_key());
    }

    #[test]
    fn scheduled_job_orders_by_priority_then_time() {
        let now = Utc::now();
        let critical_later = ScheduledJob::new_scheduled(
            1,
            JobType::BackupRotation,
            JobPriority::Critical,
            now + Duration::hours(1),
        );
        let normal_now = ScheduledJob::new_scheduled(
            2,
            JobType::MetadataSelfResolution,
            JobPriority::Normal,
            now,
        );
        assert!(critical_later < normal_now);

        let earlier = ScheduledJob::new_scheduled(3, JobType::BackupRotation, JobPriority::Normal, now);
        let later = ScheduledJob::new_scheduled(
            4,
            JobType::BackupRotation,
            JobPriority::Normal,
            now + Duration::minutes(10),
        );
        assert!(earlier < later);
    }

    #[test]
    fn is_ready_compares_against_now() {
        let now = Utc::now();
        let ready = ScheduledJob::new_scheduled(1, JobType::BackupRotation, JobPriority::Normal, now - Duration::minutes(1));
        let future = ScheduledJob::new_scheduled(2, JobType::BackupRotation, JobPriority::Normal, now + Duration::minutes(1));
        assert!(ready.is_ready(now));
        assert!(!future.is_ready(now));
    }
}
