//! Event types for real-time updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::item::FailureReason;
use crate::job::{JobId, JobStatus, Priority};
use crate::queue::{EntryId, QueueStats, Tier};

/// Events emitted by the scheduler and batch runners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    // Queue events
    /// A job was admitted into a tier.
    JobEnqueued {
        job_id: JobId,
        entry_id: EntryId,
        tier: Tier,
        priority: Priority,
        timestamp: DateTime<Utc>,
    },
    /// A submission was rejected because its tier was full.
    JobRejected {
        job_id: JobId,
        tier: Tier,
        timestamp: DateTime<Utc>,
    },
    /// A tier's statistics changed.
    TierStatsUpdated {
        tier: Tier,
        queue_length: usize,
        running_jobs: usize,
        stats: QueueStats,
        timestamp: DateTime<Utc>,
    },

    // Job events
    /// A job was dispatched and its items started.
    JobStarted {
        job_id: JobId,
        tier: Tier,
        total_items: usize,
        timestamp: DateTime<Utc>,
    },
    /// A job reached a terminal status.
    JobFinished {
        job_id: JobId,
        status: JobStatus,
        completed: usize,
        failed: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// A job was cancelled; `was_running` tells whether items had started.
    JobCancelled {
        job_id: JobId,
        was_running: bool,
        timestamp: DateTime<Utc>,
    },

    // Item events
    ItemStarted {
        job_id: JobId,
        index: usize,
        item_key: String,
        timestamp: DateTime<Utc>,
    },
    ItemCompleted {
        job_id: JobId,
        index: usize,
        item_key: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    ItemFailed {
        job_id: JobId,
        index: usize,
        item_key: String,
        reason: FailureReason,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            JobEvent::JobEnqueued { timestamp, .. }
            | JobEvent::JobRejected { timestamp, .. }
            | JobEvent::TierStatsUpdated { timestamp, .. }
            | JobEvent::JobStarted { timestamp, .. }
            | JobEvent::JobFinished { timestamp, .. }
            | JobEvent::JobCancelled { timestamp, .. }
            | JobEvent::ItemStarted { timestamp, .. }
            | JobEvent::ItemCompleted { timestamp, .. }
            | JobEvent::ItemFailed { timestamp, .. } => *timestamp,
        }
    }

    /// Get the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            JobEvent::JobEnqueued { job_id, .. }
            | JobEvent::JobRejected { job_id, .. }
            | JobEvent::JobStarted { job_id, .. }
            | JobEvent::JobFinished { job_id, .. }
            | JobEvent::JobCancelled { job_id, .. }
            | JobEvent::ItemStarted { job_id, .. }
            | JobEvent::ItemCompleted { job_id, .. }
            | JobEvent::ItemFailed { job_id, .. } => Some(*job_id),
            JobEvent::TierStatsUpdated { .. } => None,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            JobEvent::JobEnqueued { job_id, tier, priority, .. } => {
                format!("Job {} enqueued in '{}' ({})", job_id, tier, priority)
            }
            JobEvent::JobRejected { job_id, tier, .. } => {
                format!("Job {} rejected: tier '{}' is full", job_id, tier)
            }
            JobEvent::TierStatsUpdated { tier, queue_length, running_jobs, .. } => {
                format!("Tier '{}': {} queued, {} running", tier, queue_length, running_jobs)
            }
            JobEvent::JobStarted { job_id, total_items, .. } => {
                format!("Job {} started with {} items", job_id, total_items)
            }
            JobEvent::JobFinished { job_id, status, completed, failed, duration_ms, .. } => {
                format!(
                    "Job {} {} in {}ms ({} completed, {} failed)",
                    job_id, status, duration_ms, completed, failed
                )
            }
            JobEvent::JobCancelled { job_id, was_running, .. } => {
                let phase = if *was_running { "while running" } else { "while queued" };
                format!("Job {} cancelled {}", job_id, phase)
            }
            JobEvent::ItemStarted { job_id, item_key, .. } => {
                format!("Job {} item '{}' started", job_id, item_key)
            }
            JobEvent::ItemCompleted { job_id, item_key, duration_ms, .. } => {
                format!("Job {} item '{}' completed in {}ms", job_id, item_key, duration_ms)
            }
            JobEvent::ItemFailed { job_id, item_key, reason, error, .. } => {
                format!("Job {} item '{}' failed ({}): {}", job_id, item_key, reason, error)
            }
        }
    }
}
