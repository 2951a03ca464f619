//! Message types for the scheduler actor.

use batch_core::{AggregateStatus, BatchError, BatchJob, JobId, JobStatus, QueueEntry, Tier};
use ractor::RpcReplyPort;
use serde::{Deserialize, Serialize};

/// Messages for the Scheduler.
#[derive(Debug)]
pub enum SchedulerMessage {
    /// Admit a stored, pending job into its tier.
    Submit {
        job: Box<BatchJob>,
        reply: RpcReplyPort<Result<QueueEntry, BatchError>>,
    },

    /// Dispatch every job the tier caps allow.
    Dispatch,

    /// A runner returned. `status` is `None` when the job could not start.
    RunFinished {
        job_id: JobId,
        status: Option<JobStatus>,
    },

    /// Cancel a queued or running job.
    Cancel {
        job_id: JobId,
        reply: RpcReplyPort<bool>,
    },

    /// Find the entry of a job, including recently finished ones.
    FindEntry {
        job_id: JobId,
        reply: RpcReplyPort<Option<(Tier, QueueEntry)>>,
    },

    /// Get every tier's status.
    QueueStatus { reply: RpcReplyPort<AggregateStatus> },

    /// Purge finished history and finished jobs older than `max_age`.
    Cleanup {
        max_age: chrono::Duration,
        reply: RpcReplyPort<CleanupReport>,
    },

    /// Periodic tick for snapshots and automatic cleanup.
    Housekeeping,

    /// Cancel running jobs and stop.
    Shutdown,
}

/// What a cleanup removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    /// Finished queue entries dropped from tier history.
    pub history_entries: usize,
    /// Finished jobs deleted from the store, with their items and entries.
    pub jobs: usize,
}
