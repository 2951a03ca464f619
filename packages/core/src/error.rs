//! Error taxonomy for the batch engine.

use crate::job::JobId;
use crate::queue::{EntryId, Tier};

/// Result alias used across the engine.
pub type BatchResult<T> = Result<T, BatchError>;

/// Errors surfaced by queues, the scheduler and the batch runner.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BatchError {
    /// Submission has a bad shape; nothing was created.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The tier has no room; retry later or pick another priority.
    #[error("Queue '{tier}' is full ({max_size} entries)")]
    QueueFull { tier: Tier, max_size: usize },

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Queue entry not found: {0}")]
    EntryNotFound(EntryId),

    /// Item-level only, recorded on the item and never returned by a run.
    #[error("Item '{item_key}' timed out after {timeout_ms}ms")]
    ItemTimeout { item_key: String, timeout_ms: u64 },

    /// Item-level only, recorded on the item and never returned by a run.
    #[error("Item '{item_key}' failed: {message}")]
    ItemExecution { item_key: String, message: String },

    #[error("State store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Job {job_id} did not finish within {timeout_ms}ms")]
    WaitTimeout { job_id: JobId, timeout_ms: u64 },

    /// The scheduler actor could not be reached.
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BatchError {
    /// Whether the caller may retry the same submission later.
    pub fn is_capacity(&self) -> bool {
        matches!(self, BatchError::QueueFull { .. })
    }
}
