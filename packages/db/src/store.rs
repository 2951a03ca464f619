//! The persistence interface used by the scheduler and batch runners.

use async_trait::async_trait;
use batch_core::{BatchJob, ItemRecord, JobFilter, JobId, JobPage, QueueEntry};
use chrono::{DateTime, Utc};

use crate::DbError;

/// Page size used when a filter does not set a limit.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Backend-agnostic store for jobs, queue entries and item records.
///
/// Writers are partitioned: the scheduler writes entries and queued-job
/// status, each batch runner writes its own job and items.
#[async_trait]
pub trait StateStore: Send + Sync {
    // ── Jobs ────────────────────────────────────────────────────────

    /// Insert a new job.
    async fn create_job(&self, job: &BatchJob) -> Result<(), DbError>;

    /// Get a job by ID.
    async fn get_job(&self, id: JobId) -> Result<Option<BatchJob>, DbError>;

    /// Replace a stored job with `job`.
    async fn update_job(&self, job: &BatchJob) -> Result<(), DbError>;

    /// List jobs newest first.
    async fn list_jobs(&self, filter: &JobFilter) -> Result<JobPage, DbError>;

    // ── Queue entries ───────────────────────────────────────────────

    /// Insert or replace a queue entry.
    async fn save_entry(&self, entry: &QueueEntry) -> Result<(), DbError>;

    /// The latest entry recorded for a job.
    async fn get_entry_for_job(&self, job_id: JobId) -> Result<Option<QueueEntry>, DbError>;

    // ── Items ───────────────────────────────────────────────────────

    /// Insert every item record of a job in one write.
    async fn insert_items(&self, items: &[ItemRecord]) -> Result<(), DbError>;

    /// Replace the record identified by `item.job_id` and `item.index`.
    async fn update_item(&self, item: &ItemRecord) -> Result<(), DbError>;

    /// Item records of a job, in item order.
    async fn list_items(&self, job_id: JobId) -> Result<Vec<ItemRecord>, DbError>;

    // ── Housekeeping ────────────────────────────────────────────────

    /// Delete terminal jobs completed before `cutoff`, with their items
    /// and entries. Returns the number of jobs removed.
    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError>;
}
