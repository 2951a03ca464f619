//! Batch job domain types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::BatchError;
use crate::item::FailureReason;
use crate::queue::Tier;

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Priority level for job execution order.
///
/// `High` and `Urgent` share the `high` tier; the numeric value only
/// orders jobs inside a tier.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Urgent = 3,
}

impl Priority {
    /// The tier that admits jobs of this priority.
    pub fn tier(self) -> Tier {
        match self {
            Priority::High | Priority::Urgent => Tier::High,
            Priority::Low => Tier::Low,
            Priority::Normal => Tier::Normal,
        }
    }

    /// Parse a priority name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "normal" => Some(Priority::Normal),
            "high" => Some(Priority::High),
            "urgent" => Some(Priority::Urgent),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current status of a job in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is queued in its tier and has not started.
    #[default]
    Pending,
    /// Job was dispatched and its items are executing.
    Processing,
    /// Every item completed.
    Completed,
    /// Items ran to the end but at least one failed.
    CompletedWithErrors,
    /// Job could not be started at all.
    Failed,
    /// Job was cancelled while queued or running.
    Cancelled,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending | JobStatus::Processing)
    }

    /// Get a simple status string for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::CompletedWithErrors => "completed_with_errors",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "completed_with_errors" => Some(JobStatus::CompletedWithErrors),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregated timing figures for a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceMetrics {
    /// Completed items as a percentage of finished items.
    pub success_rate: f64,
    /// Wall-clock time from start to completion.
    pub total_duration_ms: u64,
    /// Mean analysis time of finished items.
    pub avg_item_duration_ms: f64,
    /// Finished items per second of wall-clock time.
    pub items_per_second: f64,
}

/// A batch job: an ordered list of items analyzed under one configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    /// Unique identifier for this job.
    pub id: JobId,
    /// Human-readable name.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Item keys (URLs), in submission order.
    pub items: Vec<String>,
    /// External ids paired with `items` by position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ids: Option<Vec<String>>,
    /// Maximum number of items analyzed at once.
    pub batch_size: usize,
    /// Per-item analysis timeout in milliseconds.
    pub item_timeout_ms: u64,
    /// Extra attempts for a failed item.
    #[serde(default)]
    pub max_retries: u32,
    /// Execution priority.
    pub priority: Priority,
    pub total_items: usize,
    #[serde(default)]
    pub completed_count: usize,
    #[serde(default)]
    pub failed_count: usize,
    #[serde(default)]
    pub cancelled_count: usize,
    /// Current status.
    pub status: JobStatus,
    /// Why the job could not start, when `status` is `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metrics: PerformanceMetrics,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchJob {
    /// Create a new pending job over the given items.
    pub fn new(name: impl Into<String>, items: Vec<String>) -> Self {
        Self {
            id: JobId::new(),
            name: name.into(),
            description: None,
            total_items: items.len(),
            items,
            external_ids: None,
            batch_size: 5,
            item_timeout_ms: 120_000,
            max_retries: 0,
            priority: Priority::default(),
            completed_count: 0,
            failed_count: 0,
            cancelled_count: 0,
            status: JobStatus::Pending,
            error: None,
            metrics: PerformanceMetrics::default(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Pair external ids with the items.
    pub fn with_external_ids(mut self, external_ids: Vec<String>) -> Self {
        self.external_ids = Some(external_ids);
        self
    }

    /// Set the priority for this job.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the item-level concurrency bound.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the per-item timeout.
    pub fn with_item_timeout_ms(mut self, item_timeout_ms: u64) -> Self {
        self.item_timeout_ms = item_timeout_ms;
        self
    }

    /// Set the max retries per item.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Check the shape of the submission.
    pub fn validate(&self) -> Result<(), BatchError> {
        if self.items.is_empty() {
            return Err(BatchError::Validation("items must not be empty".into()));
        }
        if let Some(ids) = &self.external_ids
            && ids.len() != self.items.len()
        {
            return Err(BatchError::Validation(format!(
                "external_ids length {} does not match items length {}",
                ids.len(),
                self.items.len()
            )));
        }
        if self.total_items != self.items.len() {
            return Err(BatchError::Validation(format!(
                "total_items {} does not match items length {}",
                self.total_items,
                self.items.len()
            )));
        }
        if self.batch_size == 0 {
            return Err(BatchError::Validation("batch_size must be at least 1".into()));
        }
        Ok(())
    }

    /// Items that reached a terminal state.
    pub fn finished_count(&self) -> usize {
        self.completed_count + self.failed_count + self.cancelled_count
    }

    pub fn progress_percentage(&self) -> f64 {
        if self.total_items == 0 {
            return 0.0;
        }
        (self.finished_count() as f64 / self.total_items as f64) * 100.0
    }

    /// Mark the job as unable to start.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        let now = Utc::now();
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(now);
    }

    /// Mark the job as cancelled before or during execution.
    pub fn mark_cancelled(&mut self) {
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }
}

/// One failed item in a job's error log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemError {
    pub item_key: String,
    pub reason: FailureReason,
    pub message: String,
}

/// Point-in-time view of a job for progress polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub job_id: JobId,
    pub name: String,
    pub priority: Priority,
    pub status: JobStatus,
    pub total_items: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub cancelled_count: usize,
    pub progress_percentage: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub error_log: Vec<ItemError>,
    pub performance: PerformanceMetrics,
}

impl JobProgress {
    /// Build a progress view from a job and its failed items.
    pub fn from_job(job: &BatchJob, error_log: Vec<ItemError>) -> Self {
        Self {
            job_id: job.id,
            name: job.name.clone(),
            priority: job.priority,
            status: job.status,
            total_items: job.total_items,
            completed_count: job.completed_count,
            failed_count: job.failed_count,
            cancelled_count: job.cancelled_count,
            progress_percentage: job.progress_percentage(),
            started_at: job.started_at,
            completed_at: job.completed_at,
            error: job.error.clone(),
            error_log,
            performance: job.metrics.clone(),
        }
    }
}

/// Filter options for listing jobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub priority: Option<Priority>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl JobFilter {
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }

    /// Check a job against the status and priority filters.
    pub fn matches(&self, job: &BatchJob) -> bool {
        self.status.is_none_or(|s| job.status == s)
            && self.priority.is_none_or(|p| job.priority == p)
    }
}

/// One page of a job listing, newest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPage {
    pub jobs: Vec<BatchJob>,
    /// Number of jobs matching the filter, ignoring paging.
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}
