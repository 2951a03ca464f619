//! Per-item execution records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::JobId;

/// Status of a single item within a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl ItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemStatus::Completed | ItemStatus::Failed | ItemStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Processing => "processing",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
            ItemStatus::Cancelled => "cancelled",
        }
    }
}

/// Why an item failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    /// The analyzer did not answer within the item timeout.
    Timeout,
    /// The analyzer returned an error or panicked.
    ExecutionError,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Timeout => "TIMEOUT",
            FailureReason::ExecutionError => "EXECUTION_ERROR",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step labels recorded on items as they move through a run.
pub mod step {
    pub const QUEUED: &str = "queued";
    pub const WAITING_FOR_SLOT: &str = "waiting_for_slot";
    pub const ANALYZING: &str = "analyzing";
    pub const RETRYING: &str = "retrying";
    pub const DONE: &str = "done";
    pub const CANCELLED: &str = "cancelled";
}

/// Execution record for one item of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub job_id: JobId,
    /// Position of the item in the job's item list.
    pub index: usize,
    pub item_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub status: ItemStatus,
    pub current_step: String,
    /// Analyzer output, on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ItemRecord {
    /// Create a pending record for the item at `index`.
    pub fn pending(
        job_id: JobId,
        index: usize,
        item_key: impl Into<String>,
        external_id: Option<String>,
    ) -> Self {
        Self {
            job_id,
            index,
            item_key: item_key.into(),
            external_id,
            status: ItemStatus::Pending,
            current_step: step::QUEUED.to_string(),
            result: None,
            failure_reason: None,
            error: None,
            duration_ms: None,
            retry_count: 0,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn mark_processing(&mut self) {
        self.status = ItemStatus::Processing;
        self.current_step = step::ANALYZING.to_string();
        self.started_at.get_or_insert_with(Utc::now);
    }

    pub fn mark_completed(&mut self, result: serde_json::Value, duration_ms: u64) {
        self.status = ItemStatus::Completed;
        self.current_step = step::DONE.to_string();
        self.result = Some(result);
        self.failure_reason = None;
        self.error = None;
        self.duration_ms = Some(duration_ms);
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, reason: FailureReason, error: impl Into<String>, duration_ms: u64) {
        self.status = ItemStatus::Failed;
        self.current_step = step::DONE.to_string();
        self.failure_reason = Some(reason);
        self.error = Some(error.into());
        self.duration_ms = Some(duration_ms);
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_cancelled(&mut self) {
        self.status = ItemStatus::Cancelled;
        self.current_step = step::CANCELLED.to_string();
        self.finished_at = Some(Utc::now());
    }
}
