//! Priority tiers: one bounded, ordered holding area per tier.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::BatchError;
use crate::job::{JobId, Priority};

/// Unique identifier for a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub Ulid);

impl EntryId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The three fixed priority tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    High,
    Normal,
    Low,
}

impl Tier {
    /// Tiers in dispatch order.
    pub const ALL: [Tier; 3] = [Tier::High, Tier::Normal, Tier::Low];

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::High => "high",
            Tier::Normal => "normal",
            Tier::Low => "low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "high" => Some(Tier::High),
            "normal" => Some(Tier::Normal),
            "low" => Some(Tier::Low),
            _ => None,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admission state of a queue entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    #[default]
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl EntryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EntryStatus::Completed | EntryStatus::Failed | EntryStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Queued => "queued",
            EntryStatus::Running => "running",
            EntryStatus::Completed => "completed",
            EntryStatus::Failed => "failed",
            EntryStatus::Cancelled => "cancelled",
        }
    }
}

/// One admission record for a job in a tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: EntryId,
    pub job_id: JobId,
    pub priority: Priority,
    pub tier: Tier,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub status: EntryStatus,
    /// Configuration snapshot of the owning job.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Admission order within the tier, assigned on enqueue.
    #[serde(default)]
    pub sequence: u64,
}

impl QueueEntry {
    /// Create a queued entry for a job.
    pub fn new(job_id: JobId, priority: Priority) -> Self {
        Self {
            id: EntryId::new(),
            job_id,
            priority,
            tier: priority.tier(),
            enqueued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            status: EntryStatus::Queued,
            metadata: serde_json::Value::Null,
            sequence: 0,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Time spent running, once finished.
    pub fn duration_ms(&self) -> Option<u64> {
        let started = self.started_at?;
        let finished = self.finished_at?;
        Some((finished - started).num_milliseconds().max(0) as u64)
    }
}

/// Bounds for one tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of queued (not yet running) entries.
    pub max_queue_size: usize,
    /// Maximum number of jobs from this tier running at once.
    pub max_concurrent: usize,
    /// Number of finished entries kept for status views.
    pub history_limit: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 100,
            max_concurrent: 2,
            history_limit: 1000,
        }
    }
}

impl QueueConfig {
    pub fn new(max_queue_size: usize, max_concurrent: usize) -> Self {
        Self {
            max_queue_size,
            max_concurrent,
            ..Default::default()
        }
    }

    pub fn with_history_limit(mut self, history_limit: usize) -> Self {
        self.history_limit = history_limit;
        self
    }
}

/// Rolling statistics for a tier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueStats {
    /// Jobs that finished successfully (since start).
    pub completed: u64,
    /// Jobs that finished as failed.
    pub failed: u64,
    /// Jobs cancelled while queued or running.
    pub cancelled: u64,
    /// Average run time of finished jobs in milliseconds.
    pub avg_processing_ms: Option<f64>,
    /// Finished jobs with a measured run time.
    pub timed_samples: u64,
}

impl QueueStats {
    /// Total processed jobs.
    pub fn processed(&self) -> u64 {
        self.completed + self.failed
    }

    /// Success rate as a percentage.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.processed();
        if total == 0 {
            None
        } else {
            Some((self.completed as f64 / total as f64) * 100.0)
        }
    }

    fn record_duration(&mut self, duration_ms: u64) {
        self.timed_samples += 1;
        let avg = self.avg_processing_ms.unwrap_or(0.0);
        let n = self.timed_samples as f64;
        self.avg_processing_ms = Some(avg + (duration_ms as f64 - avg) / n);
    }
}

/// Read-only snapshot of a tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub tier: Tier,
    pub queue_length: usize,
    pub running_jobs: usize,
    pub max_queue_size: usize,
    pub max_concurrent: usize,
    pub stats: QueueStats,
    /// Next entries to dispatch, in dispatch order.
    pub upcoming: Vec<QueueEntry>,
    /// Running entries, oldest first.
    pub running: Vec<QueueEntry>,
}

/// Heap wrapper: higher priority first, then earlier admission.
#[derive(Debug, Clone)]
struct RankedEntry(QueueEntry);

impl PartialEq for RankedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for RankedEntry {}

impl PartialOrd for RankedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RankedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.0.enqueued_at.cmp(&self.0.enqueued_at))
            .then_with(|| other.0.sequence.cmp(&self.0.sequence))
    }
}

/// A single priority tier.
#[derive(Debug)]
pub struct Queue {
    tier: Tier,
    config: QueueConfig,
    pending: BinaryHeap<RankedEntry>,
    running: HashMap<EntryId, QueueEntry>,
    history: VecDeque<QueueEntry>,
    stats: QueueStats,
    next_sequence: u64,
}

impl Queue {
    pub fn new(tier: Tier, config: QueueConfig) -> Self {
        Self {
            tier,
            config,
            pending: BinaryHeap::new(),
            running: HashMap::new(),
            history: VecDeque::new(),
            stats: QueueStats::default(),
            next_sequence: 0,
        }
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    /// Admit an entry, failing without side effects when the tier is full.
    pub fn enqueue(&mut self, mut entry: QueueEntry) -> Result<EntryId, BatchError> {
        if self.pending.len() >= self.config.max_queue_size {
            return Err(BatchError::QueueFull {
                tier: self.tier,
                max_size: self.config.max_queue_size,
            });
        }

        entry.tier = self.tier;
        entry.status = EntryStatus::Queued;
        entry.enqueued_at = Utc::now();
        entry.sequence = self.next_sequence;
        self.next_sequence += 1;

        let id = entry.id;
        self.pending.push(RankedEntry(entry));
        Ok(id)
    }

    /// Promote the next entry to running if the tier has a free slot.
    pub fn try_dispatch(&mut self) -> Option<QueueEntry> {
        if self.running.len() >= self.config.max_concurrent {
            return None;
        }
        self.dispatch_unbounded()
    }

    /// Promote the next entry to running regardless of the concurrency cap.
    pub fn dispatch_unbounded(&mut self) -> Option<QueueEntry> {
        let RankedEntry(mut entry) = self.pending.pop()?;
        entry.status = EntryStatus::Running;
        entry.started_at = Some(Utc::now());
        self.running.insert(entry.id, entry.clone());
        Some(entry)
    }

    /// Move a running entry into history.
    ///
    /// An entry whose cancellation was requested while running stays
    /// `cancelled`. Returns `None` for unknown or non-running entries.
    pub fn complete(&mut self, entry_id: EntryId, success: bool) -> Option<QueueEntry> {
        let mut entry = self.running.remove(&entry_id)?;
        entry.finished_at = Some(Utc::now());

        if entry.status == EntryStatus::Cancelled {
            self.stats.cancelled += 1;
        } else if success {
            entry.status = EntryStatus::Completed;
            self.stats.completed += 1;
        } else {
            entry.status = EntryStatus::Failed;
            self.stats.failed += 1;
        }

        if let Some(duration_ms) = entry.duration_ms() {
            self.stats.record_duration(duration_ms);
        }

        self.push_history(entry.clone());
        Some(entry)
    }

    /// Cancel an entry.
    ///
    /// Queued entries are removed immediately; running entries are only
    /// flagged. Returns the status the entry had before, or `None` if the
    /// entry is not queued or running here.
    pub fn cancel(&mut self, entry_id: EntryId) -> Option<EntryStatus> {
        if let Some(entry) = self.running.get_mut(&entry_id) {
            let previous = entry.status;
            entry.status = EntryStatus::Cancelled;
            return Some(previous);
        }

        let mut removed = None;
        self.pending.retain(|ranked| {
            if ranked.0.id == entry_id {
                removed = Some(ranked.0.clone());
                false
            } else {
                true
            }
        });

        let mut entry = removed?;
        entry.status = EntryStatus::Cancelled;
        entry.finished_at = Some(Utc::now());
        self.stats.cancelled += 1;
        self.push_history(entry);
        Some(EntryStatus::Queued)
    }

    /// Look up a queued or running entry.
    pub fn get(&self, entry_id: EntryId) -> Option<&QueueEntry> {
        self.running
            .get(&entry_id)
            .or_else(|| self.pending.iter().map(|r| &r.0).find(|e| e.id == entry_id))
    }

    /// The queued or running entry of a job.
    pub fn find_active_by_job(&self, job_id: JobId) -> Option<&QueueEntry> {
        self.running
            .values()
            .find(|e| e.job_id == job_id)
            .or_else(|| self.pending.iter().map(|r| &r.0).find(|e| e.job_id == job_id))
    }

    /// The active entry of a job, or its most recent finished one.
    pub fn find_by_job(&self, job_id: JobId) -> Option<&QueueEntry> {
        self.find_active_by_job(job_id)
            .or_else(|| self.history.iter().rev().find(|e| e.job_id == job_id))
    }

    /// Drop finished entries that ended before `cutoff`.
    pub fn cleanup_older_than(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.history.len();
        self.history
            .retain(|e| e.finished_at.is_none_or(|finished| finished >= cutoff));
        before - self.history.len()
    }

    /// Snapshot of the tier with at most `preview_limit` entries per list.
    pub fn status(&self, preview_limit: usize) -> QueueStatus {
        let mut upcoming: Vec<&RankedEntry> = self.pending.iter().collect();
        upcoming.sort_by(|a, b| b.cmp(a));

        let mut running: Vec<&QueueEntry> = self.running.values().collect();
        running.sort_by_key(|e| (e.started_at, e.sequence));

        QueueStatus {
            tier: self.tier,
            queue_length: self.pending.len(),
            running_jobs: self.running.len(),
            max_queue_size: self.config.max_queue_size,
            max_concurrent: self.config.max_concurrent,
            stats: self.stats.clone(),
            upcoming: upcoming
                .into_iter()
                .take(preview_limit)
                .map(|r| r.0.clone())
                .collect(),
            running: running.into_iter().take(preview_limit).cloned().collect(),
        }
    }

    fn push_history(&mut self, entry: QueueEntry) {
        self.history.push_back(entry);
        while self.history.len() > self.config.history_limit {
            self.history.pop_front();
        }
    }
}
