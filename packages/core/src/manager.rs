//! Routing and cross-tier views over the three fixed tiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BatchError;
use crate::job::{BatchJob, JobId};
use crate::queue::{EntryStatus, Queue, QueueConfig, QueueEntry, QueueStatus, Tier};

/// Per-tier bounds for a [`QueueManager`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierConfigs {
    pub high: QueueConfig,
    pub normal: QueueConfig,
    pub low: QueueConfig,
}

impl Default for TierConfigs {
    fn default() -> Self {
        Self {
            high: QueueConfig::new(100, 3),
            normal: QueueConfig::new(500, 2),
            low: QueueConfig::new(1000, 1),
        }
    }
}

impl TierConfigs {
    pub fn get(&self, tier: Tier) -> &QueueConfig {
        match tier {
            Tier::High => &self.high,
            Tier::Normal => &self.normal,
            Tier::Low => &self.low,
        }
    }

    /// Set the bounds for one tier.
    pub fn with_tier(mut self, tier: Tier, config: QueueConfig) -> Self {
        match tier {
            Tier::High => self.high = config,
            Tier::Normal => self.normal = config,
            Tier::Low => self.low = config,
        }
        self
    }
}

/// Sum of the per-tier counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusTotals {
    pub queue_length: usize,
    pub running_jobs: usize,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

/// Status of every tier plus the cross-tier totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateStatus {
    pub tiers: Vec<QueueStatus>,
    pub totals: StatusTotals,
    pub generated_at: DateTime<Utc>,
}

impl AggregateStatus {
    pub fn tier(&self, tier: Tier) -> Option<&QueueStatus> {
        self.tiers.iter().find(|s| s.tier == tier)
    }
}

/// Owns the `high`, `normal` and `low` tiers.
#[derive(Debug)]
pub struct QueueManager {
    high: Queue,
    normal: Queue,
    low: Queue,
    preview_limit: usize,
}

impl QueueManager {
    pub fn new(configs: TierConfigs) -> Self {
        Self {
            high: Queue::new(Tier::High, configs.high),
            normal: Queue::new(Tier::Normal, configs.normal),
            low: Queue::new(Tier::Low, configs.low),
            preview_limit: 10,
        }
    }

    /// Limit the number of entries listed per tier in status views.
    pub fn with_preview_limit(mut self, preview_limit: usize) -> Self {
        self.preview_limit = preview_limit;
        self
    }

    pub fn queue(&self, tier: Tier) -> &Queue {
        match tier {
            Tier::High => &self.high,
            Tier::Normal => &self.normal,
            Tier::Low => &self.low,
        }
    }

    pub fn queue_mut(&mut self, tier: Tier) -> &mut Queue {
        match tier {
            Tier::High => &mut self.high,
            Tier::Normal => &mut self.normal,
            Tier::Low => &mut self.low,
        }
    }

    /// Admit a job into the tier its priority maps to.
    pub fn submit(&mut self, job: &BatchJob) -> Result<QueueEntry, BatchError> {
        if let Some((tier, _)) = self.find_active_by_job_id(job.id) {
            return Err(BatchError::Validation(format!(
                "job {} already has an entry in tier '{}'",
                job.id, tier
            )));
        }

        let entry = QueueEntry::new(job.id, job.priority).with_metadata(serde_json::json!({
            "name": job.name,
            "total_items": job.total_items,
            "batch_size": job.batch_size,
            "item_timeout_ms": job.item_timeout_ms,
            "max_retries": job.max_retries,
        }));

        let tier = job.priority.tier();
        let queue = self.queue_mut(tier);
        let entry_id = queue.enqueue(entry)?;
        queue
            .get(entry_id)
            .cloned()
            .ok_or(BatchError::EntryNotFound(entry_id))
    }

    /// Dispatch from one tier, or from the first tier in `high`, `normal`,
    /// `low` order that has both a queued entry and a free slot.
    pub fn dispatch_next(&mut self, tier: Option<Tier>) -> Option<QueueEntry> {
        match tier {
            Some(tier) => self.queue_mut(tier).try_dispatch(),
            None => Tier::ALL
                .into_iter()
                .find_map(|tier| self.queue_mut(tier).try_dispatch()),
        }
    }

    /// Finish the running entry of a job.
    pub fn complete(&mut self, job_id: JobId, success: bool) -> Option<QueueEntry> {
        let (tier, entry_id) = self
            .find_active_by_job_id(job_id)
            .filter(|(_, e)| e.started_at.is_some())
            .map(|(tier, e)| (tier, e.id))?;
        self.queue_mut(tier).complete(entry_id, success)
    }

    /// Cancel the first entry found for a job.
    ///
    /// Returns the tier and the status the entry had before cancellation.
    pub fn cancel_by_job_id(&mut self, job_id: JobId) -> Option<(Tier, EntryStatus)> {
        Tier::ALL.into_iter().find_map(|tier| {
            let queue = self.queue_mut(tier);
            let entry_id = queue.find_active_by_job(job_id)?.id;
            queue.cancel(entry_id).map(|previous| (tier, previous))
        })
    }

    /// Find the entry for a job, including finished ones still in history.
    pub fn find_by_job_id(&self, job_id: JobId) -> Option<(Tier, &QueueEntry)> {
        Tier::ALL
            .into_iter()
            .find_map(|tier| self.queue(tier).find_by_job(job_id).map(|e| (tier, e)))
    }

    fn find_active_by_job_id(&self, job_id: JobId) -> Option<(Tier, &QueueEntry)> {
        Tier::ALL.into_iter().find_map(|tier| {
            self.queue(tier)
                .find_active_by_job(job_id)
                .map(|e| (tier, e))
        })
    }

    /// Merge every tier's status into one report.
    pub fn aggregate_status(&self) -> AggregateStatus {
        let tiers: Vec<QueueStatus> = Tier::ALL
            .into_iter()
            .map(|tier| self.queue(tier).status(self.preview_limit))
            .collect();

        let totals = tiers.iter().fold(StatusTotals::default(), |mut acc, s| {
            acc.queue_length += s.queue_length;
            acc.running_jobs += s.running_jobs;
            acc.completed += s.stats.completed;
            acc.failed += s.stats.failed;
            acc.cancelled += s.stats.cancelled;
            acc
        });

        AggregateStatus {
            tiers,
            totals,
            generated_at: Utc::now(),
        }
    }

    /// Purge finished history older than `max_age` from every tier.
    pub fn cleanup_older_than(&mut self, max_age: chrono::Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        Tier::ALL
            .into_iter()
            .map(|tier| self.queue_mut(tier).cleanup_older_than(cutoff))
            .sum()
    }
}

impl Default for QueueManager {
    fn default() -> Self {
        Self::new(TierConfigs::default())
    }
}
