//! Core domain types for the batch queue.
//!
//! This crate contains the types shared by every package:
//! - `BatchJob`, `ItemRecord` and their statuses
//! - `Queue` (one priority tier) and `QueueManager` (the three tiers)
//! - Events, errors and engine configuration

mod config;
mod error;
mod events;
mod item;
mod job;
mod manager;
mod queue;

pub use config::{CONFIG_ENV, ConfigError, EngineConfig};
pub use error::{BatchError, BatchResult};
pub use events::JobEvent;
pub use item::{FailureReason, ItemRecord, ItemStatus, step};
pub use job::{
    BatchJob, ItemError, JobFilter, JobId, JobPage, JobProgress, JobStatus, PerformanceMetrics,
    Priority,
};
pub use manager::{AggregateStatus, QueueManager, StatusTotals, TierConfigs};
pub use queue::{EntryId, EntryStatus, Queue, QueueConfig, QueueEntry, QueueStats, QueueStatus, Tier};
