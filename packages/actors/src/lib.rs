//! Actor system for the batch queue.
//!
//! This crate provides the Ractor-based scheduler and the batch runner
//! behind the [`BatchEngine`] facade.
//!
//! # Architecture
//!
//! - `Scheduler` - Actor owning the `high`, `normal` and `low` tiers; admits,
//!   dispatches and cancels jobs
//! - `BatchRunner` - Executes one dispatched job's items with bounded
//!   concurrency, per-item timeouts and retries
//! - `Analyzer` - The per-item analysis capability supplied by the caller
//!
//! # Usage
//!
//! ```ignore
//! use actors::{BatchEngine, StartBatchRequest, analyzer};
//!
//! let analyzer = analyzer!("echo", |url, _cancel| Ok(serde_json::json!({ "url": url })));
//! let engine = BatchEngine::start(config, store, Arc::new(analyzer)).await?;
//! let job_id = engine.start_batch(StartBatchRequest::new("sites", urls)).await?;
//! let progress = engine.wait_for_job(job_id, Duration::from_secs(60)).await?;
//! ```

mod analyzer;
mod engine;
mod messages;
mod persistence;
mod runner;
mod scheduler;

pub use analyzer::{AnalysisFuture, AnalysisResult, Analyzer, FnAnalyzer};
pub use engine::{BatchEngine, INTERRUPTED_ERROR, StartBatchRequest};
pub use messages::{CleanupReport, SchedulerMessage};
pub use persistence::{PersistenceError, QUEUE_STATUS_SNAPSHOT, StatePersistence};
pub use runner::{BatchRunner, RunControl};
pub use scheduler::{Scheduler, SchedulerArgs};

/// Re-export for analyzer implementations.
pub use tokio_util::sync::CancellationToken;
