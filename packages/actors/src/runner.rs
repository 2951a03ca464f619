//! Batch runner: executes one admitted job's items under a bounded pool.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use batch_core::{
    BatchError, BatchJob, FailureReason, ItemRecord, ItemStatus, JobEvent, JobStatus,
    PerformanceMetrics, step,
};
use chrono::Utc;
use db::StateStore;
use futures_util::FutureExt;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::analyzer::Analyzer;

/// Per-item execution limits, copied out of the job.
#[derive(Debug, Clone, Copy)]
struct ItemLimits {
    timeout: Duration,
    max_retries: u32,
}

const ACTIVE: u8 = 0;
const CANCEL_REQUESTED: u8 = 1;
const SETTLED: u8 = 2;

/// Cancellation handle shared by the scheduler and one job's runner.
///
/// A job is either cancelled or settles with its own outcome, never both.
#[derive(Clone, Default)]
pub struct RunControl {
    token: CancellationToken,
    state: Arc<AtomicU8>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    ///
    /// Returns `false` when the job already settled or cancellation was
    /// already requested.
    pub fn cancel(&self) -> bool {
        let requested = self
            .state
            .compare_exchange(ACTIVE, CANCEL_REQUESTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if requested {
            self.token.cancel();
        }
        requested
    }

    /// Mark the run finished. Returns `false` if cancellation came first.
    fn settle(&self) -> bool {
        self.state
            .compare_exchange(ACTIVE, SETTLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Runs jobs handed over by the scheduler.
///
/// A runner is the only writer of its job's counters and item records while
/// the job executes. Store failures after the items were created are logged
/// and never stop the run.
#[derive(Clone)]
pub struct BatchRunner {
    store: Arc<dyn StateStore>,
    analyzer: Arc<dyn Analyzer>,
    events: broadcast::Sender<JobEvent>,
}

impl BatchRunner {
    pub fn new(
        store: Arc<dyn StateStore>,
        analyzer: Arc<dyn Analyzer>,
        events: broadcast::Sender<JobEvent>,
    ) -> Self {
        Self {
            store,
            analyzer,
            events,
        }
    }

    /// Execute every item of `job` and return the finished job.
    ///
    /// Only a job that cannot start (bad shape, or item records that cannot
    /// be written) yields an error; such a job ends `failed`. Item failures
    /// are recorded on the items and counted, never returned.
    pub async fn run(&self, mut job: BatchJob, control: RunControl) -> Result<BatchJob, BatchError> {
        if let Err(e) = job.validate() {
            tracing::error!("Job {} rejected: {}", job.id, e);
            control.settle();
            self.fail_to_start(&mut job, &e).await;
            return Err(e);
        }

        let records: Vec<ItemRecord> = job
            .items
            .iter()
            .enumerate()
            .map(|(index, key)| {
                let external_id = job
                    .external_ids
                    .as_ref()
                    .and_then(|ids| ids.get(index).cloned());
                ItemRecord::pending(job.id, index, key.clone(), external_id)
            })
            .collect();

        if let Err(e) = self.store.insert_items(&records).await {
            let e = BatchError::from(e);
            tracing::error!("Job {} could not create its item records: {}", job.id, e);
            control.settle();
            self.fail_to_start(&mut job, &e).await;
            return Err(e);
        }

        job.status = JobStatus::Processing;
        job.started_at = Some(Utc::now());
        self.persist_job(&job).await;

        tracing::info!(
            "Job {} started with {} items (batch size {}, analyzer '{}')",
            job.id,
            job.total_items,
            job.batch_size,
            self.analyzer.name()
        );
        self.emit(JobEvent::JobStarted {
            job_id: job.id,
            tier: job.priority.tier(),
            total_items: job.total_items,
            timestamp: Utc::now(),
        });

        let started = Instant::now();
        let limits = ItemLimits {
            timeout: Duration::from_millis(job.item_timeout_ms),
            max_retries: job.max_retries,
        };
        let slots = Arc::new(Semaphore::new(job.batch_size));

        // Items keep running while this loop awaits the store.
        let mut units = JoinSet::new();
        for record in records {
            let runner = self.clone();
            let slots = slots.clone();
            let cancel = control.token.clone();
            units.spawn(async move { runner.run_item(record, slots, cancel, limits).await });
        }

        let mut item_time_ms = 0u64;
        while let Some(joined) = units.join_next().await {
            let record = match joined {
                Ok(record) => record,
                Err(e) => {
                    tracing::error!("Item task of job {} failed: {}", job.id, e);
                    job.failed_count += 1;
                    self.persist_job(&job).await;
                    continue;
                }
            };
            match record.status {
                ItemStatus::Completed => job.completed_count += 1,
                ItemStatus::Failed => job.failed_count += 1,
                ItemStatus::Cancelled => job.cancelled_count += 1,
                ItemStatus::Pending | ItemStatus::Processing => {}
            }
            item_time_ms += record.duration_ms.unwrap_or(0);
            self.persist_job(&job).await;
        }

        job.status = if !control.settle() {
            JobStatus::Cancelled
        } else if job.failed_count == 0 {
            JobStatus::Completed
        } else {
            JobStatus::CompletedWithErrors
        };
        job.completed_at = Some(Utc::now());
        job.metrics = performance(&job, started.elapsed(), item_time_ms);
        self.persist_job(&job).await;

        tracing::info!(
            "Job {} finished as {}: {} completed, {} failed, {} cancelled",
            job.id,
            job.status,
            job.completed_count,
            job.failed_count,
            job.cancelled_count
        );
        self.emit_finished(&job);

        Ok(job)
    }

    async fn run_item(
        &self,
        mut record: ItemRecord,
        slots: Arc<Semaphore>,
        cancel: CancellationToken,
        limits: ItemLimits,
    ) -> ItemRecord {
        record.current_step = step::WAITING_FOR_SLOT.to_string();

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = slots.acquire_owned() => permit.ok(),
        };
        let Some(_permit) = permit.filter(|_| !cancel.is_cancelled()) else {
            record.mark_cancelled();
            tracing::debug!("Item {} of job {} cancelled before start", record.index, record.job_id);
            self.persist_item(&record).await;
            return record;
        };

        record.mark_processing();
        self.persist_item(&record).await;
        self.emit(JobEvent::ItemStarted {
            job_id: record.job_id,
            index: record.index,
            item_key: record.item_key.clone(),
            timestamp: Utc::now(),
        });

        let started = Instant::now();
        loop {
            record.current_step = step::ANALYZING.to_string();
            match self.attempt(&record.item_key, limits.timeout).await {
                Ok(result) => {
                    record.mark_completed(result, elapsed_ms(started));
                    break;
                }
                Err((reason, message)) => {
                    if record.retry_count < limits.max_retries && !cancel.is_cancelled() {
                        record.retry_count += 1;
                        record.current_step = step::RETRYING.to_string();
                        tracing::debug!(
                            "Retrying item {} of job {} ({}/{}): {}",
                            record.index,
                            record.job_id,
                            record.retry_count,
                            limits.max_retries,
                            message
                        );
                        self.persist_item(&record).await;
                        continue;
                    }
                    record.mark_failed(reason, message, elapsed_ms(started));
                    break;
                }
            }
        }

        self.persist_item(&record).await;

        match (&record.failure_reason, &record.error) {
            (Some(reason), Some(error)) => {
                tracing::debug!(
                    "Item {} of job {} failed ({}): {}",
                    record.index,
                    record.job_id,
                    reason.as_str(),
                    error
                );
                self.emit(JobEvent::ItemFailed {
                    job_id: record.job_id,
                    index: record.index,
                    item_key: record.item_key.clone(),
                    reason: *reason,
                    error: error.clone(),
                    timestamp: Utc::now(),
                });
            }
            _ => {
                tracing::debug!("Item {} of job {} completed", record.index, record.job_id);
                self.emit(JobEvent::ItemCompleted {
                    job_id: record.job_id,
                    index: record.index,
                    item_key: record.item_key.clone(),
                    duration_ms: record.duration_ms.unwrap_or(0),
                    timestamp: Utc::now(),
                });
            }
        }

        record
    }

    /// One analyzer call raced against the item timeout.
    async fn attempt(
        &self,
        item_key: &str,
        timeout: Duration,
    ) -> Result<serde_json::Value, (FailureReason, String)> {
        let token = CancellationToken::new();
        let analyzer = self.analyzer.clone();
        let key = item_key.to_string();
        let call_token = token.clone();
        let call = AssertUnwindSafe(async move { analyzer.analyze(&key, call_token).await })
            .catch_unwind();

        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(message))) => Err((
                FailureReason::ExecutionError,
                BatchError::ItemExecution {
                    item_key: item_key.to_string(),
                    message,
                }
                .to_string(),
            )),
            Ok(Err(panic)) => Err((
                FailureReason::ExecutionError,
                BatchError::ItemExecution {
                    item_key: item_key.to_string(),
                    message: format!("analyzer panicked: {}", panic_message(panic.as_ref())),
                }
                .to_string(),
            )),
            Err(_) => {
                token.cancel();
                Err((
                    FailureReason::Timeout,
                    BatchError::ItemTimeout {
                        item_key: item_key.to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    }
                    .to_string(),
                ))
            }
        }
    }

    async fn fail_to_start(&self, job: &mut BatchJob, error: &BatchError) {
        job.mark_failed(error.to_string());
        self.persist_job(job).await;
        self.emit_finished(job);
    }

    async fn persist_job(&self, job: &BatchJob) {
        if let Err(e) = self.store.update_job(job).await {
            tracing::warn!("Failed to persist job {}: {}", job.id, e);
        }
    }

    async fn persist_item(&self, record: &ItemRecord) {
        if let Err(e) = self.store.update_item(record).await {
            tracing::warn!(
                "Failed to persist item {} of job {}: {}",
                record.index,
                record.job_id,
                e
            );
        }
    }

    fn emit_finished(&self, job: &BatchJob) {
        self.emit(JobEvent::JobFinished {
            job_id: job.id,
            status: job.status,
            completed: job.completed_count,
            failed: job.failed_count,
            duration_ms: job.metrics.total_duration_ms,
            timestamp: Utc::now(),
        });
    }

    fn emit(&self, event: JobEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn performance(job: &BatchJob, elapsed: Duration, item_time_ms: u64) -> PerformanceMetrics {
    let finished = job.completed_count + job.failed_count;
    let secs = elapsed.as_secs_f64();

    PerformanceMetrics {
        success_rate: if finished > 0 {
            job.completed_count as f64 / finished as f64 * 100.0
        } else {
            0.0
        },
        total_duration_ms: elapsed.as_millis() as u64,
        avg_item_duration_ms: if finished > 0 {
            item_time_ms as f64 / finished as f64
        } else {
            0.0
        },
        items_per_second: if secs > 0.0 { finished as f64 / secs } else { 0.0 },
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
