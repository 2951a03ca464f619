//! Engine facade: submission, progress, control and introspection.

use std::sync::Arc;
use std::time::Duration;

use batch_core::{
    AggregateStatus, BatchError, BatchJob, EngineConfig, ItemError, ItemRecord, ItemStatus,
    JobEvent, JobFilter, JobId, JobPage, JobProgress, JobStatus, Priority, QueueEntry, Tier,
};
use db::{DEFAULT_PAGE_SIZE, StateStore};
use ractor::concurrency::JoinHandle;
use ractor::rpc::CallResult;
use ractor::{Actor, ActorRef, RpcReplyPort};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::analyzer::Analyzer;
use crate::messages::{CleanupReport, SchedulerMessage};
use crate::scheduler::{Scheduler, SchedulerArgs};

/// How long a caller waits for the scheduler to answer.
const CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// How often [`BatchEngine::wait_for_job`] polls the store.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Error recorded on jobs left unfinished by a previous process.
pub const INTERRUPTED_ERROR: &str = "interrupted: the engine stopped before the job finished";

/// A batch submission.
///
/// Unset limits fall back to the engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartBatchRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub items: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ids: Option<Vec<String>>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub item_timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl StartBatchRequest {
    pub fn new(name: impl Into<String>, items: Vec<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            items,
            external_ids: None,
            priority: Priority::default(),
            batch_size: None,
            item_timeout_ms: None,
            max_retries: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_external_ids(mut self, external_ids: Vec<String>) -> Self {
        self.external_ids = Some(external_ids);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Build the pending job, applying engine defaults.
    fn into_job(self, config: &EngineConfig) -> BatchJob {
        let mut job = BatchJob::new(self.name, self.items)
            .with_priority(self.priority)
            .with_batch_size(self.batch_size.unwrap_or(config.default_batch_size))
            .with_item_timeout_ms(self.item_timeout_ms.unwrap_or(config.default_item_timeout_ms))
            .with_max_retries(self.max_retries.unwrap_or(config.default_max_retries));
        if let Some(description) = self.description {
            job = job.with_description(description);
        }
        if let Some(ids) = self.external_ids {
            job = job.with_external_ids(ids);
        }
        job
    }
}

/// Check a new job's shape and the engine-wide limits.
fn check_submission(job: &BatchJob, config: &EngineConfig) -> Result<(), BatchError> {
    job.validate()?;
    if job.batch_size > config.max_batch_size {
        return Err(BatchError::Validation(format!(
            "batch_size {} exceeds the maximum of {}",
            job.batch_size, config.max_batch_size
        )));
    }
    if let Some(max) = config.max_items_per_job
        && job.total_items > max
    {
        return Err(BatchError::Validation(format!(
            "{} items exceed the maximum of {} per job",
            job.total_items, max
        )));
    }
    if job.item_timeout_ms == 0 {
        return Err(BatchError::Validation("item timeout must be positive".into()));
    }
    Ok(())
}

/// A running batch engine.
///
/// Owns the scheduler actor and the store handle. Dropping the engine
/// without calling [`BatchEngine::shutdown`] leaves the scheduler running
/// until the runtime stops.
pub struct BatchEngine {
    scheduler: ActorRef<SchedulerMessage>,
    handle: JoinHandle<()>,
    store: Arc<dyn StateStore>,
    events: broadcast::Sender<JobEvent>,
    config: EngineConfig,
}

impl BatchEngine {
    /// Validate `config`, recover interrupted jobs and start the scheduler.
    pub async fn start(
        config: EngineConfig,
        store: Arc<dyn StateStore>,
        analyzer: Arc<dyn Analyzer>,
    ) -> Result<Self, BatchError> {
        config
            .validate()
            .map_err(|e| BatchError::Config(e.to_string()))?;

        let recovered = recover_interrupted(store.as_ref()).await?;
        if recovered > 0 {
            tracing::warn!("Marked {} interrupted jobs as failed", recovered);
        }

        let (events, _) = broadcast::channel(1024);
        let args = SchedulerArgs {
            config: config.clone(),
            store: store.clone(),
            analyzer,
            events: events.clone(),
        };

        let (scheduler, handle) = Actor::spawn(None, Scheduler, args)
            .await
            .map_err(|e| BatchError::Scheduler(format!("Failed to spawn scheduler: {}", e)))?;

        Ok(Self {
            scheduler,
            handle,
            store,
            events,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Store a new job and admit it into its tier.
    ///
    /// Bad submissions are stored as `failed` and return a validation
    /// error; a full tier marks the job `failed` and returns `QueueFull`.
    pub async fn start_batch(&self, request: StartBatchRequest) -> Result<JobId, BatchError> {
        let mut job = request.into_job(&self.config);
        if let Err(e) = check_submission(&job, &self.config) {
            tracing::warn!("Rejected batch '{}': {}", job.name, e);
            job.mark_failed(e.to_string());
            if let Err(store_err) = self.store.create_job(&job).await {
                tracing::warn!("Failed to record rejected job {}: {}", job.id, store_err);
            }
            return Err(e);
        }

        self.store.create_job(&job).await?;

        let job_id = job.id;
        let submitted = self
            .ask(|reply| SchedulerMessage::Submit {
                job: Box::new(job.clone()),
                reply,
            })
            .await
            .and_then(|result| result);

        match submitted {
            Ok(entry) => {
                tracing::debug!("Job {} admitted as entry {}", job_id, entry.id);
                Ok(job_id)
            }
            Err(e) => {
                job.mark_failed(e.to_string());
                if let Err(store_err) = self.store.update_job(&job).await {
                    tracing::warn!("Failed to record rejected job {}: {}", job_id, store_err);
                }
                Err(e)
            }
        }
    }

    /// Counters, timing and failed items of a job.
    pub async fn get_progress(&self, job_id: JobId) -> Result<JobProgress, BatchError> {
        let job = self.load_job(job_id).await?;
        let error_log = self
            .store
            .list_items(job_id)
            .await?
            .into_iter()
            .filter(|item| item.status == ItemStatus::Failed)
            .filter_map(|item| {
                Some(ItemError {
                    reason: item.failure_reason?,
                    message: item.error.unwrap_or_default(),
                    item_key: item.item_key,
                })
            })
            .collect();

        Ok(JobProgress::from_job(&job, error_log))
    }

    /// Item records of a job, in item order.
    pub async fn job_items(&self, job_id: JobId) -> Result<Vec<ItemRecord>, BatchError> {
        self.load_job(job_id).await?;
        let mut items = self.store.list_items(job_id).await?;
        items.sort_by_key(|item| item.index);
        Ok(items)
    }

    /// Cancel a queued or running job. Returns `false` if there was nothing
    /// to cancel.
    pub async fn cancel_job(&self, job_id: JobId) -> Result<bool, BatchError> {
        self.ask(|reply| SchedulerMessage::Cancel { job_id, reply })
            .await
    }

    /// A page of jobs, newest first.
    pub async fn list_jobs(&self, filter: JobFilter) -> Result<JobPage, BatchError> {
        Ok(self.store.list_jobs(&filter).await?)
    }

    /// Purge finished queue history and finished jobs older than `max_age`.
    pub async fn cleanup_older_than(&self, max_age: Duration) -> Result<CleanupReport, BatchError> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| BatchError::Validation(format!("invalid cleanup age: {}", e)))?;
        self.ask(|reply| SchedulerMessage::Cleanup { max_age, reply })
            .await
    }

    /// Status of every tier plus totals.
    pub async fn queue_status(&self) -> Result<AggregateStatus, BatchError> {
        self.ask(|reply| SchedulerMessage::QueueStatus { reply })
            .await
    }

    /// The queue entry of a job and its tier.
    pub async fn find_entry(&self, job_id: JobId) -> Result<Option<(Tier, QueueEntry)>, BatchError> {
        self.ask(|reply| SchedulerMessage::FindEntry { job_id, reply })
            .await
    }

    /// Subscribe to job and item lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Poll until the job reaches a terminal status or `timeout` elapses.
    pub async fn wait_for_job(
        &self,
        job_id: JobId,
        timeout: Duration,
    ) -> Result<JobProgress, BatchError> {
        let poll = async {
            loop {
                let progress = self.get_progress(job_id).await?;
                if progress.status.is_terminal() {
                    return Ok::<_, BatchError>(progress);
                }
                tokio::time::sleep(WAIT_POLL_INTERVAL).await;
            }
        };

        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| BatchError::WaitTimeout {
                job_id,
                timeout_ms: timeout.as_millis() as u64,
            })?
    }

    /// Cancel running jobs, wait for their runners to record the outcome,
    /// then stop the scheduler.
    pub async fn shutdown(self) -> Result<(), BatchError> {
        self.scheduler
            .send_message(SchedulerMessage::Shutdown)
            .map_err(|e| BatchError::Scheduler(e.to_string()))?;
        self.handle
            .await
            .map_err(|e| BatchError::Scheduler(format!("Scheduler task failed: {}", e)))?;
        Ok(())
    }

    async fn load_job(&self, job_id: JobId) -> Result<BatchJob, BatchError> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or(BatchError::JobNotFound(job_id))
    }

    async fn ask<T, F>(&self, build: F) -> Result<T, BatchError>
    where
        T: Send + 'static,
        F: FnOnce(RpcReplyPort<T>) -> SchedulerMessage,
    {
        match ractor::rpc::call(&self.scheduler, build, Some(CALL_TIMEOUT)).await {
            Ok(CallResult::Success(value)) => Ok(value),
            Ok(CallResult::Timeout) => Err(BatchError::Scheduler(
                "scheduler did not reply in time".into(),
            )),
            Ok(CallResult::SenderError) => Err(BatchError::Scheduler(
                "scheduler dropped the request".into(),
            )),
            Err(e) => Err(BatchError::Scheduler(e.to_string())),
        }
    }
}

/// Mark jobs a previous process left `pending` or `processing` as failed.
async fn recover_interrupted(store: &dyn StateStore) -> Result<usize, BatchError> {
    let mut stranded = Vec::new();
    for status in [JobStatus::Pending, JobStatus::Processing] {
        let mut offset = 0;
        loop {
            let filter = JobFilter::default()
                .with_status(status)
                .page(DEFAULT_PAGE_SIZE, offset);
            let page = store.list_jobs(&filter).await?;
            let fetched = page.jobs.len();
            stranded.extend(page.jobs);
            if fetched < DEFAULT_PAGE_SIZE {
                break;
            }
            offset += fetched;
        }
    }

    for job in &mut stranded {
        job.mark_failed(INTERRUPTED_ERROR);
        if let Err(e) = store.update_job(job).await {
            tracing::warn!("Failed to mark job {} as interrupted: {}", job.id, e);
        }
    }

    Ok(stranded.len())
}
