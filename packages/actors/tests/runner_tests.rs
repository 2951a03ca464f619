#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use actors::{BatchRunner, RunControl, analyzer};
use async_trait::async_trait;
use batch_core::{
    BatchError, BatchJob, ItemRecord, ItemStatus, JobFilter, JobId, JobPage, JobStatus,
    QueueEntry,
};
use chrono::{DateTime, Utc};
use db::{DbError, MemoryStore, StateStore};
use tokio::sync::broadcast;

use common::{echo_analyzer, urls};

/// In-memory store with injected faults.
#[derive(Default)]
struct FaultyStore {
    inner: MemoryStore,
    fail_item_inserts: bool,
    job_write_delay: Option<Duration>,
}

#[async_trait]
impl StateStore for FaultyStore {
    async fn create_job(&self, job: &BatchJob) -> Result<(), DbError> {
        self.inner.create_job(job).await
    }

    async fn get_job(&self, id: JobId) -> Result<Option<BatchJob>, DbError> {
        self.inner.get_job(id).await
    }

    async fn update_job(&self, job: &BatchJob) -> Result<(), DbError> {
        if let Some(delay) = self.job_write_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.update_job(job).await
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<JobPage, DbError> {
        self.inner.list_jobs(filter).await
    }

    async fn save_entry(&self, entry: &QueueEntry) -> Result<(), DbError> {
        self.inner.save_entry(entry).await
    }

    async fn get_entry_for_job(&self, job_id: JobId) -> Result<Option<QueueEntry>, DbError> {
        self.inner.get_entry_for_job(job_id).await
    }

    async fn insert_items(&self, items: &[ItemRecord]) -> Result<(), DbError> {
        if self.fail_item_inserts {
            return Err(DbError::Query("disk full".into()));
        }
        self.inner.insert_items(items).await
    }

    async fn update_item(&self, item: &ItemRecord) -> Result<(), DbError> {
        self.inner.update_item(item).await
    }

    async fn list_items(&self, job_id: JobId) -> Result<Vec<ItemRecord>, DbError> {
        self.inner.list_items(job_id).await
    }

    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        self.inner.delete_finished_before(cutoff).await
    }
}

fn runner(store: Arc<dyn StateStore>) -> BatchRunner {
    let (events, _) = broadcast::channel(64);
    BatchRunner::new(store, Arc::new(echo_analyzer()), events)
}

#[tokio::test]
async fn test_item_store_failure_fails_job() -> Result<(), Box<dyn Error>> {
    let store = Arc::new(FaultyStore {
        fail_item_inserts: true,
        ..FaultyStore::default()
    });
    let job = BatchJob::new("no items", urls(3));
    store.create_job(&job).await?;

    let result = runner(store.clone())
        .run(job.clone(), RunControl::new())
        .await;
    assert!(matches!(result, Err(BatchError::StoreUnavailable(_))));

    let stored = store.get_job(job.id).await?.ok_or("job missing")?;
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored.error.is_some_and(|e| e.contains("disk full")));
    assert!(stored.started_at.is_none());
    assert!(store.list_items(job.id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_invalid_job_fails_without_items() -> Result<(), Box<dyn Error>> {
    let store = Arc::new(MemoryStore::new());
    let job = BatchJob::new("mismatch", urls(2)).with_external_ids(vec!["only-one".into()]);
    store.create_job(&job).await?;

    let result = runner(store.clone())
        .run(job.clone(), RunControl::new())
        .await;
    assert!(matches!(result, Err(BatchError::Validation(_))));

    let stored = store.get_job(job.id).await?.ok_or("job missing")?;
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(store.list_items(job.id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_precancelled_job_runs_no_items() -> Result<(), Box<dyn Error>> {
    let store = Arc::new(MemoryStore::new());
    let job = BatchJob::new("cancelled", urls(3));
    store.create_job(&job).await?;

    let control = RunControl::new();
    assert!(control.cancel());
    let finished = runner(store.clone()).run(job.clone(), control).await?;

    assert_eq!(finished.status, JobStatus::Cancelled);
    assert_eq!(finished.cancelled_count, 3);
    assert_eq!(finished.completed_count, 0);
    assert!(
        store
            .list_items(job.id)
            .await?
            .iter()
            .all(|i| i.started_at.is_none())
    );
    Ok(())
}

#[tokio::test]
async fn test_external_ids_paired_with_items() -> Result<(), Box<dyn Error>> {
    let store = Arc::new(MemoryStore::new());
    let job = BatchJob::new("paired", urls(2))
        .with_external_ids(vec!["biz-0".into(), "biz-1".into()]);
    store.create_job(&job).await?;

    let (events, mut rx) = broadcast::channel(64);
    let echo = analyzer!("macro-echo", |url, _cancel| Ok(serde_json::json!({ "seen": url })));
    let finished = BatchRunner::new(store.clone(), Arc::new(echo), events)
        .run(job.clone(), RunControl::new())
        .await?;
    assert_eq!(finished.status, JobStatus::Completed);
    assert!(finished.metrics.total_duration_ms <= 10_000);

    let mut items = store.list_items(job.id).await?;
    items.sort_by_key(|i| i.index);
    assert_eq!(items[0].external_id.as_deref(), Some("biz-0"));
    assert_eq!(items[1].external_id.as_deref(), Some("biz-1"));
    assert_eq!(
        items[1].result,
        Some(serde_json::json!({ "seen": "https://example.com/site/1" }))
    );

    let mut started = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, batch_core::JobEvent::ItemStarted { .. }) {
            started += 1;
        }
    }
    assert_eq!(started, 2);
    Ok(())
}

#[tokio::test]
async fn test_slow_job_writes_do_not_stall_items() -> Result<(), Box<dyn Error>> {
    let store = Arc::new(FaultyStore {
        job_write_delay: Some(Duration::from_millis(300)),
        ..FaultyStore::default()
    });
    let job = BatchJob::new("slow store", vec!["https://e/0".into(), "https://e/1".into()])
        .with_batch_size(2)
        .with_item_timeout_ms(200);
    store.create_job(&job).await?;

    // Item 1 is still working while the job write for item 0 is pending.
    let staged = analyzer!("staged", |url, _cancel| {
        if url.ends_with("/1") {
            tokio::time::sleep(Duration::from_millis(40)).await;
            tokio::time::sleep(Duration::from_millis(40)).await;
        } else {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(serde_json::json!({ "url": url }))
    });
    let (events, _) = broadcast::channel(64);
    let finished = BatchRunner::new(store.clone(), Arc::new(staged), events)
        .run(job.clone(), RunControl::new())
        .await?;

    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(finished.completed_count, 2);
    let items = store.list_items(job.id).await?;
    assert!(items.iter().all(|i| i.status == ItemStatus::Completed));
    assert!(items.iter().all(|i| i.failure_reason.is_none()));
    Ok(())
}

#[tokio::test]
async fn test_cancel_after_settle_keeps_outcome() -> Result<(), Box<dyn Error>> {
    let store = Arc::new(MemoryStore::new());
    let job = BatchJob::new("settled", urls(2));
    store.create_job(&job).await?;

    let control = RunControl::new();
    let finished = runner(store.clone()).run(job.clone(), control.clone()).await?;
    assert_eq!(finished.status, JobStatus::Completed);

    assert!(!control.cancel());
    let stored = store.get_job(job.id).await?.ok_or("job missing")?;
    assert_eq!(stored.status, JobStatus::Completed);
    Ok(())
}
