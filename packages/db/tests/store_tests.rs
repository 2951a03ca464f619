#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;

use batch_core::{
    BatchJob, FailureReason, ItemRecord, ItemStatus, JobFilter, JobId, JobStatus, Priority,
    QueueEntry,
};
use chrono::{Duration, Utc};
use db::{MemoryStore, StateStore, init_schema};

fn urls(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("https://example.com/{i}")).collect()
}

async fn exercise_jobs(store: &dyn StateStore) -> Result<(), Box<dyn Error>> {
    let mut job = BatchJob::new("alpha", urls(3)).with_priority(Priority::High);
    store.create_job(&job).await?;

    let loaded = store.get_job(job.id).await?.ok_or("job missing")?;
    assert_eq!(loaded.id, job.id);
    assert_eq!(loaded.total_items, 3);
    assert_eq!(loaded.status, JobStatus::Pending);

    job.status = JobStatus::Processing;
    job.started_at = Some(Utc::now());
    job.completed_count = 2;
    store.update_job(&job).await?;

    let loaded = store.get_job(job.id).await?.ok_or("job missing")?;
    assert_eq!(loaded.status, JobStatus::Processing);
    assert_eq!(loaded.completed_count, 2);

    assert!(store.get_job(JobId::new()).await?.is_none());

    let missing = BatchJob::new("never stored", urls(1));
    assert!(store.update_job(&missing).await.is_err());

    Ok(())
}

async fn exercise_listing(store: &dyn StateStore) -> Result<(), Box<dyn Error>> {
    let mut ids = Vec::new();
    for i in 0..5 {
        let mut job = BatchJob::new(format!("job-{i}"), urls(1));
        job.created_at = Utc::now() + Duration::milliseconds(i);
        job.priority = if i % 2 == 0 { Priority::Low } else { Priority::Urgent };
        if i == 4 {
            job.mark_failed("store down");
        }
        store.create_job(&job).await?;
        ids.push(job.id);
    }

    let page = store.list_jobs(&JobFilter::default().page(2, 0)).await?;
    assert_eq!(page.total, 5);
    assert_eq!(page.jobs.len(), 2);
    assert_eq!(page.jobs[0].id, ids[4]);
    assert_eq!(page.jobs[1].id, ids[3]);

    let next = store.list_jobs(&JobFilter::default().page(2, 4)).await?;
    assert_eq!(next.jobs.len(), 1);
    assert_eq!(next.jobs[0].id, ids[0]);

    let urgent = store
        .list_jobs(&JobFilter::default().with_priority(Priority::Urgent))
        .await?;
    assert_eq!(urgent.total, 2);
    assert!(urgent.jobs.iter().all(|j| j.priority == Priority::Urgent));

    let failed = store
        .list_jobs(&JobFilter::default().with_status(JobStatus::Failed))
        .await?;
    assert_eq!(failed.total, 1);
    assert_eq!(failed.jobs[0].id, ids[4]);

    Ok(())
}

async fn exercise_items(store: &dyn StateStore) -> Result<(), Box<dyn Error>> {
    let job = BatchJob::new("items", urls(3));
    store.create_job(&job).await?;

    let records: Vec<ItemRecord> = job
        .items
        .iter()
        .enumerate()
        .map(|(i, key)| ItemRecord::pending(job.id, i, key.clone(), Some(format!("ext-{i}"))))
        .collect();
    store.insert_items(&records).await?;

    let mut second = records[1].clone();
    second.mark_processing();
    second.mark_failed(FailureReason::Timeout, "too slow", 50);
    store.update_item(&second).await?;

    let mut first = records[0].clone();
    first.mark_processing();
    first.mark_completed(serde_json::json!({ "score": 7 }), 12);
    store.update_item(&first).await?;

    let items = store.list_items(job.id).await?;
    assert_eq!(items.len(), 3);
    assert_eq!(items[0].status, ItemStatus::Completed);
    assert_eq!(items[0].result, Some(serde_json::json!({ "score": 7 })));
    assert_eq!(items[1].status, ItemStatus::Failed);
    assert_eq!(items[1].failure_reason, Some(FailureReason::Timeout));
    assert_eq!(items[2].status, ItemStatus::Pending);
    assert_eq!(items[2].external_id.as_deref(), Some("ext-2"));

    let stranger = ItemRecord::pending(JobId::new(), 0, "nope", None);
    assert!(store.update_item(&stranger).await.is_err());
    assert!(store.list_items(JobId::new()).await?.is_empty());

    Ok(())
}

async fn exercise_entries_and_cleanup(store: &dyn StateStore) -> Result<(), Box<dyn Error>> {
    let mut old = BatchJob::new("old", urls(1));
    old.status = JobStatus::Completed;
    old.completed_at = Some(Utc::now() - Duration::hours(2));
    store.create_job(&old).await?;
    store
        .insert_items(&[ItemRecord::pending(old.id, 0, "https://example.com/0", None)])
        .await?;

    let entry = QueueEntry::new(old.id, old.priority);
    store.save_entry(&entry).await?;
    let loaded = store.get_entry_for_job(old.id).await?.ok_or("entry missing")?;
    assert_eq!(loaded.id, entry.id);

    let running = BatchJob::new("running", urls(1));
    store.create_job(&running).await?;

    let mut recent = BatchJob::new("recent", urls(1));
    recent.mark_cancelled();
    store.create_job(&recent).await?;

    let removed = store
        .delete_finished_before(Utc::now() - Duration::hours(1))
        .await?;
    assert_eq!(removed, 1);
    assert!(store.get_job(old.id).await?.is_none());
    assert!(store.list_items(old.id).await?.is_empty());
    assert!(store.get_entry_for_job(old.id).await?.is_none());
    assert!(store.get_job(running.id).await?.is_some());
    assert!(store.get_job(recent.id).await?.is_some());

    Ok(())
}

#[tokio::test]
async fn test_memory_store() -> Result<(), Box<dyn Error>> {
    exercise_jobs(&MemoryStore::new()).await?;
    exercise_listing(&MemoryStore::new()).await?;
    exercise_items(&MemoryStore::new()).await?;
    exercise_entries_and_cleanup(&MemoryStore::new()).await?;
    Ok(())
}

#[tokio::test]
async fn test_surreal_store() -> Result<(), Box<dyn Error>> {
    exercise_jobs(&common::surreal_store().await?).await?;
    exercise_listing(&common::surreal_store().await?).await?;
    exercise_items(&common::surreal_store().await?).await?;
    exercise_entries_and_cleanup(&common::surreal_store().await?).await?;
    Ok(())
}

#[tokio::test]
async fn test_memory_store_rejects_duplicates() -> Result<(), Box<dyn Error>> {
    let store = MemoryStore::new();
    let job = BatchJob::new("dup", urls(1));
    store.create_job(&job).await?;
    assert!(store.create_job(&job).await.is_err());

    let item = ItemRecord::pending(job.id, 0, "a", None);
    store.insert_items(std::slice::from_ref(&item)).await?;
    assert!(store.insert_items(&[item]).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_schema_init_reports_statement_errors() -> Result<(), Box<dyn Error>> {
    let store = common::surreal_store().await?;
    let db = store.database();

    // Re-running on an existing schema is fine.
    init_schema(db).await?;

    db.query(
        "REMOVE INDEX batch_job_id ON batch_job; \
         CREATE batch_job SET job_id = 'dup'; \
         CREATE batch_job SET job_id = 'dup';",
    )
    .await?
    .check()?;

    assert!(init_schema(db).await.is_err());
    Ok(())
}
