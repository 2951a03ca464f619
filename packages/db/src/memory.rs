//! In-process store, used for tests and when no database is configured.

use std::collections::HashMap;

use async_trait::async_trait;
use batch_core::{BatchJob, ItemRecord, JobFilter, JobId, JobPage, QueueEntry};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::store::{DEFAULT_PAGE_SIZE, StateStore};
use crate::DbError;

#[derive(Default)]
struct MemoryState {
    jobs: HashMap<JobId, BatchJob>,
    items: HashMap<JobId, Vec<ItemRecord>>,
    entries: HashMap<JobId, QueueEntry>,
}

/// A [`StateStore`] kept entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn create_job(&self, job: &BatchJob) -> Result<(), DbError> {
        let mut state = self.state.write().await;
        if state.jobs.contains_key(&job.id) {
            return Err(DbError::Query(format!("Job already exists: {}", job.id)));
        }
        state.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> Result<Option<BatchJob>, DbError> {
        Ok(self.state.read().await.jobs.get(&id).cloned())
    }

    async fn update_job(&self, job: &BatchJob) -> Result<(), DbError> {
        let mut state = self.state.write().await;
        match state.jobs.get_mut(&job.id) {
            Some(stored) => {
                *stored = job.clone();
                Ok(())
            }
            None => Err(DbError::NotFound(format!("Job not found: {}", job.id))),
        }
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<JobPage, DbError> {
        let state = self.state.read().await;
        let mut jobs: Vec<&BatchJob> = state.jobs.values().filter(|j| filter.matches(j)).collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.0.cmp(&a.id.0)));

        let limit = filter.limit.unwrap_or(DEFAULT_PAGE_SIZE);
        let offset = filter.offset.unwrap_or(0);
        Ok(JobPage {
            total: jobs.len(),
            jobs: jobs.into_iter().skip(offset).take(limit).cloned().collect(),
            limit,
            offset,
        })
    }

    async fn save_entry(&self, entry: &QueueEntry) -> Result<(), DbError> {
        self.state
            .write()
            .await
            .entries
            .insert(entry.job_id, entry.clone());
        Ok(())
    }

    async fn get_entry_for_job(&self, job_id: JobId) -> Result<Option<QueueEntry>, DbError> {
        Ok(self.state.read().await.entries.get(&job_id).cloned())
    }

    async fn insert_items(&self, items: &[ItemRecord]) -> Result<(), DbError> {
        let mut state = self.state.write().await;
        for item in items {
            let records = state.items.entry(item.job_id).or_default();
            if records.iter().any(|r| r.index == item.index) {
                return Err(DbError::Query(format!(
                    "Item {} of job {} already exists",
                    item.index, item.job_id
                )));
            }
            records.push(item.clone());
        }
        Ok(())
    }

    async fn update_item(&self, item: &ItemRecord) -> Result<(), DbError> {
        let mut state = self.state.write().await;
        let stored = state
            .items
            .get_mut(&item.job_id)
            .and_then(|records| records.iter_mut().find(|r| r.index == item.index))
            .ok_or_else(|| {
                DbError::NotFound(format!("Item {} of job {}", item.index, item.job_id))
            })?;
        *stored = item.clone();
        Ok(())
    }

    async fn list_items(&self, job_id: JobId) -> Result<Vec<ItemRecord>, DbError> {
        let state = self.state.read().await;
        let mut items = state.items.get(&job_id).cloned().unwrap_or_default();
        items.sort_by_key(|i| i.index);
        Ok(items)
    }

    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let mut state = self.state.write().await;
        let expired: Vec<JobId> = state
            .jobs
            .values()
            .filter(|j| j.status.is_terminal() && j.completed_at.is_some_and(|c| c < cutoff))
            .map(|j| j.id)
            .collect();

        for id in &expired {
            state.jobs.remove(id);
            state.items.remove(id);
            state.entries.remove(id);
        }
        Ok(expired.len())
    }
}
