//! SurrealDB-backed [`StateStore`].

use async_trait::async_trait;
use batch_core::{BatchJob, ItemRecord, JobFilter, JobId, JobPage, QueueEntry};
use chrono::{DateTime, Utc};

use crate::repositories::{EntryRepository, ItemRepository, JobRepository};
use crate::store::StateStore;
use crate::{Database, DbConfig, DbError, connect_db, init_schema};

/// Store backed by a SurrealDB connection.
#[derive(Clone)]
pub struct SurrealStore {
    db: Database,
    jobs: JobRepository,
    items: ItemRepository,
    entries: EntryRepository,
}

impl SurrealStore {
    /// Connect with `config` and make sure the schema exists.
    pub async fn connect(config: &DbConfig) -> Result<Self, DbError> {
        let db = connect_db(config).await?;
        init_schema(&db).await?;
        Ok(Self::from_database(db))
    }

    /// Wrap an already connected database.
    pub fn from_database(db: Database) -> Self {
        Self {
            jobs: JobRepository::new(db.clone()),
            items: ItemRepository::new(db.clone()),
            entries: EntryRepository::new(db.clone()),
            db,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl StateStore for SurrealStore {
    async fn create_job(&self, job: &BatchJob) -> Result<(), DbError> {
        self.jobs.create(job).await.map(|_| ())
    }

    async fn get_job(&self, id: JobId) -> Result<Option<BatchJob>, DbError> {
        self.jobs.get(id).await
    }

    async fn update_job(&self, job: &BatchJob) -> Result<(), DbError> {
        self.jobs.update(job).await.map(|_| ())
    }

    async fn list_jobs(&self, filter: &JobFilter) -> Result<JobPage, DbError> {
        self.jobs.list(filter).await
    }

    async fn save_entry(&self, entry: &QueueEntry) -> Result<(), DbError> {
        self.entries.upsert(entry).await
    }

    async fn get_entry_for_job(&self, job_id: JobId) -> Result<Option<QueueEntry>, DbError> {
        self.entries.latest_for_job(job_id).await
    }

    async fn insert_items(&self, items: &[ItemRecord]) -> Result<(), DbError> {
        self.items.insert_many(items).await
    }

    async fn update_item(&self, item: &ItemRecord) -> Result<(), DbError> {
        self.items.update(item).await
    }

    async fn list_items(&self, job_id: JobId) -> Result<Vec<ItemRecord>, DbError> {
        self.items.list_for_job(job_id).await
    }

    async fn delete_finished_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let job_ids = self.jobs.finished_before(cutoff).await?;
        if job_ids.is_empty() {
            return Ok(0);
        }

        let removed = job_ids.len();
        self.items.delete_for_jobs(job_ids.clone()).await?;
        self.entries.delete_for_jobs(job_ids.clone()).await?;
        self.jobs.delete_many(job_ids).await?;

        tracing::debug!("Deleted {} finished jobs", removed);
        Ok(removed)
    }
}
