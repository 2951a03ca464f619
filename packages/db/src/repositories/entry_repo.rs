//! Queue entry repository.

use batch_core::{JobId, QueueEntry};
use serde::{Deserialize, Serialize};

use crate::{Database, DbError};

/// Stored shape of a queue entry.
#[derive(Debug, Serialize, Deserialize)]
struct EntryDocument {
    job_id: String,
    tier: String,
    status: String,
    enqueued_ms: i64,
    record: QueueEntry,
}

/// Repository for queue entry persistence.
#[derive(Clone)]
pub struct EntryRepository {
    db: Database,
}

impl EntryRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace an entry, keyed by entry id.
    pub async fn upsert(&self, entry: &QueueEntry) -> Result<(), DbError> {
        let doc = EntryDocument {
            job_id: entry.job_id.to_string(),
            tier: entry.tier.as_str().to_string(),
            status: entry.status.as_str().to_string(),
            enqueued_ms: entry.enqueued_at.timestamp_millis(),
            record: entry.clone(),
        };

        let _: Option<EntryDocument> = self
            .db
            .upsert(("queue_entry", entry.id.to_string()))
            .content(doc)
            .await?;

        Ok(())
    }

    /// The most recently enqueued entry of a job.
    pub async fn latest_for_job(&self, job_id: JobId) -> Result<Option<QueueEntry>, DbError> {
        let mut result = self
            .db
            .query(
                "SELECT * FROM queue_entry WHERE job_id = $job_id ORDER BY enqueued_ms DESC LIMIT 1",
            )
            .bind(("job_id", job_id.to_string()))
            .await?;

        let records: Vec<EntryDocument> = result.take(0)?;
        Ok(records.into_iter().next().map(|r| r.record))
    }

    /// Delete the entries of the given jobs.
    pub async fn delete_for_jobs(&self, job_ids: Vec<String>) -> Result<(), DbError> {
        self.db
            .query("DELETE queue_entry WHERE job_id IN $job_ids")
            .bind(("job_ids", job_ids))
            .await?
            .check()?;
        Ok(())
    }
}
