//! Item record repository.

use batch_core::{ItemRecord, JobId};
use serde::{Deserialize, Serialize};

use crate::{Database, DbError};

/// Stored shape of an item record.
#[derive(Debug, Serialize, Deserialize)]
struct ItemDocument {
    job_id: String,
    item_index: i64,
    status: String,
    record: ItemRecord,
}

impl ItemDocument {
    fn from_item(item: &ItemRecord) -> Self {
        Self {
            job_id: item.job_id.to_string(),
            item_index: item.index as i64,
            status: item.status.as_str().to_string(),
            record: item.clone(),
        }
    }
}

/// Repository for per-item records.
#[derive(Clone)]
pub struct ItemRepository {
    db: Database,
}

impl ItemRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert all records in a single statement.
    pub async fn insert_many(&self, items: &[ItemRecord]) -> Result<(), DbError> {
        if items.is_empty() {
            return Ok(());
        }

        let rows: Vec<ItemDocument> = items.iter().map(ItemDocument::from_item).collect();

        self.db
            .query("INSERT INTO batch_item $rows")
            .bind(("rows", rows))
            .await?
            .check()?;

        Ok(())
    }

    /// Replace the record with the same job id and item index.
    pub async fn update(&self, item: &ItemRecord) -> Result<(), DbError> {
        let doc = ItemDocument::from_item(item);

        let mut result = self
            .db
            .query(
                "UPDATE batch_item SET status = $status, record = $record \
                 WHERE job_id = $job_id AND item_index = $item_index RETURN AFTER",
            )
            .bind(("status", doc.status))
            .bind(("record", doc.record))
            .bind(("job_id", doc.job_id))
            .bind(("item_index", doc.item_index))
            .await?;

        let updated: Vec<ItemDocument> = result.take(0)?;
        if updated.is_empty() {
            return Err(DbError::NotFound(format!(
                "Item {} of job {}",
                item.index, item.job_id
            )));
        }
        Ok(())
    }

    /// Records of a job in item order.
    pub async fn list_for_job(&self, job_id: JobId) -> Result<Vec<ItemRecord>, DbError> {
        let mut result = self
            .db
            .query("SELECT * FROM batch_item WHERE job_id = $job_id ORDER BY item_index ASC")
            .bind(("job_id", job_id.to_string()))
            .await?;

        let records: Vec<ItemDocument> = result.take(0)?;
        Ok(records.into_iter().map(|r| r.record).collect())
    }

    /// Delete the records of the given jobs.
    pub async fn delete_for_jobs(&self, job_ids: Vec<String>) -> Result<(), DbError> {
        self.db
            .query("DELETE batch_item WHERE job_id IN $job_ids")
            .bind(("job_ids", job_ids))
            .await?
            .check()?;
        Ok(())
    }
}
