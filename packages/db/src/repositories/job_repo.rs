//! Job repository for CRUD operations.

use batch_core::{BatchJob, JobFilter, JobId, JobPage, JobStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::DEFAULT_PAGE_SIZE;
use crate::{Database, DbError};

/// Statuses a job can be cleaned up in.
const TERMINAL_STATUSES: [JobStatus; 4] = [
    JobStatus::Completed,
    JobStatus::CompletedWithErrors,
    JobStatus::Failed,
    JobStatus::Cancelled,
];

/// Stored shape of a job: the job itself plus columns to query on.
#[derive(Debug, Serialize, Deserialize)]
struct JobDocument {
    job_id: String,
    status: String,
    priority: String,
    created_ms: i64,
    #[serde(default)]
    completed_ms: Option<i64>,
    record: BatchJob,
}

impl JobDocument {
    fn from_job(job: &BatchJob) -> Self {
        Self {
            job_id: job.id.to_string(),
            status: job.status.as_str().to_string(),
            priority: job.priority.as_str().to_string(),
            created_ms: job.created_at.timestamp_millis(),
            completed_ms: job.completed_at.map(|c| c.timestamp_millis()),
            record: job.clone(),
        }
    }
}

/// Repository for job persistence operations.
#[derive(Clone)]
pub struct JobRepository {
    db: Database,
}

impl JobRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new job in the database.
    pub async fn create(&self, job: &BatchJob) -> Result<BatchJob, DbError> {
        let record: Option<JobDocument> = self
            .db
            .create(("batch_job", job.id.to_string()))
            .content(JobDocument::from_job(job))
            .await?;

        record
            .map(|r| r.record)
            .ok_or_else(|| DbError::Query("Failed to create job".into()))
    }

    /// Get a job by ID.
    pub async fn get(&self, id: JobId) -> Result<Option<BatchJob>, DbError> {
        let record: Option<JobDocument> = self.db.select(("batch_job", id.to_string())).await?;
        Ok(record.map(|r| r.record))
    }

    /// Replace a job.
    pub async fn update(&self, job: &BatchJob) -> Result<BatchJob, DbError> {
        let record: Option<JobDocument> = self
            .db
            .update(("batch_job", job.id.to_string()))
            .content(JobDocument::from_job(job))
            .await?;

        record
            .map(|r| r.record)
            .ok_or_else(|| DbError::NotFound(format!("Job not found: {}", job.id)))
    }

    /// List jobs with optional filtering, newest first.
    pub async fn list(&self, filter: &JobFilter) -> Result<JobPage, DbError> {
        let mut conditions = Vec::new();
        let mut bindings: Vec<(&str, serde_json::Value)> = Vec::new();

        if let Some(status) = &filter.status {
            conditions.push("status = $status");
            bindings.push(("status", serde_json::json!(status.as_str())));
        }

        if let Some(priority) = &filter.priority {
            conditions.push("priority = $priority");
            bindings.push(("priority", serde_json::json!(priority.as_str())));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let limit = filter.limit.unwrap_or(DEFAULT_PAGE_SIZE);
        let offset = filter.offset.unwrap_or(0);

        let query = format!(
            "SELECT * FROM batch_job {where_clause} ORDER BY created_ms DESC LIMIT {limit} START {offset}; \
             SELECT count() FROM batch_job {where_clause} GROUP ALL;"
        );

        let mut result = self.db.query(&query);

        for (name, value) in bindings {
            result = result.bind((name, value));
        }

        let mut response = result.await?;
        let records: Vec<JobDocument> = response.take(0)?;

        #[derive(Deserialize)]
        struct CountResult {
            count: i64,
        }

        let counts: Vec<CountResult> = response.take(1)?;
        let total = counts.first().map_or(0, |c| c.count.max(0) as usize);

        Ok(JobPage {
            jobs: records.into_iter().map(|r| r.record).collect(),
            total,
            limit,
            offset,
        })
    }

    /// IDs of terminal jobs completed before `cutoff`.
    pub async fn finished_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, DbError> {
        let statuses: Vec<&'static str> = TERMINAL_STATUSES.iter().map(|s| s.as_str()).collect();

        let mut result = self
            .db
            .query(
                r#"
                SELECT VALUE job_id FROM batch_job
                WHERE status IN $statuses
                  AND completed_ms != NONE
                  AND completed_ms < $cutoff
                "#,
            )
            .bind(("statuses", statuses))
            .bind(("cutoff", cutoff.timestamp_millis()))
            .await?;

        let ids: Vec<String> = result.take(0)?;
        Ok(ids)
    }

    /// Delete jobs by ID.
    pub async fn delete_many(&self, job_ids: Vec<String>) -> Result<(), DbError> {
        self.db
            .query("DELETE batch_job WHERE job_id IN $job_ids")
            .bind(("job_ids", job_ids))
            .await?
            .check()?;
        Ok(())
    }
}
