//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Initialize the database schema.
///
/// This creates all necessary tables and indexes.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    db.query(JOB_SCHEMA).await?.check()?;
    db.query(ITEM_SCHEMA).await?.check()?;
    db.query(ENTRY_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Batch job table schema.
///
/// The full job lives in `record`; the top-level columns exist for
/// filtering and ordering.
const JOB_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS batch_job SCHEMALESS;

DEFINE INDEX IF NOT EXISTS batch_job_id ON batch_job FIELDS job_id UNIQUE;
DEFINE INDEX IF NOT EXISTS batch_job_status ON batch_job FIELDS status;
DEFINE INDEX IF NOT EXISTS batch_job_priority ON batch_job FIELDS priority;
DEFINE INDEX IF NOT EXISTS batch_job_created ON batch_job FIELDS created_ms;
"#;

/// Item record table schema, one row per item of a job.
const ITEM_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS batch_item SCHEMALESS;

DEFINE INDEX IF NOT EXISTS batch_item_key ON batch_item FIELDS job_id, item_index UNIQUE;
DEFINE INDEX IF NOT EXISTS batch_item_status ON batch_item FIELDS job_id, status;
"#;

/// Queue entry table schema.
const ENTRY_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS queue_entry SCHEMALESS;

DEFINE INDEX IF NOT EXISTS queue_entry_job ON queue_entry FIELDS job_id;
DEFINE INDEX IF NOT EXISTS queue_entry_tier ON queue_entry FIELDS tier, status;
"#;
