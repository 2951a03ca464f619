use db::{DbConfig, DbError, SurrealStore};

/// A fresh in-memory SurrealDB store; every `mem://` connection is isolated.
pub async fn surreal_store() -> Result<SurrealStore, DbError> {
    SurrealStore::connect(&DbConfig::memory().with_database("test")).await
}
