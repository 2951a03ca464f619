//! Persistence for the batch queue.
//!
//! This crate provides the [`StateStore`] trait used by the scheduler and
//! batch runners, with two implementations:
//!
//! - [`MemoryStore`]: in-process maps, for tests and ephemeral runs
//! - [`SurrealStore`]: SurrealDB repositories
//!
//! # Features
//!
//! - `memory` (default): Use in-memory SurrealDB storage
//! - `rocksdb`: Use RocksDB for persistent file-based storage

mod connection;
mod memory;
pub mod repositories;
mod schema;
mod store;
mod surreal;

pub use connection::{Database, DbConfig, DbError, connect_db};
pub use memory::MemoryStore;
pub use schema::init_schema;
pub use store::{DEFAULT_PAGE_SIZE, StateStore};
pub use surreal::SurrealStore;
