//! Repository implementations for database operations.

mod entry_repo;
mod item_repo;
mod job_repo;

pub use entry_repo::EntryRepository;
pub use item_repo::ItemRepository;
pub use job_repo::JobRepository;
