pub mod app_config;
pub mod database;
pub mod memory_repo;
pub mod pg_repo;

pub use database::{Database, PgConnector};
pub use memory_repo::{MemoryConnector, MemoryDatabase, MemoryInventoryRepository};
pub use pg_repo::PostgresInventoryRepository;
