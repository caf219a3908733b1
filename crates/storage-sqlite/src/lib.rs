//! SQLite persistence for remindly: connection pool, single writer,
//! embedded migrations, the durable outbox and the entity cache store.

pub mod cache;
pub mod db;
pub mod errors;
pub mod outbox;
pub mod schema;

pub use cache::SqliteEntityCacheStore;
pub use db::{create_pool, get_connection, init, run_migrations, spawn_writer, DbPool, WriteHandle};
pub use errors::StorageError;
pub use outbox::SqliteOutboxStore;
