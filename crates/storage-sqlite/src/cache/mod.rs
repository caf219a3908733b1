//! SQLite persistence for the local entity cache.

mod model;
mod repository;

pub use model::CachedEntityDB;
pub use repository::SqliteEntityCacheStore;
