//! Remindly offline-first sync core.
//!
//! Domain entities, the durable outbox contract, the drain engine with its
//! triggers, the local entity cache and the repository facade used by the UI.
//! Storage and transport live in `remindly-storage-sqlite` and
//! `remindly-remote`.

pub mod cache;
pub mod config;
pub mod entities;
pub mod errors;
pub mod remote;
pub mod repository;
pub mod retry;
pub mod sync;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use config::SyncConfig;
pub use errors::{Error, Result};
pub use repository::{SyncRepository, WriteResult};
pub use retry::{Failure, Outcome, RetryPolicy};
