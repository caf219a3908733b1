//! SQLite persistence for the outbox and its dead letters.

mod model;
mod repository;

pub use model::{DeadLetterDB, NewPendingMutationDB, OutboxFailureDB, PendingMutationDB};
pub use repository::SqliteOutboxStore;
