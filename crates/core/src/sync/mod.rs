//! Offline-first sync: outbox contract, drain engine and its triggers.

mod connectivity;
mod outbox_model;
mod runtime;
mod sync_engine;
mod sync_scheduler;

pub use connectivity::*;
pub use outbox_model::*;
pub use runtime::*;
pub use sync_engine::*;
pub use sync_scheduler::*;
