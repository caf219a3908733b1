//! Domain entities synchronized with the remote store.
//!
//! Entities never reference the outbox; pending mutations point at entities
//! by `(SyncEntity, id)` only.

mod category;
mod qr_code;
mod recurrence;
mod template;
mod timer;

pub use category::{Category, NewCategory};
pub use qr_code::{NewQrCode, QrCode};
pub use recurrence::{Frequency, Recurrence};
pub use template::{NewTimerTemplate, TimerTemplate};
pub use timer::{NewTimer, Timer};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::Result;
use crate::sync::SyncEntity;

/// A row type that can travel through the outbox and the remote store.
pub trait SyncedEntity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const ENTITY: SyncEntity;

    fn id(&self) -> &str;

    /// Business-rule validation applied before a local write and before replay.
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// Time-ordered UUIDv7.
pub(crate) fn new_entity_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

pub(crate) fn require_non_blank(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(crate::Error::invalid_input(format!(
            "{} must not be empty",
            field
        )));
    }
    Ok(())
}
