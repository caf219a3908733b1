use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{new_entity_id, require_non_blank, SyncedEntity};
use crate::errors::Result;
use crate::sync::SyncEntity;

/// Scannable code that starts or dismisses a timer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QrCode {
    pub id: String,
    pub label: String,
    pub content: String,
    pub timer_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewQrCode {
    pub label: String,
    pub content: String,
    pub timer_id: Option<String>,
}

impl QrCode {
    pub fn new(new_code: NewQrCode) -> Self {
        Self {
            id: new_entity_id(),
            label: new_code.label,
            content: new_code.content,
            timer_id: new_code.timer_id,
            created_at: Utc::now(),
        }
    }
}

impl SyncedEntity for QrCode {
    const ENTITY: SyncEntity = SyncEntity::QrCode;

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> Result<()> {
        require_non_blank("qr code id", &self.id)?;
        require_non_blank("qr code content", &self.content)
    }
}
