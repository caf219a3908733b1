use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{new_entity_id, require_non_blank, Recurrence, SyncedEntity};
use crate::errors::Result;
use crate::sync::SyncEntity;

/// A named reminder firing at `target_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timer {
    pub id: String,
    pub title: String,
    pub target_time: DateTime<Utc>,
    pub category_id: Option<String>,
    pub recurrence: Option<Recurrence>,
    pub notes: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTimer {
    pub title: String,
    pub target_time: DateTime<Utc>,
    pub category_id: Option<String>,
    pub recurrence: Option<Recurrence>,
    pub notes: Option<String>,
}

impl Timer {
    /// Builds a timer with a client-generated id.
    pub fn new(new_timer: NewTimer) -> Self {
        let now = Utc::now();
        Self {
            id: new_entity_id(),
            title: new_timer.title,
            target_time: new_timer.target_time,
            category_id: new_timer.category_id,
            recurrence: new_timer.recurrence,
            notes: new_timer.notes,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves a recurring timer to its next occurrence after `now`; one-shot
    /// timers are deactivated instead.
    pub fn roll_forward(&mut self, now: DateTime<Utc>) {
        match self.recurrence.and_then(|rule| rule.next_after(self.target_time, now)) {
            Some(next) => self.target_time = next,
            None => self.is_active = false,
        }
        self.updated_at = now;
    }
}

impl SyncedEntity for Timer {
    const ENTITY: SyncEntity = SyncEntity::Timer;

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> Result<()> {
        require_non_blank("timer id", &self.id)?;
        require_non_blank("timer title", &self.title)?;
        if let Some(rule) = &self.recurrence {
            rule.validate()?;
        }
        Ok(())
    }
}
