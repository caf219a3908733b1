use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{new_entity_id, require_non_blank, NewTimer, Recurrence, SyncedEntity};
use crate::errors::{Error, Result};
use crate::sync::SyncEntity;

/// Reusable timer preset ("Tea: 4 minutes").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerTemplate {
    pub id: String,
    pub name: String,
    pub duration_minutes: i64,
    pub category_id: Option<String>,
    pub recurrence: Option<Recurrence>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTimerTemplate {
    pub name: String,
    pub duration_minutes: i64,
    pub category_id: Option<String>,
    pub recurrence: Option<Recurrence>,
}

impl TimerTemplate {
    pub fn new(new_template: NewTimerTemplate) -> Self {
        let now = Utc::now();
        Self {
            id: new_entity_id(),
            name: new_template.name,
            duration_minutes: new_template.duration_minutes,
            category_id: new_template.category_id,
            recurrence: new_template.recurrence,
            created_at: now,
            updated_at: now,
        }
    }

    /// Timer draft starting at `start`.
    pub fn instantiate(&self, start: DateTime<Utc>) -> NewTimer {
        NewTimer {
            title: self.name.clone(),
            target_time: start + Duration::minutes(self.duration_minutes),
            category_id: self.category_id.clone(),
            recurrence: self.recurrence,
            notes: None,
        }
    }
}

impl SyncedEntity for TimerTemplate {
    const ENTITY: SyncEntity = SyncEntity::Template;

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> Result<()> {
        require_non_blank("template id", &self.id)?;
        require_non_blank("template name", &self.name)?;
        if self.duration_minutes <= 0 {
            return Err(Error::invalid_input(
                "template duration must be a positive number of minutes",
            ));
        }
        if let Some(rule) = &self.recurrence {
            rule.validate()?;
        }
        Ok(())
    }
}
