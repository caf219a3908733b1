use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{new_entity_id, require_non_blank, SyncedEntity};
use crate::errors::{Error, Result};
use crate::sync::SyncEntity;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    /// `#RRGGBB`
    pub color: String,
    pub icon: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewCategory {
    pub name: String,
    pub color: String,
    pub icon: Option<String>,
}

impl Category {
    pub fn new(new_category: NewCategory) -> Self {
        let now = Utc::now();
        Self {
            id: new_entity_id(),
            name: new_category.name,
            color: new_category.color,
            icon: new_category.icon,
            created_at: now,
            updated_at: now,
        }
    }
}

fn is_hex_color(value: &str) -> bool {
    let Some(hex) = value.strip_prefix('#') else {
        return false;
    };
    hex.len() == 6 && hex.bytes().all(|b| b.is_ascii_hexdigit())
}

impl SyncedEntity for Category {
    const ENTITY: SyncEntity = SyncEntity::Category;

    fn id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> Result<()> {
        require_non_blank("category id", &self.id)?;
        require_non_blank("category name", &self.name)?;
        if !is_hex_color(&self.color) {
            return Err(Error::invalid_input(format!(
                "category color '{}' is not a #RRGGBB value",
                self.color
            )));
        }
        Ok(())
    }
}
