use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use remindly_core::cache::CachedEntityRow;

#[derive(
    Queryable,
    Identifiable,
    Insertable,
    AsChangeset,
    Selectable,
    Debug,
    Clone,
    Serialize,
    Deserialize,
)]
#[diesel(primary_key(entity_type, entity_id))]
#[diesel(table_name = crate::schema::cached_entities)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CachedEntityDB {
    pub entity_type: String,
    pub entity_id: String,
    pub payload: String,
    pub updated_at: i64,
}

impl From<CachedEntityDB> for CachedEntityRow {
    fn from(db: CachedEntityDB) -> Self {
        Self {
            entity_type: db.entity_type,
            entity_id: db.entity_id,
            payload: db.payload,
            updated_at: db.updated_at,
        }
    }
}

impl From<CachedEntityRow> for CachedEntityDB {
    fn from(row: CachedEntityRow) -> Self {
        Self {
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            payload: row.payload,
            updated_at: row.updated_at,
        }
    }
}
