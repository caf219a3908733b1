//! Database models for the outbox tables.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use remindly_core::sync::{DeadLetter, PendingMutation};

#[derive(Queryable, Identifiable, Selectable, Debug, Clone, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::pending_mutations)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PendingMutationDB {
    pub id: i64,
    pub entity_type: String,
    pub operation: String,
    pub entity_id: String,
    pub payload: String,
    pub created_at: i64,
}

/// Insert row; `id` is assigned by SQLite.
#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = crate::schema::pending_mutations)]
pub struct NewPendingMutationDB {
    pub entity_type: String,
    pub operation: String,
    pub entity_id: String,
    pub payload: String,
    pub created_at: i64,
}

#[derive(Queryable, Identifiable, Insertable, Selectable, Debug, Clone)]
#[diesel(primary_key(mutation_id))]
#[diesel(table_name = crate::schema::outbox_failures)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct OutboxFailureDB {
    pub mutation_id: i64,
    pub failure_count: i32,
    pub last_error: String,
    pub updated_at: i64,
}

#[derive(
    Queryable, Identifiable, Insertable, Selectable, Debug, Clone, Serialize, Deserialize,
)]
#[diesel(table_name = crate::schema::dead_letters)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DeadLetterDB {
    pub id: i64,
    pub entity_type: String,
    pub operation: String,
    pub entity_id: String,
    pub payload: String,
    pub created_at: i64,
    pub failure_count: i32,
    pub last_error: String,
    pub dead_at: i64,
}

impl From<PendingMutationDB> for PendingMutation {
    fn from(db: PendingMutationDB) -> Self {
        Self {
            id: db.id,
            entity_type: db.entity_type,
            operation: db.operation,
            entity_id: db.entity_id,
            payload: db.payload,
            created_at: db.created_at,
        }
    }
}

impl From<DeadLetterDB> for DeadLetter {
    fn from(db: DeadLetterDB) -> Self {
        Self {
            id: db.id,
            entity_type: db.entity_type,
            operation: db.operation,
            entity_id: db.entity_id,
            payload: db.payload,
            created_at: db.created_at,
            failure_count: u32::try_from(db.failure_count).unwrap_or(0),
            last_error: db.last_error,
            dead_at: db.dead_at,
        }
    }
}
