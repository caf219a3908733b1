//! Outbox domain models and the storage contract the sync engine drains.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::entities::{Category, QrCode, SyncedEntity, Timer, TimerTemplate};
use crate::errors::{Error, Result, ValidationError};

/// Remote tables that participate in sync, in [`SyncEntity::ALL`] order.
pub const SYNC_TABLES: [&str; 4] = ["timers", "categories", "timer_templates", "qr_codes"];

/// Entity kinds carried by pending mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEntity {
    Timer,
    Category,
    Template,
    QrCode,
}

impl SyncEntity {
    pub const ALL: [SyncEntity; 4] = [
        SyncEntity::Timer,
        SyncEntity::Category,
        SyncEntity::Template,
        SyncEntity::QrCode,
    ];

    /// Value stored in `pending_mutations.entity_type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncEntity::Timer => "timer",
            SyncEntity::Category => "category",
            SyncEntity::Template => "template",
            SyncEntity::QrCode => "qr_code",
        }
    }

    /// Remote table the entity lives in.
    pub fn table_name(&self) -> &'static str {
        match self {
            SyncEntity::Timer => "timers",
            SyncEntity::Category => "categories",
            SyncEntity::Template => "timer_templates",
            SyncEntity::QrCode => "qr_codes",
        }
    }

    /// Decodes a stored payload into the typed entity, validates it and
    /// returns the row to send to the remote store.
    pub fn decode_row(&self, entity_id: &str, payload: &str) -> Result<serde_json::Value> {
        match self {
            SyncEntity::Timer => decode_typed_row::<Timer>(entity_id, payload),
            SyncEntity::Category => decode_typed_row::<Category>(entity_id, payload),
            SyncEntity::Template => decode_typed_row::<TimerTemplate>(entity_id, payload),
            SyncEntity::QrCode => decode_typed_row::<QrCode>(entity_id, payload),
        }
    }
}

impl fmt::Display for SyncEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncEntity {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        SyncEntity::ALL
            .into_iter()
            .find(|entity| entity.as_str() == value)
            .ok_or_else(|| ValidationError::UnknownEntityType(value.to_string()).into())
    }
}

fn decode_typed_row<E: SyncedEntity>(entity_id: &str, payload: &str) -> Result<serde_json::Value> {
    let invalid = |message: String| ValidationError::InvalidPayload {
        entity: E::ENTITY.as_str().to_string(),
        message,
    };
    let typed: E = serde_json::from_str(payload).map_err(|e| invalid(e.to_string()))?;
    if typed.id() != entity_id {
        return Err(invalid(format!(
            "payload id '{}' does not match entity_id '{}'",
            typed.id(),
            entity_id
        ))
        .into());
    }
    typed.validate()?;
    Ok(serde_json::to_value(&typed)?)
}

/// Supported mutation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    Create,
    Update,
    Delete,
}

impl SyncOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOperation::Create => "create",
            SyncOperation::Update => "update",
            SyncOperation::Delete => "delete",
        }
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncOperation {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "create" => Ok(SyncOperation::Create),
            "update" => Ok(SyncOperation::Update),
            "delete" => Ok(SyncOperation::Delete),
            other => Err(ValidationError::UnknownOperation(other.to_string()).into()),
        }
    }
}

/// Outbox record as persisted. Type and operation stay raw strings so a
/// record written by another build (or corrupted) still lists, and stalls
/// the pass instead of vanishing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMutation {
    pub id: i64,
    pub entity_type: String,
    pub operation: String,
    pub entity_id: String,
    pub payload: String,
    /// Epoch millis.
    pub created_at: i64,
}

impl PendingMutation {
    pub fn entity(&self) -> Result<SyncEntity> {
        self.entity_type.parse()
    }

    pub fn op(&self) -> Result<SyncOperation> {
        self.operation.parse()
    }

    pub fn is_for(&self, entity: SyncEntity, entity_id: &str) -> bool {
        self.entity_type == entity.as_str() && self.entity_id == entity_id
    }
}

/// Append request; the store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPendingMutation {
    pub entity: SyncEntity,
    pub entity_id: String,
    pub op: SyncOperation,
    pub payload: String,
}

impl NewPendingMutation {
    pub fn create<E: SyncedEntity>(entity: &E) -> Result<Self> {
        Self::snapshot(SyncOperation::Create, entity)
    }

    pub fn update<E: SyncedEntity>(entity: &E) -> Result<Self> {
        Self::snapshot(SyncOperation::Update, entity)
    }

    pub fn delete(entity: SyncEntity, entity_id: impl Into<String>) -> Self {
        Self {
            entity,
            entity_id: entity_id.into(),
            op: SyncOperation::Delete,
            payload: String::new(),
        }
    }

    fn snapshot<E: SyncedEntity>(op: SyncOperation, entity: &E) -> Result<Self> {
        Ok(Self {
            entity: E::ENTITY,
            entity_id: entity.id().to_string(),
            op,
            payload: serde_json::to_string(entity)?,
        })
    }
}

/// Record moved aside by the dead-letter policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: i64,
    pub entity_type: String,
    pub operation: String,
    pub entity_id: String,
    pub payload: String,
    pub created_at: i64,
    pub failure_count: u32,
    pub last_error: String,
    pub dead_at: i64,
}

/// Durable, append-only queue of pending mutations.
///
/// Records are never updated: `append` and `remove` are the only operations
/// touching a pending record. Failure bookkeeping lives beside the record.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Persists a mutation and returns its sequence id. Storage faults must
    /// be returned, never swallowed.
    async fn append(&self, mutation: NewPendingMutation) -> Result<i64>;

    /// Consistent snapshot of all pending records in ascending id order.
    fn list_pending(&self) -> Result<Vec<PendingMutation>>;

    /// Deletes one record; removing an absent id is a no-op.
    async fn remove(&self, id: i64) -> Result<()>;

    /// Drops every pending record (account/data reset only).
    async fn clear(&self) -> Result<()>;

    fn pending_count(&self) -> Result<usize> {
        Ok(self.list_pending()?.len())
    }

    fn has_pending_for(&self, entity: SyncEntity, entity_id: &str) -> Result<bool> {
        Ok(self
            .list_pending()?
            .iter()
            .any(|record| record.is_for(entity, entity_id)))
    }

    /// Bumps the permanent-failure counter kept for `id` and returns the new count.
    async fn record_failure(&self, id: i64, error: String) -> Result<u32>;

    /// Forgets the permanent-failure counter kept for `id`.
    async fn reset_failures(&self, id: i64) -> Result<()>;

    /// Atomically moves a pending record into the dead-letter table.
    async fn move_to_dead_letter(&self, id: i64, error: String) -> Result<()>;

    fn list_dead_letters(&self) -> Result<Vec<DeadLetter>>;

    /// Appends a dead letter again as a fresh pending record; returns the new id.
    async fn requeue_dead_letter(&self, id: i64) -> Result<i64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{NewTimer, Timer};
    use chrono::Utc;

    #[test]
    fn sync_entity_serialization_matches_backend_contract() {
        let actual = SyncEntity::ALL
            .iter()
            .map(|entity| serde_json::to_string(entity).expect("serialize sync entity"))
            .collect::<Vec<_>>();
        assert_eq!(
            actual,
            vec!["\"timer\"", "\"category\"", "\"template\"", "\"qr_code\""]
        );
        for entity in SyncEntity::ALL {
            assert_eq!(entity.as_str().parse::<SyncEntity>().unwrap(), entity);
        }
    }

    #[test]
    fn every_entity_maps_to_a_sync_table() {
        let tables = SyncEntity::ALL
            .iter()
            .map(SyncEntity::table_name)
            .collect::<Vec<_>>();
        assert_eq!(tables, SYNC_TABLES.to_vec());
    }

    #[test]
    fn unknown_entity_type_is_a_validation_error() {
        let record = PendingMutation {
            id: 1,
            entity_type: "bogus".to_string(),
            operation: "create".to_string(),
            entity_id: "x".to_string(),
            payload: "{}".to_string(),
            created_at: 0,
        };
        assert!(matches!(
            record.entity(),
            Err(Error::Validation(ValidationError::UnknownEntityType(_)))
        ));
    }

    #[test]
    fn decode_row_rejects_mismatched_id() {
        let timer = Timer::new(NewTimer {
            title: "Laundry".to_string(),
            target_time: Utc::now(),
            category_id: None,
            recurrence: None,
            notes: None,
        });
        let payload = serde_json::to_string(&timer).unwrap();
        assert!(SyncEntity::Timer.decode_row(&timer.id, &payload).is_ok());
        assert!(SyncEntity::Timer.decode_row("other-id", &payload).is_err());
        assert!(SyncEntity::Category.decode_row(&timer.id, &payload).is_err());
    }

    #[test]
    fn delete_mutation_has_empty_payload() {
        let mutation = NewPendingMutation::delete(SyncEntity::Category, "c1");
        assert_eq!(mutation.op, SyncOperation::Delete);
        assert!(mutation.payload.is_empty());
    }
}
