use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::sync::SyncEntity;

/// One persisted cache row; `payload` is the entity serialized as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedEntityRow {
    pub entity_type: String,
    pub entity_id: String,
    pub payload: String,
    /// Epoch millis of the last local write or refresh.
    pub updated_at: i64,
}

/// Durable backing for [`super::LocalEntityCache`], read once at startup.
#[async_trait]
pub trait EntityCacheStore: Send + Sync {
    fn load_all(&self) -> Result<Vec<CachedEntityRow>>;

    async fn save(&self, row: CachedEntityRow) -> Result<()>;

    async fn delete(&self, entity: SyncEntity, entity_id: &str) -> Result<()>;

    /// Replaces every row of `entity` with `rows` in one transaction.
    async fn replace_entity_rows(&self, entity: SyncEntity, rows: Vec<CachedEntityRow>)
        -> Result<()>;
}
