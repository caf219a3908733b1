use chrono::Utc;
use log::{debug, warn};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;

use super::cache_model::{CachedEntityRow, EntityCacheStore};
use crate::entities::SyncedEntity;
use crate::errors::Result;
use crate::sync::SyncEntity;

type EntityKey = (SyncEntity, String);

#[derive(Debug, Default)]
struct CacheState {
    rows: HashMap<SyncEntity, BTreeMap<String, Value>>,
    pending_deletes: HashSet<EntityKey>,
}

/// Current-state view of every synced entity, updated optimistically by local
/// writes and replaced by remote refreshes.
///
/// Readers are notified through a version counter; rows flagged as pending
/// delete stay cached but are hidden from [`LocalEntityCache::list`] and
/// [`LocalEntityCache::get`].
pub struct LocalEntityCache {
    state: RwLock<CacheState>,
    version: watch::Sender<u64>,
    store: Option<Arc<dyn EntityCacheStore>>,
}

impl Default for LocalEntityCache {
    fn default() -> Self {
        Self::new()
    }
}

fn row_id(row: &Value) -> Option<String> {
    match row.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

impl LocalEntityCache {
    /// In-memory only cache.
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            state: RwLock::new(CacheState::default()),
            version,
            store: None,
        }
    }

    /// Cache whose writes are mirrored into `store`.
    pub fn with_store(store: Arc<dyn EntityCacheStore>) -> Self {
        Self {
            store: Some(store),
            ..Self::new()
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn bump(&self) {
        self.version.send_modify(|version| *version += 1);
    }

    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    /// Receiver that changes on every cache mutation.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// Loads persisted rows into memory. Rows of unknown entity types or
    /// with unreadable payloads are skipped.
    pub fn hydrate(&self) -> Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let persisted = store.load_all()?;
        let mut loaded = 0usize;
        {
            let mut state = self.write();
            for row in persisted {
                let Ok(entity) = row.entity_type.parse::<SyncEntity>() else {
                    warn!("[Cache] Skipping cached row of unknown type '{}'", row.entity_type);
                    continue;
                };
                match serde_json::from_str::<Value>(&row.payload) {
                    Ok(value) => {
                        state
                            .rows
                            .entry(entity)
                            .or_default()
                            .insert(row.entity_id, value);
                        loaded += 1;
                    }
                    Err(err) => warn!(
                        "[Cache] Skipping unreadable {} '{}': {}",
                        entity, row.entity_id, err
                    ),
                }
            }
        }
        debug!("[Cache] Hydrated {} row(s)", loaded);
        self.bump();
        Ok(loaded)
    }

    /// Inserts or replaces an entity.
    ///
    /// Persistence failures are logged; the outbox, not the cache, is the
    /// durable record of local intent.
    pub async fn put<E: SyncedEntity>(&self, entity: &E) -> Result<()> {
        let value = serde_json::to_value(entity)?;
        let id = entity.id().to_string();
        let payload = value.to_string();
        self.write()
            .rows
            .entry(E::ENTITY)
            .or_default()
            .insert(id.clone(), value);
        self.bump();

        if let Some(store) = &self.store {
            let row = CachedEntityRow {
                entity_type: E::ENTITY.as_str().to_string(),
                entity_id: id.clone(),
                payload,
                updated_at: Utc::now().timestamp_millis(),
            };
            if let Err(err) = store.save(row).await {
                warn!("[Cache] Failed to persist {} '{}': {}", E::ENTITY, id, err);
            }
        }
        Ok(())
    }

    /// Visible entity by id; pending deletes and undecodable rows read as absent.
    pub fn get<E: SyncedEntity>(&self, id: &str) -> Option<E> {
        let state = self.read();
        if state.pending_deletes.contains(&(E::ENTITY, id.to_string())) {
            return None;
        }
        let value = state.rows.get(&E::ENTITY)?.get(id)?;
        serde_json::from_value(value.clone()).ok()
    }

    /// Whether a row exists, including rows pending delete.
    pub fn contains(&self, entity: SyncEntity, id: &str) -> bool {
        self.read()
            .rows
            .get(&entity)
            .is_some_and(|rows| rows.contains_key(id))
    }

    /// Visible entities of one type, ordered by id.
    pub fn list<E: SyncedEntity>(&self) -> Vec<E> {
        let state = self.read();
        let Some(rows) = state.rows.get(&E::ENTITY) else {
            return Vec::new();
        };
        rows.iter()
            .filter(|(id, _)| {
                !state
                    .pending_deletes
                    .contains(&(E::ENTITY, (*id).clone()))
            })
            .filter_map(|(id, value)| match serde_json::from_value(value.clone()) {
                Ok(entity) => Some(entity),
                Err(err) => {
                    warn!("[Cache] Cached {} '{}' is unreadable: {}", E::ENTITY, id, err);
                    None
                }
            })
            .collect()
    }

    pub fn len(&self, entity: SyncEntity) -> usize {
        self.read().rows.get(&entity).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.read().rows.values().all(BTreeMap::is_empty)
    }

    pub async fn remove(&self, entity: SyncEntity, id: &str) -> Result<()> {
        {
            let mut state = self.write();
            if let Some(rows) = state.rows.get_mut(&entity) {
                rows.remove(id);
            }
            state.pending_deletes.remove(&(entity, id.to_string()));
        }
        self.bump();

        if let Some(store) = &self.store {
            if let Err(err) = store.delete(entity, id).await {
                warn!("[Cache] Failed to delete persisted {} '{}': {}", entity, id, err);
            }
        }
        Ok(())
    }

    /// Hides a row from reads; returns `false` if it is not cached.
    pub fn mark_pending_delete(&self, entity: SyncEntity, id: &str) -> bool {
        let marked = {
            let mut state = self.write();
            let exists = state
                .rows
                .get(&entity)
                .is_some_and(|rows| rows.contains_key(id));
            exists && state.pending_deletes.insert((entity, id.to_string()))
        };
        if marked {
            self.bump();
        }
        marked
    }

    pub fn unmark_pending_delete(&self, entity: SyncEntity, id: &str) -> bool {
        let unmarked = self
            .write()
            .pending_deletes
            .remove(&(entity, id.to_string()));
        if unmarked {
            self.bump();
        }
        unmarked
    }

    pub fn is_pending_delete(&self, entity: SyncEntity, id: &str) -> bool {
        self.read()
            .pending_deletes
            .contains(&(entity, id.to_string()))
    }

    /// Replaces all rows of `entity` with `remote_rows`, except rows whose id
    /// is in `pending`: local intent for those wins until it has synced.
    ///
    /// Returns the number of rows cached for `entity` afterwards.
    pub async fn refresh_from_remote(
        &self,
        entity: SyncEntity,
        remote_rows: Vec<Value>,
        pending: &HashSet<String>,
    ) -> Result<usize> {
        let snapshot: Vec<(String, Value)> = {
            let mut state = self.write();
            let previous = state.rows.remove(&entity).unwrap_or_default();
            let mut next: BTreeMap<String, Value> = remote_rows
                .into_iter()
                .filter_map(|row| row_id(&row).map(|id| (id, row)))
                .filter(|(id, _)| !pending.contains(id))
                .collect();
            for (id, value) in previous {
                if pending.contains(&id) {
                    next.insert(id, value);
                }
            }
            let snapshot = next
                .iter()
                .map(|(id, value)| (id.clone(), value.clone()))
                .collect();
            state.rows.insert(entity, next);
            snapshot
        };
        self.bump();
        debug!(
            "[Cache] Refreshed {} row(s) of {} ({} kept for pending mutations)",
            snapshot.len(),
            entity,
            pending.len()
        );

        if let Some(store) = &self.store {
            let now = Utc::now().timestamp_millis();
            let rows = snapshot
                .iter()
                .map(|(id, value)| CachedEntityRow {
                    entity_type: entity.as_str().to_string(),
                    entity_id: id.clone(),
                    payload: value.to_string(),
                    updated_at: now,
                })
                .collect();
            if let Err(err) = store.replace_entity_rows(entity, rows).await {
                warn!("[Cache] Failed to persist refreshed {} rows: {}", entity, err);
            }
        }
        Ok(snapshot.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Category, NewCategory};
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn category(name: &str) -> Category {
        Category::new(NewCategory {
            name: name.to_string(),
            color: "#112233".to_string(),
            icon: None,
        })
    }

    #[derive(Default)]
    struct VecStore {
        rows: Mutex<Vec<CachedEntityRow>>,
    }

    #[async_trait]
    impl EntityCacheStore for VecStore {
        fn load_all(&self) -> Result<Vec<CachedEntityRow>> {
            Ok(self.rows.lock().unwrap().clone())
        }

        async fn save(&self, row: CachedEntityRow) -> Result<()> {
            let mut rows = self.rows.lock().unwrap();
            rows.retain(|r| !(r.entity_type == row.entity_type && r.entity_id == row.entity_id));
            rows.push(row);
            Ok(())
        }

        async fn delete(&self, entity: SyncEntity, entity_id: &str) -> Result<()> {
            self.rows
                .lock()
                .unwrap()
                .retain(|r| !(r.entity_type == entity.as_str() && r.entity_id == entity_id));
            Ok(())
        }

        async fn replace_entity_rows(
            &self,
            entity: SyncEntity,
            rows: Vec<CachedEntityRow>,
        ) -> Result<()> {
            let mut stored = self.rows.lock().unwrap();
            stored.retain(|r| r.entity_type != entity.as_str());
            stored.extend(rows);
            Ok(())
        }
    }

    #[tokio::test]
    async fn pending_delete_hides_without_purging() {
        let cache = LocalEntityCache::new();
        let work = category("work");
        cache.put(&work).await.unwrap();

        assert!(cache.mark_pending_delete(SyncEntity::Category, &work.id));
        assert!(cache.get::<Category>(&work.id).is_none());
        assert!(cache.list::<Category>().is_empty());
        assert!(cache.contains(SyncEntity::Category, &work.id));

        assert!(cache.unmark_pending_delete(SyncEntity::Category, &work.id));
        assert_eq!(cache.get::<Category>(&work.id), Some(work));
    }

    #[tokio::test]
    async fn marking_an_unknown_row_is_refused() {
        let cache = LocalEntityCache::new();
        assert!(!cache.mark_pending_delete(SyncEntity::Timer, "missing"));
    }

    #[tokio::test]
    async fn writes_bump_the_version() {
        let cache = LocalEntityCache::new();
        let mut rx = cache.subscribe();
        cache.put(&category("home")).await.unwrap();
        assert!(rx.has_changed().unwrap());
        rx.mark_unchanged();
        assert_eq!(cache.version(), 1);
    }

    #[tokio::test]
    async fn refresh_keeps_rows_with_pending_mutations() {
        let cache = LocalEntityCache::new();
        let local = category("local edit");
        cache.put(&local).await.unwrap();
        let stale = category("deleted remotely");
        cache.put(&stale).await.unwrap();

        let mut remote_copy = local.clone();
        remote_copy.name = "older remote name".to_string();
        let fresh = category("new remote");
        let rows = vec![
            serde_json::to_value(&remote_copy).unwrap(),
            serde_json::to_value(&fresh).unwrap(),
        ];
        let pending: HashSet<String> = [local.id.clone()].into_iter().collect();

        let count = cache
            .refresh_from_remote(SyncEntity::Category, rows, &pending)
            .await
            .unwrap();

        assert_eq!(count, 2);
        assert_eq!(cache.get::<Category>(&local.id), Some(local));
        assert_eq!(cache.get::<Category>(&fresh.id), Some(fresh));
        assert!(cache.get::<Category>(&stale.id).is_none());
    }

    #[tokio::test]
    async fn store_round_trips_through_hydrate() {
        let store = Arc::new(VecStore::default());
        let cache = LocalEntityCache::with_store(store.clone());
        let kept = category("kept");
        let dropped = category("dropped");
        cache.put(&kept).await.unwrap();
        cache.put(&dropped).await.unwrap();
        cache.remove(SyncEntity::Category, &dropped.id).await.unwrap();

        let restored = LocalEntityCache::with_store(store);
        assert_eq!(restored.hydrate().unwrap(), 1);
        assert_eq!(restored.list::<Category>(), vec![kept]);
    }
}
