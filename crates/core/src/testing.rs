//! In-memory doubles for the outbox and the remote store.
//!
//! Compiled for this crate's tests and, behind the `test-utils` feature, for
//! downstream crates' tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Notify, Semaphore};

use crate::errors::{DatabaseError, Error, RemoteError, Result};
use crate::remote::{RemoteStore, Row, RowFilter};
use crate::sync::{DeadLetter, NewPendingMutation, OutboxStore, PendingMutation};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct MemoryOutboxState {
    last_id: i64,
    records: BTreeMap<i64, PendingMutation>,
    failures: HashMap<i64, (u32, String)>,
    dead: BTreeMap<i64, DeadLetter>,
}

/// Non-durable [`OutboxStore`] with the same ordering guarantees as SQLite.
#[derive(Debug, Default)]
pub struct MemoryOutboxStore {
    state: Mutex<MemoryOutboxState>,
    fail_appends: AtomicBool,
}

impl MemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following `append` fail like a full disk would.
    pub fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Appends a record without type checking, as a foreign or corrupted
    /// writer would.
    pub fn insert_raw(&self, entity_type: &str, operation: &str, entity_id: &str, payload: &str) -> i64 {
        let mut state = lock(&self.state);
        state.last_id += 1;
        let id = state.last_id;
        state.records.insert(
            id,
            PendingMutation {
                id,
                entity_type: entity_type.to_string(),
                operation: operation.to_string(),
                entity_id: entity_id.to_string(),
                payload: payload.to_string(),
                created_at: Utc::now().timestamp_millis(),
            },
        );
        id
    }

    pub fn pending_ids(&self) -> Vec<i64> {
        lock(&self.state).records.keys().copied().collect()
    }

    pub fn failure_count(&self, id: i64) -> u32 {
        lock(&self.state)
            .failures
            .get(&id)
            .map(|(count, _)| *count)
            .unwrap_or(0)
    }
}

#[async_trait]
impl OutboxStore for MemoryOutboxStore {
    async fn append(&self, mutation: NewPendingMutation) -> Result<i64> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(DatabaseError::QueryFailed("disk I/O error".to_string()).into());
        }
        Ok(self.insert_raw(
            mutation.entity.as_str(),
            mutation.op.as_str(),
            &mutation.entity_id,
            &mutation.payload,
        ))
    }

    fn list_pending(&self) -> Result<Vec<PendingMutation>> {
        Ok(lock(&self.state).records.values().cloned().collect())
    }

    async fn remove(&self, id: i64) -> Result<()> {
        let mut state = lock(&self.state);
        state.records.remove(&id);
        state.failures.remove(&id);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut state = lock(&self.state);
        state.records.clear();
        state.failures.clear();
        Ok(())
    }

    async fn record_failure(&self, id: i64, error: String) -> Result<u32> {
        let mut state = lock(&self.state);
        let entry = state.failures.entry(id).or_insert((0, String::new()));
        entry.0 += 1;
        entry.1 = error;
        Ok(entry.0)
    }

    async fn reset_failures(&self, id: i64) -> Result<()> {
        lock(&self.state).failures.remove(&id);
        Ok(())
    }

    async fn move_to_dead_letter(&self, id: i64, error: String) -> Result<()> {
        let mut state = lock(&self.state);
        let Some(record) = state.records.remove(&id) else {
            return Ok(());
        };
        let failure_count = state
            .failures
            .remove(&id)
            .map(|(count, _)| count)
            .unwrap_or(0);
        state.dead.insert(
            id,
            DeadLetter {
                id,
                entity_type: record.entity_type,
                operation: record.operation,
                entity_id: record.entity_id,
                payload: record.payload,
                created_at: record.created_at,
                failure_count,
                last_error: error,
                dead_at: Utc::now().timestamp_millis(),
            },
        );
        Ok(())
    }

    fn list_dead_letters(&self) -> Result<Vec<DeadLetter>> {
        Ok(lock(&self.state).dead.values().cloned().collect())
    }

    async fn requeue_dead_letter(&self, id: i64) -> Result<i64> {
        let letter = lock(&self.state)
            .dead
            .remove(&id)
            .ok_or_else(|| Error::state(format!("dead letter {} not found", id)))?;
        Ok(self.insert_raw(
            &letter.entity_type,
            &letter.operation,
            &letter.entity_id,
            &letter.payload,
        ))
    }
}

/// Call observed by [`RecordingRemoteStore`]; only successful calls are recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Select { table: String },
    Insert { table: String, id: String },
    Upsert { table: String, id: String },
    Update { table: String, id: String },
    Delete { table: String, id: String },
}

impl RemoteCall {
    pub fn upsert(table: &str, id: &str) -> Self {
        RemoteCall::Upsert {
            table: table.to_string(),
            id: id.to_string(),
        }
    }

    pub fn delete(table: &str, id: &str) -> Self {
        RemoteCall::Delete {
            table: table.to_string(),
            id: id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Connection refused.
    Transport,
    /// Never answers; relies on the caller's timeout.
    Hang,
    /// Server-side validation failure (HTTP 400).
    Rejected,
}

impl FailureMode {
    fn error(&self, id: &str) -> Error {
        match self {
            FailureMode::Transport | FailureMode::Hang => {
                RemoteError::Unreachable(format!("connection refused while writing '{}'", id)).into()
            }
            FailureMode::Rejected => RemoteError::api(400, format!("row '{}' rejected", id)).into(),
        }
    }
}

/// In-memory [`RemoteStore`] that records every applied call in order.
#[derive(Debug, Default)]
pub struct RecordingRemoteStore {
    calls: Mutex<Vec<RemoteCall>>,
    tables: Mutex<HashMap<String, BTreeMap<String, Row>>>,
    /// Entity id -> (mode, remaining failures; `None` fails forever).
    failures: Mutex<HashMap<String, (FailureMode, Option<u32>)>>,
    offline: AtomicBool,
    attempts: AtomicUsize,
    gate: Mutex<Option<Arc<Semaphore>>>,
    entered: Notify,
    select_gate: Mutex<Option<Arc<Semaphore>>>,
    select_entered: Notify,
}

impl RecordingRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn fail_always(&self, entity_id: &str, mode: FailureMode) {
        lock(&self.failures).insert(entity_id.to_string(), (mode, None));
    }

    pub fn fail_times(&self, entity_id: &str, mode: FailureMode, times: u32) {
        lock(&self.failures).insert(entity_id.to_string(), (mode, Some(times)));
    }

    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
    }

    /// Blocks every following write until permits are added to the returned semaphore.
    pub fn hold_writes(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *lock(&self.gate) = Some(Arc::clone(&gate));
        gate
    }

    /// Resolves once a write has reached the store (even if it is held).
    pub async fn wait_for_write(&self) {
        self.entered.notified().await;
    }

    /// Holds every following select after it has read its rows, so the
    /// caller sees a snapshot that may be stale by the time it resolves.
    pub fn hold_selects(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *lock(&self.select_gate) = Some(Arc::clone(&gate));
        gate
    }

    /// Resolves once a select has taken its snapshot.
    pub async fn wait_for_select(&self) {
        self.select_entered.notified().await;
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        lock(&self.calls).clone()
    }

    /// Every write attempt, including failed ones.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn row(&self, table: &str, id: &str) -> Option<Row> {
        lock(&self.tables)
            .get(table)
            .and_then(|rows| rows.get(id))
            .cloned()
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        lock(&self.tables)
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Seeds a row without recording a call.
    pub fn seed(&self, table: &str, row: Row) {
        let id = row_id(&row).unwrap_or_default();
        lock(&self.tables)
            .entry(table.to_string())
            .or_default()
            .insert(id, row);
    }

    async fn before_write(&self, id: &str) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();

        let gate = lock(&self.gate).clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Unreachable("network is offline".to_string()).into());
        }

        let mode = {
            let mut failures = lock(&self.failures);
            match failures.get_mut(id) {
                Some((mode, None)) => Some(*mode),
                Some((mode, Some(remaining))) if *remaining > 0 => {
                    *remaining -= 1;
                    Some(*mode)
                }
                _ => None,
            }
        };
        match mode {
            Some(FailureMode::Hang) => std::future::pending::<Result<()>>().await,
            Some(mode) => Err(mode.error(id)),
            None => Ok(()),
        }
    }

    fn record(&self, call: RemoteCall) {
        lock(&self.calls).push(call);
    }
}

fn row_id(row: &Row) -> Option<String> {
    match row.get("id")? {
        serde_json::Value::String(id) => Some(id.clone()),
        other => Some(other.to_string()),
    }
}

fn require_row_id(row: &Row) -> Result<String> {
    row_id(row).ok_or_else(|| RemoteError::api(400, "row has no id column").into())
}

#[async_trait]
impl RemoteStore for RecordingRemoteStore {
    async fn select(&self, table: &str) -> Result<Vec<Row>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Unreachable("network is offline".to_string()).into());
        }
        self.record(RemoteCall::Select {
            table: table.to_string(),
        });
        let rows = self.rows(table);
        self.select_entered.notify_one();

        let gate = lock(&self.select_gate).clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        Ok(rows)
    }

    async fn insert(&self, table: &str, row: Row) -> Result<Row> {
        let id = require_row_id(&row)?;
        self.before_write(&id).await?;
        {
            let mut tables = lock(&self.tables);
            let rows = tables.entry(table.to_string()).or_default();
            if rows.contains_key(&id) {
                return Err(RemoteError::api(409, format!("duplicate key '{}'", id)).into());
            }
            rows.insert(id.clone(), row.clone());
        }
        self.record(RemoteCall::Insert {
            table: table.to_string(),
            id,
        });
        Ok(row)
    }

    async fn upsert(&self, table: &str, row: Row) -> Result<()> {
        let id = require_row_id(&row)?;
        self.before_write(&id).await?;
        lock(&self.tables)
            .entry(table.to_string())
            .or_default()
            .insert(id.clone(), row);
        self.record(RemoteCall::upsert(table, &id));
        Ok(())
    }

    async fn update(&self, table: &str, row: Row, filter: RowFilter) -> Result<()> {
        self.before_write(&filter.value).await?;
        {
            let mut tables = lock(&self.tables);
            let rows = tables.entry(table.to_string()).or_default();
            for existing in rows.values_mut().filter(|r| filter.matches(r)) {
                if let (Some(target), Some(patch)) = (existing.as_object_mut(), row.as_object()) {
                    for (key, value) in patch {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        self.record(RemoteCall::Update {
            table: table.to_string(),
            id: filter.value,
        });
        Ok(())
    }

    async fn delete(&self, table: &str, filter: RowFilter) -> Result<()> {
        self.before_write(&filter.value).await?;
        if let Some(rows) = lock(&self.tables).get_mut(table) {
            rows.retain(|_, row| !filter.matches(row));
        }
        self.record(RemoteCall::delete(table, &filter.value));
        Ok(())
    }
}
