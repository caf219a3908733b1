use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::sync::SyncEntity;

struct PendingDelete {
    generation: u64,
    commit_task: Option<JoinHandle<()>>,
}

/// Grace-window bookkeeping for soft deletes.
///
/// Each scheduled delete gets a generation token. The commit task may only
/// act after [`SoftDeleteQueue::claim`] succeeds with its own token, so an
/// undo or a newer soft delete of the same row always wins over a stale timer.
pub struct SoftDeleteQueue {
    grace: Duration,
    pending: Mutex<HashMap<(SyncEntity, String), PendingDelete>>,
    next_generation: AtomicU64,
}

impl SoftDeleteQueue {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            pending: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(SyncEntity, String), PendingDelete>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a delete and returns its token. A delete already pending for
    /// the same row is superseded and its timer aborted.
    pub fn reserve(&self, entity: SyncEntity, id: &str) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let previous = self.lock().insert(
            (entity, id.to_string()),
            PendingDelete {
                generation,
                commit_task: None,
            },
        );
        if let Some(task) = previous.and_then(|p| p.commit_task) {
            task.abort();
        }
        generation
    }

    /// Stores the commit timer for `generation`; aborts it if the reservation
    /// is already gone.
    pub fn attach(&self, entity: SyncEntity, id: &str, generation: u64, task: JoinHandle<()>) {
        let mut pending = self.lock();
        match pending.get_mut(&(entity, id.to_string())) {
            Some(entry) if entry.generation == generation => entry.commit_task = Some(task),
            _ => {
                drop(pending);
                task.abort();
            }
        }
    }

    /// Takes ownership of the commit if `generation` is still current.
    pub fn claim(&self, entity: SyncEntity, id: &str, generation: u64) -> bool {
        let mut pending = self.lock();
        let key = (entity, id.to_string());
        match pending.get(&key) {
            Some(entry) if entry.generation == generation => {
                pending.remove(&key);
                true
            }
            _ => false,
        }
    }

    /// Cancels a pending delete. Returns `false` when nothing was pending,
    /// including when the commit has already been claimed.
    pub fn cancel(&self, entity: SyncEntity, id: &str) -> bool {
        let removed = self.lock().remove(&(entity, id.to_string()));
        match removed {
            Some(entry) => {
                if let Some(task) = entry.commit_task {
                    task.abort();
                }
                true
            }
            None => false,
        }
    }

    /// Removes every pending delete, aborting their timers, and returns the
    /// rows so the caller can commit them now.
    pub fn drain(&self) -> Vec<(SyncEntity, String)> {
        let drained: Vec<_> = self.lock().drain().collect();
        let mut keys = Vec::with_capacity(drained.len());
        for (key, entry) in drained {
            if let Some(task) = entry.commit_task {
                task.abort();
            }
            keys.push(key);
        }
        keys.sort();
        keys
    }

    pub fn is_pending(&self, entity: SyncEntity, id: &str) -> bool {
        self.lock().contains_key(&(entity, id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
