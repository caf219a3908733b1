//! Facade used by view models: local-first writes with a bounded direct push.
//!
//! Every write validates, appends to the outbox, updates the cache and then
//! tries the remote store once under the configured [`RetryPolicy`]. A failed
//! direct push never loses the change; the record stays queued for the engine.

use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::Arc;

use crate::cache::{LocalEntityCache, SoftDeleteQueue};
use crate::entities::SyncedEntity;
use crate::errors::{Error, Result};
use crate::retry::{Failure, Outcome, RetryPolicy};
use crate::sync::{
    DeadLetter, DirectPush, NewPendingMutation, SyncEngine, SyncEntity, SyncPassReport,
    SyncTrigger,
};

/// How many times a follow-up pass retries after finding another pass running.
const FOLLOW_UP_PASS_ATTEMPTS: usize = 3;

/// A local write plus the state of its direct remote push.
#[derive(Debug)]
pub struct WriteResult<T> {
    pub value: T,
    /// `Success` when applied remotely, `InProgress` when left to the engine,
    /// `Failure` when the direct push failed (the record is still queued).
    pub remote: Outcome<()>,
}

pub struct SyncRepository {
    engine: Arc<SyncEngine>,
    cache: Arc<LocalEntityCache>,
    soft_deletes: SoftDeleteQueue,
}

impl SyncRepository {
    pub fn new(engine: Arc<SyncEngine>, cache: Arc<LocalEntityCache>) -> Self {
        let grace = engine.config().soft_delete_grace();
        Self {
            engine,
            cache,
            soft_deletes: SoftDeleteQueue::new(grace),
        }
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn cache(&self) -> &Arc<LocalEntityCache> {
        &self.cache
    }

    fn retry_policy(&self) -> &RetryPolicy {
        &self.engine.config().retry
    }

    pub async fn create<E: SyncedEntity>(&self, entity: E) -> Result<WriteResult<E>> {
        entity.validate()?;
        let mutation_id = self
            .engine
            .outbox()
            .append(NewPendingMutation::create(&entity)?)
            .await?;
        self.cache.put(&entity).await?;
        debug!("[Repository] Created {} '{}'", E::ENTITY, entity.id());

        let remote = self.push(mutation_id).await;
        Ok(WriteResult {
            value: entity,
            remote,
        })
    }

    /// Replaces an existing entity. Unknown ids and rows in their undo window
    /// are rejected.
    pub async fn update<E: SyncedEntity>(&self, entity: E) -> Result<WriteResult<E>> {
        entity.validate()?;
        if !self.cache.contains(E::ENTITY, entity.id()) {
            return Err(Error::state(format!(
                "{} '{}' does not exist",
                E::ENTITY,
                entity.id()
            )));
        }
        if self.cache.is_pending_delete(E::ENTITY, entity.id()) {
            return Err(Error::state(format!(
                "{} '{}' is being deleted",
                E::ENTITY,
                entity.id()
            )));
        }

        let mutation_id = self
            .engine
            .outbox()
            .append(NewPendingMutation::update(&entity)?)
            .await?;
        self.cache.put(&entity).await?;
        debug!("[Repository] Updated {} '{}'", E::ENTITY, entity.id());

        let remote = self.push(mutation_id).await;
        Ok(WriteResult {
            value: entity,
            remote,
        })
    }

    /// Deletes immediately, skipping the undo window. Deleting an id the
    /// cache does not know still queues the DELETE.
    pub async fn delete(&self, entity: SyncEntity, id: &str) -> Result<WriteResult<()>> {
        if id.trim().is_empty() {
            return Err(Error::invalid_input("entity id must not be empty"));
        }
        self.soft_deletes.cancel(entity, id);

        let mutation_id = self
            .engine
            .outbox()
            .append(NewPendingMutation::delete(entity, id))
            .await?;
        self.cache.remove(entity, id).await?;
        debug!("[Repository] Deleted {} '{}'", entity, id);

        let remote = self.push(mutation_id).await;
        Ok(WriteResult { value: (), remote })
    }

    /// Hides the row now and commits the DELETE once the grace window ends
    /// unless [`SyncRepository::undo_delete`] is called first.
    pub fn soft_delete(self: &Arc<Self>, entity: SyncEntity, id: &str) -> Result<()> {
        if !self.cache.contains(entity, id) {
            return Err(Error::state(format!("{} '{}' does not exist", entity, id)));
        }
        self.cache.mark_pending_delete(entity, id);
        let generation = self.soft_deletes.reserve(entity, id);

        let repository = Arc::clone(self);
        let grace = self.soft_deletes.grace();
        let task_id = id.to_string();
        let task = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if !repository.soft_deletes.claim(entity, &task_id, generation) {
                return;
            }
            if let Err(err) = repository.delete(entity, &task_id).await {
                warn!(
                    "[Repository] Failed to commit delete of {} '{}': {}",
                    entity, task_id, err
                );
                repository.cache.unmark_pending_delete(entity, &task_id);
            }
        });
        self.soft_deletes.attach(entity, id, generation, task);
        debug!(
            "[Repository] {} '{}' hidden; delete commits in {:?}",
            entity, id, grace
        );
        Ok(())
    }

    /// Restores a soft-deleted row. Returns `false` when the window has
    /// already closed.
    pub fn undo_delete(&self, entity: SyncEntity, id: &str) -> bool {
        if !self.soft_deletes.cancel(entity, id) {
            return false;
        }
        self.cache.unmark_pending_delete(entity, id);
        debug!("[Repository] Delete of {} '{}' undone", entity, id);
        true
    }

    /// Commits every soft delete still in its grace window.
    pub async fn flush_pending_deletes(&self) -> Result<usize> {
        let pending = self.soft_deletes.drain();
        let count = pending.len();
        for (entity, id) in pending {
            self.delete(entity, &id).await?;
        }
        if count > 0 {
            info!("[Repository] Flushed {} pending delete(s)", count);
        }
        Ok(count)
    }

    pub fn is_pending_delete(&self, entity: SyncEntity, id: &str) -> bool {
        self.soft_deletes.is_pending(entity, id)
    }

    pub fn get<E: SyncedEntity>(&self, id: &str) -> Option<E> {
        self.cache.get(id)
    }

    pub fn list<E: SyncedEntity>(&self) -> Vec<E> {
        self.cache.list()
    }

    /// Reloads one entity type from the remote store. Rows with mutations
    /// still queued keep their local version.
    ///
    /// Queued ids are read on both sides of the select: a record drained
    /// while the select is in flight may not be in the snapshot yet.
    pub async fn refresh<E: SyncedEntity>(&self) -> Outcome<Vec<E>> {
        let table = E::ENTITY.table_name();
        let mut pending = match self.pending_ids(E::ENTITY) {
            Ok(ids) => ids,
            Err(err) => return Outcome::failure(err, 1),
        };

        let remote = self.engine.remote();
        let rows = match self
            .retry_policy()
            .run(&format!("select {}", table), || remote.select(table))
            .await
        {
            Outcome::Success(rows) => rows,
            Outcome::Failure(failure) => return Outcome::Failure(failure),
            Outcome::InProgress => return Outcome::InProgress,
        };

        match self.pending_ids(E::ENTITY) {
            Ok(ids) => pending.extend(ids),
            Err(err) => return Outcome::failure(err, 1),
        }

        let rows = rows
            .into_iter()
            .filter(|row| match serde_json::from_value::<E>(row.clone()) {
                Ok(_) => true,
                Err(err) => {
                    warn!("[Repository] Dropping malformed {} row: {}", table, err);
                    false
                }
            })
            .collect();

        match self
            .cache
            .refresh_from_remote(E::ENTITY, rows, &pending)
            .await
        {
            Ok(_) => Outcome::Success(self.cache.list()),
            Err(err) => Outcome::failure(err, 1),
        }
    }

    fn pending_ids(&self, entity: SyncEntity) -> Result<HashSet<String>> {
        Ok(self
            .engine
            .outbox()
            .list_pending()?
            .into_iter()
            .filter(|record| record.entity_type == entity.as_str())
            .map(|record| record.entity_id)
            .collect())
    }

    /// Runs a manual drain pass. A pass already in flight reads as `InProgress`.
    pub async fn sync_now(&self) -> Outcome<usize> {
        match self.engine.process_pending_sync(SyncTrigger::Manual).await {
            Ok(SyncPassReport::Skipped) => Outcome::InProgress,
            Ok(SyncPassReport::Idle) => Outcome::Success(0),
            Ok(SyncPassReport::Completed { applied }) => Outcome::Success(applied),
            Ok(SyncPassReport::Stalled {
                failed_id,
                error,
                retryable,
                ..
            }) => Outcome::Failure(Failure {
                cause: Error::state(format!("sync stopped at mutation {}: {}", failed_id, error)),
                retryable,
                message: if retryable {
                    "Some changes could not be synced yet. They will be retried automatically."
                        .to_string()
                } else {
                    "A pending change was rejected by the server.".to_string()
                },
                attempts: 1,
            }),
            Err(err) => Outcome::failure(err, 1),
        }
    }

    pub fn pending_count(&self) -> Result<usize> {
        self.engine.outbox().pending_count()
    }

    pub fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        self.engine.outbox().list_dead_letters()
    }

    /// Puts a dead letter back at the end of the outbox and schedules a pass.
    pub async fn requeue_dead_letter(&self, id: i64) -> Result<i64> {
        let mutation_id = self.engine.outbox().requeue_dead_letter(id).await?;
        info!("[Repository] Dead letter {} requeued as {}", id, mutation_id);
        self.spawn_follow_up_pass();
        Ok(mutation_id)
    }

    async fn push(&self, mutation_id: i64) -> Outcome<()> {
        let outcome = match self.engine.push_now(mutation_id, self.retry_policy()).await {
            DirectPush::Applied | DirectPush::AlreadySynced => Outcome::Success(()),
            DirectPush::Queued | DirectPush::Busy => Outcome::InProgress,
            DirectPush::Failed(failure) => {
                debug!(
                    "[Repository] Direct push of mutation {} failed; left queued: {}",
                    mutation_id, failure.cause
                );
                Outcome::Failure(failure)
            }
        };
        // A trigger skipped while the push held the engine is still owed a pass.
        if outcome.is_in_progress() || self.engine.has_rerun_request() {
            self.spawn_follow_up_pass();
        }
        outcome
    }

    /// Drains the outbox in the background, waiting out a pass that is
    /// already running so records appended during it are not stranded.
    fn spawn_follow_up_pass(&self) {
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            let mut status = engine.subscribe_status();
            for _ in 0..FOLLOW_UP_PASS_ATTEMPTS {
                match engine.process_pending_sync(SyncTrigger::LocalMutation).await {
                    Ok(SyncPassReport::Skipped) => {
                        let _ = status.wait_for(|s| !s.is_syncing).await;
                        tokio::task::yield_now().await;
                    }
                    Ok(_) => return,
                    Err(err) => {
                        warn!("[Repository] Follow-up pass failed: {}", err);
                        return;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::entities::{Category, NewCategory, NewTimer, Timer};
    use crate::errors::{DatabaseError, ValidationError};
    use crate::remote::RemoteStore;
    use crate::sync::OutboxStore;
    use crate::testing::{FailureMode, MemoryOutboxStore, RecordingRemoteStore, RemoteCall};
    use chrono::Utc;
    use std::time::Duration;

    struct Fixture {
        outbox: Arc<MemoryOutboxStore>,
        remote: Arc<RecordingRemoteStore>,
        repository: Arc<SyncRepository>,
    }

    fn fixture(config: SyncConfig) -> Fixture {
        let outbox = Arc::new(MemoryOutboxStore::new());
        let remote = Arc::new(RecordingRemoteStore::new());
        let engine = Arc::new(SyncEngine::new(
            outbox.clone() as Arc<dyn OutboxStore>,
            remote.clone() as Arc<dyn RemoteStore>,
            config,
        ));
        let repository = Arc::new(SyncRepository::new(
            engine,
            Arc::new(LocalEntityCache::new()),
        ));
        Fixture {
            outbox,
            remote,
            repository,
        }
    }

    fn no_retry() -> SyncConfig {
        SyncConfig {
            retry: RetryPolicy::no_retry(),
            ..SyncConfig::default()
        }
    }

    fn timer(title: &str) -> Timer {
        Timer::new(NewTimer {
            title: title.to_string(),
            target_time: Utc::now() + chrono::Duration::minutes(30),
            category_id: None,
            recurrence: None,
            notes: None,
        })
    }

    fn category(name: &str) -> Category {
        Category::new(NewCategory {
            name: name.to_string(),
            color: "#00AA55".to_string(),
            icon: Some("briefcase".to_string()),
        })
    }

    #[tokio::test]
    async fn online_create_is_applied_directly() {
        let f = fixture(SyncConfig::default());
        let t1 = timer("water plants");

        let result = f.repository.create(t1.clone()).await.unwrap();

        assert!(result.remote.is_success());
        assert!(f.outbox.pending_ids().is_empty());
        assert_eq!(f.remote.calls(), vec![RemoteCall::upsert("timers", &t1.id)]);
        assert_eq!(f.repository.get::<Timer>(&t1.id), Some(t1));
    }

    #[tokio::test(start_paused = true)]
    async fn offline_create_succeeds_locally_and_stays_queued() {
        let f = fixture(SyncConfig::default());
        f.remote.set_offline(true);
        let t1 = timer("offline");

        let result = f.repository.create(t1.clone()).await.unwrap();

        let failure = result.remote.as_failure().expect("direct push fails offline");
        assert!(failure.retryable);
        assert_eq!(failure.attempts, 3);
        assert_eq!(f.repository.list::<Timer>(), vec![t1]);
        assert_eq!(f.outbox.pending_ids().len(), 1);

        f.remote.set_offline(false);
        assert!(matches!(f.repository.sync_now().await, Outcome::Success(1)));
        assert!(f.outbox.pending_ids().is_empty());
    }

    #[tokio::test]
    async fn invalid_entity_is_rejected_before_anything_is_written() {
        let f = fixture(SyncConfig::default());
        let err = f.repository.create(timer("  ")).await.unwrap_err();

        assert!(matches!(
            err,
            Error::Validation(ValidationError::InvalidInput(_))
        ));
        assert!(f.outbox.pending_ids().is_empty());
        assert!(f.repository.list::<Timer>().is_empty());
        assert_eq!(f.remote.attempts(), 0);
    }

    #[tokio::test]
    async fn append_failure_propagates_and_leaves_cache_untouched() {
        let f = fixture(SyncConfig::default());
        f.outbox.set_fail_appends(true);

        let err = f.repository.create(timer("lost?")).await.unwrap_err();

        assert!(matches!(err, Error::Database(DatabaseError::QueryFailed(_))));
        assert!(f.repository.list::<Timer>().is_empty());
    }

    #[tokio::test]
    async fn update_requires_an_existing_entity() {
        let f = fixture(SyncConfig::default());
        let err = f.repository.update(timer("ghost")).await.unwrap_err();
        assert!(matches!(err, Error::State(_)));
    }

    #[tokio::test]
    async fn write_behind_a_stalled_record_is_left_to_the_engine() {
        let f = fixture(no_retry());
        let blocked = timer("blocked");
        f.remote.fail_always(&blocked.id, FailureMode::Transport);
        let first = f.repository.create(blocked).await.unwrap();
        assert!(first.remote.as_failure().is_some());

        let second = f.repository.create(timer("waiting")).await.unwrap();

        assert!(second.remote.is_in_progress());
        assert_eq!(f.outbox.pending_ids().len(), 2);
        assert_eq!(f.repository.list::<Timer>().len(), 2);
    }

    #[tokio::test]
    async fn write_behind_a_direct_push_is_drained_once_it_finishes() {
        let f = fixture(SyncConfig::default());
        let (first, second) = (timer("first"), timer("second"));
        let gate = f.remote.hold_writes();

        let repository = Arc::clone(&f.repository);
        let pushed = first.clone();
        let first_write = tokio::spawn(async move { repository.create(pushed).await });
        f.remote.wait_for_write().await;
        assert!(f.repository.engine().status().is_syncing);

        let result = f.repository.create(second.clone()).await.unwrap();
        assert!(result.remote.is_in_progress());

        gate.add_permits(16);
        assert!(first_write.await.unwrap().unwrap().remote.is_success());
        tokio::time::timeout(Duration::from_secs(2), async {
            while !f.outbox.pending_ids().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("second write left in the outbox");

        assert!(f.remote.row("timers", &first.id).is_some());
        assert!(f.remote.row("timers", &second.id).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn soft_delete_commits_after_the_grace_window() {
        let f = fixture(SyncConfig::default());
        let work = category("work");
        f.repository.create(work.clone()).await.unwrap();

        f.repository
            .soft_delete(SyncEntity::Category, &work.id)
            .unwrap();
        assert!(f.repository.list::<Category>().is_empty());
        assert!(f.repository.is_pending_delete(SyncEntity::Category, &work.id));

        tokio::time::sleep(Duration::from_secs(6)).await;

        assert!(!f.repository.is_pending_delete(SyncEntity::Category, &work.id));
        assert!(!f.repository.cache().contains(SyncEntity::Category, &work.id));
        assert_eq!(
            f.remote.calls().last(),
            Some(&RemoteCall::delete("categories", &work.id))
        );
        assert!(!f.repository.undo_delete(SyncEntity::Category, &work.id));
    }

    #[tokio::test(start_paused = true)]
    async fn undo_inside_the_window_restores_the_row() {
        let f = fixture(SyncConfig::default());
        let home = category("home");
        f.repository.create(home.clone()).await.unwrap();

        f.repository
            .soft_delete(SyncEntity::Category, &home.id)
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(f.repository.undo_delete(SyncEntity::Category, &home.id));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(f.repository.list::<Category>(), vec![home.clone()]);
        assert_eq!(f.remote.calls(), vec![RemoteCall::upsert("categories", &home.id)]);
        assert!(f.outbox.pending_ids().is_empty());
    }

    #[tokio::test]
    async fn soft_delete_of_unknown_row_fails() {
        let f = fixture(SyncConfig::default());
        let err = f
            .repository
            .soft_delete(SyncEntity::Timer, "missing")
            .unwrap_err();
        assert!(matches!(err, Error::State(_)));
    }

    #[tokio::test]
    async fn flush_commits_every_pending_delete() {
        let f = fixture(SyncConfig::default());
        let (a, b) = (timer("a"), timer("b"));
        f.repository.create(a.clone()).await.unwrap();
        f.repository.create(b.clone()).await.unwrap();
        f.repository.soft_delete(SyncEntity::Timer, &a.id).unwrap();
        f.repository.soft_delete(SyncEntity::Timer, &b.id).unwrap();

        assert_eq!(f.repository.flush_pending_deletes().await.unwrap(), 2);

        assert!(f.repository.list::<Timer>().is_empty());
        assert!(f.remote.rows("timers").is_empty());
        assert!(f.outbox.pending_ids().is_empty());
    }

    #[tokio::test]
    async fn refresh_prefers_local_rows_with_queued_mutations() {
        let f = fixture(no_retry());
        let mut edited = timer("original");
        f.repository.create(edited.clone()).await.unwrap();
        let remote_only = timer("from another device");
        f.remote
            .seed("timers", serde_json::to_value(&remote_only).unwrap());

        f.remote.set_offline(true);
        edited.title = "edited offline".to_string();
        let update = f.repository.update(edited.clone()).await.unwrap();
        assert!(update.remote.as_failure().is_some());
        f.remote.set_offline(false);

        let refreshed = match f.repository.refresh::<Timer>().await {
            Outcome::Success(rows) => rows,
            other => panic!("refresh failed: {:?}", other),
        };

        assert_eq!(refreshed.len(), 2);
        assert_eq!(
            f.repository.get::<Timer>(&edited.id).unwrap().title,
            "edited offline"
        );
        assert_eq!(f.repository.get::<Timer>(&remote_only.id), Some(remote_only));
    }

    #[tokio::test]
    async fn refresh_keeps_rows_drained_while_the_select_was_in_flight() {
        let f = fixture(no_retry());
        let mut edited = timer("original");
        f.repository.create(edited.clone()).await.unwrap();
        f.remote.set_offline(true);
        edited.title = "edited offline".to_string();
        f.repository.update(edited.clone()).await.unwrap();
        f.remote.set_offline(false);

        let gate = f.remote.hold_selects();
        let repository = Arc::clone(&f.repository);
        let refresh = tokio::spawn(async move { repository.refresh::<Timer>().await });
        f.remote.wait_for_select().await;

        // The queued update lands after the select read the old row.
        let report = f
            .repository
            .engine()
            .process_pending_sync(SyncTrigger::Manual)
            .await
            .unwrap();
        assert_eq!(report, SyncPassReport::Completed { applied: 1 });
        assert!(f.outbox.pending_ids().is_empty());

        gate.add_permits(1);
        assert!(refresh.await.unwrap().is_success());
        assert_eq!(
            f.repository.get::<Timer>(&edited.id).unwrap().title,
            "edited offline"
        );
    }

    #[tokio::test]
    async fn refresh_failure_is_reported_as_an_outcome() {
        let f = fixture(no_retry());
        f.remote.set_offline(true);

        let outcome = f.repository.refresh::<Category>().await;

        let failure = outcome.as_failure().expect("offline refresh fails");
        assert!(failure.retryable);
        assert_eq!(failure.attempts, 1);
    }

    #[tokio::test]
    async fn sync_now_maps_pass_reports_to_outcomes() {
        let f = fixture(no_retry());
        assert!(matches!(f.repository.sync_now().await, Outcome::Success(0)));

        let rejected = timer("rejected");
        f.remote.fail_always(&rejected.id, FailureMode::Rejected);
        f.repository.create(rejected).await.unwrap();

        match f.repository.sync_now().await {
            Outcome::Failure(failure) => assert!(!failure.retryable),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn sync_now_during_a_pass_is_in_progress() {
        let f = fixture(SyncConfig::default());
        f.outbox
            .append(NewPendingMutation::create(&timer("slow")).unwrap())
            .await
            .unwrap();
        let gate = f.remote.hold_writes();
        let engine = Arc::clone(f.repository.engine());
        let pass =
            tokio::spawn(async move { engine.process_pending_sync(SyncTrigger::Manual).await });
        f.remote.wait_for_write().await;

        assert!(f.repository.sync_now().await.is_in_progress());

        gate.add_permits(16);
        pass.await.unwrap().unwrap();
        assert_eq!(f.repository.pending_count().unwrap(), 0);
    }
}
