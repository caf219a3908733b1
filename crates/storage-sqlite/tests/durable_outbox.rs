use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Utc};
use remindly_core::cache::LocalEntityCache;
use remindly_core::entities::{NewTimer, Timer};
use remindly_core::remote::RemoteStore;
use remindly_core::sync::{
    NewPendingMutation, OutboxStore, SyncEngine, SyncPassReport, SyncTrigger,
};
use remindly_core::testing::{FailureMode, RecordingRemoteStore, RemoteCall};
use remindly_core::{SyncConfig, SyncRepository};
use remindly_storage_sqlite::{init, spawn_writer, SqliteEntityCacheStore, SqliteOutboxStore};

fn open_outbox(path: &Path) -> Arc<SqliteOutboxStore> {
    let pool = init(path).unwrap();
    let writer = spawn_writer(&pool).unwrap();
    Arc::new(SqliteOutboxStore::new(pool, writer))
}

fn timer(title: &str) -> Timer {
    Timer::new(NewTimer {
        title: title.to_string(),
        target_time: Utc::now() + Duration::days(1),
        category_id: None,
        recurrence: None,
        notes: Some("from integration test".to_string()),
    })
}

#[tokio::test]
async fn stalled_records_survive_a_restart_and_drain_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("remindly.db");
    let remote = Arc::new(RecordingRemoteStore::new());
    let timers = [timer("m1"), timer("m2"), timer("m3")];

    let ids = {
        let outbox = open_outbox(&path);
        let mut ids = Vec::new();
        for t in &timers {
            ids.push(
                outbox
                    .append(NewPendingMutation::create(t).unwrap())
                    .await
                    .unwrap(),
            );
        }
        remote.fail_always(&timers[1].id, FailureMode::Transport);

        let engine = SyncEngine::new(
            outbox.clone() as Arc<dyn OutboxStore>,
            remote.clone() as Arc<dyn RemoteStore>,
            SyncConfig::default(),
        );
        let report = engine
            .process_pending_sync(SyncTrigger::Startup)
            .await
            .unwrap();
        assert!(matches!(report, SyncPassReport::Stalled { applied: 1, .. }));
        ids
    };

    // Reopen as a fresh process would.
    let outbox = open_outbox(&path);
    let remaining: Vec<i64> = outbox.list_pending().unwrap().iter().map(|r| r.id).collect();
    assert_eq!(remaining, ids[1..].to_vec());

    remote.clear_failures();
    let engine = SyncEngine::new(
        outbox.clone() as Arc<dyn OutboxStore>,
        remote.clone() as Arc<dyn RemoteStore>,
        SyncConfig::default(),
    );
    let report = engine
        .process_pending_sync(SyncTrigger::Connectivity)
        .await
        .unwrap();

    assert_eq!(report, SyncPassReport::Completed { applied: 2 });
    let expected: Vec<_> = timers
        .iter()
        .map(|t| RemoteCall::upsert("timers", &t.id))
        .collect();
    assert_eq!(remote.calls(), expected);
    assert_eq!(outbox.pending_count().unwrap(), 0);
}

#[tokio::test]
async fn offline_writes_are_visible_after_hydrating_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init(&dir.path().join("remindly.db")).unwrap();
    let writer = spawn_writer(&pool).unwrap();
    let outbox = Arc::new(SqliteOutboxStore::new(Arc::clone(&pool), writer.clone()));
    let cache_store = Arc::new(SqliteEntityCacheStore::new(Arc::clone(&pool), writer));
    let remote = Arc::new(RecordingRemoteStore::new());
    remote.set_offline(true);

    let engine = Arc::new(SyncEngine::new(
        outbox.clone() as Arc<dyn OutboxStore>,
        remote.clone() as Arc<dyn RemoteStore>,
        SyncConfig {
            retry: remindly_core::RetryPolicy::no_retry(),
            ..SyncConfig::default()
        },
    ));
    let repository = SyncRepository::new(
        Arc::clone(&engine),
        Arc::new(LocalEntityCache::with_store(cache_store.clone())),
    );

    let standup = timer("standup");
    let written = repository.create(standup.clone()).await.unwrap();
    assert!(written.remote.as_failure().is_some_and(|f| f.retryable));

    let restored = LocalEntityCache::with_store(cache_store);
    assert_eq!(restored.hydrate().unwrap(), 1);
    assert_eq!(restored.list::<Timer>(), vec![standup]);
    assert_eq!(outbox.pending_count().unwrap(), 1);
}

#[tokio::test]
async fn records_appended_during_a_pass_wait_for_the_next_one() {
    let dir = tempfile::tempdir().unwrap();
    let outbox = open_outbox(&dir.path().join("remindly.db"));
    let remote = Arc::new(RecordingRemoteStore::new());
    let engine = Arc::new(SyncEngine::new(
        outbox.clone() as Arc<dyn OutboxStore>,
        remote.clone() as Arc<dyn RemoteStore>,
        SyncConfig::default(),
    ));
    let (first, late) = (timer("in flight"), timer("late"));
    outbox
        .append(NewPendingMutation::create(&first).unwrap())
        .await
        .unwrap();
    let gate = remote.hold_writes();

    let pass_engine = Arc::clone(&engine);
    let pass =
        tokio::spawn(async move { pass_engine.process_pending_sync(SyncTrigger::Manual).await });
    remote.wait_for_write().await;

    let m2 = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        outbox.append(NewPendingMutation::create(&late).unwrap()),
    )
    .await
    .expect("append blocked behind the pass")
    .unwrap();

    gate.add_permits(16);
    let report = pass.await.unwrap().unwrap();
    assert_eq!(report, SyncPassReport::Completed { applied: 1 });
    let remaining: Vec<i64> = outbox.list_pending().unwrap().iter().map(|r| r.id).collect();
    assert_eq!(remaining, vec![m2]);

    let report = engine
        .process_pending_sync(SyncTrigger::Periodic)
        .await
        .unwrap();
    assert_eq!(report, SyncPassReport::Completed { applied: 1 });
    assert_eq!(outbox.pending_count().unwrap(), 0);
    assert!(remote.row("timers", &late.id).is_some());
}

#[tokio::test]
async fn transient_failure_resets_the_stored_failure_count() {
    let dir = tempfile::tempdir().unwrap();
    let outbox = open_outbox(&dir.path().join("remindly.db"));
    let remote = Arc::new(RecordingRemoteStore::new());
    let engine = SyncEngine::new(
        outbox.clone() as Arc<dyn OutboxStore>,
        remote.clone() as Arc<dyn RemoteStore>,
        SyncConfig {
            dead_letter_after: Some(2),
            ..SyncConfig::default()
        },
    );
    let flaky = timer("flaky");
    let id = outbox
        .append(NewPendingMutation::create(&flaky).unwrap())
        .await
        .unwrap();

    remote.fail_always(&flaky.id, FailureMode::Rejected);
    engine.process_pending_sync(SyncTrigger::Manual).await.unwrap();
    assert_eq!(outbox.failure_count(id).unwrap(), 1);

    remote.fail_always(&flaky.id, FailureMode::Transport);
    engine.process_pending_sync(SyncTrigger::Manual).await.unwrap();
    assert_eq!(outbox.failure_count(id).unwrap(), 0);

    remote.fail_always(&flaky.id, FailureMode::Rejected);
    let report = engine.process_pending_sync(SyncTrigger::Manual).await.unwrap();
    assert!(matches!(
        report,
        SyncPassReport::Stalled { dead_lettered: false, .. }
    ));
    assert!(outbox.list_dead_letters().unwrap().is_empty());
}
