//! Outbox drain engine: replays pending mutations against the remote store.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use super::outbox_model::{OutboxStore, PendingMutation, SyncOperation};
use crate::config::SyncConfig;
use crate::errors::{Error, RemoteError, Result, RetryClass};
use crate::remote::{RemoteStore, RowFilter};
use crate::retry::{Failure, Outcome, RetryPolicy};

/// Trigger source for drain passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Startup,
    Connectivity,
    Periodic,
    Manual,
    LocalMutation,
}

/// What one call to [`SyncEngine::process_pending_sync`] did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncPassReport {
    /// Another pass held the guard.
    Skipped,
    /// Outbox was empty.
    Idle,
    Completed {
        applied: usize,
    },
    /// Stopped at `failed_id`; it and every later record remain queued
    /// (unless the dead-letter policy moved `failed_id` aside).
    Stalled {
        applied: usize,
        failed_id: i64,
        error: String,
        retryable: bool,
        dead_lettered: bool,
    },
}

impl SyncPassReport {
    pub fn applied(&self) -> usize {
        match self {
            SyncPassReport::Completed { applied } | SyncPassReport::Stalled { applied, .. } => {
                *applied
            }
            SyncPassReport::Skipped | SyncPassReport::Idle => 0,
        }
    }

    fn status_code(&self) -> &'static str {
        match self {
            SyncPassReport::Skipped => "skipped",
            SyncPassReport::Idle => "idle",
            SyncPassReport::Completed { .. } => "ok",
            SyncPassReport::Stalled { .. } => "stalled",
        }
    }
}

/// Observable engine state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_syncing: bool,
    pub last_trigger: Option<SyncTrigger>,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<String>,
    pub last_applied: usize,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub pending: usize,
}

/// Result of pushing a freshly appended record outside a pass.
#[derive(Debug)]
pub enum DirectPush {
    Applied,
    /// Another path already applied and removed the record.
    AlreadySynced,
    /// Earlier records are pending; the record must wait for a pass.
    Queued,
    /// A pass or another direct push holds the engine.
    Busy,
    Failed(Failure),
}

/// Releases the re-entrancy flag on every exit path and publishes it, so
/// status watchers never see a stale `is_syncing`.
struct SyncGuard<'a> {
    flag: &'a AtomicBool,
    status: &'a watch::Sender<SyncStatus>,
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
        self.status.send_modify(|status| status.is_syncing = false);
    }
}

pub struct SyncEngine {
    outbox: Arc<dyn OutboxStore>,
    remote: Arc<dyn RemoteStore>,
    config: SyncConfig,
    is_syncing: AtomicBool,
    /// Raised by every trigger before it tries the guard; the holder reruns
    /// the pass when it sees the flag after releasing the guard.
    rerun_requested: AtomicBool,
    status: watch::Sender<SyncStatus>,
}

impl SyncEngine {
    pub fn new(
        outbox: Arc<dyn OutboxStore>,
        remote: Arc<dyn RemoteStore>,
        config: SyncConfig,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        Self {
            outbox,
            remote,
            config,
            is_syncing: AtomicBool::new(false),
            rerun_requested: AtomicBool::new(false),
            status,
        }
    }

    pub fn outbox(&self) -> &Arc<dyn OutboxStore> {
        &self.outbox
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn is_syncing(&self) -> bool {
        self.is_syncing.load(Ordering::SeqCst)
    }

    /// A trigger was skipped and no pass has picked it up yet.
    pub fn has_rerun_request(&self) -> bool {
        self.rerun_requested.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    fn try_begin(&self) -> Option<SyncGuard<'_>> {
        self.is_syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| {
                self.status.send_modify(|status| status.is_syncing = true);
                SyncGuard {
                    flag: &self.is_syncing,
                    status: &self.status,
                }
            })
    }

    /// Runs one drain pass unless another one is in progress.
    ///
    /// A skipped trigger is not lost: it leaves a rerun request that the
    /// running pass honours once it releases the guard, so records appended
    /// while it ran are drained without waiting for the next trigger.
    ///
    /// Returns `Err` only for local storage failures; remote failures stall
    /// the pass and are reported through [`SyncPassReport::Stalled`].
    pub async fn process_pending_sync(&self, trigger: SyncTrigger) -> Result<SyncPassReport> {
        let mut previous: Option<SyncPassReport> = None;
        loop {
            self.rerun_requested.store(true, Ordering::SeqCst);
            let Some(guard) = self.try_begin() else {
                debug!("[Sync] Pass already running; {:?} trigger deferred", trigger);
                return Ok(previous.unwrap_or(SyncPassReport::Skipped));
            };
            self.rerun_requested.store(false, Ordering::SeqCst);

            let started_at = Utc::now();
            self.status.send_modify(|status| {
                status.last_trigger = Some(trigger);
                status.last_started_at = Some(started_at);
            });

            let result = merge_reports(previous.take(), self.drain().await);
            self.finish_pass(trigger, &result);
            drop(guard);

            match result {
                Ok(report @ (SyncPassReport::Idle | SyncPassReport::Completed { .. }))
                    if self.rerun_requested.load(Ordering::SeqCst) =>
                {
                    debug!("[Sync] Trigger arrived during the pass; draining again");
                    previous = Some(report);
                }
                other => return other,
            }
        }
    }

    async fn drain(&self) -> Result<SyncPassReport> {
        let pending = self.outbox.list_pending()?;
        if pending.is_empty() {
            return Ok(SyncPassReport::Idle);
        }
        debug!("[Sync] Draining {} pending mutation(s)", pending.len());

        let mut applied = 0usize;
        for record in &pending {
            if let Err(err) = self.apply_mutation(record).await {
                warn!(
                    "[Sync] Mutation {} ({} {} '{}') failed, stopping pass: {}",
                    record.id, record.operation, record.entity_type, record.entity_id, err
                );
                let dead_lettered = self.apply_dead_letter_policy(record, &err).await?;
                return Ok(SyncPassReport::Stalled {
                    applied,
                    failed_id: record.id,
                    error: err.to_string(),
                    retryable: err.is_retryable(),
                    dead_lettered,
                });
            }
            self.outbox.remove(record.id).await?;
            applied += 1;
        }

        Ok(SyncPassReport::Completed { applied })
    }

    fn finish_pass(&self, trigger: SyncTrigger, result: &Result<SyncPassReport>) {
        let pending = self.outbox.pending_count().ok();
        let finished_at = Utc::now();
        self.status.send_modify(|status| {
            status.last_finished_at = Some(finished_at);
            if let Some(pending) = pending {
                status.pending = pending;
            }
            match result {
                Ok(report) => {
                    status.last_outcome = Some(report.status_code().to_string());
                    status.last_applied = report.applied();
                    match report {
                        SyncPassReport::Stalled { error, .. } => {
                            status.last_error = Some(error.clone());
                            status.consecutive_failures += 1;
                        }
                        _ => {
                            status.last_error = None;
                            status.consecutive_failures = 0;
                        }
                    }
                }
                Err(err) => {
                    status.last_outcome = Some("storage_error".to_string());
                    status.last_applied = 0;
                    status.last_error = Some(err.to_string());
                    status.consecutive_failures += 1;
                }
            }
        });

        match result {
            Ok(SyncPassReport::Completed { applied }) => {
                info!("[Sync] {:?} pass applied {} mutation(s)", trigger, applied)
            }
            Ok(SyncPassReport::Stalled {
                applied, failed_id, ..
            }) => info!(
                "[Sync] {:?} pass stalled at mutation {} after applying {}",
                trigger, failed_id, applied
            ),
            Ok(_) => debug!("[Sync] {:?} pass found nothing to do", trigger),
            Err(err) => warn!("[Sync] {:?} pass aborted by storage error: {}", trigger, err),
        }
    }

    /// Applies one record remotely. CREATE and UPDATE both upsert by id.
    pub(crate) async fn apply_mutation(&self, record: &PendingMutation) -> Result<()> {
        let entity = record.entity()?;
        let op = record.op()?;
        let table = entity.table_name();

        let call = async {
            match op {
                SyncOperation::Create | SyncOperation::Update => {
                    let row = entity.decode_row(&record.entity_id, &record.payload)?;
                    self.remote.upsert(table, row).await
                }
                SyncOperation::Delete => {
                    self.remote
                        .delete(table, RowFilter::id(record.entity_id.clone()))
                        .await
                }
            }
        };

        let timeout = self.config.remote_timeout();
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(format!(
                "{} of {} '{}' exceeded {:?}",
                op, entity, record.entity_id, timeout
            ))
            .into()),
        }
    }

    async fn apply_dead_letter_policy(&self, record: &PendingMutation, err: &Error) -> Result<bool> {
        let Some(limit) = self.config.dead_letter_after else {
            return Ok(false);
        };
        if err.retry_class() != RetryClass::Permanent {
            // Only an unbroken run of permanent failures counts.
            self.outbox.reset_failures(record.id).await?;
            return Ok(false);
        }

        let failures = self
            .outbox
            .record_failure(record.id, err.to_string())
            .await?;
        if failures < limit.max(1) {
            return Ok(false);
        }

        warn!(
            "[Sync] Mutation {} failed permanently {} time(s); moving it to dead letters",
            record.id, failures
        );
        self.outbox
            .move_to_dead_letter(record.id, err.to_string())
            .await?;
        Ok(true)
    }

    /// Pushes `mutation_id` right away if it is at the head of the outbox.
    ///
    /// Each attempt takes the same guard as a pass, so a direct push never
    /// interleaves with a drain and replay order is kept. The guard is
    /// released between attempts; other triggers may run during backoff.
    pub async fn push_now(&self, mutation_id: i64, policy: &RetryPolicy) -> DirectPush {
        let label = format!("direct push of mutation {}", mutation_id);
        match policy.run(&label, || self.push_attempt(mutation_id)).await {
            Outcome::Success(step) => step,
            Outcome::Failure(failure) => DirectPush::Failed(failure),
            Outcome::InProgress => DirectPush::Busy,
        }
    }

    async fn push_attempt(&self, mutation_id: i64) -> Result<DirectPush> {
        let Some(_guard) = self.try_begin() else {
            return Ok(DirectPush::Busy);
        };

        let pending = self.outbox.list_pending()?;
        let Some(head) = pending.first() else {
            return Ok(DirectPush::AlreadySynced);
        };
        if head.id != mutation_id {
            return Ok(if pending.iter().any(|record| record.id == mutation_id) {
                DirectPush::Queued
            } else {
                DirectPush::AlreadySynced
            });
        }

        self.apply_mutation(head).await?;
        self.outbox.remove(head.id).await?;
        if let Ok(pending) = self.outbox.pending_count() {
            self.status.send_modify(|status| status.pending = pending);
        }
        Ok(DirectPush::Applied)
    }
}

/// Folds the report of a rerun into the one before it.
fn merge_reports(
    previous: Option<SyncPassReport>,
    next: Result<SyncPassReport>,
) -> Result<SyncPassReport> {
    let carried = previous.as_ref().map_or(0, SyncPassReport::applied);
    Ok(match next? {
        SyncPassReport::Idle if carried == 0 => SyncPassReport::Idle,
        SyncPassReport::Idle | SyncPassReport::Skipped => {
            SyncPassReport::Completed { applied: carried }
        }
        SyncPassReport::Completed { applied } => SyncPassReport::Completed {
            applied: applied + carried,
        },
        SyncPassReport::Stalled {
            applied,
            failed_id,
            error,
            retryable,
            dead_lettered,
        } => SyncPassReport::Stalled {
            applied: applied + carried,
            failed_id,
            error,
            retryable,
            dead_lettered,
        },
    })
}
