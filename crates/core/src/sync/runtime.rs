//! Background wiring of the engine, connectivity monitor and scheduler.

use log::{info, warn};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::connectivity::ConnectivityMonitor;
use super::sync_engine::{SyncEngine, SyncPassReport, SyncTrigger};
use super::sync_scheduler::PeriodicScheduler;

#[derive(Debug)]
struct RuntimeState {
    periodic_task: Mutex<Option<JoinHandle<()>>>,
}

pub struct SyncRuntime {
    engine: Arc<SyncEngine>,
    monitor: Arc<ConnectivityMonitor>,
    state: RuntimeState,
}

impl SyncRuntime {
    pub fn new(engine: Arc<SyncEngine>, monitor: Arc<ConnectivityMonitor>) -> Self {
        Self {
            engine,
            monitor,
            state: RuntimeState {
                periodic_task: Mutex::new(None),
            },
        }
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    /// Starts the periodic scheduler; no-op if it is already running.
    pub async fn ensure_started(&self) {
        let mut guard = self.state.periodic_task.lock().await;
        if let Some(handle) = guard.as_ref() {
            if !handle.is_finished() {
                return;
            }
            guard.take();
        }

        let scheduler = PeriodicScheduler::new(Arc::clone(&self.engine), self.monitor.subscribe());
        *guard = Some(scheduler.spawn());
        info!("[SyncRuntime] Periodic sync started");
    }

    pub async fn ensure_stopped(&self) {
        let mut guard = self.state.periodic_task.lock().await;
        if let Some(handle) = guard.take() {
            handle.abort();
            info!("[SyncRuntime] Periodic sync stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.state
            .periodic_task
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Manual "pull to refresh" trigger; runs on its own task.
    pub fn request_sync(&self) -> JoinHandle<Option<SyncPassReport>> {
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            match engine.process_pending_sync(SyncTrigger::Manual).await {
                Ok(report) => Some(report),
                Err(err) => {
                    warn!("[SyncRuntime] Manual pass failed: {}", err);
                    None
                }
            }
        })
    }
}
