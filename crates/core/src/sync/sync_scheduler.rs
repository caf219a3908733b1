//! Periodic drain trigger.

use log::{debug, warn};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::sync_engine::{SyncEngine, SyncTrigger};

/// Nominal periodic sync cadence in seconds.
pub const SYNC_PERIODIC_INTERVAL_SECS: u64 = 15 * 60;

/// Maximum jitter (seconds) added to periodic intervals.
pub const SYNC_INTERVAL_JITTER_SECS: u64 = 30;

/// Fires the engine on a fixed interval while the device is online.
///
/// Ticks that land while offline are skipped; the connectivity edge covers
/// those.
pub struct PeriodicScheduler {
    engine: Arc<SyncEngine>,
    online: watch::Receiver<bool>,
    interval: Duration,
    jitter: Duration,
}

impl PeriodicScheduler {
    pub fn new(engine: Arc<SyncEngine>, online: watch::Receiver<bool>) -> Self {
        let interval = engine.config().periodic_interval();
        let jitter = engine.config().periodic_jitter();
        Self {
            engine,
            online,
            interval,
            jitter,
        }
    }

    fn next_delay(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let extra = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_ms)
        } else {
            0
        };
        self.interval + Duration::from_millis(extra)
    }

    /// Runs one tick: a pass if online, nothing otherwise. Returns whether a
    /// pass was attempted.
    pub async fn tick(&self) -> bool {
        if !*self.online.borrow() {
            debug!("[Scheduler] Offline; periodic pass skipped");
            return false;
        }
        match self.engine.process_pending_sync(SyncTrigger::Periodic).await {
            Ok(report) => debug!("[Scheduler] Periodic pass finished: {:?}", report),
            Err(err) => warn!("[Scheduler] Periodic pass failed: {}", err),
        }
        true
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(self.next_delay()).await;
                self.tick().await;
            }
        })
    }
}
