//! Network reachability signal with edge-triggered sync kicks.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use super::sync_engine::{SyncEngine, SyncTrigger};

/// Synchronous current-state query offered by the platform.
pub trait ReachabilityProbe: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Probe with a fixed answer, for hosts that only deliver callbacks.
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe(pub bool);

impl ReachabilityProbe for StaticProbe {
    fn is_online(&self) -> bool {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityEvent {
    BecameOnline,
    BecameOffline,
}

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Publishes the online flag and schedules a pass on every offline → online edge.
///
/// [`ConnectivityMonitor::report`] is safe to call from any thread; it never
/// runs the pass itself, it spawns it on the captured runtime.
pub struct ConnectivityMonitor {
    online: watch::Sender<bool>,
    events: broadcast::Sender<ConnectivityEvent>,
    engine: Arc<SyncEngine>,
    runtime: Handle,
}

impl ConnectivityMonitor {
    /// Reads the initial state synchronously from `probe`. Must be called
    /// inside a tokio runtime; the handle is kept for later callbacks.
    pub fn start(probe: &dyn ReachabilityProbe, engine: Arc<SyncEngine>) -> Arc<Self> {
        Self::with_runtime(probe, engine, Handle::current())
    }

    pub fn with_runtime(
        probe: &dyn ReachabilityProbe,
        engine: Arc<SyncEngine>,
        runtime: Handle,
    ) -> Arc<Self> {
        let initial = probe.is_online();
        let (online, _) = watch::channel(initial);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let monitor = Arc::new(Self {
            online,
            events,
            engine,
            runtime,
        });
        info!(
            "[Connectivity] Initial state: {}",
            if initial { "online" } else { "offline" }
        );
        if initial {
            monitor.schedule_sync(SyncTrigger::Startup);
        }
        monitor
    }

    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events.subscribe()
    }

    /// Platform callback entry point. Repeated reports of the same state are
    /// ignored; an offline → online edge returns the spawned pass.
    pub fn report(&self, online: bool) -> Option<JoinHandle<()>> {
        let previous = self.online.send_replace(online);
        if previous == online {
            return None;
        }

        let event = if online {
            ConnectivityEvent::BecameOnline
        } else {
            ConnectivityEvent::BecameOffline
        };
        info!("[Connectivity] {:?}", event);
        // No subscribers is fine.
        let _ = self.events.send(event);

        if online {
            Some(self.schedule_sync(SyncTrigger::Connectivity))
        } else {
            None
        }
    }

    fn schedule_sync(&self, trigger: SyncTrigger) -> JoinHandle<()> {
        let engine = Arc::clone(&self.engine);
        self.runtime.spawn(async move {
            match engine.process_pending_sync(trigger).await {
                Ok(report) => debug!("[Connectivity] {:?} pass finished: {:?}", trigger, report),
                Err(err) => warn!("[Connectivity] {:?} pass failed: {}", trigger, err),
            }
        })
    }
}
