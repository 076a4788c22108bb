//! Periodic loop driving the heartbeat engine
//!
//! One worker task per cache. It is started lazily on the first multi-host
//! registration and runs until `stop()`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::host::{ConnectionProperties, HostSpec};

use super::HeartbeatEngine;

pub const DEFAULT_HEARTBEAT_PERIOD: Duration = Duration::from_millis(5000);

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owns the heartbeat loop lifecycle
pub struct ClusterNodeCache {
    engine: Arc<HeartbeatEngine>,
    /// Tick period in ms: the minimum requested by any registrant
    period_ms: Arc<AtomicU64>,
    worker: Mutex<Option<Worker>>,
}

impl ClusterNodeCache {
    pub fn new(engine: Arc<HeartbeatEngine>) -> Self {
        Self {
            engine,
            period_ms: Arc::new(AtomicU64::new(DEFAULT_HEARTBEAT_PERIOD.as_millis() as u64)),
            worker: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &Arc<HeartbeatEngine> {
        &self.engine
    }

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms.load(Ordering::Relaxed))
    }

    /// Register a connected primary and its cluster
    ///
    /// The period only ever shrinks while the loop is in use. Single-host
    /// clusters are tracked but do not start the loop.
    pub fn register(
        &self,
        master: &HostSpec,
        hosts: &[HostSpec],
        props: &ConnectionProperties,
        heartbeat_period: Option<Duration>,
    ) {
        self.engine.register(master, hosts, props);

        if let Some(period) = heartbeat_period {
            let ms = (period.as_millis() as u64).max(1);
            let previous = self.period_ms.fetch_min(ms, Ordering::Relaxed);
            if ms < previous {
                debug!(period_ms = ms, "Heartbeat period shortened");
            }
        }

        if hosts.iter().any(|h| h != master) {
            self.start();
        }
    }

    /// Spawn the loop if it is not running. Returns true if a worker was spawned.
    pub fn start(&self) -> bool {
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return false;
        }

        let cancel = CancellationToken::new();
        let engine = self.engine.clone();
        let period_ms = self.period_ms.clone();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            loop {
                let period = Duration::from_millis(period_ms.load(Ordering::Relaxed));
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Heartbeat loop cancelled");
                        break;
                    }
                    _ = tokio::time::sleep(period) => {
                        engine.tick().await;
                    }
                }
            }
        });

        info!(period_ms = self.period_ms.load(Ordering::Relaxed), "Heartbeat loop started");
        *worker = Some(Worker { cancel, handle });
        true
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Stop the loop and reset to a fresh state
    ///
    /// Waits for the worker to exit, then clears all engine state and
    /// restores the default period.
    pub async fn stop(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.cancel.cancel();
            let _ = worker.handle.await;
            info!("Heartbeat loop stopped");
        }

        self.engine.clear();
        self.period_ms.store(
            DEFAULT_HEARTBEAT_PERIOD.as_millis() as u64,
            Ordering::Relaxed,
        );
    }
}
