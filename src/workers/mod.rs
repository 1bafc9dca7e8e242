//! Background settlement workers
//!
//! Each worker is an explicitly constructed component; `run_once_at` drives a
//! single tick for tests and `spawn` runs ticks on an interval until the
//! returned handle is stopped.

pub mod outbox;
pub mod reconcile;
pub mod webhook;

pub use outbox::OutboxWorker;
pub use reconcile::ReconcileWorker;
pub use webhook::WebhookWorker;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Per-tick counts, mostly for tests and debug logging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[async_trait]
pub trait Worker: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn interval(&self) -> Duration;

    async fn tick(&self) -> TickReport;
}

pub struct WorkerHandle {
    name: &'static str,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the loop and wait for the in-flight tick to finish
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            warn!(worker = self.name, error = %e, "Worker task ended abnormally");
        }
        info!(worker = self.name, "Worker stopped");
    }
}

pub fn spawn<W: Worker>(worker: Arc<W>) -> WorkerHandle {
    let name = worker.name();
    let (stop_tx, mut stop_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(worker.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(worker = name, interval_ms = worker.interval().as_millis() as u64, "Worker started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = worker.tick().await;
                    if report.attempted > 0 {
                        debug!(
                            worker = name,
                            attempted = report.attempted,
                            succeeded = report.succeeded,
                            failed = report.failed,
                            "Worker tick"
                        );
                    }
                }
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }
    });

    WorkerHandle {
        name,
        stop: stop_tx,
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    #[async_trait]
    impl Worker for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        fn interval(&self) -> Duration {
            Duration::from_millis(5)
        }

        async fn tick(&self) -> TickReport {
            self.0.fetch_add(1, Ordering::SeqCst);
            TickReport::default()
        }
    }

    #[tokio::test]
    async fn test_spawned_worker_ticks_until_stopped() {
        let worker = Arc::new(Counter(AtomicUsize::new(0)));
        let handle = spawn(worker.clone());
        assert_eq!(handle.name(), "counter");

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop().await;

        let ticks = worker.0.load(Ordering::SeqCst);
        assert!(ticks >= 2);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(worker.0.load(Ordering::SeqCst), ticks);
    }
}
