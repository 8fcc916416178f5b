//! Shutdown coordination for background tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;

/// Cancellation signal shared by the prober and the list refresher.
///
/// Each background loop subscribes once and exits when the signal fires.
#[derive(Debug)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
    triggered: AtomicBool,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            triggered: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Fire the signal. Only the first call has any effect.
    pub fn trigger(&self) {
        if self.triggered.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!(subscribers = self.tx.receiver_count(), "Shutdown triggered");
        let _ = self.tx.send(());
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    /// Number of loops still holding a receiver.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Trigger, then wait up to `deadline` for `tasks` to finish.
    ///
    /// Tasks still running at the deadline are aborted; their count is returned.
    pub async fn drain(&self, tasks: Vec<JoinHandle<()>>, deadline: Duration) -> usize {
        self.trigger();

        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
        if time::timeout(deadline, join_all(tasks)).await.is_ok() {
            tracing::info!("Background tasks stopped");
            return 0;
        }

        let stuck = aborts.iter().filter(|h| !h.is_finished()).count();
        for handle in &aborts {
            handle.abort();
        }
        tracing::warn!(stuck, "Background tasks aborted after shutdown deadline");
        stuck
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
