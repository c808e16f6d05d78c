//! Graceful shutdown handling
//!
//! SIGINT/SIGTERM flip a shared flag that the HTTP server and every live
//! stream task observe. Live streams are tracked so shutdown can wait for
//! them to close their channels.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

/// Shutdown signal that can be cloned and shared
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
    // Only set by `never()`, so the channel stays open.
    _sender: Option<Arc<watch::Sender<bool>>>,
}

impl ShutdownSignal {
    /// A signal that never fires; for tests and one-off tools.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _sender: Some(Arc::new(tx)),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Completes once shutdown has been initiated.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        // A dropped coordinator counts as shutdown.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

/// Counts open live streams
#[derive(Default)]
pub struct StreamTracker {
    active: AtomicU64,
    total: AtomicU64,
}

impl StreamTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a stream opening; the guard closes it on drop.
    pub fn stream_start(self: &Arc<Self>) -> StreamGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
        StreamGuard {
            tracker: self.clone(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    pub fn total_count(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    /// Wait for every stream to close. Returns false on timeout.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let start = std::time::Instant::now();

        while self.active_count() > 0 {
            if start.elapsed() > timeout {
                warn!(
                    active = self.active_count(),
                    "timeout waiting for live streams to close"
                );
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        true
    }
}

/// Decrements the open stream count when dropped
pub struct StreamGuard {
    tracker: Arc<StreamTracker>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.tracker.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Owns the shutdown flag
pub struct ShutdownCoordinator {
    tx: watch::Sender<bool>,
    streams: Arc<StreamTracker>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            tx,
            streams: Arc::new(StreamTracker::new()),
        }
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
            _sender: None,
        }
    }

    pub fn streams(&self) -> Arc<StreamTracker> {
        self.streams.clone()
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }

    /// Initiate shutdown. Idempotent.
    pub fn shutdown(&self) {
        if self.tx.send_replace(true) {
            return;
        }
        info!("initiating graceful shutdown");
    }

    /// Initiate shutdown and wait up to `drain_timeout` for live streams to end.
    pub async fn graceful_shutdown(&self, drain_timeout: Duration) {
        self.shutdown();
        info!(
            active_streams = self.streams.active_count(),
            "waiting for live streams to close"
        );
        if self.streams.wait_for_drain(drain_timeout).await {
            info!("graceful shutdown complete");
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Completes on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("received SIGTERM, initiating shutdown");
        }
    }
}
