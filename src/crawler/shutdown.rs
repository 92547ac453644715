//! Cooperative shutdown on SIGINT/SIGTERM
//!
//! The first signal flips a watch channel; the driver notices it between
//! items and during every wait, then checkpoints and stops. A second Ctrl+C
//! exits immediately.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Exit code used when a second Ctrl+C forces the process down
pub const FORCED_EXIT_CODE: i32 = 130;

/// Sending half: requests a graceful stop
#[derive(Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownTrigger {
    /// Requests shutdown; later calls are no-ops
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiving half: observed by the driver
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested
    pub async fn triggered(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender gone without triggering: never resolves
                std::future::pending::<()>().await;
            }
        }
    }

    /// Sleeps for `duration` unless shutdown is requested first
    ///
    /// Returns `true` if the full duration elapsed, `false` if interrupted.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_triggered() {
            return false;
        }
        if duration.is_zero() {
            return true;
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.triggered() => false,
        }
    }
}

/// Creates a connected trigger/signal pair
pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx: Arc::new(tx) }, ShutdownSignal { rx })
}

/// Spawns the OS signal listener
///
/// The first SIGINT or SIGTERM triggers a graceful shutdown. A second Ctrl+C
/// exits the process with [`FORCED_EXIT_CODE`].
pub fn listen_for_signals(trigger: ShutdownTrigger) -> JoinHandle<()> {
    tokio::spawn(async move {
        let name = wait_for_signal().await;
        tracing::warn!(
            "Received {}, finishing the current item and saving progress (press Ctrl+C again to force exit)",
            name
        );
        trigger.trigger();

        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::error!("Forced exit; progress since the last checkpoint may be replayed");
            std::process::exit(FORCED_EXIT_CODE);
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => "SIGINT",
                _ = terminate.recv() => "SIGTERM",
            }
        }
        Err(e) => {
            tracing::warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            "SIGINT"
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "Ctrl+C"
}
