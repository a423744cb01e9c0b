//! Cooperative shutdown primitive shared by every long-running loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Shutdown state broadcast over a watch channel; every clone observes the
/// same signal. Waiting is just watching for the value to flip.
#[derive(Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Trip the signal on Ctrl-C. Call once from the binary entrypoint.
    pub fn listen_for_ctrl_c(&self) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tx.send_replace(true);
            }
        });
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    #[must_use]
    pub fn triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the signal trips; returns immediately when already set.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        // The sender lives inside every clone of this signal, so the channel
        // cannot close while a waiter holds one.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Sleep for `duration`, returning `false` when interrupted by shutdown.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.wait() => false,
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
