//! Cooperative cancellation signal shared by every job of a run.

use tokio::sync::watch;

/// Trigger side. Dropping it does not cancel anything.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Signals every [`Shutdown`] handle created from this trigger.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Listener side, cheap to clone into each job.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Creates a connected trigger/listener pair.
    #[must_use]
    pub fn new() -> (ShutdownTrigger, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (ShutdownTrigger { tx }, Shutdown { rx })
    }

    /// A listener that never fires.
    #[must_use]
    pub fn never() -> Shutdown {
        let (_trigger, shutdown) = Self::new();
        shutdown
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the trigger fires. Pends forever if the trigger was
    /// dropped without firing.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|triggered| *triggered).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
