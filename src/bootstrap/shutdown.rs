use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Process-wide shutdown handle.
///
/// A single watch channel fans the shutdown signal out to every background
/// task. Tasks either select on a subscribed receiver or await [`Shutdown::wait`].
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    /// Create a new handle in the running state.
    pub fn new() -> Arc<Self> {
        let (tx, _) = watch::channel(false);
        Arc::new(Self { tx })
    }

    /// Signal shutdown. Idempotent.
    pub fn signal(&self) {
        if !*self.tx.borrow() {
            info!("shutdown signaled");
            let _ = self.tx.send(true);
        }
    }

    /// Check whether shutdown has been signaled.
    pub fn is_signaled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Complete once shutdown has been signaled.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_starts_running() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_signaled());
    }

    #[tokio::test]
    async fn test_signal_is_observed() {
        let shutdown = Shutdown::new();
        let waiter = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.wait().await })
        };

        shutdown.signal();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait did not unblock")
            .unwrap();
        assert!(shutdown.is_signaled());
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_already_signaled() {
        let shutdown = Shutdown::new();
        shutdown.signal();
        tokio::time::timeout(Duration::from_secs(1), shutdown.wait())
            .await
            .expect("wait did not return");
    }
}
