use anyhow::Result;
use tokio::sync::watch;
use tracing::info;

/// Graceful shutdown coordinator.
///
/// Long running tasks hold a [`ShutdownSignal`] and stop once it fires;
/// Ctrl-C triggers it when signal handlers are installed.
pub struct ShutdownCoordinator {
    sender: watch::Sender<bool>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: self.sender.subscribe(),
        }
    }

    /// Ask every subscriber to stop
    pub fn trigger(&self) {
        info!("Shutdown requested");
        self.sender.send_replace(true);
    }

    /// Trigger shutdown on Ctrl-C
    pub fn install_signal_handlers(&self) -> Result<()> {
        let sender = self.sender.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl-C, shutting down");
                sender.send_replace(true);
            }
        });
        Ok(())
    }
}

/// Receiving side of a shutdown request
#[derive(Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once shutdown has been requested (or the coordinator is gone)
    pub async fn recv(&mut self) {
        // An Err means the coordinator was dropped, which also means stop
        let _ = self.receiver.wait_for(|stop| *stop).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_reaches_subscribers() {
        let coordinator = ShutdownCoordinator::new();
        let mut signal = coordinator.subscribe();
        assert!(!signal.is_triggered());

        let waiter = tokio::spawn(async move {
            signal.recv().await;
            signal.is_triggered()
        });

        coordinator.trigger();
        let triggered = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(triggered);
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_trigger() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.trigger();
        let mut signal = coordinator.subscribe();
        signal.recv().await;
        assert!(signal.is_triggered());
    }
}
