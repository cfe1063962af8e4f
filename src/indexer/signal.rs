//! Cooperative cancellation shared by every project of one fan-out call

use std::sync::Arc;
use tokio::sync::watch;

/// Owner side: aborting is idempotent and visible to every signal clone
#[derive(Debug, Clone)]
pub struct AbortController {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortController {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: Some(self.tx.subscribe()),
        }
    }

    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side handed to transports and producers
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    // None: a signal nobody can fire
    rx: Option<watch::Receiver<bool>>,
}

impl AbortSignal {
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_aborted(&self) -> bool {
        self.rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Resolves once the controller aborts; pends forever otherwise
    pub async fn aborted(&self) {
        let Some(rx) = &self.rx else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        if rx.wait_for(|aborted| *aborted).await.is_err() {
            // Controller dropped without aborting
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_abort_wakes_all_signals() {
        let controller = AbortController::new();
        let a = controller.signal();
        let b = a.clone();
        assert!(!a.is_aborted());

        let waiter = tokio::spawn(async move { b.aborted().await });
        controller.abort();
        controller.abort();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("signal should resolve")
            .unwrap();
        assert!(a.is_aborted());
    }

    #[tokio::test]
    async fn test_never_signal_pends() {
        let signal = AbortSignal::never();
        let res = tokio::time::timeout(Duration::from_millis(20), signal.aborted()).await;
        assert!(res.is_err());
        assert!(!signal.is_aborted());
    }

    #[tokio::test]
    async fn test_dropped_controller_does_not_abort() {
        let signal = AbortController::new().signal();
        let res = tokio::time::timeout(Duration::from_millis(20), signal.aborted()).await;
        assert!(res.is_err());
    }
}
