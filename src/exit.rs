//! One-shot notification that the terminal session has ended.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Fires at most once. Clones share the same state, and any number of tasks
/// can wait on it.
#[derive(Debug, Clone, Default)]
pub struct ExitSignal {
    inner: Arc<ExitInner>,
}

#[derive(Debug, Default)]
struct ExitInner {
    token: CancellationToken,
    fired: AtomicBool,
}

impl ExitSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. Returns `true` only for the call that actually fired it.
    pub fn notify(&self) -> bool {
        if self.inner.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.inner.token.cancel();
        true
    }

    pub fn has_fired(&self) -> bool {
        self.inner.fired.load(Ordering::SeqCst)
    }

    /// Resolve once the signal has fired; immediately if it already has.
    pub async fn wait(&self) {
        self.inner.token.cancelled().await
    }

    /// Token cancelled when the signal fires
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fires_once() {
        let signal = ExitSignal::new();
        let clone = signal.clone();

        assert!(!signal.has_fired());
        assert!(clone.notify());
        assert!(!signal.notify());
        assert!(!clone.notify());
        assert!(signal.has_fired());
        assert!(signal.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_every_waiter_observes_exit() {
        let signal = ExitSignal::new();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let signal = signal.clone();
                tokio::spawn(async move { signal.wait().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.notify();

        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter should finish")
                .unwrap();
        }

        // Late waiters return immediately
        tokio::time::timeout(Duration::from_millis(100), signal.wait())
            .await
            .expect("already fired");
    }
}
