//! One-shot broadcast signal
//!
//! A [`Signal`] fires at most once and can be awaited by any number of
//! waiters, before or after it fires.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    fired: AtomicBool,
    notify: Notify,
}

/// A fire-once signal shared between tasks
///
/// Cloning yields another handle to the same signal.
#[derive(Debug, Clone, Default)]
pub struct Signal {
    inner: Arc<Inner>,
}

impl Signal {
    /// Create a new, unfired signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal, waking every waiter
    ///
    /// Returns `true` only for the call that actually fired it.
    pub fn fire(&self) -> bool {
        let first = self
            .inner
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        if first {
            self.inner.notify.notify_waiters();
        }
        first
    }

    /// Whether the signal has fired
    pub fn is_fired(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    /// Wait until the signal fires
    ///
    /// Returns immediately if it already has.
    pub async fn wait(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);

        // Register before checking the flag so a concurrent fire() cannot slip between.
        notified.as_mut().enable();
        if self.is_fired() {
            return;
        }
        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_new_signal_is_not_fired() {
        let signal = Signal::new();
        assert!(!signal.is_fired());
    }

    #[test]
    fn test_fire_only_once() {
        let signal = Signal::new();
        assert!(signal.fire());
        assert!(!signal.fire());
        assert!(!signal.fire());
        assert!(signal.is_fired());
    }

    #[test]
    fn test_clones_share_state() {
        let signal = Signal::new();
        let other = signal.clone();
        other.fire();

        assert!(signal.is_fired());
        assert!(!Signal::new().is_fired());
    }

    #[tokio::test]
    async fn test_wait_after_fire_returns_immediately() {
        let signal = Signal::new();
        signal.fire();

        tokio::time::timeout(Duration::from_millis(100), signal.wait())
            .await
            .expect("wait should complete for a fired signal");
    }

    #[tokio::test]
    async fn test_wait_wakes_all_waiters() {
        let signal = Signal::new();

        let waiters: Vec<_> = (0..8)
            .map(|_| {
                let signal = signal.clone();
                tokio::spawn(async move { signal.wait().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        signal.fire();

        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter should wake")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_wait_blocks_until_fired() {
        let signal = Signal::new();
        let result = tokio::time::timeout(Duration::from_millis(50), signal.wait()).await;
        assert!(result.is_err());
    }
}
