//! Write-once termination broadcast.
//!
//! Used for both a tunnel's terminal state and a connection's shutdown: the
//! first `fire` stores the reason and wakes every waiter, later calls are no-ops.

use std::sync::OnceLock;

use tokio::sync::watch;

/// One-shot broadcast carrying an optional closure reason.
///
/// A `None` reason means graceful termination.
#[derive(Debug)]
pub struct Termination {
    reason: OnceLock<Option<String>>,
    fired: watch::Sender<bool>,
}

impl Default for Termination {
    fn default() -> Self {
        Self::new()
    }
}

impl Termination {
    /// Creates an unfired termination signal.
    pub fn new() -> Self {
        let (fired, _) = watch::channel(false);
        Self {
            reason: OnceLock::new(),
            fired,
        }
    }

    /// Stores `reason` and wakes all waiters.
    ///
    /// Returns `false` if the signal had already fired; the first reason wins.
    pub fn fire(&self, reason: Option<String>) -> bool {
        if self.reason.set(reason).is_err() {
            return false;
        }
        self.fired.send_replace(true);
        true
    }

    /// Returns `true` once the signal has fired.
    pub fn is_fired(&self) -> bool {
        self.reason.get().is_some()
    }

    /// Returns the stored reason, or `None` while still unfired.
    pub fn reason(&self) -> Option<Option<&str>> {
        self.reason.get().map(|r| r.as_deref())
    }

    /// Resolves once the signal has fired.
    pub async fn wait(&self) {
        let mut rx = self.fired.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_fire_once() {
        let term = Termination::new();
        assert!(!term.is_fired());
        assert_eq!(term.reason(), None);

        assert!(term.fire(Some("boom".to_string())));
        assert!(!term.fire(None));

        assert!(term.is_fired());
        assert_eq!(term.reason(), Some(Some("boom")));
    }

    #[test]
    fn test_graceful_reason() {
        let term = Termination::new();
        term.fire(None);
        assert_eq!(term.reason(), Some(None));
    }

    #[tokio::test]
    async fn test_wait_after_fire_returns_immediately() {
        let term = Termination::new();
        term.fire(None);
        tokio::time::timeout(Duration::from_secs(1), term.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_fire_wakes_all_waiters() {
        let term = Arc::new(Termination::new());
        let mut waiters = Vec::new();
        for _ in 0..4 {
            let term = Arc::clone(&term);
            waiters.push(tokio::spawn(async move { term.wait().await }));
        }
        tokio::task::yield_now().await;

        term.fire(Some("connection lost".to_string()));
        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .unwrap()
                .unwrap();
        }
    }
}
