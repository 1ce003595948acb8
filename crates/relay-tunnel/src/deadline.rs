//! One-shot per-call deadlines for blocking tunnel operations.
//!
//! A zero timeout means the call may block indefinitely.

use std::time::Duration;

use tokio::time::Instant;

/// Absolute point in time after which a blocked call gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    expiry: Option<Instant>,
}

impl Deadline {
    /// Creates a deadline `timeout` from now, or no deadline if `timeout` is zero.
    pub fn after(timeout: Duration) -> Self {
        if timeout.is_zero() {
            Self::never()
        } else {
            Self {
                expiry: Some(Instant::now() + timeout),
            }
        }
    }

    /// A deadline that never expires.
    pub fn never() -> Self {
        Self { expiry: None }
    }

    /// Returns the expiry instant, if any.
    pub fn expiry(&self) -> Option<Instant> {
        self.expiry
    }

    /// Returns `true` if the deadline is set and has passed.
    pub fn is_expired(&self) -> bool {
        self.expiry.map_or(false, |at| Instant::now() >= at)
    }

    /// Resolves once the deadline passes; pends forever without one.
    pub async fn expired(&self) {
        match self.expiry {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_timeout_never_expires() {
        let deadline = Deadline::after(Duration::ZERO);
        assert_eq!(deadline, Deadline::never());
        assert!(deadline.expiry().is_none());
        assert!(!deadline.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires_after_timeout() {
        let start = Instant::now();
        let deadline = Deadline::after(Duration::from_millis(250));
        assert!(!deadline.is_expired());

        deadline.expired().await;
        assert!(start.elapsed() >= Duration::from_millis(250));
        assert!(deadline.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_pends() {
        let deadline = Deadline::never();
        let raced = tokio::time::timeout(Duration::from_secs(3600), deadline.expired()).await;
        assert!(raced.is_err());
    }
}
