//! Credit-based send allowance.
//!
//! The peer grants bytes of allowance; every outbound chunk drains its length
//! before it may be sent. Credit only ever returns through an explicit grant.
//!
//! The counter and its grant signal share one lock domain, independent of the
//! inbound queue's, so the send and receive paths never nest locks.

use std::sync::Mutex;

use tokio::sync::Notify;

/// Remaining send credit plus a signal raised on every grant.
#[derive(Debug, Default)]
pub struct Allowance {
    space: Mutex<usize>,
    granted: Notify,
}

impl Allowance {
    /// Creates a counter with no credit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `space` bytes of credit and wakes blocked senders.
    pub fn grant(&self, space: usize) {
        let mut available = self.space.lock().unwrap();
        *available = available.saturating_add(space);
        self.granted.notify_waiters();
    }

    /// Subtracts `need` bytes if that much credit is available.
    pub fn try_drain(&self, need: usize) -> bool {
        let mut available = self.space.lock().unwrap();
        if *available >= need {
            *available -= need;
            true
        } else {
            false
        }
    }

    /// Waits until `need` bytes can be drained, then drains them.
    ///
    /// Cancel safe: credit is only taken in the same poll that completes the future.
    pub async fn acquire(&self, need: usize) {
        loop {
            let granted = self.granted.notified();
            tokio::pin!(granted);
            granted.as_mut().enable();

            if self.try_drain(need) {
                return;
            }
            granted.await;
        }
    }

    /// Returns the credit currently available.
    pub fn available(&self) -> usize {
        *self.space.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_drain_within_credit() {
        let allowance = Allowance::new();
        allowance.grant(10);

        assert!(allowance.try_drain(4));
        assert!(allowance.try_drain(6));
        assert_eq!(allowance.available(), 0);
    }

    #[test]
    fn test_drain_insufficient_keeps_credit() {
        let allowance = Allowance::new();
        allowance.grant(8);

        assert!(!allowance.try_drain(10));
        assert_eq!(allowance.available(), 8);
    }

    #[test]
    fn test_grants_accumulate() {
        let allowance = Allowance::new();
        allowance.grant(3);
        allowance.grant(5);
        assert_eq!(allowance.available(), 8);
    }

    #[tokio::test]
    async fn test_acquire_immediate() {
        let allowance = Allowance::new();
        allowance.grant(16);
        allowance.acquire(16).await;
        assert_eq!(allowance.available(), 0);
    }

    #[tokio::test]
    async fn test_acquire_blocks_until_enough_granted() {
        let allowance = Arc::new(Allowance::new());
        allowance.grant(8);

        let waiter = {
            let allowance = Arc::clone(&allowance);
            tokio::spawn(async move { allowance.acquire(10).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        allowance.grant(1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        allowance.grant(1);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(allowance.available(), 0);
    }

    #[tokio::test]
    async fn test_dropped_acquire_takes_nothing() {
        let allowance = Allowance::new();
        allowance.grant(4);

        let raced = tokio::time::timeout(Duration::from_millis(10), allowance.acquire(5)).await;
        assert!(raced.is_err());
        assert_eq!(allowance.available(), 4);
    }
}
