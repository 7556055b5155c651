//! Wake-up primitives between activities.
//!
//! [`ChangeSignal`] is a coalescing counting signal: any number of raises
//! between two waits wake the waiter once. [`NotifySlot`] does the same for a
//! small payload, merging everything posted while the consumer was busy.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// A wake-up signal that never loses a raise and never queues more than one.
///
/// Raising with no waiter stores a single permit; the next `wait` returns
/// immediately. Repeated raises before that wait collapse into the same
/// permit.
#[derive(Debug)]
pub struct ChangeSignal {
    notify: Notify,
    raised: AtomicU64,
}

impl ChangeSignal {
    /// Create a signal with no pending permit.
    pub fn new() -> Self {
        Self {
            notify: Notify::new(),
            raised: AtomicU64::new(0),
        }
    }

    /// Wake the waiter, or leave a permit for the next wait.
    pub fn raise(&self) {
        self.raised.fetch_add(1, Ordering::AcqRel);
        self.notify.notify_one();
    }

    /// Total number of raises since creation.
    pub fn raised_count(&self) -> u64 {
        self.raised.load(Ordering::Acquire)
    }

    /// Wait for the next raise.
    pub async fn wait(&self) {
        self.notify.notified().await;
    }

    /// Wait for the next raise or cancellation.
    ///
    /// Returns `false` if `token` was cancelled first.
    pub async fn wait_or_cancel(&self, token: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = token.cancelled() => false,
            _ = self.notify.notified() => true,
        }
    }
}

impl Default for ChangeSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Values that can absorb a later post of the same kind.
pub trait Coalesce {
    /// Fold `later` into `self`.
    fn coalesce(&mut self, later: Self);
}

/// Which published quantities changed since the publisher last ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Temperature changed.
    pub temperature: bool,
    /// Mode changed.
    pub mode: bool,
}

impl ChangeSet {
    /// Only the temperature changed.
    pub const TEMPERATURE: ChangeSet = ChangeSet {
        temperature: true,
        mode: false,
    };

    /// Only the mode changed.
    pub const MODE: ChangeSet = ChangeSet {
        temperature: false,
        mode: true,
    };

    /// Whether nothing is flagged.
    pub fn is_empty(&self) -> bool {
        !self.temperature && !self.mode
    }
}

impl Coalesce for ChangeSet {
    fn coalesce(&mut self, later: Self) {
        self.temperature |= later.temperature;
        self.mode |= later.mode;
    }
}

/// Single-slot mailbox that merges posts instead of dropping them.
///
/// `post` never blocks, so it is safe to call while holding a
/// [`SharedValue`](crate::SharedValue) guard.
#[derive(Debug)]
pub struct NotifySlot<T> {
    pending: Mutex<Option<T>>,
    notify: Notify,
    posted: AtomicU64,
}

impl<T: Coalesce> NotifySlot<T> {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(None),
            notify: Notify::new(),
            posted: AtomicU64::new(0),
        }
    }

    /// Post a value, merging it with anything not yet taken.
    pub fn post(&self, value: T) {
        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            match pending.as_mut() {
                Some(existing) => existing.coalesce(value),
                None => *pending = Some(value),
            }
        }
        self.posted.fetch_add(1, Ordering::AcqRel);
        self.notify.notify_one();
    }

    /// Total number of posts since creation.
    pub fn posted_count(&self) -> u64 {
        self.posted.load(Ordering::Acquire)
    }

    /// Take the pending value without waiting.
    pub fn try_take(&self) -> Option<T> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// Wait until a value is pending and take it.
    pub async fn take(&self) -> T {
        loop {
            if let Some(value) = self.try_take() {
                return value;
            }
            // A post between the check and here leaves a permit behind.
            self.notify.notified().await;
        }
    }

    /// Wait for a value or cancellation. Returns `None` once cancelled.
    pub async fn take_or_cancel(&self, token: &CancellationToken) -> Option<T> {
        tokio::select! {
            biased;
            _ = token.cancelled() => None,
            value = self.take() => Some(value),
        }
    }

    /// Discard anything pending.
    pub fn clear(&self) {
        self.try_take();
    }
}

impl<T: Coalesce> Default for NotifySlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_raise_before_wait_is_kept() {
        let signal = ChangeSignal::new();
        signal.raise();
        tokio::time::timeout(Duration::from_secs(1), signal.wait())
            .await
            .expect("stored permit should wake the waiter");
        assert_eq!(signal.raised_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_raises_coalesce() {
        let signal = ChangeSignal::new();
        signal.raise();
        signal.raise();
        signal.raise();
        signal.wait().await;

        // Only one permit was stored.
        let second = tokio::time::timeout(Duration::from_millis(50), signal.wait()).await;
        assert!(second.is_err());
        assert_eq!(signal.raised_count(), 3);
    }

    #[tokio::test]
    async fn test_wait_or_cancel() {
        let signal = ChangeSignal::new();
        let token = CancellationToken::new();
        token.cancel();
        assert!(!signal.wait_or_cancel(&token).await);
    }

    #[tokio::test]
    async fn test_raise_wakes_parked_waiter() {
        let signal = Arc::new(ChangeSignal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move { signal.wait().await })
        };
        tokio::task::yield_now().await;
        signal.raise();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_change_set_coalesce() {
        let mut changes = ChangeSet::TEMPERATURE;
        changes.coalesce(ChangeSet::MODE);
        assert!(changes.temperature);
        assert!(changes.mode);
        assert!(ChangeSet::default().is_empty());
    }

    #[tokio::test]
    async fn test_slot_merges_posts() {
        let slot = NotifySlot::new();
        slot.post(ChangeSet::TEMPERATURE);
        slot.post(ChangeSet::MODE);
        assert_eq!(slot.posted_count(), 2);

        let taken = slot.take().await;
        assert_eq!(
            taken,
            ChangeSet {
                temperature: true,
                mode: true
            }
        );
        assert!(slot.try_take().is_none());
    }

    #[tokio::test]
    async fn test_slot_clear() {
        let slot = NotifySlot::new();
        slot.post(ChangeSet::MODE);
        slot.clear();
        assert!(slot.try_take().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_or_cancel() {
        let slot: NotifySlot<ChangeSet> = NotifySlot::new();
        let token = CancellationToken::new();
        let child = token.child_token();
        let task = tokio::spawn(async move { slot.take_or_cancel(&child).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        assert_eq!(task.await.unwrap(), None);
    }
}
