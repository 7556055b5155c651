//! Guarded single-value containers.
//!
//! A [`SharedValue`] holds one piece of device state (temperature, mode,
//! connectivity) behind its own lock. Each instance has exactly one writer
//! role and any number of readers. No two `SharedValue` guards are ever held
//! at the same time by the same activity, so there is no lock order to get
//! wrong.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{RwLock, RwLockReadGuard};

/// A named, guarded value shared between one writer and many readers.
///
/// Readers never observe a partially written value: every write happens under
/// the exclusive guard, and a reader that acquires the guard after a write
/// completed sees that write.
///
/// # Example
///
/// ```
/// use telelink_core::SharedValue;
///
/// # async fn example() {
/// let temperature = SharedValue::new("temperature", 68);
/// assert!(temperature.set(70).await);
/// assert!(!temperature.set(70).await);
/// assert_eq!(temperature.get().await, 70);
/// # }
/// ```
pub struct SharedValue<T> {
    name: &'static str,
    value: RwLock<T>,
    /// Number of committed changes.
    version: AtomicU64,
}

impl<T> SharedValue<T> {
    /// Create a new shared value.
    pub fn new(name: &'static str, value: T) -> Self {
        Self {
            name,
            value: RwLock::new(value),
            version: AtomicU64::new(0),
        }
    }

    /// Name used in logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of changes committed so far.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Hold the read guard.
    ///
    /// Keep the guard only across non-blocking work; the writer waits for it.
    pub async fn read(&self) -> RwLockReadGuard<'_, T> {
        self.value.read().await
    }

    /// Mutate the value in place under the write guard.
    ///
    /// The version is bumped unconditionally.
    pub async fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.value.write().await;
        let result = f(&mut guard);
        self.version.fetch_add(1, Ordering::AcqRel);
        result
    }
}

impl<T: Clone> SharedValue<T> {
    /// Copy the current value out under the read guard.
    pub async fn get(&self) -> T {
        self.value.read().await.clone()
    }
}

impl<T: PartialEq> SharedValue<T> {
    /// Store `value` if it differs from the current one.
    ///
    /// Returns whether the value changed. Compare and store happen under one
    /// write guard.
    pub async fn set(&self, value: T) -> bool {
        let mut guard = self.value.write().await;
        if *guard == value {
            return false;
        }
        *guard = value;
        self.version.fetch_add(1, Ordering::AcqRel);
        true
    }
}

impl<T: fmt::Debug> fmt::Debug for SharedValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("SharedValue");
        s.field("name", &self.name);
        match self.value.try_read() {
            Ok(value) => s.field("value", &*value),
            Err(_) => s.field("value", &"<locked>"),
        };
        s.field("version", &self.version()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_set_reports_change() {
        let value = SharedValue::new("mode", 1);
        assert_eq!(value.version(), 0);
        assert!(value.set(2).await);
        assert!(!value.set(2).await);
        assert_eq!(value.version(), 1);
        assert_eq!(value.get().await, 2);
    }

    #[tokio::test]
    async fn test_update_in_place() {
        let value = SharedValue::new("counter", vec![1, 2]);
        let len = value.update(|v| {
            v.push(3);
            v.len()
        })
        .await;
        assert_eq!(len, 3);
        assert_eq!(value.get().await, vec![1, 2, 3]);
        assert_eq!(value.version(), 1);
    }

    #[tokio::test]
    async fn test_read_after_write_visibility() {
        let value = Arc::new(SharedValue::new("temperature", 68));
        let writer = {
            let value = Arc::clone(&value);
            tokio::spawn(async move { value.set(70).await })
        };
        assert!(writer.await.unwrap());

        // A reader that starts after the write completed sees it.
        let reader = {
            let value = Arc::clone(&value);
            tokio::spawn(async move { value.get().await })
        };
        assert_eq!(reader.await.unwrap(), 70);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_torn_reads_under_contention() {
        // Both halves are always written together; a torn read would see them differ.
        let value = Arc::new(SharedValue::new("pair", (0u64, 0u64)));

        let writer = {
            let value = Arc::clone(&value);
            tokio::spawn(async move {
                for i in 1..=2_000u64 {
                    value.update(|pair| *pair = (i, i)).await;
                    tokio::task::yield_now().await;
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let value = Arc::clone(&value);
                tokio::spawn(async move {
                    let mut last = 0;
                    for _ in 0..2_000 {
                        let (a, b) = value.get().await;
                        assert_eq!(a, b, "torn read");
                        assert!(a >= last, "value went backwards");
                        last = a;
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
        assert_eq!(value.get().await, (2_000, 2_000));
    }

    #[test]
    fn test_debug_output() {
        let value = SharedValue::new("connected", true);
        let debug = format!("{:?}", value);
        assert!(debug.contains("connected"));
        assert!(debug.contains("true"));
    }
}
