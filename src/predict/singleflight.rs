//! Per-key request coalescing.
//!
//! Holding the permit for a fingerprint serializes all identical in-flight
//! requests: the first holder computes and writes the cache, later holders
//! wake up, re-check the cache and hit. An N-way identical burst therefore
//! invokes the predictor exactly once.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

struct Entry {
    lock: Arc<AsyncMutex<()>>,
    refs: usize,
}

type EntryMap = Arc<Mutex<HashMap<String, Entry>>>;

#[derive(Clone, Default)]
pub struct SingleFlight {
    entries: EntryMap,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive rights to compute `key`. The permit releases on
    /// drop. Cancelling the wait (deadline) also releases the key's
    /// registration, so abandoned waiters never pin the entry.
    pub async fn acquire(&self, key: &str) -> FlightPermit {
        let lock = {
            let mut entries = self.entries.lock();
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                lock: Arc::new(AsyncMutex::new(())),
                refs: 0,
            });
            entry.refs += 1;
            entry.lock.clone()
        };

        let registration = Registration {
            entries: self.entries.clone(),
            key: key.to_string(),
        };

        let guard = lock.lock_owned().await;
        FlightPermit {
            _registration: registration,
            _guard: guard,
        }
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Refcount holder; decrements (and removes the entry at zero) on drop.
struct Registration {
    entries: EntryMap,
    key: String,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&self.key) {
            entry.refs -= 1;
            if entry.refs == 0 {
                entries.remove(&self.key);
            }
        }
    }
}

pub struct FlightPermit {
    _registration: Registration,
    _guard: OwnedMutexGuard<()>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_holders_serialize() {
        let flight = SingleFlight::new();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flight = flight.clone();
            let running = running.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _permit = flight.acquire("same-key").await;
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(flight.tracked_keys(), 0);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let flight = SingleFlight::new();
        let _a = flight.acquire("a").await;
        // Must complete immediately even while "a" is held.
        let _b = flight.acquire("b").await;
    }

    #[tokio::test]
    async fn test_cancelled_waiter_releases_registration() {
        let flight = SingleFlight::new();
        let held = flight.acquire("key").await;

        let waiter = {
            let flight = flight.clone();
            tokio::time::timeout(Duration::from_millis(10), async move {
                flight.acquire("key").await
            })
        };
        assert!(waiter.await.is_err(), "waiter should time out");

        drop(held);
        // Give the cancelled registration's drop a beat to run.
        tokio::task::yield_now().await;
        assert_eq!(flight.tracked_keys(), 0);
    }
}
