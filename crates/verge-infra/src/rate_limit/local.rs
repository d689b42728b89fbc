//! In-process fallback counter.
//!
//! Same four logical steps as the distributed store - purge, count,
//! conditional insert, expiry - but under a per-key lock. Correctness here
//! rests on single-process memory visibility, not distributed atomicity,
//! which is exactly the guarantee needed while the shared store is down.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use verge_core::ports::{CounterStore, StoreError, WindowReservation};

/// Fallback counter configuration.
#[derive(Debug, Clone)]
pub struct LocalCounterConfig {
    /// Maximum identifiers tracked at once. The sweep evicts
    /// oldest-inactive entries beyond this, so hostile key enumeration
    /// cannot grow the map without bound.
    pub max_identifiers: usize,
}

impl Default for LocalCounterConfig {
    fn default() -> Self {
        Self {
            max_identifiers: 10_000,
        }
    }
}

impl LocalCounterConfig {
    pub fn from_env() -> Self {
        Self {
            max_identifiers: std::env::var("RATE_LIMIT_FALLBACK_MAX_IDENTIFIERS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10_000),
        }
    }
}

#[derive(Debug)]
struct KeyWindow {
    /// Admission timestamps in arrival order.
    entries: VecDeque<u64>,
    /// Window of the most recent check; the sweep purges against it.
    window_ms: u64,
    last_seen_ms: u64,
}

impl KeyWindow {
    fn new(window_ms: u64, now_ms: u64) -> Self {
        Self {
            entries: VecDeque::new(),
            window_ms,
            last_seen_ms: now_ms,
        }
    }

    /// Drop entries strictly older than the window start. Entries scored
    /// exactly at the start are still in-window, matching the distributed
    /// store's exclusive purge boundary.
    fn purge(&mut self, now_ms: u64) {
        let start = now_ms.saturating_sub(self.window_ms);
        while self.entries.front().is_some_and(|&ts| ts < start) {
            self.entries.pop_front();
        }
    }
}

/// Concurrency-safe sliding-window map used while degraded.
pub struct LocalCounterStore {
    keys: RwLock<HashMap<String, Arc<Mutex<KeyWindow>>>>,
    config: LocalCounterConfig,
}

impl LocalCounterStore {
    pub fn new(config: LocalCounterConfig) -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn from_env() -> Self {
        Self::new(LocalCounterConfig::from_env())
    }

    /// Number of identifiers currently tracked.
    pub async fn tracked_identifiers(&self) -> usize {
        self.keys.read().await.len()
    }

    async fn slot(&self, key: &str, now_ms: u64, window_ms: u64) -> Arc<Mutex<KeyWindow>> {
        if let Some(slot) = self.keys.read().await.get(key) {
            return slot.clone();
        }

        let mut map = self.keys.write().await;
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(KeyWindow::new(window_ms, now_ms))))
            .clone()
    }

    /// Periodic maintenance: drop identifiers whose entries have all
    /// expired, then enforce the tracked-identifier bound by evicting
    /// oldest-inactive keys. Returns how many identifiers were removed.
    ///
    /// Locks are held per key and only briefly; concurrent `try_acquire`
    /// calls on other keys are not stalled.
    pub async fn sweep(&self, now_ms: u64) -> usize {
        let slots: Vec<(String, Arc<Mutex<KeyWindow>>)> = {
            let map = self.keys.read().await;
            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };

        let mut idle = Vec::new();
        for (key, slot) in slots {
            let mut window = slot.lock().await;
            window.purge(now_ms);
            if window.entries.is_empty() {
                idle.push(key);
            }
        }

        let mut removed = 0;
        if !idle.is_empty() {
            let mut map = self.keys.write().await;
            for key in idle {
                // Re-check under the write lock; a request may have landed
                // since the scan. A slot locked right now is in use.
                let still_empty = map
                    .get(&key)
                    .and_then(|slot| slot.try_lock().ok().map(|w| w.entries.is_empty()))
                    .unwrap_or(false);
                if still_empty {
                    map.remove(&key);
                    removed += 1;
                }
            }
        }

        removed + self.enforce_bound().await
    }

    async fn enforce_bound(&self) -> usize {
        let cap = self.config.max_identifiers;
        let mut map = self.keys.write().await;
        if map.len() <= cap {
            return 0;
        }

        let mut candidates: Vec<(String, u64)> = map
            .iter()
            .filter_map(|(key, slot)| {
                slot.try_lock().ok().map(|w| (key.clone(), w.last_seen_ms))
            })
            .collect();
        candidates.sort_by_key(|(_, last_seen)| *last_seen);

        let excess = map.len() - cap;
        let mut evicted = 0;
        for (key, _) in candidates.into_iter().take(excess) {
            map.remove(&key);
            evicted += 1;
        }

        if evicted > 0 {
            tracing::warn!(evicted, cap, "Fallback counter evicted oldest-inactive identifiers");
        }
        evicted
    }
}

#[async_trait]
impl CounterStore for LocalCounterStore {
    async fn try_acquire(
        &self,
        key: &str,
        now_ms: u64,
        window_ms: u64,
        max_requests: u32,
    ) -> Result<WindowReservation, StoreError> {
        let slot = self.slot(key, now_ms, window_ms).await;
        let mut window = slot.lock().await;

        window.window_ms = window_ms;
        window.last_seen_ms = now_ms;
        window.purge(now_ms);

        let surviving = window.entries.len() as u32;
        let admitted = surviving < max_requests;
        if admitted {
            window.entries.push_back(now_ms);
        }

        Ok(WindowReservation {
            admitted,
            count: if admitted { surviving + 1 } else { surviving },
            oldest_ms: window.entries.front().copied(),
        })
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> LocalCounterStore {
        LocalCounterStore::new(LocalCounterConfig::default())
    }

    #[tokio::test]
    async fn fills_the_window_then_denies() {
        let store = store();

        for i in 0..5u32 {
            let res = store.try_acquire("ip:10.0.0.1", 1_000 + i as u64, 60_000, 5).await.unwrap();
            assert!(res.admitted);
            assert_eq!(res.count, i + 1);
        }

        let res = store.try_acquire("ip:10.0.0.1", 1_100, 60_000, 5).await.unwrap();
        assert!(!res.admitted);
        assert_eq!(res.count, 5);
        assert_eq!(res.oldest_ms, Some(1_000));
    }

    #[tokio::test]
    async fn window_slides_no_permanent_lockout() {
        let store = store();

        for i in 0..5u64 {
            assert!(store.try_acquire("k", i, 60_000, 5).await.unwrap().admitted);
        }
        assert!(!store.try_acquire("k", 100, 60_000, 5).await.unwrap().admitted);

        // One past the first entry's window: a slot frees up.
        let res = store.try_acquire("k", 60_001, 60_000, 5).await.unwrap();
        assert!(res.admitted);
        assert_eq!(res.oldest_ms, Some(1));
    }

    #[tokio::test]
    async fn entry_at_exact_window_start_still_counts() {
        let store = store();
        assert!(store.try_acquire("k", 0, 60_000, 1).await.unwrap().admitted);
        // t=60000: the entry at t=0 sits exactly on the boundary.
        assert!(!store.try_acquire("k", 60_000, 60_000, 1).await.unwrap().admitted);
        assert!(store.try_acquire("k", 60_001, 60_000, 1).await.unwrap().admitted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_overrun_admits_exactly_max() {
        let store = Arc::new(store());
        let now = 1_000;

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.try_acquire("hot", now, 60_000, 5).await.unwrap().admitted
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 5);
    }

    #[tokio::test]
    async fn independent_identifiers_do_not_share_budget() {
        let store = store();
        assert!(store.try_acquire("a", 0, 60_000, 1).await.unwrap().admitted);
        assert!(store.try_acquire("b", 0, 60_000, 1).await.unwrap().admitted);
        assert!(!store.try_acquire("a", 1, 60_000, 1).await.unwrap().admitted);
    }

    #[tokio::test]
    async fn sweep_drops_expired_identifiers() {
        let store = store();
        store.try_acquire("a", 0, 1_000, 5).await.unwrap();
        store.try_acquire("b", 500, 1_000, 5).await.unwrap();
        assert_eq!(store.tracked_identifiers().await, 2);

        // a's entry has aged out; b's is still in-window.
        let removed = store.sweep(1_200).await;
        assert_eq!(removed, 1);
        assert_eq!(store.tracked_identifiers().await, 1);
    }

    #[tokio::test]
    async fn sweep_enforces_identifier_bound_oldest_inactive_first() {
        let store = LocalCounterStore::new(LocalCounterConfig { max_identifiers: 2 });
        store.try_acquire("old", 0, 600_000, 5).await.unwrap();
        store.try_acquire("mid", 1_000, 600_000, 5).await.unwrap();
        store.try_acquire("new", 2_000, 600_000, 5).await.unwrap();
        assert_eq!(store.tracked_identifiers().await, 3);

        store.sweep(3_000).await;
        assert_eq!(store.tracked_identifiers().await, 2);

        // The most recently active keys survive.
        let map = store.keys.read().await;
        assert!(map.contains_key("mid"));
        assert!(map.contains_key("new"));
        assert!(!map.contains_key("old"));
    }
}
