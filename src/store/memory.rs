//! In-process store guarded by a single mutex.

use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::debug;

use super::{
    clock::{seconds, Clock},
    ttl_seconds, Counter, KeyValueStore, SetMode, StoreError, StoreFuture,
};

// Expired entries are purged lazily; a full sweep runs once the map grows past this.
const SWEEP_THRESHOLD: usize = 1024;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: i64,
}

#[derive(Debug)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Entries held, expired ones included until they are purged.
    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    fn expires_at(&self, ttl: Duration) -> i64 {
        self.clock
            .now()
            .saturating_add(seconds(Duration::from_secs(ttl_seconds(ttl))))
    }
}

fn live<'m>(entries: &'m mut HashMap<String, Entry>, key: &str, now: i64) -> Option<&'m mut Entry> {
    if entries.get(key).is_some_and(|entry| entry.expires_at <= now) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

fn sweep(entries: &mut HashMap<String, Entry>, now: i64) {
    if entries.len() < SWEEP_THRESHOLD {
        return;
    }
    let before = entries.len();
    entries.retain(|_, entry| entry.expires_at > now);
    debug!("Swept {} expired entries", before - entries.len());
}

impl KeyValueStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            let now = self.clock.now();
            let mut entries = self.entries.lock().await;
            Ok(live(&mut entries, key, now).map(|entry| entry.value.clone()))
        })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: String,
        ttl: Duration,
        mode: SetMode,
    ) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let now = self.clock.now();
            let expires_at = self.expires_at(ttl);
            let mut entries = self.entries.lock().await;
            sweep(&mut entries, now);
            let exists = live(&mut entries, key, now).is_some();
            let allowed = match mode {
                SetMode::Always => true,
                SetMode::IfAbsent => !exists,
                SetMode::IfPresent => exists,
            };
            if allowed {
                entries.insert(key.to_string(), Entry { value, expires_at });
            }
            Ok(allowed)
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let now = self.clock.now();
            let mut entries = self.entries.lock().await;
            let existed = live(&mut entries, key, now).is_some();
            entries.remove(key);
            Ok(existed)
        })
    }

    fn increment<'a>(&'a self, key: &'a str, ttl: Duration) -> StoreFuture<'a, Counter> {
        Box::pin(async move {
            let now = self.clock.now();
            let fresh_expiry = self.expires_at(ttl);
            let mut entries = self.entries.lock().await;
            sweep(&mut entries, now);
            let (value, expires_at) = match live(&mut entries, key, now) {
                Some(entry) => {
                    let current: u64 = entry
                        .value
                        .parse()
                        .map_err(|_| StoreError::Corrupt(key.to_string()))?;
                    let next = current.saturating_add(1);
                    entry.value = next.to_string();
                    (next, entry.expires_at)
                }
                None => {
                    entries.insert(
                        key.to_string(),
                        Entry {
                            value: "1".to_string(),
                            expires_at: fresh_expiry,
                        },
                    );
                    (1, fresh_expiry)
                }
            };
            let remaining = u64::try_from(expires_at.saturating_sub(now)).unwrap_or(0);
            Ok(Counter {
                value,
                expires_in: Duration::from_secs(remaining),
            })
        })
    }

    fn delete_prefix<'a>(&'a self, prefix: &'a str) -> StoreFuture<'a, u64> {
        Box::pin(async move {
            let mut entries = self.entries.lock().await;
            let before = entries.len();
            entries.retain(|key, _| !key.starts_with(prefix));
            Ok(u64::try_from(before - entries.len()).unwrap_or(u64::MAX))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::ManualClock;

    fn store() -> (Arc<ManualClock>, MemoryStore) {
        let clock = Arc::new(ManualClock::new(1_000));
        let store = MemoryStore::new(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn entries_expire_with_the_clock() {
        let (clock, store) = store();
        let ttl = Duration::from_secs(60);
        assert!(store
            .set("k", "v".to_string(), ttl, SetMode::Always)
            .await
            .unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));

        clock.advance(Duration::from_secs(60));
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_modes_respect_existing_entries() {
        let (clock, store) = store();
        let ttl = Duration::from_secs(10);

        assert!(!store
            .set("k", "a".to_string(), ttl, SetMode::IfPresent)
            .await
            .unwrap());
        assert!(store
            .set("k", "a".to_string(), ttl, SetMode::IfAbsent)
            .await
            .unwrap());
        assert!(!store
            .set("k", "b".to_string(), ttl, SetMode::IfAbsent)
            .await
            .unwrap());
        assert!(store
            .set("k", "c".to_string(), ttl, SetMode::IfPresent)
            .await
            .unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some("c".to_string()));

        // an expired entry counts as absent
        clock.advance(Duration::from_secs(10));
        assert!(!store
            .set("k", "d".to_string(), ttl, SetMode::IfPresent)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn increment_keeps_the_first_expiry() {
        let (clock, store) = store();
        let window = Duration::from_secs(100);

        let first = store.increment("n", window).await.unwrap();
        assert_eq!(first.value, 1);
        assert_eq!(first.expires_in, window);

        clock.advance(Duration::from_secs(40));
        let second = store.increment("n", window).await.unwrap();
        assert_eq!(second.value, 2);
        assert_eq!(second.expires_in, Duration::from_secs(60));

        clock.advance(Duration::from_secs(60));
        let restarted = store.increment("n", window).await.unwrap();
        assert_eq!(restarted.value, 1);
    }

    #[tokio::test]
    async fn increment_rejects_non_numeric_values() {
        let (_clock, store) = store();
        store
            .set("n", "x".to_string(), Duration::from_secs(5), SetMode::Always)
            .await
            .unwrap();
        assert!(matches!(
            store.increment("n", Duration::from_secs(5)).await,
            Err(StoreError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn delete_prefix_only_touches_matching_keys() {
        let (_clock, store) = store();
        let ttl = Duration::from_secs(10);
        for key in ["a:1", "a:2", "b:1"] {
            store
                .set(key, "v".to_string(), ttl, SetMode::Always)
                .await
                .unwrap();
        }
        assert_eq!(store.delete_prefix("a:").await.unwrap(), 2);
        assert_eq!(store.get("b:1").await.unwrap(), Some("v".to_string()));
        assert!(!store.delete("a:1").await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let (_clock, store) = store();
        let store = Arc::new(store);
        let mut tasks = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.increment("n", Duration::from_secs(60)).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(store.get("n").await.unwrap(), Some("32".to_string()));
    }
}
