//! Process-wide cache of loaded recognition models.
//!
//! Loading a whisper model takes seconds and hundreds of megabytes, so each
//! (model, precision) pair is loaded once and shared by every session.
//! Concurrent first requests for the same key wait on a single load.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::sync::OnceCell;
use tracing::debug;

/// Lazily populated map from key to shared value.
#[derive(Debug)]
pub struct ModelCache<K, V> {
    slots: Mutex<HashMap<K, Arc<OnceCell<Arc<V>>>>>,
}

impl<K, V> Default for ModelCache<K, V> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> ModelCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value for `key`, running `load` if it is absent.
    ///
    /// A failed load leaves the slot empty so a later call can retry.
    pub async fn get_or_load<F, Fut>(&self, key: K, load: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(slots.entry(key.clone()).or_default())
        };

        let value = slot
            .get_or_try_init(|| async {
                debug!(key = ?key, "Loading model into cache");
                load().await.map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(value))
    }

    /// Cached value for `key`, if it has finished loading.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.get(key).and_then(|slot| slot.get().cloned())
    }

    /// Number of loaded entries.
    pub fn loaded(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.values().filter(|slot| slot.initialized()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_loads_once_per_key() {
        let cache: ModelCache<&str, String> = ModelCache::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_load("small", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("weights".to_string())
                })
                .await
                .unwrap();
            assert_eq!(*value, "weights");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.loaded(), 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_load_separately() {
        let cache: ModelCache<(u8, bool), u32> = ModelCache::new();

        let a = cache.get_or_load((1, true), || async { Ok(10) }).await.unwrap();
        let b = cache.get_or_load((1, false), || async { Ok(20) }).await.unwrap();

        assert_eq!((*a, *b), (10, 20));
        assert_eq!(cache.loaded(), 2);
        assert_eq!(cache.get(&(1, true)).as_deref(), Some(&10));
    }

    #[tokio::test]
    async fn test_failed_load_is_retried() {
        let cache: ModelCache<&str, u32> = ModelCache::new();

        let err = cache
            .get_or_load("base", || async { anyhow::bail!("download failed") })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("download failed"));
        assert!(cache.get(&"base").is_none());

        let value = cache.get_or_load("base", || async { Ok(7) }).await.unwrap();
        assert_eq!(*value, 7);
    }

    #[tokio::test]
    async fn test_concurrent_first_requests_share_one_load() {
        let cache: Arc<ModelCache<&str, u32>> = Arc::new(ModelCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    cache
                        .get_or_load("medium", || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok(42)
                        })
                        .await
                        .unwrap()
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(*task.await.unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
