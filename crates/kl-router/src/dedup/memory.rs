use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{DedupError, Deduplicator};

/// Single-process store: key -> absolute expiry, `None` when it never expires
#[derive(Debug, Default)]
pub struct InMemoryDeduplicator {
    entries: Mutex<HashMap<String, Option<Instant>>>,
}

fn is_live(expires_at: Option<Instant>, now: Instant) -> bool {
    expires_at.map_or(true, |at| at > now)
}

impl InMemoryDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, expires_at| is_live(*expires_at, now));
        before - entries.len()
    }

    /// Purge expired entries every `interval` until `shutdown` fires
    pub fn spawn_janitor(self: &Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let purged = store.purge_expired();
                        if purged > 0 {
                            debug!(purged, remaining = store.len(), "Purged expired dedup entries");
                        }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl Deduplicator for InMemoryDeduplicator {
    async fn set_if_not_exists(&self, key: &str, ttl: Duration) -> Result<bool, DedupError> {
        if key.is_empty() {
            return Err(DedupError::EmptyKey);
        }

        let now = Instant::now();
        let mut entries = self.entries.lock();
        if let Some(expires_at) = entries.get(key) {
            if is_live(*expires_at, now) {
                return Ok(false);
            }
        }
        entries.insert(key.to_string(), now.checked_add(ttl));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_set_is_duplicate() {
        let store = InMemoryDeduplicator::new();
        assert!(store.set_if_not_exists("k", Duration::from_secs(60)).await.unwrap());
        assert!(!store.set_if_not_exists("k", Duration::from_secs(60)).await.unwrap());
        assert!(store.set_if_not_exists("other", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_keeps_live_entry() {
        let store = InMemoryDeduplicator::new();
        store.set_if_not_exists("k", Duration::from_secs(60)).await.unwrap();

        for _ in 0..3 {
            assert!(!store.set_if_not_exists("k", Duration::from_secs(60)).await.unwrap());
        }
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_expired_key_is_new_again() {
        let store = InMemoryDeduplicator::new();
        assert!(store.set_if_not_exists("k", Duration::from_millis(20)).await.unwrap());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.set_if_not_exists("k", Duration::from_secs(60)).await.unwrap());
        assert!(!store.set_if_not_exists("k", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn test_unbounded_ttl_never_expires() {
        let store = InMemoryDeduplicator::new();
        assert!(store.set_if_not_exists("k", Duration::MAX).await.unwrap());
        assert!(!store.set_if_not_exists("k", Duration::from_millis(1)).await.unwrap());

        assert_eq!(store.purge_expired(), 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let store = InMemoryDeduplicator::new();
        let err = store.set_if_not_exists("", Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, DedupError::EmptyKey));
        assert_eq!(err.to_string(), "deduplication key cannot be empty");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_set_admits_exactly_one() {
        let store = Arc::new(InMemoryDeduplicator::new());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store.set_if_not_exists("shared", Duration::from_secs(60)).await.unwrap()
                })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = InMemoryDeduplicator::new();
        store.set_if_not_exists("short", Duration::from_millis(10)).await.unwrap();
        store.set_if_not_exists("long", Duration::from_secs(60)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_janitor_stops_on_shutdown() {
        let store = Arc::new(InMemoryDeduplicator::new());
        store.set_if_not_exists("short", Duration::from_millis(5)).await.unwrap();

        let shutdown = CancellationToken::new();
        let janitor = store.spawn_janitor(Duration::from_millis(10), shutdown.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.is_empty());

        shutdown.cancel();
        janitor.await.unwrap();
    }
}
