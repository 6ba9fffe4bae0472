//! Short-lived memoization of the stored access token.

use laundrix_store::{keys, CredentialStore};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct CacheEntry {
    access_token: Option<String>,
    last_fetched: Option<Instant>,
    // Bumped on every prime/reset so a storage read that raced with either
    // cannot write its older value back.
    generation: u64,
}

/// Caches the access token in front of the [`CredentialStore`] so that
/// outgoing requests do not each hit durable storage.
pub struct TokenCache {
    store: Arc<dyn CredentialStore>,
    freshness: Duration,
    entry: Mutex<CacheEntry>,
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entry = self.entry.lock();
        f.debug_struct("TokenCache")
            .field("freshness", &self.freshness)
            .field("has_token", &entry.access_token.is_some())
            .field("last_fetched", &entry.last_fetched)
            .finish()
    }
}

impl TokenCache {
    /// Create a cache over `store` serving hits for `freshness`.
    pub fn new(store: Arc<dyn CredentialStore>, freshness: Duration) -> Self {
        Self {
            store,
            freshness,
            entry: Mutex::new(CacheEntry::default()),
        }
    }

    /// Current access token.
    ///
    /// Returns the cached token without I/O when it was fetched within the
    /// freshness window and `force_refresh` is false. Otherwise re-reads
    /// storage. A storage failure is logged and reported as "no token".
    pub async fn get_token(&self, force_refresh: bool) -> Option<String> {
        let generation = {
            let entry = self.entry.lock();
            if !force_refresh {
                if let (Some(token), Some(fetched)) = (&entry.access_token, entry.last_fetched) {
                    if fetched.elapsed() < self.freshness {
                        return Some(token.clone());
                    }
                }
            }
            entry.generation
        };

        match self.store.get(keys::TOKEN).await {
            Ok(token) => {
                let mut entry = self.entry.lock();
                if entry.generation == generation {
                    entry.access_token = token.clone();
                    entry.last_fetched = Some(Instant::now());
                    debug!(found = token.is_some(), "Access token read from storage");
                    token
                } else {
                    entry.access_token.clone()
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to read access token from storage");
                None
            }
        }
    }

    /// Install a token just obtained from the server.
    pub fn prime(&self, token: impl Into<String>) {
        let mut entry = self.entry.lock();
        entry.access_token = Some(token.into());
        entry.last_fetched = Some(Instant::now());
        entry.generation += 1;
    }

    /// Forget the cached token.
    pub fn reset(&self) {
        let mut entry = self.entry.lock();
        entry.access_token = None;
        entry.last_fetched = None;
        entry.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{CountingStore, FailingStore};
    use laundrix_store::MemoryStore;

    fn cache_over(store: Arc<dyn CredentialStore>) -> TokenCache {
        TokenCache::new(store, Duration::from_secs(10))
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_within_window_hit_cache() {
        let store = Arc::new(CountingStore::new(MemoryStore::with_entries([(
            keys::TOKEN,
            "at-1",
        )])));
        let cache = cache_over(store.clone());

        assert_eq!(cache.get_token(false).await.as_deref(), Some("at-1"));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get_token(false).await.as_deref(), Some("at-1"));
        assert_eq!(store.reads(), 1);

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(cache.get_token(false).await.as_deref(), Some("at-1"));
        assert_eq!(store.reads(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_refresh_always_reads() {
        let inner = MemoryStore::with_entries([(keys::TOKEN, "at-1")]);
        let store = Arc::new(CountingStore::new(inner.clone()));
        let cache = cache_over(store.clone());

        cache.get_token(false).await;
        inner.set(keys::TOKEN, "at-2").await.unwrap();

        assert_eq!(cache.get_token(false).await.as_deref(), Some("at-1"));
        assert_eq!(cache.get_token(true).await.as_deref(), Some("at-2"));
        assert_eq!(store.reads(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_token_is_not_memoized() {
        let store = Arc::new(CountingStore::new(MemoryStore::new()));
        let cache = cache_over(store.clone());

        assert!(cache.get_token(false).await.is_none());
        assert!(cache.get_token(false).await.is_none());
        assert_eq!(store.reads(), 2);
    }

    #[tokio::test]
    async fn test_read_failure_degrades_to_none() {
        let cache = cache_over(Arc::new(FailingStore));
        assert!(cache.get_token(false).await.is_none());
        assert!(cache.get_token(true).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_prime_and_reset() {
        let store = Arc::new(CountingStore::new(MemoryStore::new()));
        let cache = cache_over(store.clone());

        cache.prime("at-9");
        assert_eq!(cache.get_token(false).await.as_deref(), Some("at-9"));
        assert_eq!(store.reads(), 0);

        cache.reset();
        assert!(cache.get_token(false).await.is_none());
        assert_eq!(store.reads(), 1);
    }
}
