//! Stores and helpers shared by the unit tests.

use crate::{ApiClient, ClientConfig};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use laundrix_store::{CredentialStore, MemoryStore, StorageError, StoreResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use wiremock::MockServer;

/// Counts single-key reads against a shared [`MemoryStore`].
#[derive(Debug, Default)]
pub struct CountingStore {
    inner: MemoryStore,
    reads: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            reads: AtomicUsize::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStore for CountingStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn multi_set(&self, entries: &[(&str, &str)]) -> StoreResult<()> {
        self.inner.multi_set(entries).await
    }

    async fn multi_remove(&self, keys: &[&str]) -> StoreResult<()> {
        self.inner.multi_remove(keys).await
    }

    async fn clear(&self) -> StoreResult<()> {
        self.inner.clear().await
    }
}

/// Every operation fails.
#[derive(Debug, Default)]
pub struct FailingStore;

#[async_trait]
impl CredentialStore for FailingStore {
    async fn get(&self, _key: &str) -> StoreResult<Option<String>> {
        Err(StorageError::backend("storage unavailable"))
    }

    async fn multi_set(&self, _entries: &[(&str, &str)]) -> StoreResult<()> {
        Err(StorageError::backend("storage unavailable"))
    }

    async fn multi_remove(&self, _keys: &[&str]) -> StoreResult<()> {
        Err(StorageError::backend("storage unavailable"))
    }

    async fn clear(&self) -> StoreResult<()> {
        Err(StorageError::backend("storage unavailable"))
    }
}

/// Records every `multi_set` batch before applying it.
#[derive(Debug, Default)]
pub struct RecordingStore {
    inner: MemoryStore,
    batches: Mutex<Vec<Vec<(String, String)>>>,
}

impl RecordingStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn batches(&self) -> Vec<Vec<(String, String)>> {
        self.batches.lock().clone()
    }
}

#[async_trait]
impl CredentialStore for RecordingStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn multi_set(&self, entries: &[(&str, &str)]) -> StoreResult<()> {
        self.batches.lock().push(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self.inner.multi_set(entries).await
    }

    async fn multi_remove(&self, keys: &[&str]) -> StoreResult<()> {
        self.inner.multi_remove(keys).await
    }

    async fn clear(&self) -> StoreResult<()> {
        self.inner.clear().await
    }
}

/// Unsigned JWT whose payload carries `exp`.
pub fn jwt_with_exp(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"driver-7","exp":{exp}}}"#));
    format!("{header}.{payload}.signature")
}

/// Client pointed at a mock server.
pub fn client_for(server: &MockServer, store: Arc<dyn CredentialStore>) -> ApiClient {
    let config = ClientConfig::parse(&server.uri()).unwrap();
    ApiClient::new(config, store).unwrap()
}
