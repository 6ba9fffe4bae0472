//! The credential store trait.

use crate::error::StoreResult;
use async_trait::async_trait;

/// Durable string-keyed storage for session credentials.
///
/// Every operation may suspend. `multi_set` and `multi_remove` apply their
/// whole batch or nothing, which is what lets callers write an access token
/// and its refresh token without ever exposing a mismatched pair.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Read a single value.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Write a batch of values atomically.
    async fn multi_set(&self, entries: &[(&str, &str)]) -> StoreResult<()>;

    /// Remove a batch of keys atomically. Missing keys are ignored.
    async fn multi_remove(&self, keys: &[&str]) -> StoreResult<()>;

    /// Remove every key in the store.
    async fn clear(&self) -> StoreResult<()>;

    /// Write a single value.
    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.multi_set(&[(key, value)]).await
    }

    /// Remove a single key.
    async fn remove(&self, key: &str) -> StoreResult<()> {
        self.multi_remove(&[key]).await
    }

    /// Read several values, preserving the order of `keys`.
    async fn multi_get(&self, keys: &[&str]) -> StoreResult<Vec<(String, Option<String>)>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push((key.to_string(), self.get(key).await?));
        }
        Ok(values)
    }
}
