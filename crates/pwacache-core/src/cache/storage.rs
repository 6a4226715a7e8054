use async_trait::async_trait;

use crate::error::CacheResult;
use crate::models::RequestKey;

use super::StoredResponse;

/// A collection of named cache stores.
///
/// Implementations must tolerate concurrent calls: several in-flight fetches
/// may write to the same store at once.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Create the store if it does not exist yet.
    async fn open(&self, name: &str) -> CacheResult<()>;

    /// Names of all stores, in creation order.
    async fn keys(&self) -> CacheResult<Vec<String>>;

    async fn has(&self, name: &str) -> CacheResult<bool>;

    /// Delete a store and all its entries. Returns whether it existed.
    async fn delete(&self, name: &str) -> CacheResult<bool>;

    /// Find an entry. Absent store and absent entry both yield `None`.
    async fn lookup(&self, name: &str, key: &RequestKey) -> CacheResult<Option<StoredResponse>>;

    /// Insert or replace an entry, creating the store if needed.
    /// Only `GET` keys are accepted.
    async fn put(&self, name: &str, key: RequestKey, stored: StoredResponse) -> CacheResult<()>;

    /// Insert a batch of entries; either all of them are stored or none are.
    async fn put_all(&self, name: &str, entries: Vec<(RequestKey, StoredResponse)>) -> CacheResult<()>;

    /// Keys of every entry held by a store (empty if the store is absent).
    async fn entries(&self, name: &str) -> CacheResult<Vec<RequestKey>>;
}

/// Reject keys the Cache API refuses to store.
pub(crate) fn ensure_storable(key: &RequestKey) -> CacheResult<()> {
    if key.is_get() {
        Ok(())
    } else {
        Err(crate::error::CacheError::UnsupportedMethod(key.method.clone()))
    }
}
