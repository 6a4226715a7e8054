use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{CacheError, CacheResult};
use crate::models::RequestKey;

use super::storage::ensure_storable;
use super::{CacheStorage, StoredResponse};

#[derive(Debug, Default)]
struct Store {
    /// Creation sequence number, used to report stores in creation order
    seq: u64,
    entries: HashMap<RequestKey, StoredResponse>,
}

impl Store {
    fn bytes(&self) -> usize {
        self.entries.values().map(StoredResponse::size).sum()
    }
}

#[derive(Debug, Default)]
struct Inner {
    stores: HashMap<String, Store>,
    next_seq: u64,
}

impl Inner {
    fn open(&mut self, name: &str) -> &mut Store {
        let next_seq = &mut self.next_seq;
        self.stores.entry(name.to_string()).or_insert_with(|| {
            let seq = *next_seq;
            *next_seq += 1;
            Store {
                seq,
                entries: HashMap::new(),
            }
        })
    }

    fn used_bytes(&self) -> usize {
        self.stores.values().map(Store::bytes).sum()
    }

    /// Bytes freed if `keys` were overwritten in store `name`.
    fn replaced_bytes<'a>(&self, name: &str, keys: impl Iterator<Item = &'a RequestKey>) -> usize {
        match self.stores.get(name) {
            Some(store) => keys
                .filter_map(|k| store.entries.get(k))
                .map(StoredResponse::size)
                .sum(),
            None => 0,
        }
    }
}

/// In-process cache storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: RwLock<Inner>,
    quota: Option<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage that refuses writes once the total body size across all
    /// stores would exceed `quota` bytes.
    pub fn with_quota(quota: usize) -> Self {
        Self {
            inner: RwLock::default(),
            quota: Some(quota),
        }
    }

    fn check_quota(&self, inner: &Inner, name: &str, replaced: usize, added: usize) -> CacheResult<()> {
        let Some(quota) = self.quota else {
            return Ok(());
        };
        let used = inner.used_bytes().saturating_sub(replaced);
        let available = quota.saturating_sub(used);
        if added > available {
            return Err(CacheError::QuotaExceeded {
                store: name.to_string(),
                needed: added,
                available,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &str) -> CacheResult<()> {
        self.inner.write().await.open(name);
        Ok(())
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        let inner = self.inner.read().await;
        let mut names: Vec<(u64, &String)> = inner.stores.iter().map(|(n, s)| (s.seq, n)).collect();
        names.sort_unstable();
        Ok(names.into_iter().map(|(_, n)| n.clone()).collect())
    }

    async fn has(&self, name: &str) -> CacheResult<bool> {
        Ok(self.inner.read().await.stores.contains_key(name))
    }

    async fn delete(&self, name: &str) -> CacheResult<bool> {
        Ok(self.inner.write().await.stores.remove(name).is_some())
    }

    async fn lookup(&self, name: &str, key: &RequestKey) -> CacheResult<Option<StoredResponse>> {
        let inner = self.inner.read().await;
        Ok(inner
            .stores
            .get(name)
            .and_then(|store| store.entries.get(key))
            .cloned())
    }

    async fn put(&self, name: &str, key: RequestKey, stored: StoredResponse) -> CacheResult<()> {
        ensure_storable(&key)?;
        let mut inner = self.inner.write().await;
        let replaced = inner.replaced_bytes(name, std::iter::once(&key));
        self.check_quota(&inner, name, replaced, stored.size())?;
        inner.open(name).entries.insert(key, stored);
        Ok(())
    }

    async fn put_all(&self, name: &str, entries: Vec<(RequestKey, StoredResponse)>) -> CacheResult<()> {
        for (key, _) in &entries {
            ensure_storable(key)?;
        }
        let mut inner = self.inner.write().await;
        let replaced = inner.replaced_bytes(name, entries.iter().map(|(k, _)| k));
        let added = entries.iter().map(|(_, s)| s.size()).sum();
        self.check_quota(&inner, name, replaced, added)?;

        let store = inner.open(name);
        store.entries.extend(entries);
        Ok(())
    }

    async fn entries(&self, name: &str) -> CacheResult<Vec<RequestKey>> {
        let inner = self.inner.read().await;
        Ok(inner
            .stores
            .get(name)
            .map(|store| store.entries.keys().cloned().collect())
            .unwrap_or_default())
    }
}
