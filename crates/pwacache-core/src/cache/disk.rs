//! On-disk cache storage.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<sha256(store name)>/store.json          store header (name, created_at)
//! <root>/<sha256(store name)>/entries/<sha256(key)>.json
//! ```
//!
//! Every file is written to a temporary name and renamed into place, so a
//! reader never sees a half-written entry. A batch is staged in full before
//! any entry is replaced, and entries it replaces are moved aside until the
//! whole batch is in place.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{CacheError, CacheResult};
use crate::models::RequestKey;

use super::storage::ensure_storable;
use super::{CacheStorage, StoredResponse};

/// Store header file name
const STORE_HEADER: &str = "store.json";

/// Directory holding a store's entry files
const ENTRIES_DIR: &str = "entries";

#[derive(Debug, Serialize, Deserialize)]
struct StoreHeader {
    name: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryFile {
    key: RequestKey,
    stored: StoredResponse,
}

/// Cache storage persisted as JSON files under a root directory.
pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    pub fn new(root: PathBuf) -> CacheResult<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn digest(input: &str) -> String {
        Sha256::digest(input.as_bytes())
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }

    fn store_dir(&self, name: &str) -> PathBuf {
        self.root.join(Self::digest(name))
    }

    fn entry_path(&self, name: &str, key: &RequestKey) -> PathBuf {
        self.store_dir(name)
            .join(ENTRIES_DIR)
            .join(format!("{}.json", Self::digest(&key.to_string())))
    }

    /// A unique sibling of `path`; never ends in `.json`, so listings skip it.
    fn sibling(path: &Path, suffix: &str) -> PathBuf {
        path.with_extension(format!("{}.{}", Uuid::new_v4(), suffix))
    }

    async fn write_atomic(path: &Path, contents: &[u8]) -> CacheResult<()> {
        let tmp = Self::sibling(path, "tmp");
        tokio::fs::write(&tmp, contents).await?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Read and parse a JSON file; a missing file is `None`.
    async fn read_json<T: DeserializeOwned>(path: &Path) -> CacheResult<Option<T>> {
        match tokio::fs::read(path).await {
            Ok(contents) => Ok(Some(serde_json::from_slice(&contents)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_header(dir: &Path) -> CacheResult<Option<StoreHeader>> {
        Self::read_json(&dir.join(STORE_HEADER)).await
    }

    fn encode_entry(key: RequestKey, stored: StoredResponse) -> CacheResult<Vec<u8>> {
        Ok(serde_json::to_vec(&EntryFile { key, stored })?)
    }

    /// Rename a staged file onto `path`. An entry file already there is
    /// moved aside first and its new location returned.
    async fn swap_in(staged: &Path, path: &Path) -> CacheResult<Option<PathBuf>> {
        let backup = match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => {
                let backup = Self::sibling(path, "bak");
                tokio::fs::rename(path, &backup).await?;
                Some(backup)
            }
            Ok(_) => None,
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = tokio::fs::rename(staged, path).await {
            if let Some(backup) = &backup {
                let _ = tokio::fs::rename(backup, path).await;
            }
            return Err(e.into());
        }
        Ok(backup)
    }

    /// Undo swapped-in entries, newest first: put back what they replaced,
    /// or remove them.
    async fn restore(swapped: &[(&Path, Option<PathBuf>)]) {
        for (path, backup) in swapped.iter().rev() {
            let result = match backup {
                Some(backup) => tokio::fs::rename(backup, path).await,
                None => tokio::fs::remove_file(path).await,
            };
            if let Err(e) = result {
                warn!(path = %path.display(), error = %e, "Failed to restore cache entry");
            }
        }
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, name: &str) -> CacheResult<()> {
        let dir = self.store_dir(name);
        tokio::fs::create_dir_all(dir.join(ENTRIES_DIR)).await?;

        if Self::read_header(&dir).await?.is_none() {
            let header = StoreHeader {
                name: name.to_string(),
                created_at: Utc::now(),
            };
            Self::write_atomic(&dir.join(STORE_HEADER), &serde_json::to_vec_pretty(&header)?).await?;
            debug!(cache = name, dir = %dir.display(), "Created cache store");
        }
        Ok(())
    }

    async fn keys(&self) -> CacheResult<Vec<String>> {
        let mut stores = Vec::new();
        let mut dirs = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = dirs.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            match Self::read_header(&entry.path()).await {
                Ok(Some(header)) => stores.push((header.created_at, header.name)),
                Ok(None) => {}
                Err(e) => {
                    warn!(dir = %entry.path().display(), error = %e, "Skipping unreadable cache store");
                }
            }
        }
        stores.sort();
        Ok(stores.into_iter().map(|(_, name)| name).collect())
    }

    async fn has(&self, name: &str) -> CacheResult<bool> {
        Ok(Self::read_header(&self.store_dir(name)).await?.is_some())
    }

    async fn delete(&self, name: &str) -> CacheResult<bool> {
        match tokio::fs::remove_dir_all(self.store_dir(name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn lookup(&self, name: &str, key: &RequestKey) -> CacheResult<Option<StoredResponse>> {
        let path = self.entry_path(name, key);
        let entry: Option<EntryFile> = Self::read_json(&path).await?;
        match entry {
            Some(entry) if entry.key == *key => Ok(Some(entry.stored)),
            Some(entry) => Err(CacheError::Corrupt(format!(
                "{} holds '{}', expected '{}'",
                path.display(),
                entry.key,
                key
            ))),
            None => Ok(None),
        }
    }

    async fn put(&self, name: &str, key: RequestKey, stored: StoredResponse) -> CacheResult<()> {
        ensure_storable(&key)?;
        self.open(name).await?;
        let path = self.entry_path(name, &key);
        let contents = Self::encode_entry(key, stored)?;
        Self::write_atomic(&path, &contents).await
    }

    async fn put_all(&self, name: &str, entries: Vec<(RequestKey, StoredResponse)>) -> CacheResult<()> {
        for (key, _) in &entries {
            ensure_storable(key)?;
        }

        // Encode everything up front so a bad entry fails before anything is written
        let mut encoded = Vec::with_capacity(entries.len());
        for (key, stored) in entries {
            let path = self.entry_path(name, &key);
            encoded.push((path, Self::encode_entry(key, stored)?));
        }

        self.open(name).await?;

        // Stage every entry first; nothing in the store changes yet
        let mut staged: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(encoded.len());
        for (path, contents) in encoded {
            let tmp = Self::sibling(&path, "tmp");
            if let Err(e) = tokio::fs::write(&tmp, &contents).await {
                let _ = tokio::fs::remove_file(&tmp).await;
                for (tmp, _) in &staged {
                    let _ = tokio::fs::remove_file(tmp).await;
                }
                return Err(e.into());
            }
            staged.push((tmp, path));
        }

        let mut swapped: Vec<(&Path, Option<PathBuf>)> = Vec::with_capacity(staged.len());
        for (i, (tmp, path)) in staged.iter().enumerate() {
            match Self::swap_in(tmp, path).await {
                Ok(backup) => swapped.push((path.as_path(), backup)),
                Err(e) => {
                    warn!(cache = name, path = %path.display(), error = %e, "Rolling back cache batch");
                    Self::restore(&swapped).await;
                    for (tmp, _) in &staged[i..] {
                        let _ = tokio::fs::remove_file(tmp).await;
                    }
                    return Err(e);
                }
            }
        }

        for backup in swapped.into_iter().filter_map(|(_, backup)| backup) {
            let _ = tokio::fs::remove_file(backup).await;
        }
        Ok(())
    }

    async fn entries(&self, name: &str) -> CacheResult<Vec<RequestKey>> {
        let dir = self.store_dir(name).join(ENTRIES_DIR);
        let mut files = match tokio::fs::read_dir(&dir).await {
            Ok(files) => files,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(file) = files.next_entry().await? {
            let path = file.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_json::<EntryFile>(&path).await {
                Ok(Some(entry)) => keys.push(entry.key),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable cache entry"),
            }
        }
        Ok(keys)
    }
}
