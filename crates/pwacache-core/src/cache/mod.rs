//! Cache-aside caching of intercepted requests.
//!
//! This module provides the `CacheManager` (the worker that mediates every
//! request through the cache) and the `CacheStorage` backends it writes to.
//! Stores are named per deployment version; activating a new version deletes
//! every store with a different name.
//!
//! Storage backends:
//! - `MemoryStorage`: in-process, with an optional byte quota
//! - `DiskStorage`: one directory per store, JSON entry files

pub mod disk;
pub mod entry;
pub mod manager;
pub mod memory;
pub mod storage;

pub use disk::DiskStorage;
pub use entry::StoredResponse;
pub use manager::{CacheManager, FetchOutcome, InstallOutcome, ResponseSource};
pub use memory::MemoryStorage;
pub use storage::CacheStorage;
