//! pwacache core library.
//!
//! A cache-aside request mediator modelled on a Progressive Web App service
//! worker: requests are served from the current versioned cache store when
//! present, otherwise fetched from the network and opportunistically cached.
//! Activating a new version deletes every store with a different name.
//!
//! Modules:
//! - `cache`: `CacheManager` and the `CacheStorage` backends
//! - `net`: the `Network` fetch seam and its `reqwest` implementation
//! - `worker`: event dispatch and the registration lifecycle
//! - `models`: requests, responses, cache names, lifecycle commands
//! - `config`: configuration loading

pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod net;
pub mod worker;

pub use cache::{CacheManager, CacheStorage, DiskStorage, MemoryStorage};
pub use config::{Config, WorkerConfig};
pub use error::{CacheError, PrecacheError};
pub use models::{CacheName, Request, Response, ResponseType};
pub use net::{HttpNetwork, Network, NetworkError};
pub use worker::{EventOutcome, Registration, WorkerEvent};
