//! Data models shared by the cache manager, storage backends and network.
//!
//! This module contains:
//! - `Request` / `RequestKey`: a request and the identity used to key cache entries
//! - `Response` / `ResponseType`: a response with its fetch-style type classification
//! - `CacheName`: the versioned store name (`<app>-v<version>`)
//! - `LifecycleCommand`: commands a worker hands back to its registration

pub mod cache_name;
pub mod message;
pub mod request;
pub mod response;

pub use cache_name::CacheName;
pub use message::{LifecycleCommand, SKIP_WAITING};
pub use request::{Request, RequestKey};
pub use response::{Response, ResponseType, NETWORK_ERROR_BODY, NETWORK_ERROR_STATUS};
