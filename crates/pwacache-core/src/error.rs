//! Error types for cache storage and manifest population.

use thiserror::Error;

use crate::net::NetworkError;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to (de)serialize cache entry: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Request method '{0}' is unsupported")]
    UnsupportedMethod(String),

    #[error("Quota exceeded for cache '{store}': {needed} bytes needed, {available} available")]
    QuotaExceeded {
        store: String,
        needed: usize,
        available: usize,
    },

    #[error("Corrupt cache data: {0}")]
    Corrupt(String),
}

/// A specialized `Result` type for cache storage operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Why populating the install manifest failed.
///
/// Any of these aborts the whole batch; nothing from the batch is stored.
#[derive(Error, Debug)]
pub enum PrecacheError {
    #[error("Failed to fetch {url}: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: NetworkError,
    },

    #[error("Request for {url} returned status {status}")]
    BadStatus { url: String, status: u16 },

    #[error("Failed to store manifest resources: {0}")]
    Storage(#[from] CacheError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_message() {
        let err = CacheError::QuotaExceeded {
            store: "app-v1".to_string(),
            needed: 2048,
            available: 1024,
        };
        assert_eq!(
            err.to_string(),
            "Quota exceeded for cache 'app-v1': 2048 bytes needed, 1024 available"
        );
    }

    #[test]
    fn test_precache_error_wraps_storage() {
        let err: PrecacheError = CacheError::UnsupportedMethod("POST".to_string()).into();
        assert!(matches!(err, PrecacheError::Storage(CacheError::UnsupportedMethod(_))));
    }
}
