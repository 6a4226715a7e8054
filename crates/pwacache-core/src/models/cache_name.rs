use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of a cache store generation.
///
/// Built from an application name and a version tag so that bumping the
/// version yields a new store and leaves the previous one eligible for
/// deletion on activation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheName(String);

impl CacheName {
    /// `CacheName::versioned("simple-pwa-ts", "1.0.0")` is `simple-pwa-ts-v1.0.0`.
    pub fn versioned(app: &str, version: &str) -> Self {
        let version = version.strip_prefix('v').unwrap_or(version);
        Self(format!("{}-v{}", app, version))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CacheName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for CacheName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl AsRef<str> for CacheName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for CacheName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<String> for CacheName {
    fn eq(&self, other: &String) -> bool {
        &self.0 == other
    }
}

impl fmt::Display for CacheName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
