use serde_json::Value;

/// Message `type` that asks a waiting worker to activate immediately.
pub const SKIP_WAITING: &str = "SKIP_WAITING";

/// Lifecycle commands a worker hands back to the registration that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleCommand {
    /// Activate the waiting worker without waiting for old clients to close.
    SkipWaiting,
    /// Take control of every open client.
    ClaimClients,
}

impl LifecycleCommand {
    /// Parse an inbound message. Only `{ "type": "SKIP_WAITING" }` is recognized;
    /// anything else (other types, non-objects, missing `type`) is ignored.
    pub fn from_message(message: &Value) -> Option<Self> {
        match message.get("type").and_then(Value::as_str) {
            Some(SKIP_WAITING) => Some(Self::SkipWaiting),
            _ => None,
        }
    }
}
