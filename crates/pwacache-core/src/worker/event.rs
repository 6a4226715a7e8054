use serde_json::Value;

use crate::cache::{CacheManager, FetchOutcome, InstallOutcome};
use crate::models::{LifecycleCommand, Request};

/// An event delivered to a worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(Request),
    Message(Value),
}

impl WorkerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerEvent::Install => "install",
            WorkerEvent::Activate => "activate",
            WorkerEvent::Fetch(_) => "fetch",
            WorkerEvent::Message(_) => "message",
        }
    }
}

/// The effect of handling one event.
#[derive(Debug, Clone)]
pub enum EventOutcome {
    Installed(InstallOutcome),
    /// Superseded stores that were deleted.
    Activated { deleted: Vec<String> },
    Responded(FetchOutcome),
    Message(Option<LifecycleCommand>),
}

impl EventOutcome {
    /// The lifecycle command the registration must apply, if any.
    /// Activation always claims the open clients.
    pub fn command(&self) -> Option<LifecycleCommand> {
        match self {
            EventOutcome::Activated { .. } => Some(LifecycleCommand::ClaimClients),
            EventOutcome::Message(command) => *command,
            EventOutcome::Installed(_) | EventOutcome::Responded(_) => None,
        }
    }
}

impl CacheManager {
    /// Route an event to its handler.
    pub async fn dispatch(&self, event: WorkerEvent) -> EventOutcome {
        tracing::trace!(event = event.kind(), cache = %self.cache_name(), "Dispatching event");
        match event {
            WorkerEvent::Install => EventOutcome::Installed(self.on_install().await),
            WorkerEvent::Activate => EventOutcome::Activated {
                deleted: self.on_activate().await,
            },
            WorkerEvent::Fetch(request) => EventOutcome::Responded(self.on_fetch(&request).await),
            WorkerEvent::Message(message) => EventOutcome::Message(self.on_message(&message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStorage, MemoryStorage, ResponseSource};
    use crate::config::WorkerConfig;
    use crate::models::{CacheName, Response};
    use crate::net::{Network, NetworkError};
    use async_trait::async_trait;
    use reqwest::Url;
    use serde_json::json;
    use std::sync::Arc;

    struct OfflineNetwork;

    #[async_trait]
    impl Network for OfflineNetwork {
        async fn fetch(&self, _request: &Request) -> Result<Response, NetworkError> {
            Err(NetworkError::Offline("offline".to_string()))
        }
    }

    fn manager(storage: Arc<MemoryStorage>) -> CacheManager {
        CacheManager::new(
            WorkerConfig::new(CacheName::from("app-v2")),
            storage,
            Arc::new(OfflineNetwork),
        )
    }

    #[tokio::test]
    async fn test_dispatch_routes_each_kind() {
        let storage = Arc::new(MemoryStorage::new());
        storage.open("app-v1").await.unwrap();
        let manager = manager(storage.clone());

        let installed = manager.dispatch(WorkerEvent::Install).await;
        assert!(matches!(installed, EventOutcome::Installed(InstallOutcome::Precached(0))));
        assert_eq!(installed.command(), None);

        let activated = manager.dispatch(WorkerEvent::Activate).await;
        assert!(matches!(&activated, EventOutcome::Activated { deleted } if deleted == &["app-v1"]));
        assert_eq!(activated.command(), Some(LifecycleCommand::ClaimClients));

        let url = Url::parse("http://localhost:3000/").unwrap();
        match manager.dispatch(WorkerEvent::Fetch(Request::get(url))).await {
            EventOutcome::Responded(outcome) => assert_eq!(outcome.source, ResponseSource::Fallback),
            other => panic!("unexpected outcome: {:?}", other),
        }

        let message = manager
            .dispatch(WorkerEvent::Message(json!({"type": "SKIP_WAITING"})))
            .await;
        assert_eq!(message.command(), Some(LifecycleCommand::SkipWaiting));
    }

    #[test]
    fn test_event_kinds() {
        assert_eq!(WorkerEvent::Install.kind(), "install");
        assert_eq!(WorkerEvent::Message(Value::Null).kind(), "message");
    }
}
