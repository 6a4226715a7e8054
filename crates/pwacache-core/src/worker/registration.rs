//! Registration of the worker script for a scope.
//!
//! A registration holds at most one *waiting* and one *active* worker
//! version. A newly installed version waits while the active version still
//! controls open clients, unless it receives a skip-waiting message.
//! On activation the previous version becomes redundant, superseded stores
//! are deleted and every open client is claimed by the new version.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::cache::{CacheManager, FetchOutcome, ResponseSource};
use crate::models::{CacheName, LifecycleCommand, Request, Response};
use crate::net::Network;

use super::{EventOutcome, WorkerEvent};

pub type WorkerId = u64;
pub type ClientId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Installing,
    Installed,
    Activating,
    Activated,
    Redundant,
}

struct WorkerVersion {
    id: WorkerId,
    manager: Arc<CacheManager>,
}

pub struct Registration {
    scope: String,
    script_url: String,
    /// Used for requests arriving while no worker is active
    network: Arc<dyn Network>,
    waiting: Option<WorkerVersion>,
    active: Option<WorkerVersion>,
    states: HashMap<WorkerId, WorkerState>,
    /// Open clients and the worker controlling each
    clients: BTreeMap<ClientId, Option<WorkerId>>,
    next_worker: WorkerId,
    next_client: ClientId,
}

impl Registration {
    pub fn new(scope: &str, script_url: &str, network: Arc<dyn Network>) -> Self {
        Self {
            scope: scope.to_string(),
            script_url: script_url.to_string(),
            network,
            waiting: None,
            active: None,
            states: HashMap::new(),
            clients: BTreeMap::new(),
            next_worker: 1,
            next_client: 1,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn script_url(&self) -> &str {
        &self.script_url
    }

    // ===== Workers =====

    /// Install a new worker version.
    ///
    /// It activates right away when nothing else is active, when the active
    /// version controls no clients, or when it was told to skip waiting
    /// during install. Otherwise it becomes the waiting version, replacing
    /// (and making redundant) any previous waiting version.
    pub async fn register(&mut self, manager: CacheManager) -> WorkerId {
        let id = self.next_worker;
        self.next_worker += 1;
        let version = WorkerVersion {
            id,
            manager: Arc::new(manager),
        };

        info!(worker = id, script = %self.script_url, scope = %self.scope, cache = %version.manager.cache_name(), "Registering worker");
        self.states.insert(id, WorkerState::Installing);
        let outcome = version.manager.dispatch(WorkerEvent::Install).await;
        debug!(worker = id, outcome = ?outcome, "Worker installed");
        self.states.insert(id, WorkerState::Installed);

        if let Some(previous) = self.waiting.take() {
            debug!(worker = previous.id, "Replaced waiting worker");
            self.states.insert(previous.id, WorkerState::Redundant);
        }

        let skip = version.manager.skip_waiting_requested();
        self.waiting = Some(version);
        if skip || self.active_is_idle() {
            self.activate_waiting().await;
        } else {
            info!(worker = id, "Worker waiting for clients of the active worker to close");
        }
        id
    }

    /// True when nothing is active or the active version controls no clients.
    fn active_is_idle(&self) -> bool {
        match &self.active {
            Some(active) => !self.clients.values().any(|c| *c == Some(active.id)),
            None => true,
        }
    }

    async fn activate_waiting(&mut self) {
        let Some(version) = self.waiting.take() else {
            return;
        };

        if let Some(previous) = self.active.take() {
            info!(worker = previous.id, "Worker became redundant");
            self.states.insert(previous.id, WorkerState::Redundant);
        }

        self.states.insert(version.id, WorkerState::Activating);
        let outcome = version.manager.dispatch(WorkerEvent::Activate).await;
        self.states.insert(version.id, WorkerState::Activated);
        if let EventOutcome::Activated { deleted } = &outcome {
            info!(worker = version.id, deleted = deleted.len(), "Worker activated");
        }

        self.active = Some(version);
        // Activation only ever asks for clients to be claimed; skip-waiting
        // arrives through messages
        if outcome.command() == Some(LifecycleCommand::ClaimClients) {
            self.claim_clients();
        }
    }

    fn claim_clients(&mut self) {
        let active = self.active_id();
        for controller in self.clients.values_mut() {
            *controller = active;
        }
        debug!(worker = ?active, clients = self.clients.len(), "Claimed clients");
    }

    /// Post a message to the waiting worker, or to the active one when
    /// nothing is waiting. Returns the command the message produced.
    pub async fn post_message(&mut self, message: &Value) -> Option<LifecycleCommand> {
        let target = self.waiting.as_ref().or(self.active.as_ref())?;
        let manager = Arc::clone(&target.manager);
        let command = manager.dispatch(WorkerEvent::Message(message.clone())).await.command()?;
        match command {
            LifecycleCommand::SkipWaiting => self.activate_waiting().await,
            LifecycleCommand::ClaimClients => self.claim_clients(),
        }
        Some(command)
    }

    pub fn state(&self, worker: WorkerId) -> Option<WorkerState> {
        self.states.get(&worker).copied()
    }

    pub fn active_id(&self) -> Option<WorkerId> {
        self.active.as_ref().map(|v| v.id)
    }

    pub fn waiting_id(&self) -> Option<WorkerId> {
        self.waiting.as_ref().map(|v| v.id)
    }

    pub fn active_cache_name(&self) -> Option<&CacheName> {
        self.active.as_ref().map(|v| v.manager.cache_name())
    }

    pub fn active_manager(&self) -> Option<&CacheManager> {
        self.active.as_ref().map(|v| v.manager.as_ref())
    }

    // ===== Clients =====

    /// Open a page client; it is controlled by the active worker, if any.
    pub fn open_client(&mut self) -> ClientId {
        let id = self.next_client;
        self.next_client += 1;
        let controller = self.active_id();
        self.clients.insert(id, controller);
        id
    }

    /// Close a page client. Once the active worker controls no clients, a
    /// waiting worker activates.
    pub async fn close_client(&mut self, client: ClientId) {
        if self.clients.remove(&client).is_none() {
            return;
        }
        if self.waiting.is_some() && self.active_is_idle() {
            self.activate_waiting().await;
        }
    }

    pub fn controller(&self, client: ClientId) -> Option<WorkerId> {
        self.clients.get(&client).copied().flatten()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    // ===== Fetch =====

    /// Route a request through the active worker. With no active worker the
    /// request goes straight to the network.
    pub async fn fetch(&self, request: &Request) -> FetchOutcome {
        if let Some(active) = &self.active {
            return active.manager.on_fetch(request).await;
        }
        match self.network.fetch(request).await {
            Ok(response) => FetchOutcome {
                response,
                source: ResponseSource::Network,
            },
            Err(e) => {
                debug!(url = %request.url, error = %e, "Uncontrolled fetch failed");
                FetchOutcome {
                    response: Response::network_error(),
                    source: ResponseSource::Fallback,
                }
            }
        }
    }
}
