//! Runtime registry of active relays: admits new connections, fans out
//! broadcast events, and stops every connection on a relay when it is
//! disabled. One process hosts many relays; this is the structure that
//! makes each one independently enable-able/disable-able without a restart.

use crate::config::RelayConfig;
use crate::policy::PolicyEngine;
use crate::reject::RejectReason;
use crate::storage::NostrStore;
use crate::validator::EventValidator;
use nostr::Event;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Everything a connection needs once it has been admitted to a relay.
pub struct ManagedRelay {
    pub relay_id: String,
    pub store: Arc<dyn NostrStore>,
    pub policy: Arc<PolicyEngine>,
    pub validator: RwLock<Arc<EventValidator>>,
    pub config: RwLock<RelayConfig>,
    /// Live-event fan-out. Connections subscribe and match against their own
    /// filters; the sender itself is also a subscriber when it holds its own
    /// receiver, so broadcast delivers to the author's own connection too.
    pub events_tx: broadcast::Sender<Event>,
    /// Fired once, with the deactivation reason, when the relay is disabled.
    pub stop_tx: broadcast::Sender<String>,
    active: AtomicBool,
}

impl ManagedRelay {
    fn new(relay_id: String, config: RelayConfig, store: Arc<dyn NostrStore>, policy: Arc<PolicyEngine>) -> Self {
        let (events_tx, _) = broadcast::channel(1024);
        let (stop_tx, _) = broadcast::channel(1);
        let validator = EventValidator::new(relay_id.clone(), config.clone());
        Self {
            relay_id,
            store,
            policy,
            validator: RwLock::new(Arc::new(validator)),
            config: RwLock::new(config),
            events_tx,
            stop_tx,
            active: AtomicBool::new(true),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub async fn current_config(&self) -> RelayConfig {
        self.config.read().await.clone()
    }

    pub async fn current_validator(&self) -> Arc<EventValidator> {
        self.validator.read().await.clone()
    }
}

/// Owns the relay → connections mapping for the whole process.
#[derive(Default)]
pub struct ClientManager {
    relays: RwLock<HashMap<String, Arc<ManagedRelay>>>,
}

impl ClientManager {
    pub fn new() -> Self {
        Self {
            relays: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or reconfigure) a relay and mark it active. Existing
    /// connections on a reconfigured relay keep running against the new
    /// config from their next read.
    pub async fn enable(
        &self,
        relay_id: impl Into<String>,
        config: RelayConfig,
        store: Arc<dyn NostrStore>,
        policy: Arc<PolicyEngine>,
    ) {
        let relay_id = relay_id.into();
        let mut relays = self.relays.write().await;
        match relays.get(&relay_id) {
            Some(existing) => {
                *existing.config.write().await = config.clone();
                *existing.validator.write().await =
                    Arc::new(EventValidator::new(relay_id.clone(), config));
                existing.active.store(true, Ordering::SeqCst);
            }
            None => {
                let managed = ManagedRelay::new(relay_id.clone(), config, store, policy);
                relays.insert(relay_id, Arc::new(managed));
            }
        }
    }

    /// Deactivate a relay and signal every connection currently reading
    /// from it to stop. The relay's config/store stay registered so a
    /// later `enable` call can reactivate it without rebuilding storage.
    pub async fn disable(&self, relay_id: &str) {
        let relays = self.relays.read().await;
        if let Some(relay) = relays.get(relay_id) {
            relay.active.store(false, Ordering::SeqCst);
            let _ = relay
                .stop_tx
                .send(format!("Relay '{relay_id}' has been deactivated."));
        }
    }

    /// Fetch a relay for a new connection. Fails with the exact refusal
    /// wording used by a disabled or unknown relay.
    pub async fn get(&self, relay_id: &str) -> Result<Arc<ManagedRelay>, RejectReason> {
        let relays = self.relays.read().await;
        match relays.get(relay_id) {
            Some(relay) if relay.is_active() => Ok(relay.clone()),
            _ => Err(RejectReason::Error(format!("Relay '{relay_id}' is not active"))),
        }
    }

    /// Snapshot of every registered relay and whether it is currently active.
    pub async fn list(&self) -> Vec<(String, bool)> {
        let relays = self.relays.read().await;
        relays.iter().map(|(id, relay)| (id.clone(), relay.is_active())).collect()
    }

    /// Fan out a freshly-persisted (or ephemeral) event to every connection
    /// on its relay, including the author's own connection — matching the
    /// reference implementation, which iterates every client with no
    /// self-skip.
    pub fn broadcast(&self, relay: &ManagedRelay, event: Event) {
        // A lagging or absent receiver is not an error: it just means no
        // connections are currently subscribed.
        let _ = relay.events_tx.send(event);
    }

    /// Disable every registered relay, stopping all of their connections.
    pub async fn stop_all(&self) {
        let relays = self.relays.read().await;
        for (relay_id, relay) in relays.iter() {
            relay.active.store(false, Ordering::SeqCst);
            let _ = relay
                .stop_tx
                .send(format!("Relay '{relay_id}' has been deactivated."));
        }
    }
}
