//! Per-WebSocket protocol state machine: EVENT/REQ/CLOSE/AUTH dispatch.
//!
//! Deliberately decoupled from the transport: every handler takes what it
//! needs and returns the `RelayMessage`s to send, so the axum WebSocket loop
//! (in `server.rs`) stays a thin adapter and this logic is exercisable
//! without a real socket.

use crate::manager::ManagedRelay;
use crate::model::{
    self, filter_matches, is_auth_response_event, is_delete_event, is_direct_message, is_ephemeral, is_replaceable,
};
use crate::nip42::AuthChallenge;
use crate::policy::PolicyResult;
use crate::reject::RejectReason;
use crate::validator::RateCounter;
use crate::config::RelayConfig;
use nostr::{Event, EventId, Filter, PublicKey, RelayMessage, SubscriptionId};
use std::collections::HashMap;

/// Wire text the reference relay sends when a connection's filter count
/// overflows `max_client_filters`.
pub const TOO_MANY_FILTERS_NOTICE: &str = "too many active filters";

pub struct Connection {
    relay_id: String,
    authed_pubkey: Option<PublicKey>,
    challenge: AuthChallenge,
    subs: HashMap<SubscriptionId, Filter>,
    rate: RateCounter,
}

/// What the caller should do after handling one frame.
pub enum Outcome {
    /// Send these messages and keep the connection open.
    Reply(Vec<RelayMessage>),
    /// Send these messages, then close the connection.
    Close(Vec<RelayMessage>),
}

impl Connection {
    pub fn new(relay_id: impl Into<String>) -> Self {
        let relay_id = relay_id.into();
        Self {
            challenge: AuthChallenge::new(relay_id.clone()),
            relay_id,
            authed_pubkey: None,
            subs: HashMap::new(),
            rate: RateCounter::default(),
        }
    }

    pub fn authed_pubkey(&self) -> Option<PublicKey> {
        self.authed_pubkey
    }

    fn publisher_pubkey(&self, event: &Event) -> PublicKey {
        self.authed_pubkey.unwrap_or(event.pubkey)
    }

    /// `["EVENT", <event>]`.
    pub async fn handle_event(&mut self, event: Event, relay: &ManagedRelay) -> Outcome {
        if is_auth_response_event(&event.kind) {
            let challenge = self.challenge.current().to_string();
            let validator = relay.current_validator().await;
            return match validator.validate_auth(&event, &challenge, &self.rate) {
                Ok(()) => {
                    self.authed_pubkey = Some(event.pubkey);
                    Outcome::Reply(vec![])
                }
                Err(reason) => Outcome::Reply(vec![RelayMessage::ok(event.id, false, reason.to_string())]),
            };
        }

        let config = relay.current_config().await;
        if self.authed_pubkey.is_none() && config.event_requires_auth(event.kind.as_u16()) {
            return Outcome::Reply(vec![
                RelayMessage::auth(self.challenge.current().to_string()),
                RelayMessage::ok(event.id, false, RejectReason::restricted("").to_string()),
            ]);
        }

        match relay.policy.can_write(&event, self.authed_pubkey.as_ref()) {
            PolicyResult::Allow => {}
            PolicyResult::AuthRequired => {
                return Outcome::Reply(vec![
                    RelayMessage::auth(self.challenge.current().to_string()),
                    RelayMessage::ok(event.id, false, RejectReason::restricted("").to_string()),
                ]);
            }
            PolicyResult::Deny(reason) => {
                return Outcome::Reply(vec![RelayMessage::ok(event.id, false, reason.to_string())]);
            }
        }

        let publisher = self.publisher_pubkey(&event);
        let validator = relay.current_validator().await;
        if let Err(reason) = validator.validate_write(&event, &publisher, &self.rate, relay.store.as_ref()) {
            return Outcome::Reply(vec![RelayMessage::ok(event.id, false, reason.to_string())]);
        }

        if is_ephemeral(&event.kind) {
            let ok = RelayMessage::ok(event.id, true, "");
            let _ = relay.events_tx.send(event);
            return Outcome::Reply(vec![ok]);
        }

        if is_replaceable(&event.kind) {
            let supersede = Filter::new()
                .kinds([event.kind])
                .authors([event.pubkey])
                .until(event.created_at);
            let _ = relay.store.delete_events(&supersede);
        }

        match relay.store.insert_event(&event, &publisher) {
            Ok(true) => {
                if is_delete_event(&event.kind) {
                    cascade_delete(&event, relay);
                }
                let ok = RelayMessage::ok(event.id, true, "");
                let _ = relay.events_tx.send(event);
                Outcome::Reply(vec![ok])
            }
            Ok(false) => Outcome::Reply(vec![RelayMessage::ok(
                event.id,
                false,
                RejectReason::Error("event already exists".into()).to_string(),
            )]),
            Err(e) => Outcome::Reply(vec![RelayMessage::ok(
                event.id,
                false,
                RejectReason::Error(e.to_string()).to_string(),
            )]),
        }
    }

    /// `["REQ", <sub_id>, <filter>]`. A subscription carries exactly one
    /// filter; frames with zero or more than one are silently dropped, the
    /// way the reference relay ignores any REQ frame whose length isn't 3.
    pub async fn handle_req(
        &mut self,
        sub_id: SubscriptionId,
        filters: Vec<Filter>,
        relay: &ManagedRelay,
    ) -> Outcome {
        let mut filters = filters;
        if filters.len() != 1 {
            return Outcome::Reply(vec![]);
        }
        let filter = filters.remove(0);

        let config = relay.current_config().await;

        if config.max_client_filters != 0
            && !self.subs.contains_key(&sub_id)
            && self.subs.len() as u32 >= config.max_client_filters
        {
            return Outcome::Close(vec![RelayMessage::notice(TOO_MANY_FILTERS_NOTICE)]);
        }

        if self.authed_pubkey.is_none() && config.require_auth_filter {
            return Outcome::Reply(vec![RelayMessage::auth(self.challenge.current().to_string())]);
        }

        match relay.policy.can_read(&filter, self.authed_pubkey.as_ref()) {
            PolicyResult::Allow => {}
            PolicyResult::AuthRequired => {
                return Outcome::Reply(vec![RelayMessage::notice(RejectReason::restricted("").to_string())]);
            }
            PolicyResult::Deny(reason) => {
                return Outcome::Reply(vec![RelayMessage::notice(reason.to_string())]);
            }
        }

        let clamped = clamp_filter(filter, &config);

        let mut messages = Vec::new();
        match relay.store.query_events(&clamped) {
            Ok(events) => {
                for event in events {
                    if self.visible(&event, &config) {
                        messages.push(RelayMessage::event(sub_id.clone(), event));
                    }
                }
            }
            Err(e) => messages.push(RelayMessage::notice(format!("error: {e}"))),
        }
        messages.push(RelayMessage::eose(sub_id.clone()));
        self.subs.insert(sub_id, clamped);
        Outcome::Reply(messages)
    }

    /// `["CLOSE", <sub_id>]`.
    pub fn handle_close(&mut self, sub_id: &SubscriptionId) {
        self.subs.remove(sub_id);
    }

    /// Bare `["AUTH"]` challenge request.
    pub fn handle_auth_request(&mut self) -> RelayMessage {
        RelayMessage::auth(self.challenge.current().to_string())
    }

    #[cfg(test)]
    fn current_challenge(&mut self) -> String {
        self.challenge.current().to_string()
    }

    /// A live event arrived on the relay's broadcast channel; return the
    /// messages (if any) this connection's active subscriptions want to see.
    /// Self-delivery is intentional — the reference implementation's
    /// broadcast loop does not skip the author's own connection.
    pub async fn deliver(&self, event: &Event, relay: &ManagedRelay) -> Vec<RelayMessage> {
        let config = relay.current_config().await;
        if !self.visible(event, &config) {
            return vec![];
        }
        self.subs
            .iter()
            .filter(|(_, filter)| filter_matches(event, filter))
            .map(|(sub_id, _)| RelayMessage::event(sub_id.clone(), event.clone()))
            .collect()
    }

    /// Direct-message visibility: delivered to a peer iff the peer is
    /// authenticated and either it is the addressed recipient (`p` tag) or
    /// it is the event's own author.
    fn visible(&self, event: &Event, config: &RelayConfig) -> bool {
        if !(is_direct_message(&event.kind) && config.event_requires_auth(4)) {
            return true;
        }
        match self.authed_pubkey {
            Some(pk) => {
                event.pubkey == pk || model::p_tag_values(event).iter().any(|p| p == &pk.to_string())
            }
            None => false,
        }
    }
}

fn cascade_delete(event: &Event, relay: &ManagedRelay) {
    let deleter = event.pubkey;
    for id_hex in model::e_tag_values(event) {
        let Ok(id) = EventId::from_hex(&id_hex) else { continue };
        if let Ok(Some(target)) = relay.store.get_event(id.as_bytes()) {
            if target.pubkey == deleter && !is_delete_event(&target.kind) {
                let _ = relay.store.mark_deleted(id.as_bytes());
            }
        }
    }
}

/// Clamp a filter's `limit` against the relay's configured ceiling, the way
/// NIP-11's `max_limit`/`default_limit` and `limit_per_filter` interact.
fn clamp_filter(mut filter: Filter, config: &RelayConfig) -> Filter {
    let ceiling = config
        .nip11
        .max_limit
        .map(|m| m.min(config.limit_per_filter))
        .unwrap_or(config.limit_per_filter);

    filter.limit = Some(match filter.limit {
        Some(requested) => (requested as u64).min(ceiling) as usize,
        None => config.nip11.default_limit.unwrap_or(ceiling).min(ceiling) as usize,
    });
    filter
}
