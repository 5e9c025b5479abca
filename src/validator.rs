//! Event validation pipeline: rate limiting, signature/time checks, and
//! storage admission, run in the exact order the reference relay applies
//! them before persisting a write.

use crate::account::Account;
use crate::config::{FullStorageAction, RelayConfig};
use crate::model::{is_ephemeral, size_bytes};
use crate::nip42;
use crate::reject::RejectReason;
use crate::storage::NostrStore;
use nostr::{Event, Filter, PublicKey};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Per-connection events-this-hour counter. Hour bucket resets the count
/// rather than sliding, matching the reference implementation's
/// `round(time.time() / 3600)` bucketing.
#[derive(Debug, Default)]
pub struct RateCounter {
    bucket: AtomicU64,
    count: AtomicU32,
}

impl RateCounter {
    /// Increment the counter for the current hour and return the new total.
    fn bump(&self) -> u32 {
        let bucket = now_secs() / 3600;
        let prev_bucket = self.bucket.swap(bucket, Ordering::SeqCst);
        if prev_bucket != bucket {
            self.count.store(0, Ordering::SeqCst);
        }
        self.count.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Owns the validation rules for one relay. One instance per relay,
/// shared across its connections; per-connection state (the rate counter)
/// is held by the connection and passed in explicitly.
pub struct EventValidator {
    relay_id: String,
    config: RelayConfig,
}

impl EventValidator {
    pub fn new(relay_id: impl Into<String>, config: RelayConfig) -> Self {
        Self {
            relay_id: relay_id.into(),
            config,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Common pre-checks shared by writes and AUTH responses: rate limit,
    /// signature, and `created_at` window.
    fn validate_common(&self, event: &Event, rate: &RateCounter) -> Result<(), RejectReason> {
        if self.config.max_events_per_hour != 0 && rate.bump() > self.config.max_events_per_hour {
            return Err(RejectReason::RateLimitExceeded);
        }

        if event.verify().is_err() {
            return Err(RejectReason::Invalid("wrong event id or signature".into()));
        }

        let now = now_secs() as i64;
        if self.config.created_at_in_past != 0
            && (event.created_at.as_u64() as i64) < now - self.config.created_at_in_past
        {
            return Err(RejectReason::TooOld);
        }
        if self.config.created_at_in_future != 0
            && (event.created_at.as_u64() as i64) > now + self.config.created_at_in_future
        {
            return Err(RejectReason::TooFarFuture);
        }

        Ok(())
    }

    /// Full write-path validation: common pre-checks, then (for
    /// non-ephemeral events) storage admission.
    pub fn validate_write(
        &self,
        event: &Event,
        publisher: &PublicKey,
        rate: &RateCounter,
        store: &dyn NostrStore,
    ) -> Result<(), RejectReason> {
        self.validate_common(event, rate)?;

        if is_ephemeral(&event.kind) {
            return Ok(());
        }

        self.validate_storage(publisher, size_bytes(event), store)
    }

    /// AUTH-response validation: common pre-checks, then the NIP-42 tag
    /// and challenge checks.
    pub fn validate_auth(
        &self,
        event: &Event,
        challenge: &str,
        rate: &RateCounter,
    ) -> Result<(), RejectReason> {
        self.validate_common(event, rate)?;

        let domain = if self.config.domain.is_empty() {
            &self.relay_id
        } else {
            self.config.domain.as_str()
        };
        nip42::validate_auth_event(event, domain, challenge).map_err(RejectReason::Error)
    }

    fn validate_storage(
        &self,
        publisher: &PublicKey,
        event_size: u64,
        store: &dyn NostrStore,
    ) -> Result<(), RejectReason> {
        if self.config.is_read_only_relay() {
            return Err(RejectReason::ReadOnly);
        }

        let account = store
            .get_account(publisher)
            .map_err(|e| RejectReason::Error(e.to_string()))?
            .unwrap_or_else(|| Account::new(publisher.to_string()));

        if account.blocked {
            return Err(RejectReason::blocked(format!(
                "public key '{publisher}' is not allowed in relay '{}'",
                self.relay_id
            )));
        }

        if !account.can_join() && self.config.is_paid_relay {
            return Err(RejectReason::PaidRelayNoAccess);
        }

        let stored_bytes = store
            .storage_used(publisher)
            .map_err(|e| RejectReason::Error(e.to_string()))?;
        let total_available = account.storage + self.config.free_storage_bytes_value();

        if stored_bytes + event_size <= total_available {
            return Ok(());
        }

        if self.config.full_storage_action == FullStorageAction::Block {
            return Err(RejectReason::NoStorage);
        }

        if event_size > total_available {
            return Err(RejectReason::TooLarge);
        }

        prune_until(store, publisher, event_size).map_err(|e| RejectReason::Error(e.to_string()))?;
        Ok(())
    }
}

/// Delete the oldest events for `pubkey` until at least `space_to_regain`
/// bytes have been freed (or the oldest-events cap is exhausted).
pub fn prune_until(
    store: &dyn NostrStore,
    pubkey: &PublicKey,
    space_to_regain: u64,
) -> crate::error::Result<()> {
    let prunable = store.oldest_events(pubkey, crate::storage::lmdb::MAX_PRUNABLE_EVENTS)?;
    let mut ids = Vec::new();
    let mut size = 0u64;

    for (id, event_size) in prunable {
        ids.push(id);
        size += event_size;
        if size > space_to_regain {
            break;
        }
    }

    if ids.is_empty() {
        return Ok(());
    }

    let event_ids: Vec<nostr::EventId> = ids.iter().map(|id| nostr::EventId::from_byte_array(*id)).collect();
    let filter = Filter::new().ids(event_ids);
    store.delete_events(&filter)?;
    Ok(())
}
