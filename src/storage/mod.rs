use crate::account::Account;
use crate::error::Result;
use nostr::{Event, Filter, PublicKey};

/// Persistence contract for a single relay's event store. One implementation
/// (LMDB/`heed`) per relay directory; the trait exists so the connection and
/// validator code never depend on the storage engine directly.
pub trait NostrStore: Send + Sync {
    /// Insert a freshly-validated event attributed to `publisher` (the
    /// connection's authenticated pubkey, or the event's own pubkey when
    /// unauthenticated). Returns `true` if this was a new row, `false` if
    /// the event id already existed (idempotent duplicate, no-op).
    fn insert_event(&self, event: &Event, publisher: &PublicKey) -> Result<bool>;
    fn get_event(&self, id: &[u8; 32]) -> Result<Option<Event>>;
    /// Matching, non-deleted events for a filter, newest first, capped at
    /// the filter's (clamped) limit.
    fn query_events(&self, filter: &Filter) -> Result<Vec<Event>>;
    /// Mark an event deleted without removing it — it stays counted toward
    /// storage usage but is excluded from `query_events`. Returns `true` if
    /// the event existed.
    fn mark_deleted(&self, id: &[u8; 32]) -> Result<bool>;
    /// Physically remove every event matching `filter`. A no-op (`Ok(0)`)
    /// if the filter is empty — an unconstrained mass-delete is never
    /// intentional. Returns the number of events removed.
    fn delete_events(&self, filter: &Filter) -> Result<u64>;
    /// Physically remove every event this store holds. Returns the number
    /// of events removed.
    fn delete_all(&self) -> Result<u64>;
    /// Total bytes attributed to `publisher`, including deleted events.
    fn storage_used(&self, publisher: &PublicKey) -> Result<u64>;
    /// The oldest (by `created_at`, ascending) events authored by `pubkey`,
    /// capped at `limit` (never more than 10,000). Returns `(id, size)`
    /// pairs, cheap enough to hold entirely in memory during pruning.
    fn oldest_events(&self, pubkey: &PublicKey, limit: usize) -> Result<Vec<([u8; 32], u64)>>;
    fn get_account(&self, pubkey: &PublicKey) -> Result<Option<Account>>;
    fn upsert_account(&self, account: &Account) -> Result<()>;
    fn list_accounts(&self) -> Result<Vec<Account>>;
    fn iter_all(&self) -> Result<Vec<Event>>;
    fn event_count(&self) -> Result<u64>;
    fn db_path(&self) -> &str;
}

pub mod lmdb;
