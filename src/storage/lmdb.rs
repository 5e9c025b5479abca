use super::NostrStore;
use crate::account::Account;
use crate::error::Result;
use heed::types::*;
use heed::{Database, Env, EnvOpenOptions, RwTxn};
use nostr::{Event, Filter, Kind, PublicKey};
use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::{Bound, RangeBounds};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// A range over borrowed byte slices that implements `RangeBounds<[u8]>`.
/// Required because heed's `Bytes` codec has `EItem = [u8]` (unsized).
struct ByteRange<'a> {
    start: &'a [u8],
    end: &'a [u8],
}

impl<'a> ByteRange<'a> {
    fn new(start: &'a [u8], end: &'a [u8]) -> Self {
        Self { start, end }
    }
}

impl<'a> RangeBounds<[u8]> for ByteRange<'a> {
    fn start_bound(&self) -> Bound<&[u8]> {
        Bound::Included(self.start)
    }
    fn end_bound(&self) -> Bound<&[u8]> {
        Bound::Included(self.end)
    }
}

// ---------------------------------------------------------------------------
// Key sizes (all fixed-width indices use stack arrays)
// ---------------------------------------------------------------------------

const CREATED_KEY_LEN: usize = 8 + 32; // timestamp(8) + event_id(32)
const PUBKEY_KEY_LEN: usize = 32 + 8 + 32; // pubkey(32) + timestamp(8) + event_id(32)
const KIND_KEY_LEN: usize = 2 + 8 + 32; // kind(2) + timestamp(8) + event_id(32)
const AUTHOR_KIND_KEY_LEN: usize = 32 + 2 + 8 + 32; // pubkey(32) + kind(2) + ts(8) + id(32)

/// The oldest-events query used for pruning never looks past this many rows,
/// matching the reference implementation's `get_prunable_events` cap.
pub const MAX_PRUNABLE_EVENTS: usize = 10_000;

// ---------------------------------------------------------------------------
// Stored record envelope
// ---------------------------------------------------------------------------

/// What actually lives behind an event id in `events_db`. `publisher` is the
/// connection's authenticated pubkey at write time (billing attribution);
/// it differs from `event.pubkey` whenever a client authenticates as one
/// identity and signs with another. `deleted` is a soft-delete flag: the
/// row (and its index entries) stay in place so storage accounting still
/// counts it, but `query_events` skips it.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    event: Event,
    publisher: PublicKey,
    deleted: bool,
}

// ---------------------------------------------------------------------------
// LmdbStore
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct LmdbStore {
    env: Arc<Env>,
    db_path: String,
    /// Primary store: EventId(32 bytes) → `StoredRecord` as JSON.
    events_db: Database<Bytes, Bytes>,
    // --- Secondary indices (key-only, value = Unit) ---
    /// Timestamp(BE 8) + EventId(32) = 40 bytes
    index_created: Database<Bytes, Unit>,
    /// Pubkey(32) + Timestamp(BE 8) + EventId(32) = 72 bytes, keyed by the
    /// event's signing pubkey.
    index_author: Database<Bytes, Unit>,
    /// Same layout as `index_author`, keyed by the billing `publisher`.
    index_publisher: Database<Bytes, Unit>,
    /// Kind(BE 2) + Timestamp(BE 8) + EventId(32) = 42 bytes
    index_kind: Database<Bytes, Unit>,
    /// TagKey + 0x00 + TagValue + 0x00 + Timestamp(BE 8) + EventId(32) (variable)
    index_tag: Database<Bytes, Unit>,
    /// Pubkey(32) + Kind(BE 2) + Timestamp(BE 8) + EventId(32) = 74 bytes
    index_author_kind: Database<Bytes, Unit>,
    /// Pubkey(32 bytes) → `Account` as JSON.
    accounts_db: Database<Bytes, Bytes>,
}

// ---------------------------------------------------------------------------
// Key encoding — stack-allocated for fixed-width indices
// ---------------------------------------------------------------------------

impl LmdbStore {
    #[inline]
    fn encode_created_key(event: &Event) -> [u8; CREATED_KEY_LEN] {
        let mut key = [0u8; CREATED_KEY_LEN];
        key[..8].copy_from_slice(&event.created_at.as_u64().to_be_bytes());
        key[8..40].copy_from_slice(event.id.as_bytes());
        key
    }

    /// Shared layout for `index_author`/`index_publisher`:
    /// pubkey(32) + timestamp(8) + event_id(32).
    #[inline]
    fn encode_pubkey_key(pubkey: &PublicKey, event: &Event) -> [u8; PUBKEY_KEY_LEN] {
        let mut key = [0u8; PUBKEY_KEY_LEN];
        key[..32].copy_from_slice(pubkey.to_bytes().as_ref());
        key[32..40].copy_from_slice(&event.created_at.as_u64().to_be_bytes());
        key[40..72].copy_from_slice(event.id.as_bytes());
        key
    }

    #[inline]
    fn encode_kind_key(event: &Event) -> [u8; KIND_KEY_LEN] {
        let mut key = [0u8; KIND_KEY_LEN];
        key[..2].copy_from_slice(&event.kind.as_u16().to_be_bytes());
        key[2..10].copy_from_slice(&event.created_at.as_u64().to_be_bytes());
        key[10..42].copy_from_slice(event.id.as_bytes());
        key
    }

    #[inline]
    fn encode_author_kind_key(event: &Event) -> [u8; AUTHOR_KIND_KEY_LEN] {
        let mut key = [0u8; AUTHOR_KIND_KEY_LEN];
        key[..32].copy_from_slice(event.pubkey.to_bytes().as_ref());
        key[32..34].copy_from_slice(&event.kind.as_u16().to_be_bytes());
        key[34..42].copy_from_slice(&event.created_at.as_u64().to_be_bytes());
        key[42..74].copy_from_slice(event.id.as_bytes());
        key
    }

    fn encode_tag_key(tag_key: &str, tag_val: &str, event: &Event) -> Vec<u8> {
        let mut key = Vec::with_capacity(tag_key.len() + 1 + tag_val.len() + 1 + 40);
        key.extend_from_slice(tag_key.as_bytes());
        key.push(0);
        key.extend_from_slice(tag_val.as_bytes());
        key.push(0);
        key.extend_from_slice(&event.created_at.as_u64().to_be_bytes());
        key.extend_from_slice(event.id.as_bytes());
        key
    }

    fn parse_pubkey(s: &str) -> Option<PublicKey> {
        PublicKey::from_str(s).or_else(|_| PublicKey::parse(s)).ok()
    }
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

impl LmdbStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        fs::create_dir_all(&path)?;

        let mut env_builder = EnvOpenOptions::new();
        env_builder.max_dbs(20);
        env_builder.map_size(10 * 1024 * 1024 * 1024); // 10 GB
        let env = unsafe { env_builder.open(&path)? };

        let mut wtxn = env.write_txn()?;
        let events_db = env.create_database(&mut wtxn, Some("events"))?;
        let index_created = env.create_database(&mut wtxn, Some("idx_created"))?;
        let index_author = env.create_database(&mut wtxn, Some("idx_author"))?;
        let index_publisher = env.create_database(&mut wtxn, Some("idx_publisher"))?;
        let index_kind = env.create_database(&mut wtxn, Some("idx_kind"))?;
        let index_tag = env.create_database(&mut wtxn, Some("idx_tag"))?;
        let index_author_kind = env.create_database(&mut wtxn, Some("idx_author_kind"))?;
        let accounts_db = env.create_database(&mut wtxn, Some("accounts"))?;
        wtxn.commit()?;

        Ok(Self {
            env: Arc::new(env),
            db_path: path.as_ref().to_string_lossy().into_owned(),
            events_db,
            index_created,
            index_author,
            index_publisher,
            index_kind,
            index_tag,
            index_author_kind,
            accounts_db,
        })
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

impl LmdbStore {
    /// Insert all index entries for an event inside an existing write txn.
    fn insert_indices(&self, wtxn: &mut RwTxn, event: &Event, publisher: &PublicKey) -> Result<()> {
        self.index_created
            .put(wtxn, &Self::encode_created_key(event), &())?;
        self.index_author
            .put(wtxn, &Self::encode_pubkey_key(&event.pubkey, event), &())?;
        self.index_publisher
            .put(wtxn, &Self::encode_pubkey_key(publisher, event), &())?;
        self.index_kind
            .put(wtxn, &Self::encode_kind_key(event), &())?;
        self.index_author_kind
            .put(wtxn, &Self::encode_author_kind_key(event), &())?;

        for tag in event.tags.iter() {
            let tag_vec = tag.as_vec();
            if tag_vec.len() >= 2 && tag_vec[0].len() == 1 {
                let tk = Self::encode_tag_key(&tag_vec[0], &tag_vec[1], event);
                self.index_tag.put(wtxn, &tk, &())?;
            }
        }
        Ok(())
    }

    /// Remove all index entries for a stored record inside an existing write txn.
    fn remove_indices(&self, wtxn: &mut RwTxn, record: &StoredRecord) -> Result<()> {
        let event = &record.event;
        self.index_created
            .delete(wtxn, &Self::encode_created_key(event))?;
        self.index_author
            .delete(wtxn, &Self::encode_pubkey_key(&event.pubkey, event))?;
        self.index_publisher
            .delete(wtxn, &Self::encode_pubkey_key(&record.publisher, event))?;
        self.index_kind
            .delete(wtxn, &Self::encode_kind_key(event))?;
        self.index_author_kind
            .delete(wtxn, &Self::encode_author_kind_key(event))?;

        for tag in event.tags.iter() {
            let tag_vec = tag.as_vec();
            if tag_vec.len() >= 2 && tag_vec[0].len() == 1 {
                let tk = Self::encode_tag_key(&tag_vec[0], &tag_vec[1], event);
                self.index_tag.delete(wtxn, &tk)?;
            }
        }
        Ok(())
    }

    /// Physically delete an event by ID within an existing write txn.
    /// Returns true if an event was found and removed.
    fn delete_event_txn(&self, wtxn: &mut RwTxn, id: &[u8; 32]) -> Result<bool> {
        let raw = match self.events_db.get(wtxn, id)? {
            Some(r) => r.to_vec(), // copy out before mutating
            None => return Ok(false),
        };
        let record: StoredRecord = serde_json::from_slice(&raw)?;
        self.remove_indices(wtxn, &record)?;
        self.events_db.delete(wtxn, id)?;
        Ok(true)
    }

    fn decode_record(raw: &[u8]) -> Result<StoredRecord> {
        Ok(serde_json::from_slice(raw)?)
    }

    /// Fetch an event by id, skipping it if it has been soft-deleted.
    fn load_live_event(&self, rtxn: &heed::RoTxn, id: &[u8]) -> Result<Option<Event>> {
        match self.events_db.get(rtxn, id)? {
            Some(raw) => {
                let record = Self::decode_record(raw)?;
                if record.deleted {
                    Ok(None)
                } else {
                    Ok(Some(record.event))
                }
            }
            None => Ok(None),
        }
    }

    /// `true` when a filter constrains nothing at all — used to refuse
    /// mass-delete/mass-mark operations. A filter limited only by `#d` is
    /// still a real constraint, so `generic_tags` participates here too.
    fn filter_is_empty(filter: &Filter) -> bool {
        filter.ids.is_none()
            && filter.authors.is_none()
            && filter.kinds.is_none()
            && filter.generic_tags.is_empty()
            && filter.since.is_none()
            && filter.until.is_none()
    }
}

// ---------------------------------------------------------------------------
// NostrStore implementation
// ---------------------------------------------------------------------------

impl NostrStore for LmdbStore {
    fn insert_event(&self, event: &Event, publisher: &PublicKey) -> Result<bool> {
        let mut wtxn = self.env.write_txn()?;

        let id_bytes = event.id.as_bytes();
        if self.events_db.get(&wtxn, id_bytes)?.is_some() {
            return Ok(false);
        }

        let record = StoredRecord {
            event: event.clone(),
            publisher: *publisher,
            deleted: false,
        };
        let raw = serde_json::to_vec(&record)?;
        self.events_db.put(&mut wtxn, id_bytes, &raw)?;
        self.insert_indices(&mut wtxn, event, publisher)?;

        wtxn.commit()?;
        Ok(true)
    }

    fn get_event(&self, id: &[u8; 32]) -> Result<Option<Event>> {
        let rtxn = self.env.read_txn()?;
        match self.events_db.get(&rtxn, id)? {
            Some(raw) => Ok(Some(Self::decode_record(raw)?.event)),
            None => Ok(None),
        }
    }

    fn mark_deleted(&self, id: &[u8; 32]) -> Result<bool> {
        let mut wtxn = self.env.write_txn()?;
        let raw = match self.events_db.get(&wtxn, id)? {
            Some(r) => r.to_vec(),
            None => return Ok(false),
        };
        let mut record = Self::decode_record(&raw)?;
        record.deleted = true;
        let updated = serde_json::to_vec(&record)?;
        self.events_db.put(&mut wtxn, id, &updated)?;
        wtxn.commit()?;
        Ok(true)
    }

    fn delete_events(&self, filter: &Filter) -> Result<u64> {
        if Self::filter_is_empty(filter) {
            return Ok(0);
        }
        let matching = self.query_events_ignoring_deleted(filter, usize::MAX)?;
        let mut wtxn = self.env.write_txn()?;
        let mut removed = 0u64;
        for event in &matching {
            if self.delete_event_txn(&mut wtxn, event.id.as_bytes())? {
                removed += 1;
            }
        }
        wtxn.commit()?;
        Ok(removed)
    }

    fn delete_all(&self) -> Result<u64> {
        let mut wtxn = self.env.write_txn()?;
        let count = self.events_db.len(&wtxn)?;
        self.events_db.clear(&mut wtxn)?;
        self.index_created.clear(&mut wtxn)?;
        self.index_author.clear(&mut wtxn)?;
        self.index_publisher.clear(&mut wtxn)?;
        self.index_kind.clear(&mut wtxn)?;
        self.index_tag.clear(&mut wtxn)?;
        self.index_author_kind.clear(&mut wtxn)?;
        wtxn.commit()?;
        Ok(count)
    }

    fn storage_used(&self, publisher: &PublicKey) -> Result<u64> {
        let rtxn = self.env.read_txn()?;
        let mut start = [0u8; PUBKEY_KEY_LEN];
        start[..32].copy_from_slice(publisher.to_bytes().as_ref());
        let mut end = [0xffu8; PUBKEY_KEY_LEN];
        end[..32].copy_from_slice(publisher.to_bytes().as_ref());
        let range = ByteRange::new(&start, &end);

        let mut total = 0u64;
        for result in self.index_publisher.range(&rtxn, &range)? {
            let (key, _) = result?;
            if key.len() < PUBKEY_KEY_LEN {
                continue;
            }
            let id_bytes = &key[40..72];
            if let Some(raw) = self.events_db.get(&rtxn, id_bytes)? {
                let record = Self::decode_record(raw)?;
                total += crate::model::size_bytes(&record.event);
            }
        }
        Ok(total)
    }

    fn oldest_events(&self, pubkey: &PublicKey, limit: usize) -> Result<Vec<([u8; 32], u64)>> {
        let rtxn = self.env.read_txn()?;
        let capped = limit.min(MAX_PRUNABLE_EVENTS);

        let mut start = [0u8; PUBKEY_KEY_LEN];
        start[..32].copy_from_slice(pubkey.to_bytes().as_ref());
        let mut end = [0xffu8; PUBKEY_KEY_LEN];
        end[..32].copy_from_slice(pubkey.to_bytes().as_ref());
        let range = ByteRange::new(&start, &end);

        let mut out = Vec::with_capacity(capped.min(256));
        for result in self.index_author.range(&rtxn, &range)? {
            let (key, _) = result?;
            if key.len() < PUBKEY_KEY_LEN {
                continue;
            }
            let id_bytes = &key[40..72];
            if let Some(raw) = self.events_db.get(&rtxn, id_bytes)? {
                let record = Self::decode_record(raw)?;
                let mut id = [0u8; 32];
                id.copy_from_slice(id_bytes);
                out.push((id, crate::model::size_bytes(&record.event)));
            }
            if out.len() >= capped {
                break;
            }
        }
        Ok(out)
    }

    fn get_account(&self, pubkey: &PublicKey) -> Result<Option<Account>> {
        let rtxn = self.env.read_txn()?;
        match self.accounts_db.get(&rtxn, pubkey.to_bytes().as_ref())? {
            Some(raw) => Ok(Some(serde_json::from_slice(raw)?)),
            None => Ok(None),
        }
    }

    fn upsert_account(&self, account: &Account) -> Result<()> {
        let pubkey = Self::parse_pubkey(&account.pubkey).ok_or_else(|| {
            crate::error::Error::Config(format!("invalid account pubkey: {}", account.pubkey))
        })?;
        let mut wtxn = self.env.write_txn()?;
        let raw = serde_json::to_vec(account)?;
        self.accounts_db.put(&mut wtxn, pubkey.to_bytes().as_ref(), &raw)?;
        wtxn.commit()?;
        Ok(())
    }

    fn list_accounts(&self) -> Result<Vec<Account>> {
        let rtxn = self.env.read_txn()?;
        let mut out = Vec::new();
        for result in self.accounts_db.iter(&rtxn)? {
            let (_, raw) = result?;
            out.push(serde_json::from_slice(raw)?);
        }
        Ok(out)
    }

    fn iter_all(&self) -> Result<Vec<Event>> {
        let rtxn = self.env.read_txn()?;
        let mut out = Vec::new();
        for result in self.events_db.iter(&rtxn)? {
            let (_, raw) = result?;
            let record = Self::decode_record(raw)?;
            if !record.deleted {
                out.push(record.event);
            }
        }
        Ok(out)
    }

    fn event_count(&self) -> Result<u64> {
        let rtxn = self.env.read_txn()?;
        Ok(self.events_db.len(&rtxn)?)
    }

    fn db_path(&self) -> &str {
        &self.db_path
    }

    fn query_events(&self, filter: &Filter) -> Result<Vec<Event>> {
        let limit = filter.limit.unwrap_or(100);
        self.query_events_ignoring_deleted(filter, limit)
    }
}

// ---------------------------------------------------------------------------
// Query implementation shared by `query_events` and `delete_events`
// ---------------------------------------------------------------------------

impl LmdbStore {
    fn query_events_ignoring_deleted(&self, filter: &Filter, limit: usize) -> Result<Vec<Event>> {
        let rtxn = self.env.read_txn()?;
        let since_ts = filter.since.map(|s| s.as_u64()).unwrap_or(0);
        let until_ts = filter.until.map(|u| u.as_u64().saturating_sub(1)).unwrap_or(u64::MAX);

        // -----------------------------------------------------------------
        // 1. ID lookup — most selective
        // -----------------------------------------------------------------
        if let Some(ids) = &filter.ids {
            let mut events = Vec::with_capacity(ids.len().min(limit.max(1)));
            for id in ids {
                if let Some(event) = self.load_live_event(&rtxn, id.as_bytes())? {
                    if self.event_matches_filter(&event, filter) {
                        events.push(event);
                    }
                }
            }
            events.sort_unstable_by(|a, b| b.created_at.cmp(&a.created_at));
            events.truncate(limit);
            return Ok(events);
        }

        let mut candidates: Vec<Event> = Vec::new();

        // -----------------------------------------------------------------
        // 2. Author + Kind compound index (most common Nostr query)
        // -----------------------------------------------------------------
        if let (Some(authors), Some(kinds)) = (&filter.authors, &filter.kinds) {
            for pubkey in authors {
                for kind in kinds {
                    self.scan_author_kind_index(
                        &rtxn, pubkey, kind, since_ts, until_ts, limit, filter, &mut candidates,
                    )?;
                }
            }
        }
        // -----------------------------------------------------------------
        // 3. Author index
        // -----------------------------------------------------------------
        else if let Some(authors) = &filter.authors {
            for pubkey in authors {
                self.scan_author_index(
                    &rtxn, pubkey, since_ts, until_ts, limit, filter, &mut candidates,
                )?;
            }
        }
        // -----------------------------------------------------------------
        // 4. Kind index
        // -----------------------------------------------------------------
        else if let Some(kinds) = &filter.kinds {
            for kind in kinds {
                self.scan_kind_index(&rtxn, kind, since_ts, until_ts, limit, filter, &mut candidates)?;
            }
        }
        // -----------------------------------------------------------------
        // 5. Tag index
        // -----------------------------------------------------------------
        else if !filter.generic_tags.is_empty() {
            if let Some((tag_char, values)) = filter.generic_tags.iter().next() {
                let tc = tag_char.to_string();
                for value in values {
                    self.scan_tag_index(
                        &rtxn, &tc, value, since_ts, until_ts, limit, filter, &mut candidates,
                    )?;
                }
            }
        }
        // -----------------------------------------------------------------
        // 6. Global scan (index_created)
        // -----------------------------------------------------------------
        else {
            self.scan_created_index(&rtxn, since_ts, until_ts, limit, filter, &mut candidates)?;
        }

        candidates.sort_unstable_by(|a, b| b.created_at.cmp(&a.created_at));
        candidates.truncate(limit);
        Ok(candidates)
    }
}

// ---------------------------------------------------------------------------
// Query scan helpers — each seeks directly to the `until` boundary
// Uses rev_range for reverse iteration (heed 0.20 API)
// ---------------------------------------------------------------------------

impl LmdbStore {
    fn scan_author_kind_index(
        &self,
        rtxn: &heed::RoTxn,
        pubkey: &PublicKey,
        kind: &Kind,
        since_ts: u64,
        until_ts: u64,
        limit: usize,
        filter: &Filter,
        candidates: &mut Vec<Event>,
    ) -> Result<()> {
        let mut start = [0u8; AUTHOR_KIND_KEY_LEN];
        start[..32].copy_from_slice(pubkey.to_bytes().as_ref());
        start[32..34].copy_from_slice(&kind.as_u16().to_be_bytes());
        start[34..42].copy_from_slice(&since_ts.to_be_bytes());

        let mut end = [0xffu8; AUTHOR_KIND_KEY_LEN];
        end[..32].copy_from_slice(pubkey.to_bytes().as_ref());
        end[32..34].copy_from_slice(&kind.as_u16().to_be_bytes());
        end[34..42].copy_from_slice(&until_ts.to_be_bytes());

        let range = ByteRange::new(&start, &end);
        let iter = self.index_author_kind.rev_range(rtxn, &range)?;
        let mut count = 0;

        for result in iter {
            let (key, _) = result?;
            if key.len() < AUTHOR_KIND_KEY_LEN {
                continue;
            }
            let id_bytes = &key[42..74];
            if let Some(event) = self.load_live_event(rtxn, id_bytes)? {
                if self.event_matches_tags_only(&event, filter) {
                    candidates.push(event);
                    count += 1;
                }
            }
            if count >= limit {
                break;
            }
        }
        Ok(())
    }

    fn scan_author_index(
        &self,
        rtxn: &heed::RoTxn,
        pubkey: &PublicKey,
        since_ts: u64,
        until_ts: u64,
        limit: usize,
        filter: &Filter,
        candidates: &mut Vec<Event>,
    ) -> Result<()> {
        let mut start = [0u8; PUBKEY_KEY_LEN];
        start[..32].copy_from_slice(pubkey.to_bytes().as_ref());
        start[32..40].copy_from_slice(&since_ts.to_be_bytes());

        let mut end = [0xffu8; PUBKEY_KEY_LEN];
        end[..32].copy_from_slice(pubkey.to_bytes().as_ref());
        end[32..40].copy_from_slice(&until_ts.to_be_bytes());

        let range = ByteRange::new(&start, &end);
        let iter = self.index_author.rev_range(rtxn, &range)?;
        let mut count = 0;

        for result in iter {
            let (key, _) = result?;
            if key.len() < PUBKEY_KEY_LEN {
                continue;
            }
            let id_bytes = &key[40..72];
            if let Some(event) = self.load_live_event(rtxn, id_bytes)? {
                if self.event_matches_no_author(&event, filter) {
                    candidates.push(event);
                    count += 1;
                }
            }
            if count >= limit {
                break;
            }
        }
        Ok(())
    }

    fn scan_kind_index(
        &self,
        rtxn: &heed::RoTxn,
        kind: &Kind,
        since_ts: u64,
        until_ts: u64,
        limit: usize,
        filter: &Filter,
        candidates: &mut Vec<Event>,
    ) -> Result<()> {
        let mut start = [0u8; KIND_KEY_LEN];
        start[..2].copy_from_slice(&kind.as_u16().to_be_bytes());
        start[2..10].copy_from_slice(&since_ts.to_be_bytes());

        let mut end = [0xffu8; KIND_KEY_LEN];
        end[..2].copy_from_slice(&kind.as_u16().to_be_bytes());
        end[2..10].copy_from_slice(&until_ts.to_be_bytes());

        let range = ByteRange::new(&start, &end);
        let iter = self.index_kind.rev_range(rtxn, &range)?;
        let mut count = 0;

        for result in iter {
            let (key, _) = result?;
            if key.len() < KIND_KEY_LEN {
                continue;
            }
            let id_bytes = &key[10..42];
            if let Some(event) = self.load_live_event(rtxn, id_bytes)? {
                if self.event_matches_no_kind(&event, filter) {
                    candidates.push(event);
                    count += 1;
                }
            }
            if count >= limit {
                break;
            }
        }
        Ok(())
    }

    fn scan_tag_index(
        &self,
        rtxn: &heed::RoTxn,
        tag_key: &str,
        tag_val: &str,
        since_ts: u64,
        until_ts: u64,
        limit: usize,
        filter: &Filter,
        candidates: &mut Vec<Event>,
    ) -> Result<()> {
        let mut start = Vec::with_capacity(tag_key.len() + 1 + tag_val.len() + 1 + 40);
        start.extend_from_slice(tag_key.as_bytes());
        start.push(0);
        start.extend_from_slice(tag_val.as_bytes());
        start.push(0);
        start.extend_from_slice(&since_ts.to_be_bytes());
        start.extend_from_slice(&[0u8; 32]);

        let mut end = Vec::with_capacity(tag_key.len() + 1 + tag_val.len() + 1 + 40);
        end.extend_from_slice(tag_key.as_bytes());
        end.push(0);
        end.extend_from_slice(tag_val.as_bytes());
        end.push(0);
        end.extend_from_slice(&until_ts.to_be_bytes());
        end.extend_from_slice(&[0xffu8; 32]);

        let range = ByteRange::new(&start, &end);
        let iter = self.index_tag.rev_range(rtxn, &range)?;
        let mut count = 0;

        for result in iter {
            let (key, _) = result?;
            if key.len() < 40 {
                continue;
            }
            let id_bytes = &key[key.len() - 32..];
            if let Some(event) = self.load_live_event(rtxn, id_bytes)? {
                if self.event_matches_filter(&event, filter) {
                    candidates.push(event);
                    count += 1;
                }
            }
            if count >= limit {
                break;
            }
        }
        Ok(())
    }

    fn scan_created_index(
        &self,
        rtxn: &heed::RoTxn,
        since_ts: u64,
        until_ts: u64,
        limit: usize,
        filter: &Filter,
        candidates: &mut Vec<Event>,
    ) -> Result<()> {
        let mut start = [0u8; CREATED_KEY_LEN];
        start[..8].copy_from_slice(&since_ts.to_be_bytes());

        let mut end = [0xffu8; CREATED_KEY_LEN];
        end[..8].copy_from_slice(&until_ts.to_be_bytes());

        let range = ByteRange::new(&start, &end);
        let iter = self.index_created.rev_range(rtxn, &range)?;
        let mut count = 0;

        for result in iter {
            let (key, _) = result?;
            if key.len() < CREATED_KEY_LEN {
                continue;
            }
            let id_bytes = &key[8..40];
            if let Some(event) = self.load_live_event(rtxn, id_bytes)? {
                if self.event_matches_filter(&event, filter) {
                    candidates.push(event);
                    count += 1;
                }
            }
            if count >= limit {
                break;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Filter matching — targeted variants that skip the indexed dimension
// ---------------------------------------------------------------------------

impl LmdbStore {
    /// Full filter match (used when no index dimension can be skipped).
    /// `until` is exclusive: an event with `created_at == until` is rejected.
    fn event_matches_filter(&self, event: &Event, filter: &Filter) -> bool {
        if let Some(ids) = &filter.ids {
            if !ids.contains(&event.id) {
                return false;
            }
        }
        if let Some(kinds) = &filter.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if let Some(authors) = &filter.authors {
            if !authors.contains(&event.pubkey) {
                return false;
            }
        }
        if let Some(since) = filter.since {
            if event.created_at < since {
                return false;
            }
        }
        if let Some(until) = filter.until {
            if event.created_at >= until {
                return false;
            }
        }
        self.check_tags(event, filter)
    }

    /// Skips author check (used when scanning author index).
    fn event_matches_no_author(&self, event: &Event, filter: &Filter) -> bool {
        if let Some(kinds) = &filter.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        self.check_tags(event, filter)
    }

    /// Skips kind check (used when scanning kind index).
    fn event_matches_no_kind(&self, event: &Event, filter: &Filter) -> bool {
        if let Some(authors) = &filter.authors {
            if !authors.contains(&event.pubkey) {
                return false;
            }
        }
        self.check_tags(event, filter)
    }

    /// Skips author + kind + time checks (compound author_kind index with time in range).
    fn event_matches_tags_only(&self, event: &Event, filter: &Filter) -> bool {
        self.check_tags(event, filter)
    }

    /// Check generic_tags portion of the filter.
    fn check_tags(&self, event: &Event, filter: &Filter) -> bool {
        for (tag_char, allowed_values) in &filter.generic_tags {
            let char_key = tag_char.to_string();
            let mut found = false;
            for t in &event.tags {
                let t_vec = t.as_vec();
                if t_vec.len() >= 2 && t_vec[0] == char_key && allowed_values.contains(&t_vec[1]) {
                    found = true;
                    break;
                }
            }
            if !found {
                return false;
            }
        }
        true
    }
}
