use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoarConfig {
    pub domain: String,
    pub port: u16,
    /// Hex pubkey of the admin allowed to access the admin UI.
    /// Only this pubkey can log in via NIP-98 auth.
    pub admin_pubkey: String,
    /// Directory for custom relay home pages (default: "pages").
    /// Each relay can have a `{relay_id}.html` file in this directory.
    #[serde(default = "default_pages_dir")]
    pub pages_dir: String,
    pub relays: HashMap<String, RelayConfig>,
}

fn default_pages_dir() -> String {
    "pages".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub name: String,
    pub description: Option<String>,
    pub subdomain: String,
    pub db_path: String,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub nip11: Nip11Config,

    /// `0` disables the max-filters-per-connection check.
    #[serde(default)]
    pub max_client_filters: u32,
    /// `limit` clamp applied to every filter, in addition to NIP-11's
    /// `max_limit`/`default_limit`.
    #[serde(default = "default_limit_per_filter")]
    pub limit_per_filter: u64,
    /// Per-connection events-per-hour ceiling; `0` disables the check.
    #[serde(default)]
    pub max_events_per_hour: u32,
    /// How many seconds into the past `created_at` may be, relative to now.
    /// `0` disables the lower-bound check.
    #[serde(default)]
    pub created_at_in_past: i64,
    /// How many seconds into the future `created_at` may be, relative to now.
    /// `0` disables the upper-bound check.
    #[serde(default)]
    pub created_at_in_future: i64,
    #[serde(default = "default_free_storage_value")]
    pub free_storage_value: u64,
    #[serde(default = "default_free_storage_unit")]
    pub free_storage_unit: String,
    #[serde(default)]
    pub full_storage_action: FullStorageAction,
    #[serde(default)]
    pub is_paid_relay: bool,
    #[serde(default)]
    pub cost_to_join: u64,
    #[serde(default)]
    pub storage_cost_value: u64,
    #[serde(default = "default_free_storage_unit")]
    pub storage_cost_unit: String,
    #[serde(default)]
    pub require_auth_events: bool,
    #[serde(default)]
    pub skipped_auth_events: Vec<u16>,
    #[serde(default)]
    pub forced_auth_events: Vec<u16>,
    #[serde(default)]
    pub require_auth_filter: bool,
    /// Domain this relay answers to, used to validate the NIP-42 `relay`
    /// tag. Falls back to `MoarConfig::domain` when empty.
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub wallet: String,
}

fn default_limit_per_filter() -> u64 {
    1000
}

fn default_free_storage_value() -> u64 {
    1
}

fn default_free_storage_unit() -> String {
    "MB".to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FullStorageAction {
    #[default]
    Prune,
    Block,
}

impl RelayConfig {
    /// If `require_auth_events`, auth is required for every kind except
    /// those listed in `skipped_auth_events`; otherwise auth is required
    /// only for kinds listed in `forced_auth_events`.
    pub fn event_requires_auth(&self, kind: u16) -> bool {
        if self.require_auth_events {
            !self.skipped_auth_events.contains(&kind)
        } else {
            self.forced_auth_events.contains(&kind)
        }
    }

    /// `free_storage_value` is always multiplied by 1024; an additional
    /// 1024 multiplier applies only when the unit is exactly `"MB"`
    /// (case-sensitive) — any other unit, including `"mb"` or an absent
    /// one, is KB.
    pub fn free_storage_bytes_value(&self) -> u64 {
        let mut value = self.free_storage_value * 1024;
        if self.free_storage_unit == "MB" {
            value *= 1024;
        }
        value
    }

    pub fn is_read_only_relay(&self) -> bool {
        self.free_storage_bytes_value() == 0 && !self.is_paid_relay
    }
}

/// Optional NIP-11 relay information fields and limit overrides.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Nip11Config {
    pub icon: Option<String>,
    pub banner: Option<String>,
    pub contact: Option<String>,
    pub terms_of_service: Option<String>,
    pub max_message_length: Option<u64>,
    pub max_subscriptions: Option<u64>,
    pub max_subid_length: Option<u64>,
    pub max_limit: Option<u64>,
    pub max_event_tags: Option<u64>,
    pub default_limit: Option<u64>,
    pub created_at_lower_limit: Option<u64>,
    pub created_at_upper_limit: Option<u64>,
}

/// Composable policy configuration — every field is optional and defaults to
/// the most permissive value.  Users only specify what they want to restrict.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PolicyConfig {
    #[serde(default)]
    pub write: WritePolicy,
    #[serde(default)]
    pub read: ReadPolicy,
    #[serde(default)]
    pub events: EventPolicy,
    pub rate_limit: Option<RateLimitConfig>,
}

/// Controls who is allowed to publish events (EVENT messages).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WritePolicy {
    /// If true, the client must complete NIP-42 AUTH before sending EVENTs.
    #[serde(default)]
    pub require_auth: bool,
    /// If set, only these pubkeys may write.  `None` = anyone can write.
    pub allowed_pubkeys: Option<Vec<String>>,
    /// If set, these pubkeys are explicitly blocked from writing.
    pub blocked_pubkeys: Option<Vec<String>>,
    /// If set, events are only accepted if they contain a `p` tag referencing
    /// one of these pubkeys.  Useful for inbox/DM relays.
    pub tagged_pubkeys: Option<Vec<String>>,
}

impl Default for WritePolicy {
    fn default() -> Self {
        Self {
            require_auth: false,
            allowed_pubkeys: None,
            blocked_pubkeys: None,
            tagged_pubkeys: None,
        }
    }
}

/// Controls who is allowed to query events (REQ messages).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadPolicy {
    /// If true, the client must complete NIP-42 AUTH before sending REQs.
    #[serde(default)]
    pub require_auth: bool,
    /// If set, only these pubkeys may read.  `None` = anyone can read.
    pub allowed_pubkeys: Option<Vec<String>>,
}

impl Default for ReadPolicy {
    fn default() -> Self {
        Self {
            require_auth: false,
            allowed_pubkeys: None,
        }
    }
}

/// Controls which events are accepted based on their content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPolicy {
    /// If set, only these event kinds are accepted.
    pub allowed_kinds: Option<Vec<u64>>,
    /// If set, these event kinds are rejected.
    pub blocked_kinds: Option<Vec<u64>>,
    /// Minimum proof-of-work difficulty bits required (NIP-13).
    pub min_pow: Option<u8>,
    /// Maximum `content` field length in bytes.
    pub max_content_length: Option<usize>,
}

impl Default for EventPolicy {
    fn default() -> Self {
        Self {
            allowed_kinds: None,
            blocked_kinds: None,
            min_pow: None,
            max_content_length: None,
        }
    }
}

/// Per-relay rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub writes_per_minute: Option<u32>,
    pub reads_per_minute: Option<u32>,
    /// Max simultaneous WebSocket connections from a single IP.
    #[serde(default)]
    pub max_connections: Option<u32>,
}
