//! Per-pubkey billing/storage ledger. Accounts are orthogonal to the
//! `nostr::Keys` identity system: a relay tracks one row per pubkey it has
//! ever seen money or storage usage from, independent of whether that pubkey
//! currently holds a live connection.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub pubkey: String,
    #[serde(default)]
    pub allowed: bool,
    #[serde(default)]
    pub blocked: bool,
    #[serde(default)]
    pub sats: i64,
    #[serde(default)]
    pub storage: u64,
    #[serde(default)]
    pub paid_to_join: bool,
}

impl Account {
    pub fn new(pubkey: impl Into<String>) -> Self {
        Account {
            pubkey: pubkey.into(),
            allowed: false,
            blocked: false,
            sats: 0,
            storage: 0,
            paid_to_join: false,
        }
    }

    /// An explicitly allow-listed account does not need to have paid.
    pub fn can_join(&self) -> bool {
        self.paid_to_join || self.allowed
    }
}
