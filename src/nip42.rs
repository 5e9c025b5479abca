//! NIP-42 relay authentication: challenge issuance/rotation and validation of
//! the client's kind-22242 response.

use crate::model::extract_domain;
use nostr::Event;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

const CHALLENGE_TTL_SECS: u64 = 300;
const CHALLENGE_SUFFIX_LEN: usize = 16;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Per-connection auth challenge state, mirroring the reference
/// implementation's lazily-rotated `relay_id + ":" + random` token.
#[derive(Debug)]
pub struct AuthChallenge {
    relay_id: String,
    challenge: Option<String>,
    created_at: u64,
}

impl AuthChallenge {
    pub fn new(relay_id: impl Into<String>) -> Self {
        Self {
            relay_id: relay_id.into(),
            challenge: None,
            created_at: 0,
        }
    }

    fn expired(&self) -> bool {
        self.challenge.is_none() || now_secs().saturating_sub(self.created_at) >= CHALLENGE_TTL_SECS
    }

    /// The active challenge, minting a fresh one if the previous value is
    /// absent or at least 300s old.
    pub fn current(&mut self) -> &str {
        if self.expired() {
            let suffix: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(CHALLENGE_SUFFIX_LEN)
                .map(char::from)
                .collect();
            self.challenge = Some(format!("{}:{}", self.relay_id, suffix));
            self.created_at = now_secs();
        }
        self.challenge.as_deref().unwrap()
    }
}

fn tag_value<'a>(event: &'a Event, name: &str) -> Vec<&'a str> {
    event
        .tags
        .iter()
        .filter_map(|t| {
            let v = t.as_vec();
            if v.len() >= 2 && v[0] == name {
                Some(v[1].as_str())
            } else {
                None
            }
        })
        .collect()
}

/// Validate a kind-22242 AUTH response: exactly one `relay` tag whose host
/// matches `domain` (case-insensitive, ignoring scheme/port/path) and
/// exactly one `challenge` tag equal to `expected_challenge`.
pub fn validate_auth_event(event: &Event, domain: &str, expected_challenge: &str) -> Result<(), String> {
    let relay_tags = tag_value(event, "relay");
    if relay_tags.len() != 1 {
        return Err("must carry exactly one relay tag".into());
    }
    let challenge_tags = tag_value(event, "challenge");
    if challenge_tags.len() != 1 {
        return Err("must carry exactly one challenge tag".into());
    }

    let event_domain = extract_domain(relay_tags[0]).ok_or_else(|| "invalid relay tag value".to_string())?;
    if !event_domain.eq_ignore_ascii_case(domain) {
        return Err("relay tag does not match this relay's domain".into());
    }

    if challenge_tags[0] != expected_challenge {
        return Err("challenge does not match".into());
    }

    Ok(())
}
