//! Kind-class predicates and canonical-encoding helpers that sit directly on
//! top of the `nostr` crate's wire types.

use nostr::{Event, Filter, Kind};

/// `0, 3, 41` and `10000 <= k < 20000` supersede prior events with the same
/// `(pubkey, kind)`.
pub fn is_replaceable(kind: &Kind) -> bool {
    let k = kind.as_u16();
    k == 0 || k == 3 || k == 41 || (10_000..20_000).contains(&k)
}

/// `20000 <= k < 30000`: broadcast only, never persisted.
pub fn is_ephemeral(kind: &Kind) -> bool {
    (20_000..30_000).contains(&kind.as_u16())
}

/// `k == 5`: marks referenced events as deleted.
pub fn is_delete_event(kind: &Kind) -> bool {
    kind.as_u16() == 5
}

/// `k == 22242`: NIP-42 auth response.
pub fn is_auth_response_event(kind: &Kind) -> bool {
    kind.as_u16() == 22242
}

/// `k == 4`: direct message, subject to recipient-only filtering.
pub fn is_direct_message(kind: &Kind) -> bool {
    kind.as_u16() == 4
}

/// `1000 <= k < 10000`: ordinary persisted event.
pub fn is_regular_event(kind: &Kind) -> bool {
    (1_000..10_000).contains(&kind.as_u16())
}

/// Byte length of the event's canonical wire JSON
/// (`id, pubkey, created_at, kind, tags, content, sig`).
pub fn size_bytes(event: &Event) -> u64 {
    serde_json::to_vec(event).map(|v| v.len() as u64).unwrap_or(0)
}

/// Extract the host from a `relay` tag value for NIP-42 domain validation.
/// Ignores scheme, port, and path; comparison with `config.domain` is
/// case-insensitive host matching, performed by the caller.
pub fn extract_domain(relay_tag_value: &str) -> Option<String> {
    url::Url::parse(relay_tag_value)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

/// Find the first tag named `#d` (NIP-01 replaceable discriminator).
pub fn d_tag(event: &Event) -> Option<String> {
    event.tags.iter().find_map(|t| {
        let v = t.as_vec();
        if v.len() >= 2 && v[0] == "d" {
            Some(v[1].clone())
        } else {
            None
        }
    })
}

/// Collect the values of every `e` tag (event references, used by delete
/// events and by `#e` filters).
pub fn e_tag_values(event: &Event) -> Vec<String> {
    event
        .tags
        .iter()
        .filter_map(|t| {
            let v = t.as_vec();
            if v.len() >= 2 && v[0] == "e" {
                Some(v[1].clone())
            } else {
                None
            }
        })
        .collect()
}

/// Collect the values of every `p` tag (addressed-recipient pubkeys).
pub fn p_tag_values(event: &Event) -> Vec<String> {
    event
        .tags
        .iter()
        .filter_map(|t| {
            let v = t.as_vec();
            if v.len() >= 2 && v[0] == "p" {
                Some(v[1].clone())
            } else {
                None
            }
        })
        .collect()
}

/// Does `event` satisfy every specified field of `filter`? Unset list
/// fields are unconstrained; `since` is inclusive, `until` exclusive
/// (locked). Used by the live-broadcast matcher in `connection.rs`; the
/// storage layer's query path reimplements this per index for performance
/// but must agree with it exactly.
pub fn filter_matches(event: &Event, filter: &Filter) -> bool {
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
    for (tag_char, allowed_values) in &filter.generic_tags {
        let key = tag_char.to_string();
        let found = event.tags.iter().any(|t| {
            let v = t.as_vec();
            v.len() >= 2 && v[0] == key && allowed_values.contains(&v[1])
        });
        if !found {
            return false;
        }
    }
    true
}
