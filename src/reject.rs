use std::fmt;

/// Closed sum type for every reason a write or an AUTH attempt can be turned
/// down. Replaces the ad-hoc string concatenation the reference
/// implementation built its `OK`/`NOTICE` messages from — the wire string is
/// purely a formatting concern, handled by `Display` here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Bad event id, bad signature, or malformed AUTH tag values.
    Invalid(String),
    /// Auth required for this kind, for this filter, or a failed AUTH attempt.
    Restricted(String),
    /// Pubkey blocked, either by account flag or by the admission policy.
    Blocked(String),
    /// Relay requires payment to join and the account has not paid/been allowed.
    PaidRelayNoAccess,
    /// Per-connection events-this-hour counter exceeded.
    RateLimitExceeded,
    /// `created_at` older than the relay's configured past window.
    TooOld,
    /// `created_at` further in the future than the relay's configured window.
    TooFarFuture,
    /// Account's available storage would be exceeded and pruning does not help.
    NoStorage,
    /// A single event exceeds the account's entire available storage.
    TooLarge,
    /// Relay has no free storage and is not a paid relay.
    ReadOnly,
    /// Catch-all persistence failure.
    Error(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Invalid(detail) => write!(f, "invalid: {detail}"),
            RejectReason::Restricted(detail) if detail.is_empty() => write!(f, "restricted"),
            RejectReason::Restricted(detail) => write!(f, "restricted: {detail}"),
            RejectReason::Blocked(detail) if detail.is_empty() => write!(f, "blocked"),
            RejectReason::Blocked(detail) => write!(f, "blocked: {detail}"),
            RejectReason::PaidRelayNoAccess => write!(f, "paid-relay-no-access"),
            RejectReason::RateLimitExceeded => write!(f, "rate-limit-exceeded"),
            RejectReason::TooOld => write!(f, "too-old"),
            RejectReason::TooFarFuture => write!(f, "too-far-future"),
            RejectReason::NoStorage => write!(f, "no-storage"),
            RejectReason::TooLarge => write!(f, "too-large"),
            RejectReason::ReadOnly => write!(f, "read-only"),
            RejectReason::Error(detail) => write!(f, "error: {detail}"),
        }
    }
}

impl RejectReason {
    pub fn blocked(detail: impl Into<String>) -> Self {
        RejectReason::Blocked(detail.into())
    }

    pub fn restricted(detail: impl Into<String>) -> Self {
        RejectReason::Restricted(detail.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_formats_with_detail() {
        assert_eq!(
            RejectReason::Invalid("bad signature".into()).to_string(),
            "invalid: bad signature"
        );
    }

    #[test]
    fn restricted_bare_has_no_colon() {
        assert_eq!(RejectReason::restricted("").to_string(), "restricted");
    }

    #[test]
    fn restricted_with_detail() {
        assert_eq!(
            RejectReason::restricted("kind 4 requires auth").to_string(),
            "restricted: kind 4 requires auth"
        );
    }

    #[test]
    fn fixed_tokens_match_spec_wording() {
        assert_eq!(RejectReason::PaidRelayNoAccess.to_string(), "paid-relay-no-access");
        assert_eq!(RejectReason::RateLimitExceeded.to_string(), "rate-limit-exceeded");
        assert_eq!(RejectReason::TooOld.to_string(), "too-old");
        assert_eq!(RejectReason::TooFarFuture.to_string(), "too-far-future");
        assert_eq!(RejectReason::NoStorage.to_string(), "no-storage");
        assert_eq!(RejectReason::TooLarge.to_string(), "too-large");
        assert_eq!(RejectReason::ReadOnly.to_string(), "read-only");
    }

    #[test]
    fn error_formats_with_detail() {
        assert_eq!(
            RejectReason::Error("event already exists".into()).to_string(),
            "error: event already exists"
        );
    }

    #[test]
    fn blocked_bare_has_no_colon() {
        assert_eq!(RejectReason::blocked("").to_string(), "blocked");
    }
}
