//! Throttling key derivation.

use axum::http::HeaderMap;
use std::fmt;
use std::net::IpAddr;

use super::policy::KeyStrategy;

/// A verified principal, attached to the request as an extension by the
/// authentication layer in front of this subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Stable principal identifier issued by the identity provider
    pub id: String,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// A throttling bucket identifier.
///
/// Format: `"{scope}:{identifier}"` with scope `user` or `ip`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThrottleKey(String);

impl ThrottleKey {
    /// Key for an authenticated principal.
    pub fn user(id: &str) -> Self {
        Self(format!("user:{}", id))
    }

    /// Key for a caller network address.
    pub fn ip(addr: &str) -> Self {
        Self(format!("ip:{}", addr))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThrottleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Derive the throttling key for a request under the given strategy.
///
/// Identity-keyed policies degrade to origin keying when no principal is
/// present; a key is always produced.
pub fn derive_key(
    strategy: KeyStrategy,
    principal: Option<&Principal>,
    headers: &HeaderMap,
    peer_addr: Option<IpAddr>,
    forwarded_header: &str,
) -> ThrottleKey {
    if strategy == KeyStrategy::Identity {
        if let Some(principal) = principal {
            return ThrottleKey::user(&principal.id);
        }
    }

    match caller_address(headers, peer_addr, forwarded_header) {
        Some(addr) => ThrottleKey::ip(&addr),
        None => ThrottleKey::ip("unknown"),
    }
}

/// Extract the caller network address.
///
/// The trusted forwarding header wins when it carries a parseable address
/// (first comma-separated entry, trimmed); the transport peer address is
/// the fallback, so a caller cannot evade limits by omitting the header.
pub fn caller_address(
    headers: &HeaderMap,
    peer_addr: Option<IpAddr>,
    forwarded_header: &str,
) -> Option<String> {
    if let Some(value) = headers.get(forwarded_header) {
        if let Ok(raw) = value.to_str() {
            let first = raw.split(',').next().unwrap_or(raw).trim();
            if let Ok(ip) = first.parse::<IpAddr>() {
                return Some(ip.to_string());
            }
        }
    }

    peer_addr.map(|ip| ip.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const FORWARDED: &str = "x-forwarded-for";

    fn peer() -> Option<IpAddr> {
        Some("192.0.2.7".parse().unwrap())
    }

    #[test]
    fn test_identity_strategy_uses_principal() {
        let principal = Principal::new("user-841");
        let key = derive_key(
            KeyStrategy::Identity,
            Some(&principal),
            &HeaderMap::new(),
            peer(),
            FORWARDED,
        );

        assert_eq!(key.as_str(), "user:user-841");
    }

    #[test]
    fn test_identity_strategy_degrades_to_origin() {
        let key = derive_key(
            KeyStrategy::Identity,
            None,
            &HeaderMap::new(),
            peer(),
            FORWARDED,
        );

        assert_eq!(key.as_str(), "ip:192.0.2.7");
    }

    #[test]
    fn test_origin_strategy_ignores_principal() {
        let principal = Principal::new("user-841");
        let key = derive_key(
            KeyStrategy::Origin,
            Some(&principal),
            &HeaderMap::new(),
            peer(),
            FORWARDED,
        );

        assert_eq!(key.as_str(), "ip:192.0.2.7");
    }

    #[test]
    fn test_forwarded_header_first_entry_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(
            FORWARDED,
            HeaderValue::from_static(" 203.0.113.9 , 10.0.0.2, 10.0.0.3"),
        );

        let key = derive_key(KeyStrategy::Origin, None, &headers, peer(), FORWARDED);
        assert_eq!(key.as_str(), "ip:203.0.113.9");
    }

    #[test]
    fn test_unparseable_forwarded_header_falls_back_to_peer() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED, HeaderValue::from_static("not-an-address"));

        let key = derive_key(KeyStrategy::Origin, None, &headers, peer(), FORWARDED);
        assert_eq!(key.as_str(), "ip:192.0.2.7");
    }

    #[test]
    fn test_no_address_at_all_uses_unknown_bucket() {
        let key = derive_key(KeyStrategy::Origin, None, &HeaderMap::new(), None, FORWARDED);
        assert_eq!(key.as_str(), "ip:unknown");
    }
}
