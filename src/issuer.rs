//! Issuer Resolver — host-to-issuer mapping and trust classification.
//!
//! A single deployment binds its token issuer dynamically to the hostname
//! a request arrived on, so one process can act as several logical issuers.

use crate::config::Settings;

/// Trust classification for an issuer URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuerClass {
    /// This deployment's own issuer.
    Local,
    /// A known-good third-party issuer from the allow-list.
    Official,
    /// Anything else.
    Foreign,
}

/// Strip a `:port` suffix from a host header value.
fn strip_port(host: &str) -> &str {
    host.split(':').next().unwrap_or(host)
}

/// Resolve the issuer URL a request should be treated as having arrived
/// under, given its `Host` header.
///
/// If the host (port stripped) contains the configured base domain as a
/// substring, the issuer tracks the request's own host; otherwise it falls
/// back to the configured base domain.
pub fn resolve_for_request(host_header: &str, settings: &Settings) -> String {
    let host = strip_port(host_header);
    if host.contains(settings.base_domain()) {
        format!("https://{host}")
    } else {
        format!("https://{}", settings.base_domain())
    }
}

/// Host a bearer token's `iss` claim resolves to, for comparison against
/// the request's own `Host` header.
fn issuer_host(issuer_url: &str) -> &str {
    let host = issuer_url
        .strip_prefix("https://")
        .or_else(|| issuer_url.strip_prefix("http://"))
        .unwrap_or(issuer_url);
    strip_port(host)
}

/// `true` when a bearer token's `iss` host disagrees with the request's
/// own `Host` header — callers should respond `307` to the token's issuer
/// instead of processing the request locally.
pub fn issuer_mismatch(bearer_iss: &str, host_header: &str) -> bool {
    issuer_host(bearer_iss) != strip_port(host_header)
}

/// Classify an issuer URL's trust level relative to configuration.
pub fn classify(issuer_url: &str, settings: &Settings) -> IssuerClass {
    let host = issuer_url
        .strip_prefix("https://")
        .or_else(|| issuer_url.strip_prefix("http://"))
        .unwrap_or(issuer_url);
    let host = strip_port(host);

    if settings.local_hosts().iter().any(|h| h == host) {
        IssuerClass::Local
    } else if settings.official_issuers().iter().any(|i| {
        let official_host = i
            .strip_prefix("https://")
            .or_else(|| i.strip_prefix("http://"))
            .unwrap_or(i);
        strip_port(official_host) == host
    }) {
        IssuerClass::Official
    } else {
        IssuerClass::Foreign
    }
}
