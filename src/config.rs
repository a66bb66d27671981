//! Service configuration derived from environment variables.
//!
//! Configuration is loaded once at startup and validated before the
//! service starts.
//!
//! ## Environment Variables
//!
//! - `AUTH_BASE_DOMAIN`: base domain this issuer federates under (required)
//! - `AUTH_DB_PATH`: path to the ReDB database file
//! - `AUTH_SESSION_TTL_SECS`: session/grant/access token lifetime
//! - `AUTH_JWKS_CACHE_TTL_SECS`: foreign key cache TTL
//! - `AUTH_JWKS_NEGATIVE_CACHE_SECS`: how long a failed foreign fetch is
//!   remembered before being retried
//! - `AUTH_JWKS_FETCH_TIMEOUT_MS`: outbound JWKS fetch timeout
//! - `AUTH_ACCEPT_SELF_SIGNED`: accept self-signed identity tokens
//! - `AUTH_OFFICIAL_ISSUERS`: comma-separated allow-list of official issuers
//! - `AUTH_LOCAL_HOSTS`: comma-separated hosts treated as this deployment
//! - `AUTH_PORT` / `AUTH_HOST`: bind address
//! - `AUTH_BODY_LIMIT_MB`: request body size limit
//! - `RUST_LOG`: log level filter

use std::env;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_PORT: u16 = 8443;
const DEFAULT_SESSION_TTL_SECS: u64 = 36_000;
const DEFAULT_JWKS_CACHE_TTL_SECS: u64 = 3_600;
const DEFAULT_JWKS_NEGATIVE_CACHE_SECS: u64 = 30;
const DEFAULT_JWKS_FETCH_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_BODY_LIMIT_MB: usize = 2;
const DEFAULT_JWKS_CACHE_CAPACITY: usize = 4_096;

/// Trimmed env var or empty string.
fn env_trim(name: &str) -> String {
    env::var(name).unwrap_or_default().trim().to_string()
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes")
}

fn parse_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    base_domain: String,
    db_path: PathBuf,
    session_ttl_secs: u64,
    jwks_cache_ttl_secs: u64,
    jwks_negative_cache_secs: u64,
    jwks_fetch_timeout_ms: u64,
    jwks_cache_capacity: usize,
    accept_self_signed: bool,
    official_issuers: Vec<String>,
    local_hosts: Vec<String>,
    port: u16,
    host: IpAddr,
    body_limit_bytes: usize,
}

impl Settings {
    /// Load settings from environment variables.
    ///
    /// # Panics
    ///
    /// Panics if `AUTH_BASE_DOMAIN` is not set.
    pub fn from_env() -> Self {
        let base_domain = env_trim("AUTH_BASE_DOMAIN");
        if base_domain.is_empty() {
            panic!(
                "AUTH_BASE_DOMAIN configuration error: must be set to this deployment's base domain"
            );
        }

        let db_path = env_trim("AUTH_DB_PATH");
        let db_path = if db_path.is_empty() {
            PathBuf::from("./.data/auth.redb")
        } else {
            PathBuf::from(db_path)
        };

        let session_ttl_secs = env_trim("AUTH_SESSION_TTL_SECS")
            .parse::<u64>()
            .unwrap_or(DEFAULT_SESSION_TTL_SECS);

        let jwks_cache_ttl_secs = env_trim("AUTH_JWKS_CACHE_TTL_SECS")
            .parse::<u64>()
            .unwrap_or(DEFAULT_JWKS_CACHE_TTL_SECS);

        let jwks_negative_cache_secs = env_trim("AUTH_JWKS_NEGATIVE_CACHE_SECS")
            .parse::<u64>()
            .unwrap_or(DEFAULT_JWKS_NEGATIVE_CACHE_SECS);

        let jwks_fetch_timeout_ms = env_trim("AUTH_JWKS_FETCH_TIMEOUT_MS")
            .parse::<u64>()
            .unwrap_or(DEFAULT_JWKS_FETCH_TIMEOUT_MS);

        let accept_self_signed = is_truthy(&env_trim("AUTH_ACCEPT_SELF_SIGNED"));

        let official_issuers = parse_csv(&env_trim("AUTH_OFFICIAL_ISSUERS"));

        let local_hosts_raw = env_trim("AUTH_LOCAL_HOSTS");
        let local_hosts = if local_hosts_raw.is_empty() {
            vec![base_domain.clone()]
        } else {
            parse_csv(&local_hosts_raw)
        };

        let port = env_trim("AUTH_PORT").parse::<u16>().unwrap_or(DEFAULT_PORT);

        let host = env_trim("AUTH_HOST")
            .parse::<IpAddr>()
            .unwrap_or(IpAddr::V6(Ipv6Addr::UNSPECIFIED));

        let body_limit_mb = env_trim("AUTH_BODY_LIMIT_MB")
            .parse::<usize>()
            .unwrap_or(DEFAULT_BODY_LIMIT_MB);
        let body_limit_bytes = body_limit_mb.saturating_mul(1024 * 1024);

        Self {
            base_domain,
            db_path,
            session_ttl_secs,
            jwks_cache_ttl_secs,
            jwks_negative_cache_secs,
            jwks_fetch_timeout_ms,
            jwks_cache_capacity: DEFAULT_JWKS_CACHE_CAPACITY,
            accept_self_signed,
            official_issuers,
            local_hosts,
            port,
            host,
            body_limit_bytes,
        }
    }

    /// Settings suitable for unit/integration tests, bypassing the
    /// environment entirely.
    pub fn for_tests(base_domain: &str) -> Self {
        Self {
            base_domain: base_domain.to_string(),
            db_path: PathBuf::from(":memory:"),
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            jwks_cache_ttl_secs: DEFAULT_JWKS_CACHE_TTL_SECS,
            jwks_negative_cache_secs: DEFAULT_JWKS_NEGATIVE_CACHE_SECS,
            jwks_fetch_timeout_ms: DEFAULT_JWKS_FETCH_TIMEOUT_MS,
            jwks_cache_capacity: DEFAULT_JWKS_CACHE_CAPACITY,
            accept_self_signed: true,
            official_issuers: vec![],
            local_hosts: vec![base_domain.to_string()],
            port: DEFAULT_PORT,
            host: IpAddr::V6(Ipv6Addr::LOCALHOST),
            body_limit_bytes: DEFAULT_BODY_LIMIT_MB * 1024 * 1024,
        }
    }

    /// Validate settings. Currently only checks that the base domain is
    /// well-formed enough to build an issuer URL from.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_domain.is_empty() {
            return Err("AUTH_BASE_DOMAIN must not be empty".to_string());
        }
        if self.base_domain.contains("://") {
            return Err("AUTH_BASE_DOMAIN must be a bare host, not a URL".to_string());
        }
        Ok(())
    }

    pub fn base_domain(&self) -> &str {
        &self.base_domain
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn session_ttl_secs(&self) -> i64 {
        self.session_ttl_secs as i64
    }

    pub fn jwks_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.jwks_cache_ttl_secs)
    }

    pub fn jwks_negative_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.jwks_negative_cache_secs)
    }

    pub fn jwks_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.jwks_fetch_timeout_ms)
    }

    pub fn jwks_cache_capacity(&self) -> usize {
        self.jwks_cache_capacity
    }

    pub fn accept_self_signed(&self) -> bool {
        self.accept_self_signed
    }

    pub fn official_issuers(&self) -> &[String] {
        &self.official_issuers
    }

    pub fn local_hosts(&self) -> &[String] {
        &self.local_hosts
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn body_limit_bytes(&self) -> usize {
        self.body_limit_bytes
    }

    /// Override the official issuer allow-list in a test-constructed
    /// `Settings` value. Not reachable from `from_env()` callers.
    #[cfg(test)]
    pub fn set_official_issuers_for_test(&mut self, issuers: Vec<String>) {
        self.official_issuers = issuers;
    }

    /// Override the self-signed bypass flag in a test-constructed
    /// `Settings` value.
    #[cfg(test)]
    pub fn set_accept_self_signed_for_test(&mut self, accept: bool) {
        self.accept_self_signed = accept;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_tests_validates() {
        let settings = Settings::for_tests("auth.example.test");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_url_as_base_domain() {
        let mut settings = Settings::for_tests("auth.example.test");
        settings.base_domain = "https://auth.example.test".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_local_hosts_default_to_base_domain() {
        let settings = Settings::for_tests("auth.example.test");
        assert_eq!(settings.local_hosts(), &["auth.example.test".to_string()]);
    }
}
