//! JWKS Federation — foreign key fetch/cache/merge with single-flight
//! coalescing and negative caching.
//!
//! Grounded on the donor's `frost::jwt_verification::JwtVerifier` cache
//! pattern (`Arc<RwLock<Option<CachedJwks>>>` with a TTL), generalized here
//! to a per-`(issuer, kid)` LRU cache with bounded capacity and a
//! single-flight map so concurrent misses for the same key coalesce into
//! one outbound fetch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::{Mutex, Notify};

use crate::config::Settings;
use crate::issuer::{IssuerClass, classify};
use crate::keystore::KeyStore;
use crate::types::{Header, Jwk};

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

#[derive(Clone)]
enum CacheEntry {
    Found(Jwk, Instant),
    NegativeMiss(Instant),
}

/// Key type for the single-flight in-flight map: one outbound fetch per
/// issuer services every `kid` miss for that issuer at once.
type InFlightMap = Mutex<HashMap<String, Arc<Notify>>>;

/// Federated key resolution and caching.
pub struct JwksFederation {
    http_client: Client,
    cache: Mutex<LruCache<(String, String), CacheEntry>>,
    in_flight: InFlightMap,
    cache_ttl: Duration,
    negative_cache_ttl: Duration,
    fetch_timeout: Duration,
}

impl JwksFederation {
    pub fn new(settings: &Settings) -> Self {
        let http_client = Client::builder()
            .timeout(settings.jwks_fetch_timeout())
            .build()
            .expect("failed to build JWKS http client");

        let capacity = std::num::NonZeroUsize::new(settings.jwks_cache_capacity().max(1))
            .expect("jwks cache capacity must be nonzero");

        Self {
            http_client,
            cache: Mutex::new(LruCache::new(capacity)),
            in_flight: Mutex::new(HashMap::new()),
            cache_ttl: settings.jwks_cache_ttl(),
            negative_cache_ttl: settings.jwks_negative_cache_ttl(),
            fetch_timeout: settings.jwks_fetch_timeout(),
        }
    }

    /// Resolve the verification key for a token header presented under the
    /// given issuer.
    ///
    /// Order: (1) embedded key in header wins outright. (2) Local issuer →
    /// the service's own key if `kid` matches. (3) Official issuer → not
    /// this component's responsibility, returns `None`. (4) Foreign →
    /// cache lookup, fetching on miss/stale.
    pub async fn get_key_for_token(
        &self,
        header: &Header,
        issuer: &str,
        settings: &Settings,
        local_keystore: &KeyStore,
    ) -> Option<Jwk> {
        if let Some(jwk) = &header.jwk {
            return Some(jwk.clone());
        }

        let kid = header.kid.as_deref()?;

        match classify(issuer, settings) {
            IssuerClass::Local => {
                if local_keystore.key_id() == kid {
                    let record = local_keystore.public_key_record();
                    record.keys.into_iter().next()
                } else {
                    None
                }
            }
            IssuerClass::Official => None,
            IssuerClass::Foreign => self.get_foreign_key(issuer, kid).await,
        }
    }

    async fn get_foreign_key(&self, issuer: &str, kid: &str) -> Option<Jwk> {
        let cache_key = (issuer.to_string(), kid.to_string());

        if let Some(entry) = self.cache.lock().await.get(&cache_key).cloned() {
            match entry {
                CacheEntry::Found(jwk, fetched_at) if fetched_at.elapsed() < self.cache_ttl => {
                    return Some(jwk);
                }
                CacheEntry::NegativeMiss(fetched_at)
                    if fetched_at.elapsed() < self.negative_cache_ttl =>
                {
                    return None;
                }
                _ => {}
            }
        }

        self.single_flight_fetch(issuer, kid).await
    }

    async fn single_flight_fetch(&self, issuer: &str, kid: &str) -> Option<Jwk> {
        let mut in_flight = self.in_flight.lock().await;
        if let Some(existing) = in_flight.get(issuer) {
            // Own the `Notify` and register interest in it while the lock is
            // still held, so the leader's `remove` + `notify_waiters` (which
            // also needs this lock first) cannot happen before we start
            // waiting. Constructing `notified()` on a clone we hold (rather
            // than awaiting it after dropping the lock) is what closes the
            // gap: a wakeup sent after construction is never missed.
            let notify = existing.clone();
            let notified = notify.notified();
            drop(in_flight);
            notified.await;
            return self.read_cached(issuer, kid).await;
        }

        let notify = Arc::new(Notify::new());
        in_flight.insert(issuer.to_string(), notify.clone());
        drop(in_flight);

        let result = self.fetch_and_cache(issuer).await;

        self.in_flight.lock().await.remove(issuer);
        notify.notify_waiters();

        match result {
            Ok(()) => self.read_cached(issuer, kid).await,
            Err(err) => {
                tracing::warn!(issuer, error = %err, "foreign JWKS fetch failed");
                self.cache
                    .lock()
                    .await
                    .put((issuer.to_string(), kid.to_string()), CacheEntry::NegativeMiss(Instant::now()));
                None
            }
        }
    }

    async fn read_cached(&self, issuer: &str, kid: &str) -> Option<Jwk> {
        match self
            .cache
            .lock()
            .await
            .get(&(issuer.to_string(), kid.to_string()))
            .cloned()
        {
            Some(CacheEntry::Found(jwk, _)) => Some(jwk),
            _ => None,
        }
    }

    async fn fetch_and_cache(&self, issuer: &str) -> Result<(), crate::error::AuthError> {
        let url = format!("{issuer}/.well-known/jwks.json");
        let response = tokio::time::timeout(self.fetch_timeout, self.http_client.get(&url).send())
            .await
            .map_err(|_| crate::error::AuthError::Upstream(format!("fetch of {url} timed out")))??;

        let body: JwksResponse = response.json().await?;

        let now = Instant::now();
        let mut cache = self.cache.lock().await;
        for jwk in body.keys {
            if let Some(kid) = jwk.kid.clone() {
                cache.put((issuer.to_string(), kid), CacheEntry::Found(jwk, now));
            }
        }

        Ok(())
    }
}
