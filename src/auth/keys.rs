// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signing key resolution and caching.
//!
//! ## Sources
//!
//! - JWKS documents for OAuth2 issuers
//! - SAML IdP metadata (`EntityDescriptor`) for SAML issuers
//! - Static certificates supplied through configuration
//!
//! ## Caching
//!
//! - Keys are cached per issuer with a configurable TTL and replaced
//!   wholesale on refresh
//! - A key id miss triggers at most one refresh per `min_refresh_interval`
//! - Background and health-check refreshes only fetch once the cached keys
//!   are past their TTL, and never more often than `min_refresh_interval`
//!   even while the endpoint keeps failing
//! - Concurrent callers for one issuer share a single in-flight fetch. The
//!   fetch runs on its own task, so a caller that gives up does not cancel
//!   it for the others
//! - Remote endpoints must use HTTPS (HTTP only allowed for loopback hosts)

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use jsonwebtoken::jwk::{Jwk, PublicKeyUse};
use tracing::{debug, info, warn};
use url::Url;

use super::certificate::{Certificate, PublicKeyKind};
use super::error::AuthError;
use super::metadata;

/// Default key cache TTL (5 minutes).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Default minimum spacing between refreshes triggered by key id misses.
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Public key material.
#[derive(Debug, Clone)]
pub enum KeyMaterial {
    /// JSON Web Key from a JWKS document
    Jwk(Box<Jwk>),
    /// X.509 certificate from SAML metadata or configuration
    Certificate(Arc<Certificate>),
}

/// A signing key published by an issuer.
#[derive(Debug, Clone)]
pub struct SigningKey {
    /// `kid` for JWKs, certificate SHA-256 fingerprint for certificates
    pub key_id: String,
    /// Declared algorithm (`RS256`, `ES256`) or certificate key family
    pub algorithm: String,
    /// Key material
    pub material: KeyMaterial,
    /// Issuer that published the key
    pub issuer: String,
    /// When the key document was fetched
    pub fetched_at: DateTime<Utc>,
}

impl SigningKey {
    /// Build a key from a certificate.
    pub fn from_certificate(issuer: &str, certificate: Certificate) -> Self {
        let algorithm = match certificate.kind {
            PublicKeyKind::Rsa => "RSA",
            PublicKeyKind::EcP256 => "EC-P256",
            PublicKeyKind::EcP384 => "EC-P384",
        };
        Self {
            key_id: certificate.fingerprint.clone(),
            algorithm: algorithm.to_string(),
            material: KeyMaterial::Certificate(Arc::new(certificate)),
            issuer: issuer.to_string(),
            fetched_at: Utc::now(),
        }
    }

    /// Certificate material, if this key carries one.
    pub fn certificate(&self) -> Option<&Certificate> {
        match &self.material {
            KeyMaterial::Certificate(cert) => Some(cert),
            KeyMaterial::Jwk(_) => None,
        }
    }
}

/// Where an issuer's keys come from.
#[derive(Debug, Clone)]
pub enum KeySource {
    /// JWKS endpoint
    Jwks(Url),
    /// SAML IdP metadata endpoint
    SamlMetadata(Url),
    /// Fixed keys from configuration
    Static(Vec<SigningKey>),
}

impl KeySource {
    fn is_remote(&self) -> bool {
        !matches!(self, KeySource::Static(_))
    }
}

/// Keys cached for one issuer.
struct CachedKeys {
    keys: Vec<SigningKey>,
    fetched_at: Instant,
    pinned: bool,
}

impl CachedKeys {
    fn younger_than(&self, max_age: Duration) -> bool {
        self.pinned || self.fetched_at.elapsed() < max_age
    }
}

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<CachedKeys>, AuthError>>>;

/// Per-issuer signing key resolver.
///
/// Cloning is cheap; clones share caches and in-flight fetches.
#[derive(Clone)]
pub struct KeyResolver {
    sources: Arc<DashMap<String, KeySource>>,
    cache: Arc<DashMap<String, Arc<CachedKeys>>>,
    in_flight: Arc<DashMap<String, SharedFetch>>,
    attempts: Arc<DashMap<String, Instant>>,
    client: reqwest::Client,
    cache_ttl: Duration,
    min_refresh_interval: Duration,
}

impl KeyResolver {
    /// Create a resolver with its own HTTP client.
    pub fn new(fetch_timeout: Duration) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .map_err(|e| AuthError::KeyResolution(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client))
    }

    /// Create a resolver around an existing HTTP client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            sources: Arc::new(DashMap::new()),
            cache: Arc::new(DashMap::new()),
            in_flight: Arc::new(DashMap::new()),
            attempts: Arc::new(DashMap::new()),
            client,
            cache_ttl: DEFAULT_CACHE_TTL,
            min_refresh_interval: DEFAULT_MIN_REFRESH_INTERVAL,
        }
    }

    /// Create with custom cache TTL.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Create with custom spacing between key id miss refreshes.
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Register where an issuer's keys come from.
    ///
    /// Static keys are cached immediately and never expire.
    pub fn register(&self, issuer: impl Into<String>, source: KeySource) -> Result<(), AuthError> {
        let issuer = issuer.into();
        match &source {
            KeySource::Jwks(url) | KeySource::SamlMetadata(url) => check_endpoint(url)?,
            KeySource::Static(keys) => {
                if keys.is_empty() {
                    return Err(AuthError::KeyResolution(format!(
                        "no static keys supplied for {issuer}"
                    )));
                }
                self.cache.insert(
                    issuer.clone(),
                    Arc::new(CachedKeys {
                        keys: keys.clone(),
                        fetched_at: Instant::now(),
                        pinned: true,
                    }),
                );
            }
        }
        self.sources.insert(issuer, source);
        Ok(())
    }

    /// Issuers whose keys are fetched over the network.
    pub fn remote_issuers(&self) -> Vec<String> {
        self.sources
            .iter()
            .filter(|entry| entry.value().is_remote())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Resolve the key `key_id` published by `issuer`.
    ///
    /// Serves from cache while fresh; a miss on an expired cache or an
    /// unknown key id triggers one refresh.
    pub async fn resolve(&self, issuer: &str, key_id: &str) -> Result<SigningKey, AuthError> {
        let cached = self.load(issuer, self.cache_ttl).await?;
        if let Some(key) = find_key(&cached.keys, key_id) {
            return Ok(key);
        }

        debug!(issuer = %issuer, kid = %key_id, "Key id not cached, refreshing");
        let refreshed = self.load(issuer, self.min_refresh_interval).await?;
        find_key(&refreshed.keys, key_id).ok_or_else(|| AuthError::KeyUnavailable(key_id.to_string()))
    }

    /// All current keys for an issuer.
    pub async fn keys_for(&self, issuer: &str) -> Result<Vec<SigningKey>, AuthError> {
        Ok(self.load(issuer, self.cache_ttl).await?.keys.clone())
    }

    /// Force refresh an issuer's keys.
    pub async fn refresh(&self, issuer: &str) -> Result<usize, AuthError> {
        Ok(self.load(issuer, Duration::ZERO).await?.keys.len())
    }

    /// Refresh an issuer's keys only if the cached set is past its TTL.
    ///
    /// Fetch attempts are spaced by `min_refresh_interval` whether or not the
    /// previous one succeeded. A skipped call reports the number of keys
    /// still cached, which may be zero.
    pub async fn refresh_stale(&self, issuer: &str) -> Result<usize, AuthError> {
        if let Some(cached) = self.cached_within(issuer, self.cache_ttl) {
            return Ok(cached.keys.len());
        }
        if self.attempted_within(issuer, self.min_refresh_interval) {
            debug!(issuer = %issuer, "Key refresh attempted recently, skipping");
            return Ok(self.cache.get(issuer).map(|c| c.keys.len()).unwrap_or(0));
        }
        Ok(self.load(issuer, self.cache_ttl).await?.keys.len())
    }

    /// Check if keys for an issuer are cached and fresh.
    pub fn has_keys(&self, issuer: &str) -> bool {
        self.cached_within(issuer, self.cache_ttl).is_some()
    }

    /// Drop every cached key (teardown).
    pub fn clear(&self) {
        self.cache.retain(|_, cached| cached.pinned);
    }

    fn cached_within(&self, issuer: &str, max_age: Duration) -> Option<Arc<CachedKeys>> {
        self.cache
            .get(issuer)
            .filter(|cached| cached.younger_than(max_age))
            .map(|cached| Arc::clone(cached.value()))
    }

    fn attempted_within(&self, issuer: &str, spacing: Duration) -> bool {
        self.attempts
            .get(issuer)
            .is_some_and(|at| at.elapsed() < spacing)
    }

    /// Return cached keys younger than `max_age`, otherwise join or start
    /// the issuer's in-flight fetch.
    async fn load(&self, issuer: &str, max_age: Duration) -> Result<Arc<CachedKeys>, AuthError> {
        if let Some(cached) = self.cached_within(issuer, max_age) {
            return Ok(cached);
        }

        let fetch = match self.in_flight.entry(issuer.to_string()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                // A fetch may have landed between the first check and the entry lock.
                if let Some(cached) = self.cached_within(issuer, max_age) {
                    return Ok(cached);
                }
                let fetch = self.spawn_fetch(issuer)?;
                entry.insert(fetch.clone());
                fetch
            }
        };

        fetch.await
    }

    fn spawn_fetch(&self, issuer: &str) -> Result<SharedFetch, AuthError> {
        let source = self
            .sources
            .get(issuer)
            .map(|s| s.value().clone())
            .ok_or_else(|| AuthError::KeyResolution(format!("unknown issuer {issuer}")))?;

        let resolver = self.clone();
        let issuer = issuer.to_string();
        self.attempts.insert(issuer.clone(), Instant::now());
        let task = tokio::spawn(async move {
            let result = resolver.fetch(&issuer, &source).await;
            let outcome = match result {
                Ok(keys) => {
                    let cached = Arc::new(CachedKeys {
                        keys,
                        fetched_at: Instant::now(),
                        pinned: !source.is_remote(),
                    });
                    resolver.cache.insert(issuer.clone(), Arc::clone(&cached));
                    Ok(cached)
                }
                Err(e) => {
                    warn!(issuer = %issuer, error = %e, "Signing key fetch failed");
                    Err(e)
                }
            };
            resolver.in_flight.remove(&issuer);
            outcome
        });

        Ok(async move {
            task.await
                .map_err(|e| AuthError::KeyResolution(format!("key fetch task failed: {e}")))?
        }
        .boxed()
        .shared())
    }

    async fn fetch(&self, issuer: &str, source: &KeySource) -> Result<Vec<SigningKey>, AuthError> {
        match source {
            KeySource::Jwks(url) => {
                info!(issuer = %issuer, url = %url, "Fetching JWKS");
                let body = self.get(url).await?;
                let keys = parse_jwks(issuer, &body)?;
                info!(issuer = %issuer, key_count = keys.len(), "Fetched JWKS");
                Ok(keys)
            }
            KeySource::SamlMetadata(url) => {
                info!(issuer = %issuer, url = %url, "Fetching SAML IdP metadata");
                let body = self.get(url).await?;
                let keys = metadata::signing_keys(issuer, &body)?;
                info!(issuer = %issuer, key_count = keys.len(), "Fetched SAML IdP metadata");
                Ok(keys)
            }
            KeySource::Static(keys) => Ok(keys.clone()),
        }
    }

    async fn get(&self, url: &Url) -> Result<String, AuthError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| AuthError::KeyResolution(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::KeyResolution(format!(
                "HTTP {} from key endpoint",
                response.status()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| AuthError::KeyResolution(e.to_string()))
    }
}

fn find_key(keys: &[SigningKey], key_id: &str) -> Option<SigningKey> {
    keys.iter().find(|k| k.key_id == key_id).cloned()
}

/// Reject key endpoints that are not HTTPS, except loopback HTTP.
pub fn check_endpoint(url: &Url) -> Result<(), AuthError> {
    match url.scheme() {
        "https" => Ok(()),
        "http" if is_loopback(url) => Ok(()),
        _ => Err(AuthError::KeyResolution(format!(
            "key endpoint must use HTTPS: {url}"
        ))),
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(domain)) => domain == "localhost",
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

/// Parse a JWKS document, skipping encryption keys and entries this
/// library cannot represent.
pub fn parse_jwks(issuer: &str, body: &str) -> Result<Vec<SigningKey>, AuthError> {
    let document: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| AuthError::KeyResolution(format!("invalid JWKS JSON: {e}")))?;
    let entries = document
        .get("keys")
        .and_then(|k| k.as_array())
        .ok_or_else(|| AuthError::KeyResolution("JWKS has no 'keys' array".to_string()))?;

    let fetched_at = Utc::now();
    let mut keys = Vec::with_capacity(entries.len());
    for entry in entries {
        let jwk: Jwk = match serde_json::from_value(entry.clone()) {
            Ok(jwk) => jwk,
            Err(e) => {
                debug!(issuer = %issuer, error = %e, "Skipping unsupported JWK");
                continue;
            }
        };
        if jwk.common.public_key_use == Some(PublicKeyUse::Encryption) {
            continue;
        }
        let algorithm = jwk
            .common
            .key_algorithm
            .as_ref()
            .map(|a| format!("{a:?}"))
            .unwrap_or_default();
        keys.push(SigningKey {
            key_id: jwk.common.key_id.clone().unwrap_or_default(),
            algorithm,
            material: KeyMaterial::Jwk(Box::new(jwk)),
            issuer: issuer.to_string(),
            fetched_at,
        });
    }

    if keys.is_empty() {
        return Err(AuthError::KeyResolution(
            "JWKS contains no usable signing keys".to_string(),
        ));
    }
    Ok(keys)
}
