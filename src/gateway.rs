// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Gateway
//!
//! Runs a credential through the pipeline:
//!
//! ```text
//! Credential → verify (keys) → normalize → map → Principal
//! ```
//!
//! A cache hit on the credential fingerprint skips every stage. The whole
//! pipeline is bounded by the configured timeout. Each protocol owns its own
//! key resolver, so an issuer that serves both OAuth2 and SAML never mixes
//! JWKS keys with metadata certificates.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::auth::cache::PrincipalCache;
use crate::auth::claims::{Principal, Protocol};
use crate::auth::credential::Credential;
use crate::auth::error::AuthError;
use crate::auth::keys::{KeyResolver, KeySource, SigningKey};
use crate::auth::normalizer::{ClaimNormalizer, ClaimPaths};
use crate::auth::roles::RoleMapper;
use crate::auth::saml::AssertionVerifier;
use crate::auth::token::TokenVerifier;
use crate::config::GatewayConfig;

/// Verification pipeline shared by all request handlers.
pub struct Gateway {
    tokens: Option<TokenVerifier>,
    assertions: Option<AssertionVerifier>,
    oauth_keys: Option<KeyResolver>,
    saml_keys: Option<KeyResolver>,
    normalizer: ClaimNormalizer,
    mapper: RoleMapper,
    cache: PrincipalCache,
    cache_ttl: Duration,
    timeout: Duration,
}

impl Gateway {
    /// Build the pipeline and register key sources. No network I/O happens
    /// here; keys are fetched on first use or by [`Gateway::refresh_keys`].
    pub fn new(config: &GatewayConfig) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(config.key_fetch_timeout)
            .build()
            .map_err(|e| AuthError::KeyResolution(format!("failed to build HTTP client: {e}")))?;
        let resolver = || KeyResolver::with_client(client.clone()).with_cache_ttl(config.key_cache_ttl);

        let (tokens, oauth_keys) = match &config.oauth {
            Some(oauth) => {
                let keys = resolver();
                keys.register(&oauth.issuer, KeySource::Jwks(oauth.jwks_url.clone()))?;
                let verifier = TokenVerifier::new(oauth.clone(), config.clock_skew, keys.clone());
                (Some(verifier), Some(keys))
            }
            None => (None, None),
        };

        let (assertions, saml_keys) = match &config.saml {
            Some(saml) => {
                let keys = resolver();
                let source = match &saml.metadata_url {
                    Some(url) => KeySource::SamlMetadata(url.clone()),
                    None => KeySource::Static(
                        saml.idp_certificates
                            .iter()
                            .cloned()
                            .map(|cert| SigningKey::from_certificate(&saml.idp_entity_id, cert))
                            .collect(),
                    ),
                };
                keys.register(&saml.idp_entity_id, source)?;
                let verifier = AssertionVerifier::new(saml.clone(), config.clock_skew, keys.clone());
                (Some(verifier), Some(keys))
            }
            None => (None, None),
        };

        let unused = || ClaimPaths {
            roles: String::new(),
            username: None,
            email: None,
        };
        let normalizer = ClaimNormalizer::new(
            config.oauth.as_ref().map(|o| o.claim_paths()).unwrap_or_else(unused),
            config.saml.as_ref().map(|s| s.claim_paths()).unwrap_or_else(unused),
        );

        Ok(Self {
            tokens,
            assertions,
            oauth_keys,
            saml_keys,
            normalizer,
            mapper: RoleMapper::new(config.role_mapping.clone()),
            cache: PrincipalCache::new(config.principal_cache_capacity),
            cache_ttl: config.principal_cache_ttl,
            timeout: config.pipeline_timeout,
        })
    }

    /// Authenticate a credential, serving repeats from the cache.
    pub async fn authenticate(&self, credential: &Credential) -> Result<Principal, AuthError> {
        let fingerprint = credential.fingerprint();
        if let Some(principal) = self.cache.get(&fingerprint) {
            debug!(fingerprint = %fingerprint.short(), "Principal cache hit");
            return Ok(principal);
        }

        let result = tokio::time::timeout(self.timeout, self.run_pipeline(credential))
            .await
            .unwrap_or(Err(AuthError::Timeout));

        match result {
            Ok(principal) => {
                info!(
                    protocol = %principal.protocol,
                    username = %principal.username,
                    role_count = principal.roles.len(),
                    fingerprint = %fingerprint.short(),
                    "Authenticated"
                );
                self.cache.put(fingerprint, principal.clone(), self.cache_ttl);
                Ok(principal)
            }
            Err(e) => {
                warn!(
                    protocol = %credential.protocol(),
                    stage = ?e.stage(),
                    error_code = e.error_code(),
                    fingerprint = %fingerprint.short(),
                    error = %e,
                    "Authentication failed"
                );
                Err(e)
            }
        }
    }

    async fn run_pipeline(&self, credential: &Credential) -> Result<Principal, AuthError> {
        let claims = match credential {
            Credential::BearerToken(raw) => {
                self.tokens
                    .as_ref()
                    .ok_or(AuthError::ProtocolDisabled(Protocol::Oauth2.as_str()))?
                    .verify(raw)
                    .await?
            }
            Credential::SamlResponse(raw) => {
                self.assertions
                    .as_ref()
                    .ok_or(AuthError::ProtocolDisabled(Protocol::Saml2.as_str()))?
                    .verify(raw)
                    .await?
            }
        };

        let roles = self.normalizer.normalize(&claims)?;
        let identity = self.normalizer.identity(&claims);
        self.mapper.map(identity, &roles, claims.expires_at)
    }

    /// Principal cache, for maintenance.
    pub fn cache(&self) -> &PrincipalCache {
        &self.cache
    }

    /// Configured issuers and whether fresh keys are cached for each.
    pub fn key_status(&self) -> Vec<(Protocol, String, bool)> {
        let mut status = Vec::new();
        if let (Some(verifier), Some(keys)) = (&self.tokens, &self.oauth_keys) {
            let issuer = verifier.issuer().to_string();
            let ready = keys.has_keys(&issuer);
            status.push((Protocol::Oauth2, issuer, ready));
        }
        if let (Some(verifier), Some(keys)) = (&self.assertions, &self.saml_keys) {
            let issuer = verifier.issuer().to_string();
            let ready = keys.has_keys(&issuer);
            status.push((Protocol::Saml2, issuer, ready));
        }
        status
    }

    /// Ready once every configured issuer has keys cached.
    pub fn is_ready(&self) -> bool {
        self.key_status().iter().all(|(_, _, ready)| *ready)
    }

    /// Force a refresh for every remote issuer. Returns the number of
    /// issuers that failed.
    pub async fn refresh_keys(&self) -> usize {
        self.refresh_remote(false).await
    }

    /// Refresh remote issuers whose cached keys are past their TTL, spaced
    /// so a failing endpoint is not hammered. Returns the number of issuers
    /// that failed.
    pub async fn refresh_stale_keys(&self) -> usize {
        self.refresh_remote(true).await
    }

    async fn refresh_remote(&self, stale_only: bool) -> usize {
        let mut failures = 0;
        for keys in self.oauth_keys.iter().chain(self.saml_keys.iter()) {
            for issuer in keys.remote_issuers() {
                let result = if stale_only {
                    keys.refresh_stale(&issuer).await
                } else {
                    keys.refresh(&issuer).await
                };
                match result {
                    Ok(count) => debug!(issuer = %issuer, key_count = count, "Refreshed signing keys"),
                    Err(e) => {
                        failures += 1;
                        warn!(issuer = %issuer, error = %e, "Signing key refresh failed");
                    }
                }
            }
        }
        failures
    }

    /// Drop cached keys and principals (teardown).
    pub fn clear(&self) {
        for keys in self.oauth_keys.iter().chain(self.saml_keys.iter()) {
            keys.clear();
        }
        self.cache.clear();
    }
}
