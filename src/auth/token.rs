// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! OAuth2 bearer token (JWT) verification.
//!
//! ## Order of checks
//!
//! 1. The JOSE header `alg` must equal the configured algorithm. `none` and
//!    every other value fail as `SignatureInvalid` before any key lookup
//! 2. The key is located by `kid`. A token without `kid` is accepted only
//!    when the issuer publishes exactly one key
//! 3. Signature
//! 4. `exp` (strict), then `nbf` and `iat` with clock skew
//! 5. `iss` exact match, then `aud` when configured
//!
//! Lifetime claims are checked here rather than by `jsonwebtoken` so that an
//! expired but correctly signed token always reports `TokenExpired`.

use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::claims::{ClaimSet, VerifiedClaims};
use super::error::AuthError;
use super::keys::{KeyMaterial, KeyResolver, SigningKey};
use crate::config::OAuthConfig;

/// Fields read from the JOSE header before trusting anything else.
#[derive(Debug, Deserialize)]
struct JoseHeader {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
}

/// JWT verifier bound to one issuer.
#[derive(Clone)]
pub struct TokenVerifier {
    config: OAuthConfig,
    clock_skew: Duration,
    keys: KeyResolver,
}

impl TokenVerifier {
    pub fn new(config: OAuthConfig, clock_skew: Duration, keys: KeyResolver) -> Self {
        Self {
            config,
            clock_skew,
            keys,
        }
    }

    /// Configured issuer.
    pub fn issuer(&self) -> &str {
        &self.config.issuer
    }

    /// Verify a compact JWT and return its claims.
    pub async fn verify(&self, raw: &str) -> Result<VerifiedClaims, AuthError> {
        self.verify_at(raw, chrono::Utc::now().timestamp()).await
    }

    async fn verify_at(&self, raw: &str, now: i64) -> Result<VerifiedClaims, AuthError> {
        let header = read_header(raw)?;
        let allowed = Algorithm::from_str(&header.alg).ok() == Some(self.config.algorithm);
        if !allowed {
            return Err(AuthError::SignatureInvalid(format!(
                "algorithm {} is not accepted",
                header.alg
            )));
        }

        let key = match &header.kid {
            Some(kid) => self.keys.resolve(&self.config.issuer, kid).await?,
            None => self.only_key().await?,
        };
        let claims = self.check_signature(raw, &key)?;
        debug!(issuer = %self.config.issuer, kid = %key.key_id, "Token signature verified");

        self.check_lifetime(&claims, now)?;

        let issuer = claims.get("iss").and_then(Value::as_str);
        if issuer != Some(self.config.issuer.as_str()) {
            return Err(AuthError::IssuerMismatch);
        }
        if let Some(audience) = &self.config.audience {
            if !audience_contains(claims.get("aud"), audience) {
                return Err(AuthError::AudienceMismatch);
            }
        }

        let subject = claims
            .get("sub")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AuthError::MalformedToken("missing sub claim".to_string()))?
            .to_string();
        let expires_at = timestamp_claim(&claims, "exp")?
            .ok_or_else(|| AuthError::MalformedToken("missing exp claim".to_string()))?;

        Ok(VerifiedClaims {
            issuer: self.config.issuer.clone(),
            subject,
            expires_at,
            claims: ClaimSet::Jwt(claims),
        })
    }

    async fn only_key(&self) -> Result<SigningKey, AuthError> {
        let mut keys = self.keys.keys_for(&self.config.issuer).await?;
        if keys.len() != 1 {
            return Err(AuthError::MalformedToken(
                "token has no kid and the issuer publishes several keys".to_string(),
            ));
        }
        Ok(keys.remove(0))
    }

    fn check_signature(&self, raw: &str, key: &SigningKey) -> Result<Map<String, Value>, AuthError> {
        let KeyMaterial::Jwk(jwk) = &key.material else {
            return Err(AuthError::KeyUnavailable(key.key_id.clone()));
        };
        let decoding_key = DecodingKey::from_jwk(jwk).map_err(|e| {
            AuthError::KeyResolution(format!("unusable JWK {}: {e}", key.key_id))
        })?;

        let mut validation = Validation::new(self.config.algorithm);
        validation.required_spec_claims = HashSet::new();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;

        decode::<Map<String, Value>>(raw, &decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature
                | ErrorKind::InvalidAlgorithm
                | ErrorKind::InvalidAlgorithmName
                | ErrorKind::InvalidKeyFormat => {
                    AuthError::SignatureInvalid("token signature does not verify".to_string())
                }
                _ => AuthError::MalformedToken(e.to_string()),
            })
    }

    fn check_lifetime(&self, claims: &Map<String, Value>, now: i64) -> Result<(), AuthError> {
        let skew = self.clock_skew.as_secs() as i64;

        let exp = timestamp_claim(claims, "exp")?
            .ok_or_else(|| AuthError::MalformedToken("missing exp claim".to_string()))?;
        if now >= exp {
            return Err(AuthError::TokenExpired);
        }
        // A token used before its validity window reports the same error.
        for name in ["nbf", "iat"] {
            if let Some(value) = timestamp_claim(claims, name)? {
                if value > now + skew {
                    return Err(AuthError::TokenExpired);
                }
            }
        }
        Ok(())
    }
}

fn read_header(raw: &str) -> Result<JoseHeader, AuthError> {
    let mut parts = raw.split('.');
    let (Some(header), Some(_), Some(_), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthError::MalformedToken("expected three dot-separated parts".to_string()));
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|_| AuthError::MalformedToken("header is not base64url".to_string()))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::MalformedToken(format!("invalid header: {e}")))
}

fn timestamp_claim(claims: &Map<String, Value>, name: &str) -> Result<Option<i64>, AuthError> {
    match claims.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f as i64))
            .map(Some)
            .ok_or_else(|| AuthError::MalformedToken(format!("{name} is not a number"))),
    }
}

fn audience_contains(aud: Option<&Value>, expected: &str) -> bool {
    match aud {
        Some(Value::String(single)) => single == expected,
        Some(Value::Array(list)) => list.iter().any(|v| v.as_str() == Some(expected)),
        _ => false,
    }
}
