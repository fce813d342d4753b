// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is read from the environment once at startup into an
//! immutable [`GatewayConfig`] and handed to each component by reference.
//! A protocol is enabled by setting its issuer variable.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//! | `OAUTH_ISSUER` | Expected JWT `iss`; enables bearer tokens | unset |
//! | `OAUTH_JWKS_URL` | JWKS endpoint | Required with `OAUTH_ISSUER` |
//! | `OAUTH_AUDIENCE` | Expected JWT `aud` | Optional |
//! | `OAUTH_ALGORITHM` | Accepted JWS algorithm | `RS256` |
//! | `OAUTH_ROLE_CLAIM` | Top-level claim holding roles | `marklogic-roles` |
//! | `OAUTH_USERNAME_CLAIM` | Claim holding the login name | `preferred_username` |
//! | `OAUTH_EMAIL_CLAIM` | Claim holding the email | `email` |
//! | `SAML_IDP_ENTITY_ID` | IdP entity id; enables SAML | unset |
//! | `SAML_METADATA_URL` | IdP metadata endpoint | One of metadata / certificate |
//! | `SAML_IDP_CERTIFICATE` | Pinned signing certificate(s), comma separated | One of metadata / certificate |
//! | `SAML_ACS_URL` | Expected `Destination` / `Recipient` | Required with SAML |
//! | `SAML_SP_ENTITY_ID` | Expected audience | Optional |
//! | `SAML_SIGNATURE_METHOD` | `rsa-sha256`, `rsa-sha512`, `ecdsa-sha256`, `ecdsa-sha384` | `rsa-sha256` |
//! | `SAML_ROLE_ATTRIBUTE` | Attribute `Name` or `FriendlyName` holding roles | `Role` |
//! | `SAML_EMAIL_ATTRIBUTE` | Attribute holding the email | `email` |
//! | `ROLE_MAP` | Inline role mapping JSON | identity mapping |
//! | `ROLE_MAP_FILE` | Path to a role mapping JSON file | unset |
//! | `CLOCK_SKEW_SECS` | Tolerance for time claims | `60` |
//! | `KEY_CACHE_TTL_SECS` | Signing key cache TTL (clamped to 300..=3600) | `300` |
//! | `KEY_FETCH_TIMEOUT_SECS` | Timeout per key document fetch | `10` |
//! | `PRINCIPAL_CACHE_TTL_SECS` | Principal cache TTL | `60` |
//! | `PRINCIPAL_CACHE_CAPACITY` | Principal cache capacity | `10000` |
//! | `PIPELINE_TIMEOUT_MS` | Upper bound for one authentication | `5000` |
//! | `SWEEP_INTERVAL_SECS` | Maintenance interval | `60` |

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use jsonwebtoken::Algorithm;
use url::Url;

use crate::auth::certificate::{parse_certificate, Certificate};
use crate::auth::normalizer::ClaimPaths;
use crate::auth::roles::RoleMapping;
use crate::auth::saml::SignatureMethod;

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const OAUTH_ISSUER_ENV: &str = "OAUTH_ISSUER";
pub const OAUTH_JWKS_URL_ENV: &str = "OAUTH_JWKS_URL";
pub const OAUTH_AUDIENCE_ENV: &str = "OAUTH_AUDIENCE";
pub const OAUTH_ALGORITHM_ENV: &str = "OAUTH_ALGORITHM";
pub const OAUTH_ROLE_CLAIM_ENV: &str = "OAUTH_ROLE_CLAIM";
pub const OAUTH_USERNAME_CLAIM_ENV: &str = "OAUTH_USERNAME_CLAIM";
pub const OAUTH_EMAIL_CLAIM_ENV: &str = "OAUTH_EMAIL_CLAIM";

pub const SAML_IDP_ENTITY_ID_ENV: &str = "SAML_IDP_ENTITY_ID";
pub const SAML_METADATA_URL_ENV: &str = "SAML_METADATA_URL";
pub const SAML_IDP_CERTIFICATE_ENV: &str = "SAML_IDP_CERTIFICATE";
pub const SAML_ACS_URL_ENV: &str = "SAML_ACS_URL";
pub const SAML_SP_ENTITY_ID_ENV: &str = "SAML_SP_ENTITY_ID";
pub const SAML_SIGNATURE_METHOD_ENV: &str = "SAML_SIGNATURE_METHOD";
pub const SAML_ROLE_ATTRIBUTE_ENV: &str = "SAML_ROLE_ATTRIBUTE";
pub const SAML_EMAIL_ATTRIBUTE_ENV: &str = "SAML_EMAIL_ATTRIBUTE";

pub const ROLE_MAP_ENV: &str = "ROLE_MAP";
pub const ROLE_MAP_FILE_ENV: &str = "ROLE_MAP_FILE";

pub const CLOCK_SKEW_SECS_ENV: &str = "CLOCK_SKEW_SECS";
pub const KEY_CACHE_TTL_SECS_ENV: &str = "KEY_CACHE_TTL_SECS";
pub const KEY_FETCH_TIMEOUT_SECS_ENV: &str = "KEY_FETCH_TIMEOUT_SECS";
pub const PRINCIPAL_CACHE_TTL_SECS_ENV: &str = "PRINCIPAL_CACHE_TTL_SECS";
pub const PRINCIPAL_CACHE_CAPACITY_ENV: &str = "PRINCIPAL_CACHE_CAPACITY";
pub const PIPELINE_TIMEOUT_MS_ENV: &str = "PIPELINE_TIMEOUT_MS";
pub const SWEEP_INTERVAL_SECS_ENV: &str = "SWEEP_INTERVAL_SECS";

/// Accepted range for the key cache TTL, in seconds.
pub const KEY_CACHE_TTL_RANGE: std::ops::RangeInclusive<u64> = 300..=3600;

/// Default role claim; Keycloak's nested `realm_access.roles` must be
/// flattened into it by an IdP mapper.
pub const DEFAULT_ROLE_CLAIM: &str = "marklogic-roles";

/// Configuration errors, reported once at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
    #[error("role mapping is invalid: {0}")]
    RoleMap(String),
    #[error("no protocol configured: set {OAUTH_ISSUER_ENV} and/or {SAML_IDP_ENTITY_ID_ENV}")]
    NoProtocol,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// OAuth2 bearer token settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthConfig {
    pub issuer: String,
    pub jwks_url: Url,
    pub audience: Option<String>,
    pub algorithm: Algorithm,
    pub role_claim: String,
    pub username_claim: String,
    pub email_claim: String,
}

impl OAuthConfig {
    pub fn claim_paths(&self) -> ClaimPaths {
        ClaimPaths {
            roles: self.role_claim.clone(),
            username: Some(self.username_claim.clone()),
            email: Some(self.email_claim.clone()),
        }
    }
}

/// SAML2 service provider settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamlConfig {
    pub idp_entity_id: String,
    pub metadata_url: Option<Url>,
    /// Pinned IdP signing certificates, used instead of metadata
    pub idp_certificates: Vec<Certificate>,
    pub acs_url: String,
    pub sp_entity_id: Option<String>,
    pub signature_method: SignatureMethod,
    pub role_attribute: String,
    pub email_attribute: String,
}

impl SamlConfig {
    pub fn claim_paths(&self) -> ClaimPaths {
        ClaimPaths {
            roles: self.role_attribute.clone(),
            username: None,
            email: Some(self.email_attribute.clone()),
        }
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub log_format: LogFormat,
    pub oauth: Option<OAuthConfig>,
    pub saml: Option<SamlConfig>,
    pub role_mapping: RoleMapping,
    pub clock_skew: Duration,
    pub key_cache_ttl: Duration,
    pub key_fetch_timeout: Duration,
    pub principal_cache_ttl: Duration,
    pub principal_cache_capacity: usize,
    pub pipeline_timeout: Duration,
    pub sweep_interval: Duration,
}

impl GatewayConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let oauth = match get(OAUTH_ISSUER_ENV) {
            Some(issuer) => Some(OAuthConfig {
                issuer,
                jwks_url: parse_url(
                    OAUTH_JWKS_URL_ENV,
                    &get(OAUTH_JWKS_URL_ENV).ok_or(ConfigError::Missing(OAUTH_JWKS_URL_ENV))?,
                )?,
                audience: get(OAUTH_AUDIENCE_ENV),
                algorithm: parse_var(OAUTH_ALGORITHM_ENV, get(OAUTH_ALGORITHM_ENV), Algorithm::RS256)?,
                role_claim: get(OAUTH_ROLE_CLAIM_ENV).unwrap_or_else(|| DEFAULT_ROLE_CLAIM.to_string()),
                username_claim: get(OAUTH_USERNAME_CLAIM_ENV)
                    .unwrap_or_else(|| "preferred_username".to_string()),
                email_claim: get(OAUTH_EMAIL_CLAIM_ENV).unwrap_or_else(|| "email".to_string()),
            }),
            None => None,
        };

        let saml = match get(SAML_IDP_ENTITY_ID_ENV) {
            Some(idp_entity_id) => {
                let metadata_url = get(SAML_METADATA_URL_ENV)
                    .map(|raw| parse_url(SAML_METADATA_URL_ENV, &raw))
                    .transpose()?;
                let idp_certificates = get(SAML_IDP_CERTIFICATE_ENV)
                    .map(|raw| parse_certificates(&raw))
                    .transpose()?
                    .unwrap_or_default();
                match (&metadata_url, idp_certificates.is_empty()) {
                    (None, true) => return Err(ConfigError::Missing(SAML_METADATA_URL_ENV)),
                    (Some(_), false) => {
                        return Err(ConfigError::Invalid {
                            var: SAML_IDP_CERTIFICATE_ENV,
                            reason: format!("set either {SAML_METADATA_URL_ENV} or {SAML_IDP_CERTIFICATE_ENV}"),
                        })
                    }
                    _ => {}
                }
                let acs_url = get(SAML_ACS_URL_ENV).ok_or(ConfigError::Missing(SAML_ACS_URL_ENV))?;
                parse_url(SAML_ACS_URL_ENV, &acs_url)?;

                Some(SamlConfig {
                    idp_entity_id,
                    metadata_url,
                    idp_certificates,
                    acs_url,
                    sp_entity_id: get(SAML_SP_ENTITY_ID_ENV),
                    signature_method: parse_var(
                        SAML_SIGNATURE_METHOD_ENV,
                        get(SAML_SIGNATURE_METHOD_ENV),
                        SignatureMethod::RsaSha256,
                    )?,
                    role_attribute: get(SAML_ROLE_ATTRIBUTE_ENV).unwrap_or_else(|| "Role".to_string()),
                    email_attribute: get(SAML_EMAIL_ATTRIBUTE_ENV).unwrap_or_else(|| "email".to_string()),
                })
            }
            None => None,
        };

        if oauth.is_none() && saml.is_none() {
            return Err(ConfigError::NoProtocol);
        }

        let role_mapping = match (get(ROLE_MAP_ENV), get(ROLE_MAP_FILE_ENV)) {
            (Some(inline), _) => parse_role_map(&inline)?,
            (None, Some(path)) => load_role_map(Path::new(&path))?,
            (None, None) => RoleMapping::default(),
        };

        let key_cache_ttl = parse_var(KEY_CACHE_TTL_SECS_ENV, get(KEY_CACHE_TTL_SECS_ENV), 300u64)?
            .clamp(*KEY_CACHE_TTL_RANGE.start(), *KEY_CACHE_TTL_RANGE.end());

        let log_format = match get(LOG_FORMAT_ENV).as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            host: get(HOST_ENV).unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_var(PORT_ENV, get(PORT_ENV), 8080)?,
            log_format,
            oauth,
            saml,
            role_mapping,
            clock_skew: secs(CLOCK_SKEW_SECS_ENV, get(CLOCK_SKEW_SECS_ENV), 60)?,
            key_cache_ttl: Duration::from_secs(key_cache_ttl),
            key_fetch_timeout: Duration::from_secs(positive(
                KEY_FETCH_TIMEOUT_SECS_ENV,
                get(KEY_FETCH_TIMEOUT_SECS_ENV),
                10,
            )?),
            principal_cache_ttl: secs(PRINCIPAL_CACHE_TTL_SECS_ENV, get(PRINCIPAL_CACHE_TTL_SECS_ENV), 60)?,
            principal_cache_capacity: positive(
                PRINCIPAL_CACHE_CAPACITY_ENV,
                get(PRINCIPAL_CACHE_CAPACITY_ENV),
                10_000,
            )?,
            pipeline_timeout: Duration::from_millis(positive(
                PIPELINE_TIMEOUT_MS_ENV,
                get(PIPELINE_TIMEOUT_MS_ENV),
                5_000,
            )?),
            sweep_interval: Duration::from_secs(positive(
                SWEEP_INTERVAL_SECS_ENV,
                get(SWEEP_INTERVAL_SECS_ENV),
                60,
            )?),
        })
    }

    /// `host:port` to bind.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(var: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

/// Like [`parse_var`], for settings where zero would stall or disable the
/// gateway.
fn positive<T>(var: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr + Default + PartialEq,
    T::Err: std::fmt::Display,
{
    let value = parse_var(var, raw, default)?;
    if value == T::default() {
        return Err(ConfigError::Invalid {
            var,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

fn secs(var: &'static str, raw: Option<String>, default: u64) -> Result<Duration, ConfigError> {
    parse_var(var, raw, default).map(Duration::from_secs)
}

fn parse_url(var: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::Invalid {
        var,
        reason: e.to_string(),
    })
}

fn parse_certificates(raw: &str) -> Result<Vec<Certificate>, ConfigError> {
    let now = chrono::Utc::now().timestamp();
    raw.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| {
            let cert = parse_certificate(part).map_err(|e| ConfigError::Invalid {
                var: SAML_IDP_CERTIFICATE_ENV,
                reason: e.to_string(),
            })?;
            if cert.is_expired_at(now) {
                return Err(ConfigError::Invalid {
                    var: SAML_IDP_CERTIFICATE_ENV,
                    reason: format!("certificate {} has expired", &cert.fingerprint[..12]),
                });
            }
            Ok(cert)
        })
        .collect()
}

fn parse_role_map(json: &str) -> Result<RoleMapping, ConfigError> {
    serde_json::from_str(json).map_err(|e| ConfigError::RoleMap(e.to_string()))
}

fn load_role_map(path: &Path) -> Result<RoleMapping, ConfigError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::RoleMap(format!("{}: {e}", path.display())))?;
    parse_role_map(&contents)
}
