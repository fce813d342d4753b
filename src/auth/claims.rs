// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Verified claims and the authenticated principal.
//!
//! Verifiers produce [`VerifiedClaims`] tagged by protocol. Only the claim
//! normalizer looks inside the [`ClaimSet`]; later stages work with flat
//! role lists and the terminal [`Principal`].

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Protocol the credential arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// OAuth2 bearer token (JWT)
    Oauth2,
    /// SAML2 response
    Saml2,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Oauth2 => "oauth2",
            Protocol::Saml2 => "saml2",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `saml:Attribute` from an attribute statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamlAttribute {
    /// `Name` attribute
    pub name: String,
    /// `FriendlyName` attribute, if present
    pub friendly_name: Option<String>,
    /// Attribute values in document order
    pub values: Vec<SamlAttributeValue>,
}

impl SamlAttribute {
    /// Whether this attribute answers to `key` by name or friendly name.
    pub fn matches(&self, key: &str) -> bool {
        self.name == key || self.friendly_name.as_deref() == Some(key)
    }
}

/// A single `saml:AttributeValue`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SamlAttributeValue {
    /// Plain text content
    Text(String),
    /// Value carrying child elements instead of text
    Structured,
}

/// Raw claims in the shape the provider delivered them.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimSet {
    /// JWT payload object
    Jwt(serde_json::Map<String, serde_json::Value>),
    /// SAML attribute statement contents
    Saml(Vec<SamlAttribute>),
}

impl ClaimSet {
    /// First string value of a claim or attribute.
    pub fn first_string(&self, key: &str) -> Option<&str> {
        match self {
            ClaimSet::Jwt(map) => map.get(key).and_then(|v| v.as_str()),
            ClaimSet::Saml(attributes) => attributes
                .iter()
                .filter(|a| a.matches(key))
                .flat_map(|a| a.values.iter())
                .find_map(|v| match v {
                    SamlAttributeValue::Text(text) => Some(text.as_str()),
                    SamlAttributeValue::Structured => None,
                }),
        }
    }
}

/// Claims that passed signature, lifetime and issuer checks.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedClaims {
    /// Issuer (`iss` or SAML `Issuer`)
    pub issuer: String,
    /// Subject (`sub` or SAML `NameID`)
    pub subject: String,
    /// Expiration (Unix timestamp)
    pub expires_at: i64,
    /// Protocol-specific claim payload
    pub claims: ClaimSet,
}

impl VerifiedClaims {
    pub fn protocol(&self) -> Protocol {
        match self.claims {
            ClaimSet::Jwt(_) => Protocol::Oauth2,
            ClaimSet::Saml(_) => Protocol::Saml2,
        }
    }
}

/// Authenticated principal handed back to the application server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Principal {
    /// Login name
    pub username: String,

    /// Email address, when the provider supplied one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Internal roles in first-seen order
    pub roles: Vec<String>,

    /// Credential expiration (Unix timestamp)
    pub expires_at: i64,

    /// Issuer the credential came from
    pub issuer: String,

    /// Protocol the credential arrived through
    pub protocol: Protocol,
}

impl Principal {
    /// Seconds until the credential expires, zero once it has.
    pub fn remaining_lifetime(&self, now: i64) -> u64 {
        self.expires_at.saturating_sub(now).max(0) as u64
    }
}
