// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Inbound credentials and their cache fingerprints.

use std::fmt;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

use super::claims::Protocol;

/// A credential presented for authentication.
#[derive(Clone, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(tag = "kind", content = "credential", rename_all = "snake_case")]
pub enum Credential {
    /// Compact JWT from an `Authorization: Bearer` header
    #[serde(rename = "bearer")]
    BearerToken(String),
    /// SAML response, Base64 or raw XML
    #[serde(rename = "saml")]
    SamlResponse(String),
}

impl Credential {
    pub fn protocol(&self) -> Protocol {
        match self {
            Credential::BearerToken(_) => Protocol::Oauth2,
            Credential::SamlResponse(_) => Protocol::Saml2,
        }
    }

    /// Raw credential text.
    pub fn raw(&self) -> &str {
        match self {
            Credential::BearerToken(raw) | Credential::SamlResponse(raw) => raw,
        }
    }

    /// SHA-256 over the protocol tag and the raw credential.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Sha256::new();
        hasher.update(self.protocol().as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.raw().as_bytes());
        Fingerprint(hasher.finalize().into())
    }
}

// Credentials are secrets; keep them out of logs and panics.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({}, {})", self.protocol(), self.fingerprint().short())
    }
}

/// Cache key identifying one credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// First 12 hex characters, safe to log.
    pub fn short(&self) -> String {
        self.0[..6].iter().map(|b| format!("{b:02x}")).collect()
    }

    pub(crate) fn shard(&self, shards: usize) -> usize {
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&self.0[..8]);
        (u64::from_le_bytes(prefix) % shards as u64) as usize
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_depends_on_protocol_and_bytes() {
        let bearer = Credential::BearerToken("abc".into());
        let saml = Credential::SamlResponse("abc".into());
        assert_eq!(bearer.fingerprint(), Credential::BearerToken("abc".into()).fingerprint());
        assert_ne!(bearer.fingerprint(), saml.fingerprint());
        assert_ne!(bearer.fingerprint(), Credential::BearerToken("abd".into()).fingerprint());
        assert_eq!(bearer.fingerprint().to_string().len(), 64);
        assert_eq!(bearer.fingerprint().short().len(), 12);
    }

    #[test]
    fn debug_output_hides_the_credential() {
        let credential = Credential::BearerToken("eyJhbGciOiJFUzI1NiJ9.secret.sig".into());
        let shown = format!("{credential:?}");
        assert!(!shown.contains("secret"));
        assert!(shown.starts_with("Credential(oauth2, "));
    }

    #[test]
    fn deserializes_tagged_requests() {
        let credential: Credential =
            serde_json::from_str(r#"{"kind": "saml", "credential": "PHNhbWxwOlJlc3BvbnNlLz4="}"#).unwrap();
        assert_eq!(credential.protocol(), Protocol::Saml2);

        let credential: Credential =
            serde_json::from_str(r#"{"kind": "bearer", "credential": "a.b.c"}"#).unwrap();
        assert_eq!(credential.raw(), "a.b.c");

        assert!(serde_json::from_str::<Credential>(r#"{"kind": "basic", "credential": "x"}"#).is_err());
    }
}
