// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Flattening of protocol-specific claims into a role list.
//!
//! Each protocol has exactly one configured role location: a top-level JWT
//! claim, or a SAML attribute matched by `Name` or `FriendlyName`. The value
//! there must already be a flat list of strings. Nested shapes such as
//! Keycloak's `realm_access.roles` are never traversed; an IdP mapper has to
//! flatten them into a top-level claim first.

use serde_json::Value;

use super::claims::{ClaimSet, Protocol, SamlAttributeValue, VerifiedClaims};
use super::error::AuthError;

/// Ordered, duplicate-free role names (first occurrence wins).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedRoles(Vec<String>);

impl NormalizedRoles {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    fn push(&mut self, role: String) {
        if !self.0.contains(&role) {
            self.0.push(role);
        }
    }
}

impl FromIterator<String> for NormalizedRoles {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        let mut roles = NormalizedRoles::default();
        for role in iter {
            roles.push(role);
        }
        roles
    }
}

/// Where identity and role data live for one protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimPaths {
    /// Claim or attribute holding the role list
    pub roles: String,
    /// Claim or attribute holding the login name; the subject when absent
    pub username: Option<String>,
    /// Claim or attribute holding the email address
    pub email: Option<String>,
}

/// Who the verified claims describe, before role mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub email: Option<String>,
    pub issuer: String,
    pub protocol: Protocol,
}

/// Extracts identity and roles from verified claims.
#[derive(Debug, Clone)]
pub struct ClaimNormalizer {
    oauth: ClaimPaths,
    saml: ClaimPaths,
}

impl ClaimNormalizer {
    pub fn new(oauth: ClaimPaths, saml: ClaimPaths) -> Self {
        Self { oauth, saml }
    }

    fn paths(&self, protocol: Protocol) -> &ClaimPaths {
        match protocol {
            Protocol::Oauth2 => &self.oauth,
            Protocol::Saml2 => &self.saml,
        }
    }

    /// Flat role list from the configured claim.
    ///
    /// Fails with `RolesNotFound` when the claim is absent, is not a list,
    /// or holds anything but strings. An empty list is valid.
    pub fn normalize(&self, claims: &VerifiedClaims) -> Result<NormalizedRoles, AuthError> {
        let key = &self.paths(claims.protocol()).roles;
        let not_found = || AuthError::RolesNotFound(key.clone());

        match &claims.claims {
            ClaimSet::Jwt(map) => match map.get(key) {
                Some(Value::Array(items)) => items
                    .iter()
                    .map(|item| item.as_str().map(str::to_string).ok_or_else(not_found))
                    .collect(),
                _ => Err(not_found()),
            },
            ClaimSet::Saml(attributes) => {
                let mut matching = attributes.iter().filter(|a| a.matches(key)).peekable();
                if matching.peek().is_none() {
                    return Err(not_found());
                }
                matching
                    .flat_map(|a| a.values.iter())
                    .map(|value| match value {
                        SamlAttributeValue::Text(text) => Ok(text.clone()),
                        SamlAttributeValue::Structured => Err(not_found()),
                    })
                    .collect()
            }
        }
    }

    /// Login name and email for the principal.
    pub fn identity(&self, claims: &VerifiedClaims) -> Identity {
        let paths = self.paths(claims.protocol());
        let username = paths
            .username
            .as_deref()
            .and_then(|key| claims.claims.first_string(key))
            .unwrap_or(&claims.subject)
            .to_string();
        let email = paths
            .email
            .as_deref()
            .and_then(|key| claims.claims.first_string(key))
            .map(str::to_string);
        Identity {
            username,
            email,
            issuer: claims.issuer.clone(),
            protocol: claims.protocol(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::SamlAttribute;
    use serde_json::json;

    fn normalizer() -> ClaimNormalizer {
        ClaimNormalizer::new(
            ClaimPaths {
                roles: "marklogic-roles".into(),
                username: Some("preferred_username".into()),
                email: Some("email".into()),
            },
            ClaimPaths {
                roles: "Role".into(),
                username: None,
                email: Some("email".into()),
            },
        )
    }

    fn jwt(payload: Value) -> VerifiedClaims {
        VerifiedClaims {
            issuer: "https://idp.example.com".into(),
            subject: "sub-1".into(),
            expires_at: 0,
            claims: ClaimSet::Jwt(payload.as_object().unwrap().clone()),
        }
    }

    fn saml(attributes: Vec<SamlAttribute>) -> VerifiedClaims {
        VerifiedClaims {
            issuer: "https://idp.example.com".into(),
            subject: "alice".into(),
            expires_at: 0,
            claims: ClaimSet::Saml(attributes),
        }
    }

    fn text_attribute(name: &str, friendly: Option<&str>, values: &[&str]) -> SamlAttribute {
        SamlAttribute {
            name: name.into(),
            friendly_name: friendly.map(Into::into),
            values: values
                .iter()
                .map(|v| SamlAttributeValue::Text(v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn duplicates_collapse_in_first_seen_order() {
        let roles = normalizer()
            .normalize(&jwt(json!({ "marklogic-roles": ["a", "b", "a"] })))
            .unwrap();
        assert_eq!(roles.len(), 2);
        assert_eq!(roles.as_slice(), ["a", "b"]);
    }

    #[test]
    fn nested_realm_access_is_not_found() {
        let err = normalizer()
            .normalize(&jwt(json!({ "realm_access": { "roles": ["a"] } })))
            .unwrap_err();
        assert_eq!(err, AuthError::RolesNotFound("marklogic-roles".into()));
    }

    #[test]
    fn non_list_shapes_fail_closed() {
        let n = normalizer();
        for payload in [
            json!({ "marklogic-roles": "admin" }),
            json!({ "marklogic-roles": ["a", 1] }),
            json!({ "marklogic-roles": [["a"]] }),
            json!({ "marklogic-roles": { "roles": ["a"] } }),
            json!({ "marklogic-roles": null }),
        ] {
            assert!(matches!(
                n.normalize(&jwt(payload)),
                Err(AuthError::RolesNotFound(_))
            ));
        }
    }

    #[test]
    fn matching_is_case_sensitive() {
        let roles = normalizer()
            .normalize(&jwt(json!({ "marklogic-roles": ["Admin", "admin"] })))
            .unwrap();
        assert_eq!(roles.as_slice(), ["Admin", "admin"]);
    }

    #[test]
    fn empty_list_is_valid() {
        let roles = normalizer()
            .normalize(&jwt(json!({ "marklogic-roles": [] })))
            .unwrap();
        assert!(roles.is_empty());
    }

    #[test]
    fn saml_attributes_merge_by_name_or_friendly_name() {
        let claims = saml(vec![
            text_attribute("urn:oid:1.3.6.1.4.1.5923.1.1.1.7", Some("Role"), &["a", "b"]),
            text_attribute("Role", None, &["b", "c"]),
            text_attribute("groups", None, &["x"]),
        ]);
        let roles = normalizer().normalize(&claims).unwrap();
        assert_eq!(roles.iter().collect::<Vec<_>>(), ["a", "b", "c"]);
    }

    #[test]
    fn structured_saml_values_fail_closed() {
        let claims = saml(vec![SamlAttribute {
            name: "Role".into(),
            friendly_name: None,
            values: vec![
                SamlAttributeValue::Text("a".into()),
                SamlAttributeValue::Structured,
            ],
        }]);
        assert!(matches!(
            normalizer().normalize(&claims),
            Err(AuthError::RolesNotFound(_))
        ));
        assert!(matches!(
            normalizer().normalize(&saml(Vec::new())),
            Err(AuthError::RolesNotFound(_))
        ));
    }

    #[test]
    fn identity_prefers_configured_claims() {
        let n = normalizer();
        let with_name = n.identity(&jwt(json!({
            "preferred_username": "alice",
            "email": "alice@example.com",
        })));
        assert_eq!(with_name.username, "alice");
        assert_eq!(with_name.email.as_deref(), Some("alice@example.com"));
        assert_eq!(with_name.protocol, Protocol::Oauth2);

        let fallback = n.identity(&jwt(json!({})));
        assert_eq!(fallback.username, "sub-1");
        assert_eq!(fallback.email, None);

        let saml_identity = n.identity(&saml(vec![text_attribute("email", None, &["bob@example.com"])]));
        assert_eq!(saml_identity.username, "alice");
        assert_eq!(saml_identity.email.as_deref(), Some("bob@example.com"));
    }
}
