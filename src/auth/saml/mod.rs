// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # SAML2 Assertion Verification
//!
//! Validates a SAML response posted by the identity provider and returns
//! its claims.
//!
//! ## Checks (in order)
//!
//! 1. Exactly one plaintext `saml:Assertion` (encrypted assertions are not
//!    supported)
//! 2. An XML-DSig signature whose reference covers the assertion (the
//!    assertion itself or an enclosing `samlp:Response`)
//! 3. Issuer equals the configured IdP entity id
//! 4. `Conditions` and `SubjectConfirmationData` validity windows, with
//!    clock skew
//! 5. `Destination` / `Recipient` equal the ACS URL
//! 6. `AudienceRestriction` lists the SP entity id, when one is configured
//!
//! Signature verification runs on a parsed tree that never crosses an
//! `.await`: key hints are collected first, keys are resolved, then the
//! document is parsed again for the actual checks.

pub mod c14n;
pub mod dsig;

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use roxmltree::{Document, Node};
use tracing::debug;

use super::certificate::{parse_certificate, Certificate};
use super::claims::{ClaimSet, SamlAttribute, SamlAttributeValue, VerifiedClaims};
use super::error::AuthError;
use super::keys::KeyResolver;
use super::metadata::DSIG_NS;
use crate::config::SamlConfig;

pub use dsig::SignatureMethod;

pub(crate) const SAML_NS: &str = "urn:oasis:names:tc:SAML:2.0:assertion";
pub(crate) const SAMLP_NS: &str = "urn:oasis:names:tc:SAML:2.0:protocol";

const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";

/// Upper bound on a decoded SAML response.
pub const MAX_RESPONSE_BYTES: usize = 512 * 1024;

/// SAML response verifier bound to one identity provider.
#[derive(Clone)]
pub struct AssertionVerifier {
    config: SamlConfig,
    clock_skew: Duration,
    keys: KeyResolver,
}

impl AssertionVerifier {
    pub fn new(config: SamlConfig, clock_skew: Duration, keys: KeyResolver) -> Self {
        Self {
            config,
            clock_skew,
            keys,
        }
    }

    /// Configured IdP entity id.
    pub fn issuer(&self) -> &str {
        &self.config.idp_entity_id
    }

    /// Verify a SAML response given as Base64 or raw XML.
    pub async fn verify(&self, raw: &str) -> Result<VerifiedClaims, AuthError> {
        self.verify_at(raw, chrono::Utc::now().timestamp()).await
    }

    async fn verify_at(&self, raw: &str, now: i64) -> Result<VerifiedClaims, AuthError> {
        let xml = decode_response(raw)?;
        let hints = {
            let doc = parse(&xml)?;
            let assertion = single_assertion(&doc)?;
            signatures(&doc, assertion)
                .into_iter()
                .map(|sig| dsig::embedded_certificate(sig).map(str::to_string))
                .collect::<Vec<_>>()
        };
        if hints.is_empty() {
            return Err(AuthError::SignatureInvalid("assertion is not signed".to_string()));
        }

        let certificates = self.candidate_certificates(&hints, now).await?;
        self.check(&xml, &certificates, now)
    }

    /// Trusted certificates that may have produced the signatures.
    ///
    /// An embedded certificate is only a hint: it must match a key the
    /// resolver already trusts for the IdP. Certificates past their validity
    /// period never verify anything.
    async fn candidate_certificates(
        &self,
        hints: &[Option<String>],
        now: i64,
    ) -> Result<Vec<Certificate>, AuthError> {
        let issuer = self.issuer();
        let mut certificates = Vec::new();
        for hint in hints.iter().flatten() {
            let embedded = parse_certificate(hint)
                .map_err(|_| AuthError::SignatureInvalid("unreadable KeyInfo certificate".to_string()))?;
            let key = self.keys.resolve(issuer, &embedded.fingerprint).await?;
            certificates.extend(key.certificate().cloned());
        }
        if certificates.is_empty() {
            certificates = self
                .keys
                .keys_for(issuer)
                .await?
                .iter()
                .filter_map(|k| k.certificate().cloned())
                .collect();
        }
        if certificates.is_empty() {
            return Err(AuthError::KeyUnavailable(issuer.to_string()));
        }
        certificates.retain(|cert| !cert.is_expired_at(now));
        if certificates.is_empty() {
            return Err(AuthError::SignatureInvalid(
                "signing certificate has expired".to_string(),
            ));
        }
        Ok(certificates)
    }

    fn check(
        &self,
        xml: &str,
        certificates: &[Certificate],
        now: i64,
    ) -> Result<VerifiedClaims, AuthError> {
        let doc = parse(xml)?;
        let root = doc.root_element();
        let assertion = single_assertion(&doc)?;

        self.check_signature(&doc, assertion, certificates)?;

        if root.has_tag_name((SAMLP_NS, "Response")) {
            check_status(root)?;
            if let Some(issuer) = child(root, SAML_NS, "Issuer").and_then(|n| n.text()) {
                if issuer.trim() != self.config.idp_entity_id {
                    return Err(AuthError::IssuerMismatch);
                }
            }
        }
        let issuer = child(assertion, SAML_NS, "Issuer")
            .and_then(|n| n.text())
            .map(str::trim)
            .ok_or_else(|| malformed("assertion has no Issuer"))?;
        if issuer != self.config.idp_entity_id {
            return Err(AuthError::IssuerMismatch);
        }

        let expires_at = self.check_validity(assertion, now)?;
        self.check_destination(root, assertion)?;
        self.check_audience(assertion)?;

        let subject = child(assertion, SAML_NS, "Subject")
            .and_then(|s| child(s, SAML_NS, "NameID"))
            .and_then(|n| n.text())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| malformed("assertion has no Subject NameID"))?;

        Ok(VerifiedClaims {
            issuer: issuer.to_string(),
            subject: subject.to_string(),
            expires_at,
            claims: ClaimSet::Saml(attributes(assertion)),
        })
    }

    fn check_signature(
        &self,
        doc: &Document<'_>,
        assertion: Node<'_, '_>,
        certificates: &[Certificate],
    ) -> Result<(), AuthError> {
        let mut last_error =
            AuthError::SignatureInvalid("assertion is not signed".to_string());
        for sig in signatures(doc, assertion) {
            for cert in certificates {
                match dsig::verify(doc, sig, cert, self.config.signature_method) {
                    Ok(verified) if assertion.ancestors().any(|n| n.id() == verified.referenced) => {
                        debug!(fingerprint = %&cert.fingerprint[..12], "SAML signature verified");
                        return Ok(());
                    }
                    Ok(_) => {
                        last_error = AuthError::SignatureInvalid(
                            "signature does not cover the assertion".to_string(),
                        )
                    }
                    Err(e) => last_error = e,
                }
            }
        }
        Err(last_error)
    }

    /// Enforce validity windows and return the earliest `NotOnOrAfter`.
    fn check_validity(&self, assertion: Node<'_, '_>, now: i64) -> Result<i64, AuthError> {
        let skew = self.clock_skew.as_secs() as i64;
        let mut expires_at: Option<i64> = None;
        let mut bound = |not_on_or_after: i64| {
            expires_at = Some(expires_at.map_or(not_on_or_after, |e| e.min(not_on_or_after)));
        };

        if let Some(conditions) = child(assertion, SAML_NS, "Conditions") {
            if let Some(not_before) = time_attribute(conditions, "NotBefore")? {
                if now + skew < not_before {
                    return Err(AuthError::AssertionExpired);
                }
            }
            if let Some(not_on_or_after) = time_attribute(conditions, "NotOnOrAfter")? {
                if now - skew >= not_on_or_after {
                    return Err(AuthError::AssertionExpired);
                }
                bound(not_on_or_after);
            }
        }

        for data in confirmation_data(assertion) {
            if let Some(not_on_or_after) = time_attribute(data, "NotOnOrAfter")? {
                if now - skew >= not_on_or_after {
                    return Err(AuthError::AssertionExpired);
                }
                bound(not_on_or_after);
            }
        }

        expires_at.ok_or_else(|| malformed("assertion has no NotOnOrAfter bound"))
    }

    fn check_destination(&self, root: Node<'_, '_>, assertion: Node<'_, '_>) -> Result<(), AuthError> {
        let destination = root
            .has_tag_name((SAMLP_NS, "Response"))
            .then(|| root.attribute("Destination"))
            .flatten();
        let targets: Vec<&str> = destination
            .into_iter()
            .chain(confirmation_data(assertion).filter_map(|d| d.attribute("Recipient")))
            .collect();

        if targets.is_empty() || targets.iter().any(|t| *t != self.config.acs_url) {
            return Err(AuthError::DestinationMismatch);
        }
        Ok(())
    }

    fn check_audience(&self, assertion: Node<'_, '_>) -> Result<(), AuthError> {
        let Some(sp_entity_id) = self.config.sp_entity_id.as_deref() else {
            return Ok(());
        };
        let restrictions: Vec<_> = child(assertion, SAML_NS, "Conditions")
            .into_iter()
            .flat_map(|c| c.children())
            .filter(|n| n.has_tag_name((SAML_NS, "AudienceRestriction")))
            .collect();
        let all_list_us = restrictions.iter().all(|r| {
            r.children()
                .filter(|n| n.has_tag_name((SAML_NS, "Audience")))
                .any(|a| a.text().map(str::trim) == Some(sp_entity_id))
        });
        if restrictions.is_empty() || !all_list_us {
            return Err(AuthError::AudienceMismatch);
        }
        Ok(())
    }
}

/// Accept raw XML or standard Base64 (whitespace tolerated).
fn decode_response(raw: &str) -> Result<String, AuthError> {
    let trimmed = raw.trim();
    let xml = if trimmed.starts_with('<') {
        trimmed.to_string()
    } else {
        let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.len() > MAX_RESPONSE_BYTES * 4 / 3 + 4 {
            return Err(malformed("SAML response too large"));
        }
        let bytes = STANDARD
            .decode(compact.as_bytes())
            .map_err(|_| malformed("SAML response is not valid base64"))?;
        String::from_utf8(bytes).map_err(|_| malformed("SAML response is not UTF-8"))?
    };
    if xml.len() > MAX_RESPONSE_BYTES {
        return Err(malformed("SAML response too large"));
    }
    Ok(xml)
}

fn parse(xml: &str) -> Result<Document<'_>, AuthError> {
    // roxmltree rejects DTDs unless explicitly allowed.
    Document::parse(xml).map_err(|e| malformed(format!("invalid XML: {e}")))
}

fn single_assertion<'a, 'input>(doc: &'a Document<'input>) -> Result<Node<'a, 'input>, AuthError> {
    if doc
        .descendants()
        .any(|n| n.has_tag_name((SAML_NS, "EncryptedAssertion")))
    {
        return Err(malformed("encrypted assertions are not supported"));
    }
    let mut assertions = doc
        .descendants()
        .filter(|n| n.has_tag_name((SAML_NS, "Assertion")));
    match (assertions.next(), assertions.next()) {
        (Some(assertion), None) => Ok(assertion),
        (None, _) => Err(malformed("no Assertion found")),
        (Some(_), Some(_)) => Err(malformed("expected exactly one Assertion")),
    }
}

/// Signatures that may cover the assertion: direct children of the
/// assertion and of an enclosing response.
fn signatures<'a, 'input>(
    doc: &'a Document<'input>,
    assertion: Node<'a, 'input>,
) -> Vec<Node<'a, 'input>> {
    let root = doc.root_element();
    let mut holders = vec![assertion];
    if root != assertion && root.has_tag_name((SAMLP_NS, "Response")) {
        holders.push(root);
    }
    holders
        .into_iter()
        .flat_map(|holder| holder.children())
        .filter(|n| n.has_tag_name((DSIG_NS, "Signature")))
        .collect()
}

fn check_status(response: Node<'_, '_>) -> Result<(), AuthError> {
    let code = child(response, SAMLP_NS, "Status")
        .and_then(|s| child(s, SAMLP_NS, "StatusCode"))
        .and_then(|c| c.attribute("Value"));
    match code {
        Some(STATUS_SUCCESS) => Ok(()),
        Some(other) => Err(malformed(format!("identity provider returned status {other}"))),
        None => Err(malformed("response has no StatusCode")),
    }
}

fn confirmation_data<'a, 'input: 'a>(
    assertion: Node<'a, 'input>,
) -> impl Iterator<Item = Node<'a, 'input>> {
    child(assertion, SAML_NS, "Subject")
        .into_iter()
        .flat_map(|s| s.children())
        .filter(|n| n.has_tag_name((SAML_NS, "SubjectConfirmation")))
        .flat_map(|c| c.children())
        .filter(|n| n.has_tag_name((SAML_NS, "SubjectConfirmationData")))
}

fn attributes(assertion: Node<'_, '_>) -> Vec<SamlAttribute> {
    assertion
        .children()
        .filter(|n| n.has_tag_name((SAML_NS, "AttributeStatement")))
        .flat_map(|s| s.children())
        .filter(|n| n.has_tag_name((SAML_NS, "Attribute")))
        .filter_map(|attr| {
            Some(SamlAttribute {
                name: attr.attribute("Name")?.to_string(),
                friendly_name: attr.attribute("FriendlyName").map(str::to_string),
                values: attr
                    .children()
                    .filter(|n| n.has_tag_name((SAML_NS, "AttributeValue")))
                    .map(|v| {
                        if v.children().any(|c| c.is_element()) {
                            SamlAttributeValue::Structured
                        } else {
                            SamlAttributeValue::Text(v.text().unwrap_or("").trim().to_string())
                        }
                    })
                    .collect(),
            })
        })
        .collect()
}

fn time_attribute(node: Node<'_, '_>, name: &str) -> Result<Option<i64>, AuthError> {
    node.attribute(name)
        .map(|value| {
            chrono::DateTime::parse_from_rfc3339(value)
                .map(|t| t.timestamp())
                .map_err(|_| malformed(format!("invalid {name} timestamp")))
        })
        .transpose()
}

fn child<'a, 'input>(node: Node<'a, 'input>, ns: &str, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name((ns, name)))
}

fn malformed(reason: impl Into<String>) -> AuthError {
    AuthError::MalformedAssertion(reason.into())
}
