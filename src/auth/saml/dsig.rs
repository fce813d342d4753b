// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Enveloped XML-DSig verification.
//!
//! Handles the subset identity providers emit for SAML: one same-document
//! `Reference`, the enveloped-signature transform followed by a
//! canonicalization transform, SHA-2 digests, and RSA or ECDSA signatures.

use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD, Engine};
use ring::signature::{self, UnparsedPublicKey, VerificationAlgorithm};
use roxmltree::{Document, Node, NodeId};
use sha2::{Digest, Sha256, Sha384, Sha512};

use super::c14n::{self, Method};
use crate::auth::certificate::{Certificate, PublicKeyKind};
use crate::auth::error::AuthError;
use crate::auth::metadata::DSIG_NS;

const ENVELOPED: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
const EXC_C14N_NS: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";

/// Signature algorithm a deployment accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureMethod {
    RsaSha256,
    RsaSha512,
    EcdsaSha256,
    EcdsaSha384,
}

impl SignatureMethod {
    pub fn uri(&self) -> &'static str {
        match self {
            SignatureMethod::RsaSha256 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256",
            SignatureMethod::RsaSha512 => "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512",
            SignatureMethod::EcdsaSha256 => "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256",
            SignatureMethod::EcdsaSha384 => "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha384",
        }
    }

    fn verification_algorithm(
        &self,
        kind: PublicKeyKind,
    ) -> Option<&'static dyn VerificationAlgorithm> {
        match (self, kind) {
            (SignatureMethod::RsaSha256, PublicKeyKind::Rsa) => {
                Some(&signature::RSA_PKCS1_2048_8192_SHA256)
            }
            (SignatureMethod::RsaSha512, PublicKeyKind::Rsa) => {
                Some(&signature::RSA_PKCS1_2048_8192_SHA512)
            }
            (SignatureMethod::EcdsaSha256, PublicKeyKind::EcP256) => {
                Some(&signature::ECDSA_P256_SHA256_FIXED)
            }
            (SignatureMethod::EcdsaSha384, PublicKeyKind::EcP384) => {
                Some(&signature::ECDSA_P384_SHA384_FIXED)
            }
            _ => None,
        }
    }
}

impl FromStr for SignatureMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rsa-sha256" => Ok(SignatureMethod::RsaSha256),
            "rsa-sha512" => Ok(SignatureMethod::RsaSha512),
            "ecdsa-sha256" => Ok(SignatureMethod::EcdsaSha256),
            "ecdsa-sha384" => Ok(SignatureMethod::EcdsaSha384),
            other => Err(format!("unsupported signature method: {other}")),
        }
    }
}

enum DigestMethod {
    Sha256,
    Sha384,
    Sha512,
}

impl DigestMethod {
    fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            "http://www.w3.org/2001/04/xmlenc#sha256" => Some(DigestMethod::Sha256),
            "http://www.w3.org/2001/04/xmldsig-more#sha384" => Some(DigestMethod::Sha384),
            "http://www.w3.org/2001/04/xmlenc#sha512" => Some(DigestMethod::Sha512),
            _ => None,
        }
    }

    fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            DigestMethod::Sha256 => Sha256::digest(data).to_vec(),
            DigestMethod::Sha384 => Sha384::digest(data).to_vec(),
            DigestMethod::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

/// Result of a successful signature check.
#[derive(Debug, Clone, Copy)]
pub struct Verified {
    /// Element the signature's reference points at
    pub referenced: NodeId,
}

/// Verify one `ds:Signature` element against a certificate.
///
/// Checks the reference digest first, then the signature over the
/// canonical `SignedInfo`. `allowed` is the only accepted
/// `SignatureMethod`.
pub fn verify(
    doc: &Document<'_>,
    sig: Node<'_, '_>,
    cert: &Certificate,
    allowed: SignatureMethod,
) -> Result<Verified, AuthError> {
    let signed_info = ds_child(sig, "SignedInfo")?;

    let c14n_node = ds_child(signed_info, "CanonicalizationMethod")?;
    let c14n_method = c14n_method(c14n_node)?;

    let method_uri = ds_child(signed_info, "SignatureMethod")?
        .attribute("Algorithm")
        .unwrap_or("");
    if method_uri != allowed.uri() {
        return Err(invalid(format!("signature method {method_uri} is not accepted")));
    }

    let references: Vec<_> = signed_info
        .children()
        .filter(|n| n.has_tag_name((DSIG_NS, "Reference")))
        .collect();
    let [reference] = references.as_slice() else {
        return Err(invalid("expected exactly one Reference"));
    };
    let referenced = check_reference(doc, sig, *reference)?;

    let signature_value = decode_base64(ds_child(sig, "SignatureValue")?.text().unwrap_or(""))?;
    let algorithm = allowed
        .verification_algorithm(cert.kind)
        .ok_or_else(|| invalid("certificate key does not match the signature method"))?;
    let canonical = c14n::canonicalize(doc, signed_info, &c14n_method, None);
    UnparsedPublicKey::new(algorithm, &cert.public_key)
        .verify(canonical.as_bytes(), &signature_value)
        .map_err(|_| invalid("signature value does not verify"))?;

    Ok(Verified { referenced })
}

/// Certificate text carried in the signature's `KeyInfo`, if any.
pub fn embedded_certificate<'a>(sig: Node<'a, '_>) -> Option<&'a str> {
    sig.children()
        .find(|n| n.has_tag_name((DSIG_NS, "KeyInfo")))
        .and_then(|info| {
            info.descendants()
                .find(|n| n.has_tag_name((DSIG_NS, "X509Certificate")))
        })
        .and_then(|n| n.text())
}

fn check_reference(
    doc: &Document<'_>,
    sig: Node<'_, '_>,
    reference: Node<'_, '_>,
) -> Result<NodeId, AuthError> {
    let id = reference
        .attribute("URI")
        .and_then(|uri| uri.strip_prefix('#'))
        .filter(|id| !id.is_empty())
        .ok_or_else(|| invalid("Reference must point at an element ID"))?;

    let mut targets = doc
        .descendants()
        .filter(|n| n.is_element() && n.attribute("ID") == Some(id));
    let target = targets
        .next()
        .ok_or_else(|| invalid(format!("referenced element {id} not found")))?;
    if targets.next().is_some() {
        return Err(invalid(format!("element ID {id} is not unique")));
    }

    let mut omit = None;
    let mut method = Method::Inclusive;
    if let Some(transforms) = reference
        .children()
        .find(|n| n.has_tag_name((DSIG_NS, "Transforms")))
    {
        for transform in transforms
            .children()
            .filter(|n| n.has_tag_name((DSIG_NS, "Transform")))
        {
            match transform.attribute("Algorithm") {
                Some(ENVELOPED) => omit = Some(sig.id()),
                Some(_) => method = c14n_method(transform)?,
                None => return Err(invalid("Transform without Algorithm")),
            }
        }
    }

    let digest_uri = ds_child(reference, "DigestMethod")?
        .attribute("Algorithm")
        .unwrap_or("");
    let digest_method = DigestMethod::from_uri(digest_uri)
        .ok_or_else(|| invalid(format!("unsupported digest method {digest_uri}")))?;
    let expected = decode_base64(ds_child(reference, "DigestValue")?.text().unwrap_or(""))?;

    let canonical = c14n::canonicalize(doc, target, &method, omit);
    if digest_method.digest(canonical.as_bytes()) != expected {
        return Err(invalid(format!("digest mismatch for {id}")));
    }
    Ok(target.id())
}

fn c14n_method(node: Node<'_, '_>) -> Result<Method, AuthError> {
    let uri = node.attribute("Algorithm").unwrap_or("");
    let prefixes = node
        .children()
        .find(|n| n.has_tag_name((EXC_C14N_NS, "InclusiveNamespaces")))
        .and_then(|n| n.attribute("PrefixList"))
        .map(|list| list.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();
    Method::from_uri(uri, prefixes)
        .ok_or_else(|| invalid(format!("unsupported canonicalization {uri}")))
}

fn ds_child<'a, 'input>(
    node: Node<'a, 'input>,
    name: &str,
) -> Result<Node<'a, 'input>, AuthError> {
    node.children()
        .find(|n| n.has_tag_name((DSIG_NS, name)))
        .ok_or_else(|| invalid(format!("missing ds:{name}")))
}

fn decode_base64(text: &str) -> Result<Vec<u8>, AuthError> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|_| invalid("invalid base64 in signature"))
}

fn invalid(reason: impl Into<String>) -> AuthError {
    AuthError::SignatureInvalid(reason.into())
}
