// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! X.509 certificate loading for SAML signature verification.
//!
//! IdP metadata publishes certificates as bare Base64 without PEM
//! delimiters. Callers hand that text over unchanged; wrapping and line
//! folding happen here.

use base64::{engine::general_purpose::STANDARD, Engine};
use sha2::{Digest, Sha256};
use x509_parser::prelude::{FromDer, X509Certificate};

use super::error::AuthError;

const PEM_TAG: &str = "CERTIFICATE";
const OID_RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";
const OID_EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";

/// Public key family carried by a certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicKeyKind {
    Rsa,
    EcP256,
    EcP384,
}

/// Parsed certificate with its verification key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    /// DER encoding
    pub der: Vec<u8>,
    /// Lowercase hex SHA-256 over the DER encoding
    pub fingerprint: String,
    /// Key family
    pub kind: PublicKeyKind,
    /// `RSAPublicKey` DER for RSA, uncompressed point for EC
    pub public_key: Vec<u8>,
    /// End of the validity period (Unix timestamp)
    pub not_after: i64,
}

impl Certificate {
    /// Whether the validity period ended at or before `now` (Unix seconds).
    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.not_after
    }
}

/// Wrap a certificate in PEM armor.
///
/// Input that already carries a `-----BEGIN` line is returned trimmed.
/// Anything else is treated as bare Base64, with any whitespace dropped,
/// and re-encoded with 64-character lines.
pub fn normalize_pem(raw: &str) -> Result<String, AuthError> {
    let trimmed = raw.trim();
    if trimmed.starts_with("-----BEGIN") {
        return Ok(trimmed.to_string());
    }

    let body: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    if body.is_empty() {
        return Err(AuthError::KeyResolution("empty certificate".to_string()));
    }
    let der = STANDARD
        .decode(body.as_bytes())
        .map_err(|e| AuthError::KeyResolution(format!("certificate is not valid base64: {e}")))?;

    let block = pem::Pem::new(PEM_TAG, der);
    Ok(pem::encode_config(
        &block,
        pem::EncodeConfig::new().set_line_ending(pem::LineEnding::LF),
    ))
}

/// Load a certificate from PEM or bare Base64 text.
pub fn parse_certificate(raw: &str) -> Result<Certificate, AuthError> {
    let armored = normalize_pem(raw)?;
    let block = pem::parse(armored.as_bytes())
        .map_err(|e| AuthError::KeyResolution(format!("invalid certificate PEM: {e}")))?;
    if block.tag() != PEM_TAG {
        return Err(AuthError::KeyResolution(format!(
            "expected a {PEM_TAG} block, found {}",
            block.tag()
        )));
    }
    certificate_from_der(block.contents())
}

/// Extract the verification key from a DER certificate.
pub fn certificate_from_der(der: &[u8]) -> Result<Certificate, AuthError> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| AuthError::KeyResolution(format!("invalid X.509 certificate: {e}")))?;

    let spki = cert.public_key();
    let public_key = spki.subject_public_key.data.to_vec();
    let kind = match spki.algorithm.algorithm.to_id_string().as_str() {
        OID_RSA_ENCRYPTION => PublicKeyKind::Rsa,
        // Curve follows from the uncompressed point length (0x04 || X || Y).
        OID_EC_PUBLIC_KEY => match public_key.len() {
            65 => PublicKeyKind::EcP256,
            97 => PublicKeyKind::EcP384,
            other => {
                return Err(AuthError::KeyResolution(format!(
                    "unsupported EC point length {other}"
                )))
            }
        },
        other => {
            return Err(AuthError::KeyResolution(format!(
                "unsupported certificate key algorithm {other}"
            )))
        }
    };

    Ok(Certificate {
        der: der.to_vec(),
        fingerprint: fingerprint(der),
        kind,
        public_key,
        not_after: cert.validity().not_after.timestamp(),
    })
}

/// Lowercase hex SHA-256 of a DER certificate.
pub fn fingerprint(der: &[u8]) -> String {
    Sha256::digest(der)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_signed_der() -> Vec<u8> {
        let cert = rcgen::generate_simple_self_signed(vec!["idp.example.com".into()]).unwrap();
        cert.serialize_der().unwrap()
    }

    #[test]
    fn bare_base64_is_wrapped_and_folded() {
        let der = self_signed_der();
        let bare = STANDARD.encode(&der);

        let armored = normalize_pem(&bare).unwrap();
        assert!(armored.starts_with("-----BEGIN CERTIFICATE-----\n"));
        assert!(armored.trim_end().ends_with("-----END CERTIFICATE-----"));
        assert!(armored.lines().all(|line| line.len() <= 64));
    }

    #[test]
    fn metadata_style_whitespace_is_tolerated() {
        let der = self_signed_der();
        let bare = STANDARD.encode(&der);
        let (head, tail) = bare.split_at(40);
        let indented = format!("\n        {head}\n        {tail}\n    ");

        let cert = parse_certificate(&indented).unwrap();
        assert_eq!(cert.der, der);
        assert_eq!(cert.kind, PublicKeyKind::EcP256);
        assert_eq!(cert.public_key.len(), 65);
    }

    #[test]
    fn pem_input_is_accepted_unchanged() {
        let der = self_signed_der();
        let armored = pem::encode(&pem::Pem::new("CERTIFICATE", der.clone()));

        let cert = parse_certificate(&armored).unwrap();
        assert_eq!(cert.der, der);
        assert_eq!(cert.fingerprint, fingerprint(&der));
        assert_eq!(cert.fingerprint.len(), 64);
    }

    #[test]
    fn expiry_follows_not_after() {
        let current = crate::test_support::SamlSigner::generate().certificate();
        assert!(!current.is_expired_at(chrono::Utc::now().timestamp()));

        let expired = crate::test_support::SamlSigner::expired().certificate();
        assert_eq!(expired.not_after, 1_609_459_200);
        assert!(expired.is_expired_at(chrono::Utc::now().timestamp()));
        assert!(!expired.is_expired_at(1_609_459_199));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            parse_certificate("not a certificate"),
            Err(AuthError::KeyResolution(_))
        ));
        assert!(matches!(
            parse_certificate("   "),
            Err(AuthError::KeyResolution(_))
        ));
        assert!(matches!(
            parse_certificate("AAAA"),
            Err(AuthError::KeyResolution(_))
        ));
    }
}
