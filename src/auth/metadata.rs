// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! SAML IdP metadata parsing.
//!
//! Extracts signing certificates from
//! `EntityDescriptor/IDPSSODescriptor/KeyDescriptor`. Key descriptors marked
//! `use="encryption"` are ignored; descriptors without a `use` attribute
//! count as signing keys. Certificates past their `notAfter` are skipped.

use roxmltree::{Document, Node};
use tracing::warn;

use super::certificate::parse_certificate;
use super::error::AuthError;
use super::keys::SigningKey;

pub(crate) const MD_NS: &str = "urn:oasis:names:tc:SAML:2.0:metadata";
pub(crate) const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";

/// Signing keys advertised for `entity_id` in a metadata document.
pub fn signing_keys(entity_id: &str, xml: &str) -> Result<Vec<SigningKey>, AuthError> {
    let doc = Document::parse(xml)
        .map_err(|e| AuthError::KeyResolution(format!("invalid metadata XML: {e}")))?;

    let entity = doc
        .descendants()
        .filter(|n| n.has_tag_name((MD_NS, "EntityDescriptor")))
        .find(|n| n.attribute("entityID") == Some(entity_id))
        .ok_or_else(|| {
            AuthError::KeyResolution(format!("metadata does not describe entity {entity_id}"))
        })?;

    let now = chrono::Utc::now().timestamp();
    let mut keys = Vec::new();
    for descriptor in entity
        .children()
        .filter(|n| n.has_tag_name((MD_NS, "IDPSSODescriptor")))
        .flat_map(|idp| idp.children())
        .filter(|n| n.has_tag_name((MD_NS, "KeyDescriptor")))
        .filter(|n| matches!(n.attribute("use"), None | Some("signing")))
    {
        for text in certificate_texts(descriptor) {
            match parse_certificate(text) {
                Ok(cert) if cert.is_expired_at(now) => {
                    warn!(entity_id = %entity_id, fingerprint = %cert.fingerprint, "Skipping expired metadata certificate")
                }
                Ok(cert) => keys.push(SigningKey::from_certificate(entity_id, cert)),
                Err(e) => warn!(entity_id = %entity_id, error = %e, "Skipping unreadable metadata certificate"),
            }
        }
    }

    if keys.is_empty() {
        return Err(AuthError::KeyResolution(format!(
            "metadata for {entity_id} has no signing certificates"
        )));
    }
    Ok(keys)
}

/// Text of every `ds:X509Certificate` under `node`.
pub(crate) fn certificate_texts<'a, 'input: 'a>(node: Node<'a, 'input>) -> Vec<&'a str> {
    node.descendants()
        .filter(|n| n.has_tag_name((DSIG_NS, "X509Certificate")))
        .filter_map(|n| n.text())
        .filter(|t| !t.trim().is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::SamlSigner;

    const ENTITY: &str = "https://idp.example.com/realms/demo";

    fn metadata(entity: &str, signing_cert: &str, enc_cert: &str) -> String {
        format!(
            r#"<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" xmlns:ds="http://www.w3.org/2000/09/xmldsig#" entityID="{entity}">
  <md:IDPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
    <md:KeyDescriptor use="signing">
      <ds:KeyInfo>
        <ds:KeyName>signing</ds:KeyName>
        <ds:X509Data>
          <ds:X509Certificate>
            {signing_cert}
          </ds:X509Certificate>
        </ds:X509Data>
      </ds:KeyInfo>
    </md:KeyDescriptor>
    <md:KeyDescriptor use="encryption">
      <ds:KeyInfo><ds:X509Data><ds:X509Certificate>{enc_cert}</ds:X509Certificate></ds:X509Data></ds:KeyInfo>
    </md:KeyDescriptor>
    <md:SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" Location="https://idp.example.com/sso"/>
  </md:IDPSSODescriptor>
</md:EntityDescriptor>"#
        )
    }

    #[test]
    fn extracts_bare_base64_signing_certificates() {
        let signing = SamlSigner::generate();
        let encryption = SamlSigner::generate();
        let xml = metadata(ENTITY, &signing.certificate_base64(), &encryption.certificate_base64());

        let keys = signing_keys(ENTITY, &xml).unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].key_id, signing.fingerprint());
        assert_eq!(keys[0].issuer, ENTITY);
        assert_eq!(keys[0].algorithm, "EC-P256");
    }

    #[test]
    fn other_entities_are_rejected() {
        let signing = SamlSigner::generate();
        let xml = metadata("https://other.example.com", &signing.certificate_base64(), "");

        assert!(matches!(
            signing_keys(ENTITY, &xml),
            Err(AuthError::KeyResolution(_))
        ));
    }

    #[test]
    fn expired_certificates_are_skipped() {
        let expired = SamlSigner::expired();
        let xml = metadata(ENTITY, &expired.certificate_base64(), "");
        assert!(matches!(
            signing_keys(ENTITY, &xml),
            Err(AuthError::KeyResolution(_))
        ));
    }

    #[test]
    fn metadata_without_certificates_is_an_error() {
        let xml = metadata(ENTITY, "", "");
        assert!(matches!(
            signing_keys(ENTITY, &xml),
            Err(AuthError::KeyResolution(_))
        ));
    }
}
