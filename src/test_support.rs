// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Key material and credential builders shared by unit tests.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, KeyPair, RsaKeyPair, ECDSA_P256_SHA256_FIXED_SIGNING, RSA_PKCS1_SHA256,
};
use roxmltree::Document;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::auth::certificate::{certificate_from_der, Certificate};
use crate::auth::keys::SigningKey;
use crate::auth::saml::c14n::{self, Method};

pub const OAUTH_ISSUER: &str = "https://idp.example.com/realms/demo";
pub const OAUTH_AUDIENCE: &str = "marklogic";
pub const SAML_IDP: &str = "https://idp.example.com/realms/demo";
pub const SAML_ACS: &str = "https://marklogic.example.com/saml/acs";
pub const SAML_SP: &str = "https://marklogic.example.com";

const DSIG: &str = "http://www.w3.org/2000/09/xmldsig#";
const ECDSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256";
const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
const SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
const ENVELOPED: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";

/// RSA-2048 key and self-signed certificate generated with OpenSSL
/// (see `testdata/generate.sh`).
pub const RSA_KEY_PEM: &str = include_str!("testdata/rsa-key.pem");
pub const RSA_CERT_PEM: &str = include_str!("testdata/rsa-cert.pem");
const RSA_JWK: &str = include_str!("testdata/rsa-jwk.json");

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// P-256 key published as a JWK.
pub struct EcKey {
    pub kid: String,
    pkcs8: Vec<u8>,
    public: Vec<u8>,
}

impl EcKey {
    pub fn generate(kid: &str) -> Self {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng).unwrap();
        let pair =
            EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng)
                .unwrap();
        Self {
            kid: kid.to_string(),
            pkcs8: pkcs8.as_ref().to_vec(),
            public: pair.public_key().as_ref().to_vec(),
        }
    }

    pub fn jwk(&self) -> Value {
        json!({
            "kty": "EC",
            "crv": "P-256",
            "kid": self.kid,
            "alg": "ES256",
            "use": "sig",
            "x": URL_SAFE_NO_PAD.encode(&self.public[1..33]),
            "y": URL_SAFE_NO_PAD.encode(&self.public[33..65]),
        })
    }

    /// ES256 token with this key's `kid`.
    pub fn sign(&self, claims: &Value) -> String {
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.kid.clone());
        self.sign_with(&header, claims)
    }

    pub fn sign_with(&self, header: &Header, claims: &Value) -> String {
        jsonwebtoken::encode(header, claims, &EncodingKey::from_ec_der(&self.pkcs8)).unwrap()
    }
}

/// The OpenSSL-generated RSA key, published as `kid` `rsa-1`.
pub struct RsaKey;

impl RsaKey {
    pub const KID: &'static str = "rsa-1";

    pub fn jwk(&self) -> Value {
        serde_json::from_str(RSA_JWK).unwrap()
    }

    /// RS256 token with this key's `kid`.
    pub fn sign(&self, claims: &Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(Self::KID.to_string());
        let key = EncodingKey::from_rsa_pem(RSA_KEY_PEM.as_bytes()).unwrap();
        jsonwebtoken::encode(&header, claims, &key).unwrap()
    }
}

/// Claims of a token that passes every check.
pub fn token_claims(roles: &[&str]) -> Value {
    let now = now();
    json!({
        "iss": OAUTH_ISSUER,
        "aud": OAUTH_AUDIENCE,
        "sub": "f4b1c2d3",
        "preferred_username": "alice",
        "email": "alice@example.com",
        "iat": now,
        "exp": now + 300,
        "roles": roles,
    })
}

enum SigningPair {
    Ecdsa(EcdsaKeyPair),
    Rsa(RsaKeyPair),
}

/// Self-signed certificate that signs SAML documents.
pub struct SamlSigner {
    der: Vec<u8>,
    pair: SigningPair,
}

impl SamlSigner {
    /// Fresh P-256 key and certificate.
    pub fn generate() -> Self {
        Self::from_params(rcgen::CertificateParams::new(vec!["idp.example.com".to_string()]))
    }

    /// P-256 certificate whose validity ended in 2021.
    pub fn expired() -> Self {
        let mut params = rcgen::CertificateParams::new(vec!["idp.example.com".to_string()]);
        params.not_before = rcgen::date_time_ymd(2020, 1, 1);
        params.not_after = rcgen::date_time_ymd(2021, 1, 1);
        Self::from_params(params)
    }

    /// The OpenSSL-generated RSA-2048 key and certificate.
    pub fn rsa() -> Self {
        let der = pem::parse(RSA_CERT_PEM).unwrap().into_contents();
        let pkcs8 = pem::parse(RSA_KEY_PEM).unwrap().into_contents();
        let pair = RsaKeyPair::from_pkcs8(&pkcs8).unwrap();
        Self {
            der,
            pair: SigningPair::Rsa(pair),
        }
    }

    fn from_params(params: rcgen::CertificateParams) -> Self {
        let cert = rcgen::Certificate::from_params(params).unwrap();
        let der = cert.serialize_der().unwrap();
        let pkcs8 = cert.get_key_pair().serialize_der();
        let pair = EcdsaKeyPair::from_pkcs8(
            &ECDSA_P256_SHA256_FIXED_SIGNING,
            &pkcs8,
            &SystemRandom::new(),
        )
        .unwrap();
        Self {
            der,
            pair: SigningPair::Ecdsa(pair),
        }
    }

    /// XML-DSig `SignatureMethod` URI this signer produces.
    pub fn method_uri(&self) -> &'static str {
        match self.pair {
            SigningPair::Ecdsa(_) => ECDSA_SHA256,
            SigningPair::Rsa(_) => RSA_SHA256,
        }
    }

    pub fn certificate_base64(&self) -> String {
        STANDARD.encode(&self.der)
    }

    pub fn certificate(&self) -> Certificate {
        certificate_from_der(&self.der).unwrap()
    }

    pub fn fingerprint(&self) -> String {
        self.certificate().fingerprint
    }

    pub fn signing_key(&self, issuer: &str) -> SigningKey {
        SigningKey::from_certificate(issuer, self.certificate())
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let rng = SystemRandom::new();
        match &self.pair {
            SigningPair::Ecdsa(pair) => pair.sign(&rng, message).unwrap().as_ref().to_vec(),
            SigningPair::Rsa(pair) => {
                let mut signature = vec![0; pair.public().modulus_len()];
                pair.sign(&RSA_PKCS1_SHA256, &rng, message, &mut signature)
                    .unwrap();
                signature
            }
        }
    }
}

/// Sign the element carrying `ID="{id}"` and put the signature where the
/// template says `{SIG}`.
pub fn sign_element(template: &str, id: &str, signer: &SamlSigner) -> String {
    let exclusive = Method::Exclusive {
        inclusive_prefixes: Vec::new(),
    };

    let unsigned = template.replace("{SIG}", "");
    let doc = Document::parse(&unsigned).unwrap();
    let target = doc
        .descendants()
        .find(|n| n.attribute("ID") == Some(id))
        .unwrap();
    let digest = STANDARD.encode(Sha256::digest(
        c14n::canonicalize(&doc, target, &exclusive, None).as_bytes(),
    ));

    let signed_info = format!(
        r##"<ds:SignedInfo xmlns:ds="{DSIG}"><ds:CanonicalizationMethod Algorithm="{exc}"/><ds:SignatureMethod Algorithm="{method}"/><ds:Reference URI="#{id}"><ds:Transforms><ds:Transform Algorithm="{ENVELOPED}"/><ds:Transform Algorithm="{exc}"/></ds:Transforms><ds:DigestMethod Algorithm="{SHA256}"/><ds:DigestValue>{digest}</ds:DigestValue></ds:Reference></ds:SignedInfo>"##,
        exc = c14n::EXCLUSIVE,
        method = signer.method_uri(),
    );
    let info_doc = Document::parse(&signed_info).unwrap();
    let canonical = c14n::canonicalize(&info_doc, info_doc.root_element(), &exclusive, None);
    let value = STANDARD.encode(signer.sign(canonical.as_bytes()));

    let signature = format!(
        r#"<ds:Signature xmlns:ds="{DSIG}">{signed_info}<ds:SignatureValue>{value}</ds:SignatureValue><ds:KeyInfo><ds:X509Data><ds:X509Certificate>{cert}</ds:X509Certificate></ds:X509Data></ds:KeyInfo></ds:Signature>"#,
        cert = signer.certificate_base64(),
    );
    template.replace("{SIG}", &signature)
}

/// Builder for SAML responses as an IdP would post them.
#[derive(Debug, Clone)]
pub struct SamlResponse {
    pub issuer: String,
    pub destination: Option<String>,
    pub recipient: Option<String>,
    pub audience: Option<String>,
    pub name_id: String,
    pub not_before: i64,
    pub not_on_or_after: i64,
    pub role_attribute: String,
    pub roles: Vec<String>,
    pub email: Option<String>,
}

impl Default for SamlResponse {
    fn default() -> Self {
        let now = now();
        Self {
            issuer: SAML_IDP.to_string(),
            destination: Some(SAML_ACS.to_string()),
            recipient: Some(SAML_ACS.to_string()),
            audience: Some(SAML_SP.to_string()),
            name_id: "alice".to_string(),
            not_before: now - 60,
            not_on_or_after: now + 300,
            role_attribute: "Role".to_string(),
            roles: vec!["marklogic-admin".to_string()],
            email: Some("alice@example.com".to_string()),
        }
    }
}

impl SamlResponse {
    pub fn with_roles(roles: &[&str]) -> Self {
        Self {
            roles: roles.iter().map(|r| r.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Response whose assertion carries an enveloped signature.
    pub fn signed_assertion(&self, signer: &SamlSigner) -> String {
        let template = self.response(&self.assertion("{SIG}"), "");
        sign_element(&template, "_assertion1", signer)
    }

    /// Response signed as a whole, assertion unsigned.
    pub fn signed_response(&self, signer: &SamlSigner) -> String {
        let template = self.response(&self.assertion(""), "{SIG}");
        sign_element(&template, "_response1", signer)
    }

    pub fn unsigned(&self) -> String {
        self.response(&self.assertion(""), "")
    }

    /// Signed response with `extra` appended after the assertion, outside
    /// the signed content.
    pub fn signed_with_trailing(&self, signer: &SamlSigner, extra: &str) -> String {
        self.signed_assertion(signer)
            .replace("</samlp:Response>", &format!("{extra}</samlp:Response>"))
    }

    pub fn response(&self, assertion: &str, sig: &str) -> String {
        let destination = self
            .destination
            .as_ref()
            .map(|d| format!(r#" Destination="{d}""#))
            .unwrap_or_default();
        format!(
            r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="_response1" Version="2.0" IssueInstant="{instant}"{destination}><saml:Issuer>{issuer}</saml:Issuer>{sig}<samlp:Status><samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Success"/></samlp:Status>{assertion}</samlp:Response>"#,
            instant = timestamp(self.not_before + 60),
            issuer = self.issuer,
        )
    }

    pub fn assertion(&self, sig: &str) -> String {
        let recipient = self
            .recipient
            .as_ref()
            .map(|r| format!(r#" Recipient="{r}""#))
            .unwrap_or_default();
        let audience = self
            .audience
            .as_ref()
            .map(|a| {
                format!(
                    "<saml:AudienceRestriction><saml:Audience>{a}</saml:Audience></saml:AudienceRestriction>"
                )
            })
            .unwrap_or_default();
        let roles: String = self
            .roles
            .iter()
            .map(|r| format!(r#"<saml:AttributeValue xsi:type="xs:string">{r}</saml:AttributeValue>"#))
            .collect();
        let email = self
            .email
            .as_ref()
            .map(|e| {
                format!(
                    r#"<saml:Attribute Name="email" NameFormat="urn:oasis:names:tc:SAML:2.0:attrname-format:basic"><saml:AttributeValue xsi:type="xs:string">{e}</saml:AttributeValue></saml:Attribute>"#
                )
            })
            .unwrap_or_default();
        format!(
            r#"<saml:Assertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" xmlns:xs="http://www.w3.org/2001/XMLSchema" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" ID="_assertion1" Version="2.0" IssueInstant="{instant}"><saml:Issuer>{issuer}</saml:Issuer>{sig}<saml:Subject><saml:NameID Format="urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified">{name_id}</saml:NameID><saml:SubjectConfirmation Method="urn:oasis:names:tc:SAML:2.0:cm:bearer"><saml:SubjectConfirmationData NotOnOrAfter="{not_after}"{recipient}/></saml:SubjectConfirmation></saml:Subject><saml:Conditions NotBefore="{not_before}" NotOnOrAfter="{not_after}">{audience}</saml:Conditions><saml:AttributeStatement><saml:Attribute Name="{role_attribute}" NameFormat="urn:oasis:names:tc:SAML:2.0:attrname-format:basic">{roles}</saml:Attribute>{email}</saml:AttributeStatement></saml:Assertion>"#,
            instant = timestamp(self.not_before + 60),
            issuer = self.issuer,
            name_id = self.name_id,
            not_before = timestamp(self.not_before),
            not_after = timestamp(self.not_on_or_after),
            role_attribute = self.role_attribute,
        )
    }
}

fn timestamp(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .unwrap()
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string()
}
