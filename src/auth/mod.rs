// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Verifies credentials issued by an external identity provider and maps
//! them to internal principals.
//!
//! ## Auth Flow
//!
//! 1. The caller presents an OAuth2 bearer token (JWT) or a SAML response
//! 2. The gateway:
//!    - Resolves the issuer's signing keys (JWKS or IdP metadata, cached)
//!    - Verifies signature, lifetime, issuer, audience and destination
//!    - Extracts the configured role claim as a flat list
//!    - Translates external roles through the mapping table
//! 3. The resulting [`Principal`] is cached by credential fingerprint
//!
//! ## Security
//!
//! - Key endpoints must be HTTPS (loopback HTTP is allowed for testing)
//! - Only the configured signature algorithm is accepted; `none` never is
//! - Clock skew tolerance defaults to 60 seconds
//! - Raw credentials and key material never appear in logs or errors

pub mod cache;
pub mod certificate;
pub mod claims;
pub mod credential;
pub mod error;
pub mod extractor;
pub mod keys;
pub mod metadata;
pub mod normalizer;
pub mod roles;
pub mod saml;
pub mod token;

pub use claims::{Principal, Protocol};
pub use credential::Credential;
pub use error::AuthError;
pub use extractor::Auth;
pub use keys::KeyResolver;
pub use roles::{RoleMapper, RoleMapping};
