// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.
//!
//! Every failure in the pipeline surfaces as one [`AuthError`]. Messages name
//! the failing stage and the offending field but never include raw token
//! contents or key material.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use utoipa::ToSchema;

/// Pipeline stage that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Reading the credential off the inbound request
    Request,
    /// Fetching signing keys from the identity provider
    KeyResolution,
    /// Signature, lifetime and issuer checks
    Verification,
    /// Extracting the flat role list
    Normalization,
    /// External to internal role translation
    Mapping,
}

/// Authentication error type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No authorization header present
    #[error("Authorization header is required")]
    MissingAuthHeader,
    /// Invalid authorization header format
    #[error("Invalid authorization header format (expected 'Bearer <token>')")]
    InvalidAuthHeader,
    /// The requested protocol is not configured on this gateway
    #[error("{0} credentials are not accepted by this gateway")]
    ProtocolDisabled(&'static str),
    /// Key endpoint unreachable or returned unusable content
    #[error("Failed to resolve signing keys: {0}")]
    KeyResolution(String),
    /// No key matching the credential after a refresh
    #[error("No signing key available for key id {0}")]
    KeyUnavailable(String),
    /// Token is malformed
    #[error("Token is malformed: {0}")]
    MalformedToken(String),
    /// SAML response is malformed
    #[error("SAML response is malformed: {0}")]
    MalformedAssertion(String),
    /// Signature is invalid, uses a disallowed algorithm, or does not cover the assertion
    #[error("Signature is invalid: {0}")]
    SignatureInvalid(String),
    /// Token has expired or is not yet usable
    #[error("Token has expired or is not yet valid")]
    TokenExpired,
    /// Assertion conditions are outside their validity window
    #[error("SAML assertion has expired or is not yet valid")]
    AssertionExpired,
    /// Issuer does not match configuration
    #[error("Credential issuer does not match the configured issuer")]
    IssuerMismatch,
    /// Audience does not match configuration
    #[error("Credential audience does not match the configured audience")]
    AudienceMismatch,
    /// SAML Destination or Recipient does not match the service endpoint
    #[error("SAML destination does not match the expected service endpoint")]
    DestinationMismatch,
    /// The configured role claim is missing or not a flat list of strings
    #[error("Role claim '{0}' is missing or is not a flat list of strings")]
    RolesNotFound(String),
    /// An external role has no mapping entry and unmapped roles are not allowed
    #[error("External role '{0}' has no internal mapping")]
    UnmappedRole(String),
    /// No internal roles remain and configuration requires at least one
    #[error("No internal roles assigned")]
    NoRolesAssigned,
    /// The pipeline did not finish within its time budget
    #[error("Authentication timed out")]
    Timeout,
}

#[derive(Serialize, ToSchema)]
pub struct AuthErrorBody {
    error: String,
    error_code: String,
    stage: Stage,
}

impl AuthError {
    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::MissingAuthHeader => "missing_auth_header",
            AuthError::InvalidAuthHeader => "invalid_auth_header",
            AuthError::ProtocolDisabled(_) => "protocol_disabled",
            AuthError::KeyResolution(_) => "key_resolution_error",
            AuthError::KeyUnavailable(_) => "key_unavailable",
            AuthError::MalformedToken(_) => "malformed_token",
            AuthError::MalformedAssertion(_) => "malformed_assertion",
            AuthError::SignatureInvalid(_) => "signature_invalid",
            AuthError::TokenExpired => "token_expired",
            AuthError::AssertionExpired => "assertion_expired",
            AuthError::IssuerMismatch => "issuer_mismatch",
            AuthError::AudienceMismatch => "audience_mismatch",
            AuthError::DestinationMismatch => "destination_mismatch",
            AuthError::RolesNotFound(_) => "roles_not_found",
            AuthError::UnmappedRole(_) => "unmapped_role",
            AuthError::NoRolesAssigned => "no_roles_assigned",
            AuthError::Timeout => "timeout",
        }
    }

    /// Stage of the pipeline this error belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            AuthError::MissingAuthHeader
            | AuthError::InvalidAuthHeader
            | AuthError::ProtocolDisabled(_) => Stage::Request,
            AuthError::KeyResolution(_) | AuthError::KeyUnavailable(_) | AuthError::Timeout => {
                Stage::KeyResolution
            }
            AuthError::MalformedToken(_)
            | AuthError::MalformedAssertion(_)
            | AuthError::SignatureInvalid(_)
            | AuthError::TokenExpired
            | AuthError::AssertionExpired
            | AuthError::IssuerMismatch
            | AuthError::AudienceMismatch
            | AuthError::DestinationMismatch => Stage::Verification,
            AuthError::RolesNotFound(_) => Stage::Normalization,
            AuthError::UnmappedRole(_) | AuthError::NoRolesAssigned => Stage::Mapping,
        }
    }

    /// Whether retrying the whole request may succeed.
    ///
    /// Only transient key fetch failures qualify; everything else is terminal
    /// for the same credential.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::KeyResolution(_) | AuthError::Timeout)
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::MissingAuthHeader
            | AuthError::InvalidAuthHeader
            | AuthError::KeyUnavailable(_)
            | AuthError::MalformedToken(_)
            | AuthError::MalformedAssertion(_)
            | AuthError::SignatureInvalid(_)
            | AuthError::TokenExpired
            | AuthError::AssertionExpired
            | AuthError::IssuerMismatch
            | AuthError::AudienceMismatch
            | AuthError::DestinationMismatch => StatusCode::UNAUTHORIZED,
            AuthError::RolesNotFound(_)
            | AuthError::UnmappedRole(_)
            | AuthError::NoRolesAssigned => StatusCode::FORBIDDEN,
            AuthError::ProtocolDisabled(_) => StatusCode::BAD_REQUEST,
            AuthError::KeyResolution(_) => StatusCode::BAD_GATEWAY,
            AuthError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(AuthErrorBody {
            error: self.to_string(),
            error_code: self.error_code().to_string(),
            stage: self.stage(),
        });
        (status, body).into_response()
    }
}
