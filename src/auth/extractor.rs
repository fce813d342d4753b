// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractor for authenticated principals.
//!
//! Use the `Auth` extractor in handlers to require a valid bearer token:
//!
//! ```rust,ignore
//! async fn my_handler(Auth(principal): Auth) -> impl IntoResponse {
//!     // principal.roles holds the mapped internal roles
//! }
//! ```

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use super::claims::Principal;
use super::credential::Credential;
use super::error::AuthError;
use crate::state::AppState;

/// Extractor for authenticated principals.
///
/// Reads `Authorization: Bearer <jwt>` and runs it through the gateway,
/// so repeated requests with the same token are served from the principal
/// cache.
pub struct Auth(pub Principal);

impl FromRequestParts<AppState> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let credential = bearer_credential(parts)?;
        let principal = state.gateway.authenticate(&credential).await?;
        Ok(Auth(principal))
    }
}

fn bearer_credential(parts: &Parts) -> Result<Credential, AuthError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingAuthHeader)?
        .to_str()
        .map_err(|_| AuthError::InvalidAuthHeader)?;

    let token = header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::InvalidAuthHeader)?;

    Ok(Credential::BearerToken(token.to_string()))
}
