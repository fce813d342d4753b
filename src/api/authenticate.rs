// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication endpoints.

use axum::{extract::State, Form, Json};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::auth::error::AuthErrorBody;
use crate::auth::{Auth, AuthError, Credential, Principal};
use crate::state::AppState;

/// HTTP-POST binding form posted by the identity provider.
///
/// Other fields, `RelayState` included, are accepted and ignored.
#[derive(Debug, Deserialize, ToSchema)]
pub struct AcsForm {
    /// Base64-encoded `samlp:Response`
    #[serde(rename = "SAMLResponse")]
    pub saml_response: String,
}

/// Validate a bearer token or SAML response and return the mapped principal.
#[utoipa::path(
    post,
    path = "/v1/authenticate",
    tag = "Authentication",
    request_body = Credential,
    responses(
        (status = 200, description = "Credential accepted", body = Principal),
        (status = 400, description = "Protocol not enabled", body = AuthErrorBody),
        (status = 401, description = "Credential rejected", body = AuthErrorBody),
        (status = 403, description = "No acceptable roles", body = AuthErrorBody),
        (status = 502, description = "Identity provider keys unreachable", body = AuthErrorBody),
        (status = 504, description = "Authentication timed out", body = AuthErrorBody),
    )
)]
pub async fn authenticate(
    State(state): State<AppState>,
    Json(credential): Json<Credential>,
) -> Result<Json<Principal>, AuthError> {
    let principal = state.gateway.authenticate(&credential).await?;
    Ok(Json(principal))
}

/// SAML assertion consumer service (HTTP-POST binding).
#[utoipa::path(
    post,
    path = "/v1/saml/acs",
    tag = "Authentication",
    request_body(content = AcsForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Assertion accepted", body = Principal),
        (status = 401, description = "Assertion rejected", body = AuthErrorBody),
        (status = 403, description = "No acceptable roles", body = AuthErrorBody),
    )
)]
pub async fn saml_acs(
    State(state): State<AppState>,
    Form(form): Form<AcsForm>,
) -> Result<Json<Principal>, AuthError> {
    let credential = Credential::SamlResponse(form.saml_response);
    let principal = state.gateway.authenticate(&credential).await?;
    Ok(Json(principal))
}

/// Principal for the bearer token on this request.
#[utoipa::path(
    get,
    path = "/v1/whoami",
    tag = "Authentication",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Authenticated principal", body = Principal),
        (status = 401, description = "Unauthorized - invalid or missing token", body = AuthErrorBody),
    )
)]
pub async fn whoami(Auth(principal): Auth) -> Json<Principal> {
    Json(principal)
}
