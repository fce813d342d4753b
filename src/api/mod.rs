// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::{HeaderName, Request},
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth::{claims::Protocol, error::{AuthErrorBody, Stage}, Credential, Principal},
    state::AppState,
};

pub mod authenticate;
pub mod health;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Generates a v4 UUID for requests that arrive without an id.
#[derive(Clone, Copy, Default)]
struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        uuid::Uuid::new_v4()
            .to_string()
            .parse()
            .ok()
            .map(RequestId::new)
    }
}

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/authenticate", post(authenticate::authenticate))
        .route("/saml/acs", post(authenticate::saml_acs))
        .route("/whoami", get(authenticate::whoami))
        .with_state(state.clone());

    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .with_state(state);

    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        .nest("/v1", v1_routes)
        .merge(health_routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
}

#[derive(OpenApi)]
#[openapi(
    paths(
        authenticate::authenticate,
        authenticate::saml_acs,
        authenticate::whoami,
        health::health,
        health::liveness,
        health::readiness
    ),
    components(
        schemas(
            Credential,
            Principal,
            Protocol,
            Stage,
            AuthErrorBody,
            authenticate::AcsForm,
            health::ReadyResponse,
            health::HealthChecks,
            health::IssuerCheck,
            health::HealthResponse
        )
    ),
    tags(
        (name = "Authentication", description = "OAuth2 and SAML2 credential validation"),
        (name = "Health", description = "Liveness and readiness checks")
    )
)]
struct ApiDoc;
