// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::process::ExitCode;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use federation_gateway::api::router;
use federation_gateway::config::GatewayConfig;
use federation_gateway::gateway::Gateway;
use federation_gateway::maintenance::Maintenance;
use federation_gateway::observability::init_tracing;
use federation_gateway::state::AppState;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(config.log_format);

    let gateway = match Gateway::new(&config) {
        Ok(gateway) => Arc::new(gateway),
        Err(e) => {
            error!(error = %e, "Failed to build gateway");
            return ExitCode::FAILURE;
        }
    };

    // Keys also load lazily; an unreachable IdP at startup is not fatal.
    let failures = gateway.refresh_keys().await;
    if failures > 0 {
        warn!(failures, "Initial signing key fetch failed, will retry");
    }

    let shutdown = CancellationToken::new();
    let maintenance = tokio::spawn(
        Maintenance::new(Arc::clone(&gateway), config.sweep_interval).run(shutdown.clone()),
    );

    let addr = config.bind_address();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %addr, error = %e, "Failed to bind");
            return ExitCode::FAILURE;
        }
    };
    info!(
        addr = %addr,
        oauth2 = config.oauth.is_some(),
        saml2 = config.saml.is_some(),
        "Federation gateway listening (docs at /docs)"
    );

    let app = router(AppState::new(Arc::clone(&gateway)));
    let server_shutdown = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
                _ = server_shutdown.cancelled() => {}
            }
        })
        .await;

    shutdown.cancel();
    let _ = maintenance.await;
    gateway.clear();

    match served {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}
