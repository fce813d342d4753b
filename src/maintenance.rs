// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Cache Maintenance
//!
//! Background task that keeps the gateway warm between requests. Every
//! `interval` it:
//! 1. Sweeps principals past their deadline out of the cache.
//! 2. Refreshes signing keys for remote issuers whose cached set has aged
//!    past the key cache TTL, so a rotated key is picked up before the
//!    first token signed with it arrives.
//!
//! Fresh keys are left alone, and a failing endpoint is retried no more
//! often than the resolver's refresh spacing. A failed refresh keeps
//! serving the previous keys until they age out.
//! Stops when the cancellation token is triggered.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::gateway::Gateway;

pub struct Maintenance {
    gateway: Arc<Gateway>,
    interval: Duration,
}

impl Maintenance {
    pub fn new(gateway: Arc<Gateway>, interval: Duration) -> Self {
        Self { gateway, interval }
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// ```rust,ignore
    /// tokio::spawn(Maintenance::new(gateway, interval).run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Cache maintenance starting");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Cache maintenance shutting down");
                    return;
                }
            }

            self.step().await;
        }
    }

    async fn step(&self) {
        let evicted = self.gateway.cache().sweep();
        if evicted > 0 {
            debug!(evicted, remaining = self.gateway.cache().len(), "Swept principal cache");
        }

        let failures = self.gateway.refresh_stale_keys().await;
        if failures > 0 {
            warn!(failures, "Key refresh incomplete, serving previously cached keys");
        }
    }
}
