// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Federation Gateway - OAuth2 / SAML2 credential validation
//!
//! Verifies bearer tokens and SAML responses issued by an external identity
//! provider and maps their role claims onto internal roles for an
//! application server.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Key resolution, verification, normalization and role mapping
//! - `config` - Environment configuration
//! - `gateway` - The verification pipeline and principal cache
//! - `maintenance` - Background cache sweep and key refresh

pub mod api;
pub mod auth;
pub mod config;
pub mod gateway;
pub mod maintenance;
pub mod observability;
pub mod state;

#[cfg(test)]
mod test_support;
