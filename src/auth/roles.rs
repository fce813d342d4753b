// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! External → internal role mapping.
//!
//! ## Mapping Table
//!
//! ```json
//! {
//!   "entries": {
//!     "realm-admin": "marklogic-admin",
//!     "offline_access": null
//!   },
//!   "identity_default": true,
//!   "allow_unmapped": false,
//!   "require_role": false
//! }
//! ```
//!
//! - An entry with a string renames the external role
//! - An entry with `null` excludes it
//! - Roles without an entry keep their name when `identity_default` is set;
//!   otherwise they are dropped (`allow_unmapped`) or rejected
//!   (`UnmappedRole`)
//!
//! Role names are compared exactly; `Admin` and `admin` are different roles.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::claims::Principal;
use super::error::AuthError;
use super::normalizer::{Identity, NormalizedRoles};

/// Role mapping table as loaded from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMapping {
    /// External role → internal role, `None` to exclude
    #[serde(default)]
    pub entries: HashMap<String, Option<String>>,

    /// Unlisted roles map to themselves
    #[serde(default = "default_identity")]
    pub identity_default: bool,

    /// Drop unlisted roles instead of failing (only without identity mapping)
    #[serde(default)]
    pub allow_unmapped: bool,

    /// Fail when no internal role remains
    #[serde(default)]
    pub require_role: bool,
}

fn default_identity() -> bool {
    true
}

impl Default for RoleMapping {
    /// Identity mapping with no entries.
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            identity_default: true,
            allow_unmapped: false,
            require_role: false,
        }
    }
}

/// Applies a [`RoleMapping`] to normalized roles.
#[derive(Debug, Clone, Default)]
pub struct RoleMapper {
    mapping: RoleMapping,
}

impl RoleMapper {
    pub fn new(mapping: RoleMapping) -> Self {
        Self { mapping }
    }

    /// Build the principal for `identity` holding the mapped roles.
    pub fn map(
        &self,
        identity: Identity,
        roles: &NormalizedRoles,
        expires_at: i64,
    ) -> Result<Principal, AuthError> {
        let mut internal = Vec::with_capacity(roles.len());
        for external in roles.iter() {
            let mapped = match self.mapping.entries.get(external) {
                Some(Some(target)) => Some(target.clone()),
                Some(None) => None,
                None if self.mapping.identity_default => Some(external.to_string()),
                None if self.mapping.allow_unmapped => None,
                None => return Err(AuthError::UnmappedRole(external.to_string())),
            };
            if let Some(role) = mapped {
                if !internal.contains(&role) {
                    internal.push(role);
                }
            }
        }

        if internal.is_empty() && self.mapping.require_role {
            return Err(AuthError::NoRolesAssigned);
        }

        Ok(Principal {
            username: identity.username,
            email: identity.email,
            roles: internal,
            expires_at,
            issuer: identity.issuer,
            protocol: identity.protocol,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::Protocol;

    fn identity() -> Identity {
        Identity {
            username: "alice".into(),
            email: None,
            issuer: "https://idp.example.com".into(),
            protocol: Protocol::Oauth2,
        }
    }

    fn roles(names: &[&str]) -> NormalizedRoles {
        names.iter().map(|r| r.to_string()).collect()
    }

    fn mapping(json: &str) -> RoleMapping {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn identity_mapping_keeps_order() {
        let principal = RoleMapper::default()
            .map(identity(), &roles(&["marklogic-user", "marklogic-admin"]), 42)
            .unwrap();
        assert_eq!(principal.roles, ["marklogic-user", "marklogic-admin"]);
        assert_eq!(principal.expires_at, 42);
        assert_eq!(principal.username, "alice");
    }

    #[test]
    fn entries_rename_and_exclude() {
        let mapper = RoleMapper::new(mapping(
            r#"{"entries": {"realm-admin": "marklogic-admin", "offline_access": null}}"#,
        ));
        let principal = mapper
            .map(identity(), &roles(&["offline_access", "realm-admin", "reader"]), 0)
            .unwrap();
        assert_eq!(principal.roles, ["marklogic-admin", "reader"]);
    }

    #[test]
    fn renamed_duplicates_collapse() {
        let mapper = RoleMapper::new(mapping(
            r#"{"entries": {"admins": "marklogic-admin", "superusers": "marklogic-admin"}}"#,
        ));
        let principal = mapper
            .map(identity(), &roles(&["admins", "superusers"]), 0)
            .unwrap();
        assert_eq!(principal.roles, ["marklogic-admin"]);
    }

    #[test]
    fn strict_table_rejects_unlisted_roles() {
        let mapper = RoleMapper::new(mapping(
            r#"{"entries": {"a": "x"}, "identity_default": false}"#,
        ));
        assert_eq!(
            mapper.map(identity(), &roles(&["a", "Admin"]), 0).unwrap_err(),
            AuthError::UnmappedRole("Admin".into())
        );
    }

    #[test]
    fn allow_unmapped_drops_unlisted_roles() {
        let mapper = RoleMapper::new(mapping(
            r#"{"entries": {"a": "x"}, "identity_default": false, "allow_unmapped": true}"#,
        ));
        let principal = mapper.map(identity(), &roles(&["b", "a"]), 0).unwrap();
        assert_eq!(principal.roles, ["x"]);
    }

    #[test]
    fn zero_roles_is_allowed_unless_required() {
        let principal = RoleMapper::default().map(identity(), &roles(&[]), 0).unwrap();
        assert!(principal.roles.is_empty());

        let strict = RoleMapper::new(mapping(r#"{"require_role": true, "entries": {"a": null}}"#));
        assert_eq!(
            strict.map(identity(), &roles(&["a"]), 0).unwrap_err(),
            AuthError::NoRolesAssigned
        );
    }

    #[test]
    fn empty_document_means_identity_mapping() {
        assert_eq!(mapping("{}"), RoleMapping::default());
    }
}
