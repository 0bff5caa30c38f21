//! # Access Control Strings
//!
//! Roles carry a list of [`Permission`] strings of the form
//! `module.action`. Two wildcard forms exist: `module.*` grants every action
//! of one module and `*` grants everything.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ValidationError;

/// Every permission the API checks. Role permissions are validated against
/// this list (wildcards are validated against its modules).
pub const PERMISSION_CATALOG: &[&str] = &[
    "organizations.update",
    "roles.read",
    "roles.create",
    "roles.update",
    "roles.delete",
    "users.read",
    "users.create",
    "users.update",
    "works.read",
    "works.create",
    "works.update",
    "suppliers.read",
    "suppliers.create",
    "suppliers.update",
    "suppliers.delete",
    "contracts.read",
    "contracts.create",
    "contracts.update",
    "expenses.read",
    "expenses.create",
    "expenses.update",
    "expenses.delete",
    "expenses.validate",
    "expenses.observe",
    "expenses.annul",
    "incomes.read",
    "incomes.create",
    "incomes.annul",
    "cashboxes.read",
    "cashboxes.create",
    "cashboxes.update",
    "cashboxes.close",
    "cashboxes.audit",
    "accounting.read",
    "accounting.create",
    "alerts.read",
    "alerts.acknowledge",
    "alerts.scan",
    "audit.read",
    "taxes.read",
];

/// A single ACL grant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "String", into = "String")]
#[schema(value_type = String, example = "expenses.validate")]
pub struct Permission(String);

impl Permission {
    /// The grant-everything wildcard.
    pub const ALL: &'static str = "*";

    /// Parse a permission string and check it against [`PERMISSION_CATALOG`].
    pub fn new(s: impl AsRef<str>) -> Result<Self, ValidationError> {
        let raw = s.as_ref().trim();
        if raw == Self::ALL {
            return Ok(Self(raw.to_string()));
        }
        let invalid = || ValidationError::InvalidPermission(raw.to_string());
        let (module, action) = raw.split_once('.').ok_or_else(invalid)?;
        if module.is_empty() || action.is_empty() || action.contains('.') {
            return Err(invalid());
        }
        let known = if action == "*" {
            PERMISSION_CATALOG
                .iter()
                .any(|p| p.split_once('.').is_some_and(|(m, _)| m == module))
        } else {
            PERMISSION_CATALOG.contains(&raw)
        };
        if !known {
            return Err(invalid());
        }
        Ok(Self(raw.to_string()))
    }

    /// Whether this grant covers `required` (a concrete `module.action`).
    pub fn grants(&self, required: &str) -> bool {
        if self.0 == Self::ALL || self.0 == required {
            return true;
        }
        match (self.0.strip_suffix(".*"), required.split_once('.')) {
            (Some(module), Some((req_module, _))) => module == req_module,
            _ => false,
        }
    }

    /// The permission string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Permission {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Permission> for String {
    fn from(value: Permission) -> Self {
        value.0
    }
}

/// Whether any grant in `granted` covers `required`.
pub fn any_grants(granted: &[Permission], required: &str) -> bool {
    granted.iter().any(|p| p.grants(required))
}
