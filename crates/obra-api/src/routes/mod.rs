//! # API Route Modules
//!
//! One module per resource of the Obra API surface:
//!
//! - `auth` — login with the brute-force guard, CSRF token, current user,
//!   password change.
//! - `organizations`, `roles`, `users` — tenants and access control.
//! - `works`, `suppliers`, `contracts` — master data; contracts carry the
//!   executed/balance ledger.
//! - `expenses`, `incomes` — fiscal documents. Expense validate / observe /
//!   annul and income registration go through [`crate::ledger`].
//! - `cashboxes` — per-user tills, manual movements and closing.
//! - `accounting` — journal entries and the trial balance.
//! - `alerts`, `audit`, `taxes` — alert inbox, hash-chained audit log, tax
//!   previews.
//!
//! Every handler reads and writes through the organization-scoped store
//! methods, so a record of another tenant answers 404.

pub mod accounting;
pub mod alerts;
pub mod audit;
pub mod auth;
pub mod cashboxes;
pub mod contracts;
pub mod expenses;
pub mod incomes;
pub mod organizations;
pub mod roles;
pub mod suppliers;
pub mod taxes;
pub mod users;
pub mod works;

use crate::audit::AuditEvent;
use crate::auth::CallerIdentity;
use crate::db::Changes;
use crate::error::AppError;
use crate::state::{AppState, Record};

/// A change set holding `record` and the caller's audit entry for `action`.
pub(crate) fn audited<T: Record>(
    state: &AppState,
    caller: &CallerIdentity,
    action: &'static str,
    record: &T,
    metadata: serde_json::Value,
) -> Result<Changes, AppError> {
    let mut changes = Changes::new();
    changes.put(record)?;
    changes.audit(state.record_audit(
        caller.organization_id,
        AuditEvent::new(Some(caller.user_id), action, T::KIND, record.key()).with_metadata(metadata),
    ));
    Ok(changes)
}

/// Trim an optional text field, mapping blanks to `None`.
pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
