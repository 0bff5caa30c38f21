//! # Audit API
//!
//! ## Endpoints
//!
//! - `GET /v1/audit` — the organization's audit trail, newest first
//! - `GET /v1/audit/verify` — walk the organization's hash chain

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::audit::{AuditEntry, ChainIntegrityResult};
use crate::auth::{require_permission, CallerIdentity};
use crate::error::AppError;
use crate::extractors::Pagination;
use crate::state::AppState;

/// Trail filters.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuditFilter {
    /// e.g. `expense`.
    pub resource_type: Option<String>,
    pub resource_id: Option<Uuid>,
    /// e.g. `expense.validated`.
    pub action: Option<String>,
}

/// Build the audit router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/audit", get(list_audit))
        .route("/v1/audit/verify", get(verify_audit))
}

/// GET /v1/audit — List audit entries.
#[utoipa::path(
    get,
    path = "/v1/audit",
    params(Pagination, AuditFilter),
    responses(
        (status = 200, description = "Audit entries", body = Vec<AuditEntry>),
    ),
    tag = "audit"
)]
async fn list_audit(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(page): Query<Pagination>,
    Query(filter): Query<AuditFilter>,
) -> Result<Json<Vec<AuditEntry>>, AppError> {
    require_permission(&caller, "audit.read")?;
    let entries: Vec<AuditEntry> = state
        .audit
        .entries(caller.organization_id)
        .into_iter()
        .filter(|e| {
            filter
                .resource_type
                .as_deref()
                .map_or(true, |t| e.resource_type == t)
                && filter.resource_id.map_or(true, |id| e.resource_id == id)
                && filter.action.as_deref().map_or(true, |a| e.action == a)
        })
        .collect();
    Ok(Json(page.page(entries, |e| e.created_at)))
}

/// GET /v1/audit/verify — Verify the audit chain.
#[utoipa::path(
    get,
    path = "/v1/audit/verify",
    responses(
        (status = 200, description = "Chain integrity", body = ChainIntegrityResult),
    ),
    tag = "audit"
)]
async fn verify_audit(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<ChainIntegrityResult>, AppError> {
    require_permission(&caller, "audit.read")?;
    let result = state.audit.verify(caller.organization_id);
    if !result.chain_valid {
        tracing::error!(
            organization_id = %caller.organization_id,
            broken_links = result.broken_links,
            tampered_entries = result.tampered_entries,
            "audit chain integrity check failed"
        );
    }
    Ok(Json(result))
}
