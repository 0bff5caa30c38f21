//! # Alerts API
//!
//! ## Endpoints
//!
//! - `GET /v1/alerts` — alert inbox, optionally only open alerts
//! - `POST /v1/alerts/:id/acknowledge` — mark an alert as seen
//! - `POST /v1/alerts/scan` — evaluate suppliers and contracts now

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::alerts::{scan, ScanReport};
use crate::auth::{require_permission, CallerIdentity};
use crate::error::AppError;
use crate::extractors::Pagination;
use crate::routes::audited;
use crate::state::{Alert, AppState};

/// Inbox filters.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AlertFilter {
    /// Only unacknowledged alerts.
    #[serde(default)]
    pub open: bool,
}

// ── Router ──────────────────────────────────────────────────────────

/// Build the alerts router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/alerts", get(list_alerts))
        .route("/v1/alerts/scan", post(run_scan))
        .route("/v1/alerts/:id/acknowledge", post(acknowledge))
}

// ── Handlers ────────────────────────────────────────────────────────

/// GET /v1/alerts — List alerts.
#[utoipa::path(
    get,
    path = "/v1/alerts",
    params(Pagination, AlertFilter),
    responses(
        (status = 200, description = "Alerts of the organization", body = Vec<Alert>),
    ),
    tag = "alerts"
)]
async fn list_alerts(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(page): Query<Pagination>,
    Query(filter): Query<AlertFilter>,
) -> Result<Json<Vec<Alert>>, AppError> {
    require_permission(&caller, "alerts.read")?;
    let org = caller.organization_id;
    let alerts = state
        .alerts
        .filter(|a| a.organization_id == org && (!filter.open || a.is_open()));
    Ok(Json(page.page(alerts, |a| a.created_at)))
}

/// POST /v1/alerts/:id/acknowledge — Acknowledge an alert.
#[utoipa::path(
    post,
    path = "/v1/alerts/{id}/acknowledge",
    params(("id" = Uuid, Path, description = "Alert ID")),
    responses(
        (status = 200, description = "Alert acknowledged", body = Alert),
        (status = 404, description = "Alert not found", body = crate::error::ErrorBody),
        (status = 409, description = "Already acknowledged", body = crate::error::ErrorBody),
    ),
    tag = "alerts"
)]
async fn acknowledge(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<Alert>, AppError> {
    require_permission(&caller, "alerts.acknowledge")?;
    let tx = state.begin().await;
    let alert = state
        .alerts
        .try_update_scoped(caller.organization_id, &id, |a| {
            if !a.is_open() {
                return Err(AppError::Conflict("alert already acknowledged".into()));
            }
            a.acknowledged_at = Some(Utc::now());
            a.acknowledged_by = Some(caller.user_id);
            Ok(a.clone())
        })
        .ok_or_else(|| AppError::not_found("alert", id))??;

    let changes = audited(
        &state,
        &caller,
        "alert.acknowledged",
        &alert,
        json!({ "kind": alert.kind }),
    )?;
    tx.commit(changes).await?;
    Ok(Json(alert))
}

/// POST /v1/alerts/scan — Scan the caller's organization.
#[utoipa::path(
    post,
    path = "/v1/alerts/scan",
    responses(
        (status = 200, description = "Scan report", body = ScanReport),
    ),
    tag = "alerts"
)]
async fn run_scan(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<ScanReport>, AppError> {
    require_permission(&caller, "alerts.scan")?;
    let tx = state.begin().await;
    let (report, changes) = scan(&tx, Some(caller.organization_id), Utc::now())?;
    tx.commit(changes).await?;
    Ok(Json(report))
}
