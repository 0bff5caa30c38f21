//! # Cashboxes API
//!
//! ## Endpoints
//!
//! - `GET /v1/cashboxes` — the caller's cashboxes, or all with `cashboxes.audit`
//! - `POST /v1/cashboxes` — open a cashbox for the caller
//! - `GET /v1/cashboxes/:id` — get a cashbox
//! - `POST /v1/cashboxes/:id/movements` — record a manual movement
//! - `POST /v1/cashboxes/:id/close` — count and close
//!
//! A user holds at most one open cashbox. Only its owner moves or closes
//! it, and the running balance never goes negative.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use obra_core::{Amount, CashboxId, Currency, Period};
use obra_fiscal::{CashLedger, Closing, MovementKind};
use obra_state::{CashboxStatus, Lifecycle};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::alerts;
use crate::auth::{require_permission, CallerIdentity};
use crate::db::Changes;
use crate::error::AppError;
use crate::extractors::{extract_validated_json, require_text, Pagination, Validate};
use crate::ledger::record_movement;
use crate::routes::audited;
use crate::state::{Alert, AppState, CashMovement, Cashbox, WriteTx};

// ── Request/Response DTOs ───────────────────────────────────────────

/// Request to open a cashbox.
#[derive(Debug, Deserialize, ToSchema)]
pub struct OpenCashboxRequest {
    /// `YYYY-MM`; defaults to the current month.
    pub period: Option<String>,
    #[serde(default)]
    pub currency: Currency,
    #[serde(default)]
    pub opening_balance: Amount,
}

impl Validate for OpenCashboxRequest {
    fn validate(&self) -> Result<(), String> {
        if let Some(ref period) = self.period {
            Period::parse(period).map_err(|e| e.to_string())?;
        }
        if self.opening_balance.is_negative() {
            return Err("opening_balance must not be negative".to_string());
        }
        Ok(())
    }
}

/// A manual cash movement.
#[derive(Debug, Deserialize, ToSchema)]
pub struct MovementRequest {
    pub kind: MovementKind,
    pub amount: Amount,
    pub concept: String,
}

impl Validate for MovementRequest {
    fn validate(&self) -> Result<(), String> {
        require_text("concept", &self.concept, 200)?;
        if !self.amount.is_positive() {
            return Err("amount must be positive".to_string());
        }
        Ok(())
    }
}

/// A recorded movement and the resulting balance.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MovementRecorded {
    pub movement: CashMovement,
    pub balance: Amount,
}

/// The owner's count at close.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CloseCashboxRequest {
    pub declared_balance: Amount,
}

impl Validate for CloseCashboxRequest {
    fn validate(&self) -> Result<(), String> {
        if self.declared_balance.is_negative() {
            return Err("declared_balance must not be negative".to_string());
        }
        Ok(())
    }
}

/// A closed cashbox.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CashboxClosed {
    pub cashbox: Cashbox,
    pub closing: Closing,
    /// Raised when the count differs from the books.
    pub alert: Option<Alert>,
}

// ── Router ──────────────────────────────────────────────────────────

/// Build the cashboxes router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/cashboxes", get(list_cashboxes).post(open_cashbox))
        .route("/v1/cashboxes/:id", get(get_cashbox))
        .route("/v1/cashboxes/:id/movements", post(add_movement))
        .route("/v1/cashboxes/:id/close", post(close_cashbox))
}

fn visible(caller: &CallerIdentity, cashbox: &Cashbox) -> bool {
    cashbox.user_id == caller.user_id || caller.can("cashboxes.audit")
}

// ── Handlers ────────────────────────────────────────────────────────

/// GET /v1/cashboxes — List cashboxes.
#[utoipa::path(
    get,
    path = "/v1/cashboxes",
    params(Pagination),
    responses(
        (status = 200, description = "Visible cashboxes", body = Vec<Cashbox>),
    ),
    tag = "cashboxes"
)]
async fn list_cashboxes(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<Cashbox>>, AppError> {
    require_permission(&caller, "cashboxes.read")?;
    let org = caller.organization_id;
    let cashboxes = state
        .cashboxes
        .filter(|c| c.organization_id == org && visible(&caller, c));
    Ok(Json(page.page(cashboxes, |c| c.opened_at)))
}

/// POST /v1/cashboxes — Open a cashbox.
#[utoipa::path(
    post,
    path = "/v1/cashboxes",
    request_body = OpenCashboxRequest,
    responses(
        (status = 201, description = "Cashbox opened", body = Cashbox),
        (status = 409, description = "Caller already has an open cashbox", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "cashboxes"
)]
async fn open_cashbox(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<OpenCashboxRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Cashbox>), AppError> {
    require_permission(&caller, "cashboxes.create")?;
    let req = extract_validated_json(body)?;
    let now = Utc::now();
    let period = match req.period {
        Some(ref p) => Period::parse(p)?,
        None => Period::of(now.date_naive()),
    };

    let tx = state.begin().await;
    let cashbox = {
        if state
            .cashboxes
            .any(|c| c.user_id == caller.user_id && c.status == CashboxStatus::Open)
        {
            return Err(AppError::rule(
                "CASHBOX_ALREADY_OPEN",
                "close the current cashbox before opening another",
            ));
        }
        let cashbox = Cashbox {
            id: CashboxId::new(),
            organization_id: caller.organization_id,
            user_id: caller.user_id,
            period,
            currency: req.currency,
            opening_balance: req.opening_balance,
            movements: Vec::new(),
            status: CashboxStatus::Open,
            declared_balance: None,
            closing_balance: None,
            difference: None,
            opened_at: now,
            closed_at: None,
        };
        state.cashboxes.put(cashbox.clone());
        cashbox
    };

    let changes = audited(
        &state,
        &caller,
        "cashbox.opened",
        &cashbox,
        json!({ "period": cashbox.period, "opening_balance": cashbox.opening_balance }),
    )?;
    tx.commit(changes).await?;
    tracing::info!(cashbox_id = %cashbox.id, user_id = %caller.user_id, "cashbox opened");
    Ok((StatusCode::CREATED, Json(cashbox)))
}

/// GET /v1/cashboxes/:id — Get a cashbox.
#[utoipa::path(
    get,
    path = "/v1/cashboxes/{id}",
    params(("id" = Uuid, Path, description = "Cashbox ID")),
    responses(
        (status = 200, description = "Cashbox found", body = Cashbox),
        (status = 404, description = "Cashbox not found", body = crate::error::ErrorBody),
    ),
    tag = "cashboxes"
)]
async fn get_cashbox(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<Cashbox>, AppError> {
    require_permission(&caller, "cashboxes.read")?;
    state
        .cashboxes
        .scoped(caller.organization_id, &id)
        .filter(|c| visible(&caller, c))
        .map(Json)
        .ok_or_else(|| AppError::not_found("cashbox", id))
}

/// POST /v1/cashboxes/:id/movements — Record a manual movement.
#[utoipa::path(
    post,
    path = "/v1/cashboxes/{id}/movements",
    params(("id" = Uuid, Path, description = "Cashbox ID")),
    request_body = MovementRequest,
    responses(
        (status = 201, description = "Movement recorded", body = MovementRecorded),
        (status = 403, description = "Not the owner", body = crate::error::ErrorBody),
        (status = 404, description = "Cashbox not found", body = crate::error::ErrorBody),
        (status = 409, description = "Cashbox closed or insufficient funds", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "cashboxes"
)]
async fn add_movement(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<MovementRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<MovementRecorded>), AppError> {
    require_permission(&caller, "cashboxes.update")?;
    let req = extract_validated_json(body)?;
    let tx = state.begin().await;
    let (cashbox, movement, changes) = record_movement(
        &tx,
        &caller,
        id,
        req.kind,
        req.amount,
        req.concept.trim().to_string(),
    )?;
    tx.commit(changes).await?;
    Ok((
        StatusCode::CREATED,
        Json(MovementRecorded {
            movement,
            balance: cashbox.balance()?,
        }),
    ))
}

fn close(
    state: &WriteTx<'_>,
    caller: &CallerIdentity,
    id: Uuid,
    declared: Amount,
) -> Result<(CashboxClosed, Changes), AppError> {
    let now = Utc::now();
    let org = caller.organization_id;

    let mut cashbox = state
        .cashboxes
        .scoped(org, &id)
        .ok_or_else(|| AppError::not_found("cashbox", id))?;
    if cashbox.user_id != caller.user_id {
        return Err(AppError::Forbidden(
            "only the owner of a cashbox may close it".into(),
        ));
    }
    if !cashbox.status.accepts_movements() {
        return Err(AppError::rule(
            "CASHBOX_CLOSED",
            format!("cashbox {} is already closed", cashbox.period),
        ));
    }
    cashbox.status = cashbox.status.transition(CashboxStatus::Closed)?;
    let closing = CashLedger::close(
        cashbox.opening_balance,
        cashbox.movements.iter().map(|m| (m.kind, m.amount)),
        declared,
    )?;
    cashbox.declared_balance = Some(closing.declared);
    cashbox.closing_balance = Some(closing.computed);
    cashbox.difference = Some(closing.difference);
    cashbox.closed_at = Some(now);

    let alert = alerts::cashbox_alert(&cashbox, closing.difference)
        .and_then(|draft| alerts::prepare(state, org, draft, now));

    state.cashboxes.put(cashbox.clone());
    let mut changes = audited(
        state,
        caller,
        "cashbox.closed",
        &cashbox,
        json!({
            "computed": closing.computed,
            "declared": closing.declared,
            "difference": closing.difference,
        }),
    )?;
    alerts::store(state, alert.as_slice(), &mut changes)?;

    tracing::info!(
        cashbox_id = %cashbox.id,
        difference = %closing.difference,
        "cashbox closed"
    );
    Ok((
        CashboxClosed {
            cashbox,
            closing,
            alert,
        },
        changes,
    ))
}

/// POST /v1/cashboxes/:id/close — Close a cashbox.
#[utoipa::path(
    post,
    path = "/v1/cashboxes/{id}/close",
    params(("id" = Uuid, Path, description = "Cashbox ID")),
    request_body = CloseCashboxRequest,
    responses(
        (status = 200, description = "Cashbox closed", body = CashboxClosed),
        (status = 403, description = "Not the owner", body = crate::error::ErrorBody),
        (status = 404, description = "Cashbox not found", body = crate::error::ErrorBody),
        (status = 409, description = "Already closed", body = crate::error::ErrorBody),
    ),
    tag = "cashboxes"
)]
async fn close_cashbox(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<CloseCashboxRequest>, JsonRejection>,
) -> Result<Json<CashboxClosed>, AppError> {
    require_permission(&caller, "cashboxes.close")?;
    let req = extract_validated_json(body)?;
    let tx = state.begin().await;
    let (closed, changes) = close(&tx, &caller, id, req.declared_balance)?;
    tx.commit(changes).await?;
    Ok(Json(closed))
}
