//! # Incomes API
//!
//! ## Endpoints
//!
//! - `GET /v1/incomes` — list incomes
//! - `POST /v1/incomes` — register a sale document
//! - `GET /v1/incomes/:id` — get an income
//! - `POST /v1/incomes/:id/annul` — annul, reversing books and cash

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use obra_core::{Amount, CashboxId, WorkId};
use obra_fiscal::{DocumentType, FiscalCondition};
use obra_state::IncomeStatus;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::{require_permission, CallerIdentity};
use crate::error::AppError;
use crate::extractors::{extract_validated_json, require_text, Pagination, Validate};
use crate::ledger::{annul_income, register_income, IncomeOutcome, NewIncome};
use crate::routes::expenses::{ReasonRequest, DEFAULT_VAT_RATE_BPS};
use crate::state::{AppState, Income};

// ── Request/Response DTOs ───────────────────────────────────────────

/// Request to register an income.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateIncomeRequest {
    pub work_id: WorkId,
    /// Collected in cash into this cashbox.
    pub cashbox_id: Option<CashboxId>,
    pub client_name: String,
    pub client_fiscal_condition: FiscalCondition,
    pub document_type: DocumentType,
    pub document_number: String,
    pub issue_date: NaiveDate,
    pub description: String,
    pub net_amount: Amount,
    /// Defaults to 2100 (21 %).
    pub vat_rate_bps: Option<u32>,
}

impl Validate for CreateIncomeRequest {
    fn validate(&self) -> Result<(), String> {
        require_text("client_name", &self.client_name, 200)?;
        require_text("document_number", &self.document_number, 50)?;
        require_text("description", &self.description, 500)?;
        if !self.net_amount.is_positive() {
            return Err("net_amount must be positive".to_string());
        }
        Ok(())
    }
}

/// List filters.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct IncomeFilter {
    pub work_id: Option<Uuid>,
    /// `registered` or `annulled`.
    #[param(value_type = Option<String>)]
    pub status: Option<IncomeStatus>,
}

// ── Router ──────────────────────────────────────────────────────────

/// Build the incomes router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/incomes", get(list_incomes).post(create_income))
        .route("/v1/incomes/:id", get(get_income))
        .route("/v1/incomes/:id/annul", post(annul))
}

// ── Handlers ────────────────────────────────────────────────────────

/// GET /v1/incomes — List incomes.
#[utoipa::path(
    get,
    path = "/v1/incomes",
    params(Pagination, IncomeFilter),
    responses(
        (status = 200, description = "Incomes of the organization", body = Vec<Income>),
    ),
    tag = "incomes"
)]
async fn list_incomes(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(page): Query<Pagination>,
    Query(filter): Query<IncomeFilter>,
) -> Result<Json<Vec<Income>>, AppError> {
    require_permission(&caller, "incomes.read")?;
    let org = caller.organization_id;
    let incomes = state.incomes.filter(|i| {
        i.organization_id == org
            && filter.work_id.map_or(true, |w| *i.work_id.as_uuid() == w)
            && filter.status.map_or(true, |s| i.status == s)
    });
    Ok(Json(page.page(incomes, |i| i.created_at)))
}

/// POST /v1/incomes — Register an income.
#[utoipa::path(
    post,
    path = "/v1/incomes",
    request_body = CreateIncomeRequest,
    responses(
        (status = 201, description = "Income registered", body = IncomeOutcome),
        (status = 403, description = "Cashbox of another user", body = crate::error::ErrorBody),
        (status = 404, description = "Work or cashbox not found", body = crate::error::ErrorBody),
        (status = 409, description = "Work or cashbox closed", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "incomes"
)]
async fn create_income(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<CreateIncomeRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<IncomeOutcome>), AppError> {
    require_permission(&caller, "incomes.create")?;
    let req = extract_validated_json(body)?;
    let input = NewIncome {
        work_id: req.work_id,
        cashbox_id: req.cashbox_id,
        client_name: req.client_name.trim().to_string(),
        client_fiscal_condition: req.client_fiscal_condition,
        document_type: req.document_type,
        document_number: req.document_number.trim().to_string(),
        issue_date: req.issue_date,
        description: req.description.trim().to_string(),
        net_amount: req.net_amount,
        vat_rate_bps: req.vat_rate_bps.unwrap_or(DEFAULT_VAT_RATE_BPS),
    };
    let tx = state.begin().await;
    let (outcome, changes) = register_income(&tx, &caller, input)?;
    tx.commit(changes).await?;
    tracing::info!(income_id = %outcome.income.id, gross = %outcome.income.taxes.gross, "income registered");
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// GET /v1/incomes/:id — Get an income.
#[utoipa::path(
    get,
    path = "/v1/incomes/{id}",
    params(("id" = Uuid, Path, description = "Income ID")),
    responses(
        (status = 200, description = "Income found", body = Income),
        (status = 404, description = "Income not found", body = crate::error::ErrorBody),
    ),
    tag = "incomes"
)]
async fn get_income(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<Income>, AppError> {
    require_permission(&caller, "incomes.read")?;
    state
        .incomes
        .scoped(caller.organization_id, &id)
        .map(Json)
        .ok_or_else(|| AppError::not_found("income", id))
}

/// POST /v1/incomes/:id/annul — Annul an income.
#[utoipa::path(
    post,
    path = "/v1/incomes/{id}/annul",
    params(("id" = Uuid, Path, description = "Income ID")),
    request_body = ReasonRequest,
    responses(
        (status = 200, description = "Income annulled", body = IncomeOutcome),
        (status = 404, description = "Income not found", body = crate::error::ErrorBody),
        (status = 409, description = "Already annulled or cash already spent", body = crate::error::ErrorBody),
        (status = 422, description = "Missing reason", body = crate::error::ErrorBody),
    ),
    tag = "incomes"
)]
async fn annul(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<ReasonRequest>, JsonRejection>,
) -> Result<Json<IncomeOutcome>, AppError> {
    require_permission(&caller, "incomes.annul")?;
    let req = extract_validated_json(body)?;
    let tx = state.begin().await;
    let (outcome, changes) = annul_income(&tx, &caller, id, req.reason.trim().to_string())?;
    tx.commit(changes).await?;
    Ok(Json(outcome))
}
