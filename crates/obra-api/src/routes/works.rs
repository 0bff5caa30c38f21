//! # Works API
//!
//! ## Endpoints
//!
//! - `GET /v1/works` — list works
//! - `POST /v1/works` — create a work
//! - `GET /v1/works/:id` — get a work
//! - `PATCH /v1/works/:id` — update a work
//! - `POST /v1/works/:id/status` — move a work through its lifecycle
//! - `GET /v1/works/:id/summary` — contracted, executed, spent and billed
//!
//! Work codes are unique per organization (case-insensitive).

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{NaiveDate, Utc};
use obra_core::{Amount, Currency, OrganizationId, WorkId};
use obra_state::{ContractStatus, ExpenseStatus, IncomeStatus, Lifecycle, TransitionRecord, WorkStatus};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{require_permission, CallerIdentity};
use crate::error::AppError;
use crate::extractors::{extract_validated_json, require_text, Pagination, Validate};
use crate::routes::{audited, non_blank};
use crate::state::{AppState, Work};

// ── Request/Response DTOs ───────────────────────────────────────────

/// Request to create a work.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateWorkRequest {
    pub code: String,
    pub name: String,
    pub address: Option<String>,
    pub client_name: Option<String>,
    #[serde(default)]
    pub budget: Amount,
    #[serde(default)]
    pub currency: Currency,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

fn check_dates(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<(), String> {
    match (start, end) {
        (Some(start), Some(end)) if end < start => {
            Err("end_date must not be before start_date".to_string())
        }
        _ => Ok(()),
    }
}

impl Validate for CreateWorkRequest {
    fn validate(&self) -> Result<(), String> {
        require_text("code", &self.code, 50)?;
        require_text("name", &self.name, 200)?;
        if self.budget.is_negative() {
            return Err("budget must not be negative".to_string());
        }
        check_dates(self.start_date, self.end_date)
    }
}

/// Changes to a work.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateWorkRequest {
    pub code: Option<String>,
    pub name: Option<String>,
    pub address: Option<String>,
    pub client_name: Option<String>,
    pub budget: Option<Amount>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl Validate for UpdateWorkRequest {
    fn validate(&self) -> Result<(), String> {
        if let Some(ref code) = self.code {
            require_text("code", code, 50)?;
        }
        if let Some(ref name) = self.name {
            require_text("name", name, 200)?;
        }
        if self.budget.is_some_and(|b| b.is_negative()) {
            return Err("budget must not be negative".to_string());
        }
        Ok(())
    }
}

/// Lifecycle move of a work.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ChangeWorkStatusRequest {
    pub status: WorkStatus,
    pub reason: Option<String>,
}

impl Validate for ChangeWorkStatusRequest {
    fn validate(&self) -> Result<(), String> {
        if let Some(ref reason) = self.reason {
            require_text("reason", reason, 500)?;
        }
        Ok(())
    }
}

/// Financial position of a work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct WorkSummary {
    pub work_id: WorkId,
    pub budget: Amount,
    /// Totals of the work's contracts that are not cancelled.
    pub contracted: Amount,
    /// Executed amounts of those contracts.
    pub executed: Amount,
    /// Gross of validated expenses.
    pub expenses_validated: Amount,
    /// Gross of pending and observed expenses.
    pub expenses_pending: Amount,
    /// Gross of registered incomes.
    pub incomes: Amount,
    /// `incomes − expenses_validated`.
    pub result: Amount,
    /// Validated expenses over budget; 0 without a budget.
    pub budget_consumption_bps: i64,
}

// ── Router ──────────────────────────────────────────────────────────

/// Build the works router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/works", get(list_works).post(create_work))
        .route("/v1/works/:id", get(get_work).patch(update_work))
        .route("/v1/works/:id/status", post(change_status))
        .route("/v1/works/:id/summary", get(work_summary))
}

fn code_taken(state: &AppState, org: OrganizationId, code: &str, except: Option<WorkId>) -> bool {
    let code = code.trim().to_lowercase();
    state.works.any(|w| {
        w.organization_id == org && Some(w.id) != except && w.code.to_lowercase() == code
    })
}

fn sum(items: impl IntoIterator<Item = Amount>) -> Result<Amount, AppError> {
    Amount::checked_sum(items).ok_or_else(|| AppError::Internal("amount overflow".into()))
}

/// Aggregate the contracts, expenses and incomes of a work.
pub fn summarize(state: &AppState, work: &Work) -> Result<WorkSummary, AppError> {
    let org = work.organization_id;
    let contracts = state.contracts.filter(|c| {
        c.organization_id == org && c.work_id == work.id && c.status != ContractStatus::Cancelled
    });
    let expenses = state
        .expenses
        .filter(|e| e.organization_id == org && e.work_id == work.id);
    let incomes = state.incomes.filter(|i| {
        i.organization_id == org && i.work_id == work.id && i.status == IncomeStatus::Registered
    });

    let expenses_validated = sum(expenses
        .iter()
        .filter(|e| e.status == ExpenseStatus::Validated)
        .map(|e| e.taxes.gross))?;
    let expenses_pending = sum(expenses
        .iter()
        .filter(|e| matches!(e.status, ExpenseStatus::Pending | ExpenseStatus::Observed))
        .map(|e| e.taxes.gross))?;
    let incomes = sum(incomes.iter().map(|i| i.taxes.gross))?;

    Ok(WorkSummary {
        work_id: work.id,
        budget: work.budget,
        contracted: sum(contracts.iter().map(|c| c.total_amount))?,
        executed: sum(contracts.iter().map(|c| c.executed_amount))?,
        expenses_validated,
        expenses_pending,
        incomes,
        result: incomes
            .checked_sub(expenses_validated)
            .ok_or_else(|| AppError::Internal("amount overflow".into()))?,
        budget_consumption_bps: expenses_validated.share_bps(work.budget),
    })
}

// ── Handlers ────────────────────────────────────────────────────────

/// GET /v1/works — List works.
#[utoipa::path(
    get,
    path = "/v1/works",
    params(Pagination),
    responses(
        (status = 200, description = "Works of the organization", body = Vec<Work>),
    ),
    tag = "works"
)]
async fn list_works(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<Work>>, AppError> {
    require_permission(&caller, "works.read")?;
    let works = state.works.list_scoped(caller.organization_id);
    Ok(Json(page.page(works, |w| w.created_at)))
}

/// POST /v1/works — Create a work.
#[utoipa::path(
    post,
    path = "/v1/works",
    request_body = CreateWorkRequest,
    responses(
        (status = 201, description = "Work created", body = Work),
        (status = 409, description = "Code already used", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "works"
)]
async fn create_work(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<CreateWorkRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Work>), AppError> {
    require_permission(&caller, "works.create")?;
    let req = extract_validated_json(body)?;
    let org = caller.organization_id;

    let tx = state.begin().await;
    let work = {
        if code_taken(&state, org, &req.code, None) {
            return Err(AppError::rule(
                "DUPLICATE",
                format!("a work with code {} already exists", req.code.trim()),
            ));
        }
        let now = Utc::now();
        let work = Work {
            id: WorkId::new(),
            organization_id: org,
            code: req.code.trim().to_string(),
            name: req.name.trim().to_string(),
            address: non_blank(req.address),
            client_name: non_blank(req.client_name),
            status: WorkStatus::Planning,
            budget: req.budget,
            currency: req.currency,
            start_date: req.start_date,
            end_date: req.end_date,
            transitions: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        state.works.put(work.clone());
        work
    };

    let changes = audited(
        &state,
        &caller,
        "work.created",
        &work,
        json!({ "code": work.code, "budget": work.budget }),
    )?;
    tx.commit(changes).await?;
    tracing::info!(work_id = %work.id, code = %work.code, "work created");
    Ok((StatusCode::CREATED, Json(work)))
}

/// GET /v1/works/:id — Get a work.
#[utoipa::path(
    get,
    path = "/v1/works/{id}",
    params(("id" = Uuid, Path, description = "Work ID")),
    responses(
        (status = 200, description = "Work found", body = Work),
        (status = 404, description = "Work not found", body = crate::error::ErrorBody),
    ),
    tag = "works"
)]
async fn get_work(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<Work>, AppError> {
    require_permission(&caller, "works.read")?;
    state
        .works
        .scoped(caller.organization_id, &id)
        .map(Json)
        .ok_or_else(|| AppError::not_found("work", id))
}

/// PATCH /v1/works/:id — Update a work.
#[utoipa::path(
    patch,
    path = "/v1/works/{id}",
    params(("id" = Uuid, Path, description = "Work ID")),
    request_body = UpdateWorkRequest,
    responses(
        (status = 200, description = "Work updated", body = Work),
        (status = 404, description = "Work not found", body = crate::error::ErrorBody),
        (status = 409, description = "Code already used", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "works"
)]
async fn update_work(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<UpdateWorkRequest>, JsonRejection>,
) -> Result<Json<Work>, AppError> {
    require_permission(&caller, "works.update")?;
    let req = extract_validated_json(body)?;
    let org = caller.organization_id;

    let tx = state.begin().await;
    let work = {
        if let Some(ref code) = req.code {
            if code_taken(&state, org, code, Some(WorkId::from_uuid(id))) {
                return Err(AppError::rule(
                    "DUPLICATE",
                    format!("a work with code {} already exists", code.trim()),
                ));
            }
        }
        state
            .works
            .try_update_scoped(org, &id, |w| {
                if let Some(code) = req.code {
                    w.code = code.trim().to_string();
                }
                if let Some(name) = req.name {
                    w.name = name.trim().to_string();
                }
                if req.address.is_some() {
                    w.address = non_blank(req.address);
                }
                if req.client_name.is_some() {
                    w.client_name = non_blank(req.client_name);
                }
                if let Some(budget) = req.budget {
                    w.budget = budget;
                }
                if req.start_date.is_some() {
                    w.start_date = req.start_date;
                }
                if req.end_date.is_some() {
                    w.end_date = req.end_date;
                }
                check_dates(w.start_date, w.end_date).map_err(AppError::Validation)?;
                w.updated_at = Utc::now();
                Ok::<_, AppError>(w.clone())
            })
            .ok_or_else(|| AppError::not_found("work", id))??
    };

    let changes = audited(
        &state,
        &caller,
        "work.updated",
        &work,
        json!({ "code": work.code, "name": work.name, "budget": work.budget }),
    )?;
    tx.commit(changes).await?;
    Ok(Json(work))
}

/// POST /v1/works/:id/status — Change a work's status.
#[utoipa::path(
    post,
    path = "/v1/works/{id}/status",
    params(("id" = Uuid, Path, description = "Work ID")),
    request_body = ChangeWorkStatusRequest,
    responses(
        (status = 200, description = "Status changed", body = Work),
        (status = 404, description = "Work not found", body = crate::error::ErrorBody),
        (status = 409, description = "Transition not allowed", body = crate::error::ErrorBody),
    ),
    tag = "works"
)]
async fn change_status(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<ChangeWorkStatusRequest>, JsonRejection>,
) -> Result<Json<Work>, AppError> {
    require_permission(&caller, "works.update")?;
    let req = extract_validated_json(body)?;
    let reason = non_blank(req.reason);
    let mut from = WorkStatus::default();

    let tx = state.begin().await;
    let work = state
        .works
        .try_update_scoped(caller.organization_id, &id, |w| {
            from = w.status;
            let now = Utc::now();
            w.status = w.status.transition(req.status)?;
            w.transitions.push(TransitionRecord::new(
                from,
                req.status,
                reason.clone(),
                caller.user_id,
                now,
            ));
            w.updated_at = now;
            Ok::<_, AppError>(w.clone())
        })
        .ok_or_else(|| AppError::not_found("work", id))??;

    let changes = audited(
        &state,
        &caller,
        "work.status_changed",
        &work,
        json!({ "from": from.as_str(), "to": work.status.as_str(), "reason": reason }),
    )?;
    tx.commit(changes).await?;
    tracing::info!(work_id = %work.id, from = from.as_str(), to = work.status.as_str(), "work status changed");
    Ok(Json(work))
}

/// GET /v1/works/:id/summary — Financial summary of a work.
#[utoipa::path(
    get,
    path = "/v1/works/{id}/summary",
    params(("id" = Uuid, Path, description = "Work ID")),
    responses(
        (status = 200, description = "Summary", body = WorkSummary),
        (status = 404, description = "Work not found", body = crate::error::ErrorBody),
    ),
    tag = "works"
)]
async fn work_summary(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<WorkSummary>, AppError> {
    require_permission(&caller, "works.read")?;
    let work = state
        .works
        .scoped(caller.organization_id, &id)
        .ok_or_else(|| AppError::not_found("work", id))?;
    Ok(Json(summarize(&state, &work)?))
}
