//! # Expenses API
//!
//! ## Endpoints
//!
//! - `GET /v1/expenses` — list expenses, optionally filtered
//! - `POST /v1/expenses` — load a purchase document
//! - `GET /v1/expenses/:id` — get an expense
//! - `PATCH /v1/expenses/:id` — edit a pending or observed expense
//! - `DELETE /v1/expenses/:id` — delete a pending expense
//! - `POST /v1/expenses/:id/validate` — validate against contract, cash and books
//! - `POST /v1/expenses/:id/observe` — send back for correction
//! - `POST /v1/expenses/:id/annul` — annul
//!
//! Taxes are recomputed whenever the document changes. The counterparty's
//! fiscal condition comes from the supplier; documents without a supplier
//! must state it.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{NaiveDate, Utc};
use obra_core::{Amount, CashboxId, ContractId, ExpenseId, SupplierId, WorkId};
use obra_fiscal::{Direction, DocumentType, FiscalCondition};
use obra_state::ExpenseStatus;
use serde::Deserialize;
use serde_json::json;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::audit::AuditEvent;
use crate::auth::{require_permission, CallerIdentity};
use crate::db::Changes;
use crate::error::AppError;
use crate::extractors::{extract_validated_json, require_text, Pagination, Validate};
use crate::ledger::{
    compute_taxes, live_contract, open_work, owned_open_cashbox, transition_expense,
    usable_supplier, ExpenseTransition,
};
use crate::routes::{audited, non_blank};
use crate::state::{AppState, Expense};

/// VAT rate applied when a request does not state one (21 %).
pub const DEFAULT_VAT_RATE_BPS: u32 = 2_100;

// ── Request/Response DTOs ───────────────────────────────────────────

/// Request to load an expense.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateExpenseRequest {
    pub work_id: WorkId,
    pub contract_id: Option<ContractId>,
    /// Defaults to the contract's supplier.
    pub supplier_id: Option<SupplierId>,
    /// Paid in cash from this cashbox on validation.
    pub cashbox_id: Option<CashboxId>,
    /// Required when there is no supplier.
    pub fiscal_condition: Option<FiscalCondition>,
    pub document_type: DocumentType,
    pub document_number: String,
    pub issue_date: NaiveDate,
    pub description: String,
    pub net_amount: Amount,
    /// Defaults to 2100 (21 %).
    pub vat_rate_bps: Option<u32>,
    pub document_url: Option<String>,
}

impl Validate for CreateExpenseRequest {
    fn validate(&self) -> Result<(), String> {
        require_text("document_number", &self.document_number, 50)?;
        require_text("description", &self.description, 500)?;
        if !self.net_amount.is_positive() {
            return Err("net_amount must be positive".to_string());
        }
        if self.supplier_id.is_none()
            && self.contract_id.is_none()
            && self.fiscal_condition.is_none()
        {
            return Err("fiscal_condition is required for expenses without a supplier".to_string());
        }
        Ok(())
    }
}

/// Changes to a pending or observed expense.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateExpenseRequest {
    pub document_type: Option<DocumentType>,
    pub document_number: Option<String>,
    pub issue_date: Option<NaiveDate>,
    pub description: Option<String>,
    pub net_amount: Option<Amount>,
    pub vat_rate_bps: Option<u32>,
    /// Only for expenses without a supplier.
    pub fiscal_condition: Option<FiscalCondition>,
    pub document_url: Option<String>,
}

impl Validate for UpdateExpenseRequest {
    fn validate(&self) -> Result<(), String> {
        if let Some(ref number) = self.document_number {
            require_text("document_number", number, 50)?;
        }
        if let Some(ref description) = self.description {
            require_text("description", description, 500)?;
        }
        if self.net_amount.is_some_and(|n| !n.is_positive()) {
            return Err("net_amount must be positive".to_string());
        }
        Ok(())
    }
}

/// Reason for observing or annulling an expense.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ReasonRequest {
    pub reason: String,
}

impl Validate for ReasonRequest {
    fn validate(&self) -> Result<(), String> {
        require_text("reason", &self.reason, 500)
    }
}

/// List filters.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ExpenseFilter {
    pub work_id: Option<Uuid>,
    pub contract_id: Option<Uuid>,
    pub supplier_id: Option<Uuid>,
    /// `pending`, `validated`, `observed` or `annulled`.
    #[param(value_type = Option<String>)]
    pub status: Option<ExpenseStatus>,
}

impl ExpenseFilter {
    fn matches(&self, e: &Expense) -> bool {
        self.work_id.map_or(true, |id| *e.work_id.as_uuid() == id)
            && self
                .contract_id
                .map_or(true, |id| e.contract_id.map(|c| *c.as_uuid()) == Some(id))
            && self
                .supplier_id
                .map_or(true, |id| e.supplier_id.map(|s| *s.as_uuid()) == Some(id))
            && self.status.map_or(true, |s| e.status == s)
    }
}

// ── Router ──────────────────────────────────────────────────────────

/// Build the expenses router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/expenses", get(list_expenses).post(create_expense))
        .route(
            "/v1/expenses/:id",
            get(get_expense).patch(update_expense).delete(delete_expense),
        )
        .route("/v1/expenses/:id/validate", post(validate_expense))
        .route("/v1/expenses/:id/observe", post(observe_expense))
        .route("/v1/expenses/:id/annul", post(annul_expense))
}

fn document_taken(state: &AppState, expense: &Expense) -> bool {
    let Some(supplier_id) = expense.supplier_id else {
        return false;
    };
    state.expenses.any(|e| {
        e.organization_id == expense.organization_id
            && e.id != expense.id
            && e.supplier_id == Some(supplier_id)
            && e.document_type == expense.document_type
            && e.document_number == expense.document_number
            && e.status != ExpenseStatus::Annulled
    })
}

fn duplicate_document(expense: &Expense) -> AppError {
    AppError::rule(
        "DUPLICATE",
        format!(
            "document {} {} of this supplier is already loaded",
            expense.document_type, expense.document_number
        ),
    )
}

// ── Handlers ────────────────────────────────────────────────────────

/// GET /v1/expenses — List expenses.
#[utoipa::path(
    get,
    path = "/v1/expenses",
    params(Pagination, ExpenseFilter),
    responses(
        (status = 200, description = "Expenses of the organization", body = Vec<Expense>),
    ),
    tag = "expenses"
)]
async fn list_expenses(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(page): Query<Pagination>,
    Query(filter): Query<ExpenseFilter>,
) -> Result<Json<Vec<Expense>>, AppError> {
    require_permission(&caller, "expenses.read")?;
    let org = caller.organization_id;
    let expenses = state
        .expenses
        .filter(|e| e.organization_id == org && filter.matches(e));
    Ok(Json(page.page(expenses, |e| e.created_at)))
}

/// POST /v1/expenses — Load an expense.
#[utoipa::path(
    post,
    path = "/v1/expenses",
    request_body = CreateExpenseRequest,
    responses(
        (status = 201, description = "Expense loaded as pending", body = Expense),
        (status = 403, description = "Cashbox of another user", body = crate::error::ErrorBody),
        (status = 404, description = "Work, contract, supplier or cashbox not found", body = crate::error::ErrorBody),
        (status = 409, description = "Work closed, supplier blocked, contract closed or duplicate document", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "expenses"
)]
async fn create_expense(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<CreateExpenseRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Expense>), AppError> {
    require_permission(&caller, "expenses.create")?;
    let req = extract_validated_json(body)?;
    let org = caller.organization_id;

    let tx = state.begin().await;
    let expense = {
        let now = Utc::now();
        let work = open_work(&state, org, req.work_id)?;

        let contract = req
            .contract_id
            .map(|id| live_contract(&state, org, id))
            .transpose()?;
        if let Some(ref contract) = contract {
            if contract.work_id != work.id {
                return Err(AppError::Validation(
                    "contract belongs to another work".into(),
                ));
            }
            if req.supplier_id.is_some_and(|s| s != contract.supplier_id) {
                return Err(AppError::Validation(
                    "supplier_id does not match the contract's supplier".into(),
                ));
            }
        }
        let supplier_id = req.supplier_id.or(contract.as_ref().map(|c| c.supplier_id));
        let supplier = supplier_id
            .map(|id| usable_supplier(&state, org, id, now.date_naive()))
            .transpose()?;
        if let Some(cashbox_id) = req.cashbox_id {
            owned_open_cashbox(&state, &caller, cashbox_id)?;
        }

        let counterparty_condition = match (&supplier, req.fiscal_condition) {
            (Some(s), _) => s.fiscal_condition,
            (None, Some(condition)) => condition,
            (None, None) => {
                return Err(AppError::Validation(
                    "fiscal_condition is required for expenses without a supplier".into(),
                ))
            }
        };
        let taxes = compute_taxes(
            &state,
            org,
            Direction::Purchase,
            counterparty_condition,
            req.document_type,
            req.net_amount,
            req.vat_rate_bps.unwrap_or(DEFAULT_VAT_RATE_BPS),
        )?;

        let expense = Expense {
            id: ExpenseId::new(),
            organization_id: org,
            work_id: work.id,
            contract_id: contract.map(|c| c.id),
            supplier_id,
            cashbox_id: req.cashbox_id,
            counterparty_condition,
            document_type: req.document_type,
            document_number: req.document_number.trim().to_string(),
            issue_date: req.issue_date,
            description: req.description.trim().to_string(),
            net_amount: req.net_amount,
            vat_rate_bps: taxes.vat_rate_bps,
            taxes,
            status: ExpenseStatus::Pending,
            status_reason: None,
            document_url: non_blank(req.document_url),
            transitions: Vec::new(),
            created_by: caller.user_id,
            created_at: now,
            updated_at: now,
        };
        if document_taken(&state, &expense) {
            return Err(duplicate_document(&expense));
        }
        state.expenses.put(expense.clone());
        expense
    };

    let changes = audited(
        &state,
        &caller,
        "expense.created",
        &expense,
        json!({
            "work_id": expense.work_id,
            "contract_id": expense.contract_id,
            "document_type": expense.document_type,
            "document_number": expense.document_number,
            "gross": expense.taxes.gross,
        }),
    )?;
    tx.commit(changes).await?;
    tracing::info!(expense_id = %expense.id, gross = %expense.taxes.gross, "expense created");
    Ok((StatusCode::CREATED, Json(expense)))
}

/// GET /v1/expenses/:id — Get an expense.
#[utoipa::path(
    get,
    path = "/v1/expenses/{id}",
    params(("id" = Uuid, Path, description = "Expense ID")),
    responses(
        (status = 200, description = "Expense found", body = Expense),
        (status = 404, description = "Expense not found", body = crate::error::ErrorBody),
    ),
    tag = "expenses"
)]
async fn get_expense(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<Expense>, AppError> {
    require_permission(&caller, "expenses.read")?;
    state
        .expenses
        .scoped(caller.organization_id, &id)
        .map(Json)
        .ok_or_else(|| AppError::not_found("expense", id))
}

/// PATCH /v1/expenses/:id — Edit an expense.
#[utoipa::path(
    patch,
    path = "/v1/expenses/{id}",
    params(("id" = Uuid, Path, description = "Expense ID")),
    request_body = UpdateExpenseRequest,
    responses(
        (status = 200, description = "Expense updated", body = Expense),
        (status = 404, description = "Expense not found", body = crate::error::ErrorBody),
        (status = 409, description = "Expense no longer editable", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "expenses"
)]
async fn update_expense(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<UpdateExpenseRequest>, JsonRejection>,
) -> Result<Json<Expense>, AppError> {
    require_permission(&caller, "expenses.update")?;
    let req = extract_validated_json(body)?;
    let org = caller.organization_id;

    let tx = state.begin().await;
    let expense = {
        let mut expense = state
            .expenses
            .scoped(org, &id)
            .ok_or_else(|| AppError::not_found("expense", id))?;
        if !expense.status.is_editable() {
            return Err(AppError::Conflict(format!(
                "a {} expense cannot be edited",
                expense.status
            )));
        }
        if req.fiscal_condition.is_some() && expense.supplier_id.is_some() {
            return Err(AppError::Validation(
                "fiscal_condition comes from the supplier".into(),
            ));
        }

        if let Some(document_type) = req.document_type {
            expense.document_type = document_type;
        }
        if let Some(number) = req.document_number {
            expense.document_number = number.trim().to_string();
        }
        if let Some(issue_date) = req.issue_date {
            expense.issue_date = issue_date;
        }
        if let Some(description) = req.description {
            expense.description = description.trim().to_string();
        }
        if let Some(net) = req.net_amount {
            expense.net_amount = net;
        }
        if let Some(vat) = req.vat_rate_bps {
            expense.vat_rate_bps = vat;
        }
        if let Some(condition) = req.fiscal_condition {
            expense.counterparty_condition = condition;
        }
        if req.document_url.is_some() {
            expense.document_url = non_blank(req.document_url);
        }
        expense.taxes = compute_taxes(
            &state,
            org,
            Direction::Purchase,
            expense.counterparty_condition,
            expense.document_type,
            expense.net_amount,
            expense.vat_rate_bps,
        )?;
        expense.vat_rate_bps = expense.taxes.vat_rate_bps;
        if document_taken(&state, &expense) {
            return Err(duplicate_document(&expense));
        }
        expense.updated_at = Utc::now();
        state.expenses.put(expense.clone());
        expense
    };

    let changes = audited(
        &state,
        &caller,
        "expense.updated",
        &expense,
        json!({
            "document_type": expense.document_type,
            "document_number": expense.document_number,
            "gross": expense.taxes.gross,
        }),
    )?;
    tx.commit(changes).await?;
    Ok(Json(expense))
}

/// DELETE /v1/expenses/:id — Delete a pending expense.
#[utoipa::path(
    delete,
    path = "/v1/expenses/{id}",
    params(("id" = Uuid, Path, description = "Expense ID")),
    responses(
        (status = 204, description = "Expense deleted"),
        (status = 404, description = "Expense not found", body = crate::error::ErrorBody),
        (status = 409, description = "Expense is not pending", body = crate::error::ErrorBody),
    ),
    tag = "expenses"
)]
async fn delete_expense(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    require_permission(&caller, "expenses.delete")?;
    let org = caller.organization_id;

    let tx = state.begin().await;
    let expense = {
        let expense = state
            .expenses
            .scoped(org, &id)
            .ok_or_else(|| AppError::not_found("expense", id))?;
        if expense.status != ExpenseStatus::Pending {
            return Err(AppError::Conflict(format!(
                "only pending expenses can be deleted, this one is {}",
                expense.status
            )));
        }
        state.expenses.remove(&id);
        expense
    };

    let mut changes = Changes::new();
    changes.delete::<Expense>(id);
    changes.audit(state.record_audit(
        org,
        AuditEvent::new(Some(caller.user_id), "expense.deleted", "expense", id).with_metadata(
            json!({
                "document_type": expense.document_type,
                "document_number": expense.document_number,
            }),
        ),
    ));
    tx.commit(changes).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/expenses/:id/validate — Validate an expense.
///
/// Executes the amount against the contract, pays it from the cashbox and
/// posts the journal entries, all or nothing.
#[utoipa::path(
    post,
    path = "/v1/expenses/{id}/validate",
    params(("id" = Uuid, Path, description = "Expense ID")),
    responses(
        (status = 200, description = "Expense validated", body = ExpenseTransition),
        (status = 404, description = "Expense not found", body = crate::error::ErrorBody),
        (status = 409, description = "Contract balance exceeded, insufficient cash, blocked supplier or invalid transition", body = crate::error::ErrorBody),
    ),
    tag = "expenses"
)]
async fn validate_expense(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<ExpenseTransition>, AppError> {
    require_permission(&caller, "expenses.validate")?;
    let tx = state.begin().await;
    let (outcome, changes) =
        transition_expense(&tx, &caller, id, ExpenseStatus::Validated, None)?;
    tx.commit(changes).await?;
    Ok(Json(outcome))
}

/// POST /v1/expenses/:id/observe — Observe an expense.
#[utoipa::path(
    post,
    path = "/v1/expenses/{id}/observe",
    params(("id" = Uuid, Path, description = "Expense ID")),
    request_body = ReasonRequest,
    responses(
        (status = 200, description = "Expense observed", body = ExpenseTransition),
        (status = 404, description = "Expense not found", body = crate::error::ErrorBody),
        (status = 409, description = "Invalid transition", body = crate::error::ErrorBody),
        (status = 422, description = "Missing reason", body = crate::error::ErrorBody),
    ),
    tag = "expenses"
)]
async fn observe_expense(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<ReasonRequest>, JsonRejection>,
) -> Result<Json<ExpenseTransition>, AppError> {
    require_permission(&caller, "expenses.observe")?;
    let req = extract_validated_json(body)?;
    let tx = state.begin().await;
    let (outcome, changes) = transition_expense(
        &tx,
        &caller,
        id,
        ExpenseStatus::Observed,
        Some(req.reason.trim().to_string()),
    )?;
    tx.commit(changes).await?;
    Ok(Json(outcome))
}

/// POST /v1/expenses/:id/annul — Annul an expense.
#[utoipa::path(
    post,
    path = "/v1/expenses/{id}/annul",
    params(("id" = Uuid, Path, description = "Expense ID")),
    request_body = ReasonRequest,
    responses(
        (status = 200, description = "Expense annulled", body = ExpenseTransition),
        (status = 404, description = "Expense not found", body = crate::error::ErrorBody),
        (status = 409, description = "Invalid transition", body = crate::error::ErrorBody),
        (status = 422, description = "Missing reason", body = crate::error::ErrorBody),
    ),
    tag = "expenses"
)]
async fn annul_expense(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<ReasonRequest>, JsonRejection>,
) -> Result<Json<ExpenseTransition>, AppError> {
    require_permission(&caller, "expenses.annul")?;
    let req = extract_validated_json(body)?;
    let tx = state.begin().await;
    let (outcome, changes) = transition_expense(
        &tx,
        &caller,
        id,
        ExpenseStatus::Annulled,
        Some(req.reason.trim().to_string()),
    )?;
    tx.commit(changes).await?;
    Ok(Json(outcome))
}
