//! # Contracts API
//!
//! ## Endpoints
//!
//! - `GET /v1/contracts` — list contracts
//! - `POST /v1/contracts` — sign a contract with a supplier for a work
//! - `GET /v1/contracts/:id` — get a contract
//! - `PATCH /v1/contracts/:id` — update description, dates or total
//! - `POST /v1/contracts/:id/finish` — close a contract
//! - `POST /v1/contracts/:id/cancel` — void a contract nothing was executed against
//! - `GET /v1/contracts/:id/balance` — total, executed, balance, consumption
//!
//! The executed amount only moves through expense transitions. Changing the
//! total re-derives `active` / `blocked` from the new balance.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{NaiveDate, Utc};
use obra_core::{Amount, ContractId, Currency, SupplierId, WorkId};
use obra_fiscal::adjust_total;
use obra_state::{ContractStatus, Lifecycle, TransitionRecord};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::alerts;
use crate::auth::{require_permission, CallerIdentity};
use crate::db::Changes;
use crate::error::AppError;
use crate::extractors::{extract_validated_json, require_text, Pagination, Validate};
use crate::ledger::{live_contract, open_work, usable_supplier};
use crate::routes::{audited, non_blank};
use crate::state::{AppState, Contract, WriteTx};

// ── Request/Response DTOs ───────────────────────────────────────────

/// Request to create a contract.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateContractRequest {
    pub work_id: WorkId,
    pub supplier_id: SupplierId,
    pub description: String,
    pub total_amount: Amount,
    /// Defaults to the work's currency.
    pub currency: Option<Currency>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub document_url: Option<String>,
}

fn check_dates(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<(), String> {
    match (start, end) {
        (Some(start), Some(end)) if end < start => {
            Err("end_date must not be before start_date".to_string())
        }
        _ => Ok(()),
    }
}

impl Validate for CreateContractRequest {
    fn validate(&self) -> Result<(), String> {
        require_text("description", &self.description, 500)?;
        if !self.total_amount.is_positive() {
            return Err("total_amount must be positive".to_string());
        }
        check_dates(self.start_date, self.end_date)
    }
}

/// Changes to a contract.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateContractRequest {
    pub description: Option<String>,
    pub total_amount: Option<Amount>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub document_url: Option<String>,
}

impl Validate for UpdateContractRequest {
    fn validate(&self) -> Result<(), String> {
        if let Some(ref description) = self.description {
            require_text("description", description, 500)?;
        }
        if self.total_amount.is_some_and(|t| !t.is_positive()) {
            return Err("total_amount must be positive".to_string());
        }
        Ok(())
    }
}

/// Balance of a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ContractBalance {
    pub contract_id: ContractId,
    pub status: ContractStatus,
    pub total: Amount,
    pub executed: Amount,
    pub balance: Amount,
    /// Executed share of the total, in basis points.
    pub consumption_bps: i64,
}

impl From<&Contract> for ContractBalance {
    fn from(contract: &Contract) -> Self {
        let ledger = contract.ledger();
        Self {
            contract_id: contract.id,
            status: contract.status,
            total: ledger.total,
            executed: ledger.executed,
            balance: ledger.balance(),
            consumption_bps: ledger.consumption_bps(),
        }
    }
}

// ── Router ──────────────────────────────────────────────────────────

/// Build the contracts router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/contracts", get(list_contracts).post(create_contract))
        .route("/v1/contracts/:id", get(get_contract).patch(update_contract))
        .route("/v1/contracts/:id/finish", post(finish_contract))
        .route("/v1/contracts/:id/cancel", post(cancel_contract))
        .route("/v1/contracts/:id/balance", get(contract_balance))
}

// ── Handlers ────────────────────────────────────────────────────────

/// GET /v1/contracts — List contracts.
#[utoipa::path(
    get,
    path = "/v1/contracts",
    params(Pagination),
    responses(
        (status = 200, description = "Contracts of the organization", body = Vec<Contract>),
    ),
    tag = "contracts"
)]
async fn list_contracts(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<Contract>>, AppError> {
    require_permission(&caller, "contracts.read")?;
    let contracts = state.contracts.list_scoped(caller.organization_id);
    Ok(Json(page.page(contracts, |c| c.created_at)))
}

/// POST /v1/contracts — Create a contract.
#[utoipa::path(
    post,
    path = "/v1/contracts",
    request_body = CreateContractRequest,
    responses(
        (status = 201, description = "Contract created", body = Contract),
        (status = 404, description = "Work or supplier not found", body = crate::error::ErrorBody),
        (status = 409, description = "Work closed or supplier blocked", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "contracts"
)]
async fn create_contract(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<CreateContractRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Contract>), AppError> {
    require_permission(&caller, "contracts.create")?;
    let req = extract_validated_json(body)?;
    let org = caller.organization_id;

    let tx = state.begin().await;
    let contract = {
        let now = Utc::now();
        let work = open_work(&state, org, req.work_id)?;
        let supplier = usable_supplier(&state, org, req.supplier_id, now.date_naive())?;
        let contract = Contract {
            id: ContractId::new(),
            organization_id: org,
            work_id: work.id,
            supplier_id: supplier.id,
            description: req.description.trim().to_string(),
            total_amount: req.total_amount,
            executed_amount: Amount::ZERO,
            currency: req.currency.unwrap_or(work.currency),
            status: ContractStatus::Active,
            start_date: req.start_date,
            end_date: req.end_date,
            document_url: non_blank(req.document_url),
            transitions: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        state.contracts.put(contract.clone());
        contract
    };

    let changes = audited(
        &state,
        &caller,
        "contract.created",
        &contract,
        json!({
            "work_id": contract.work_id,
            "supplier_id": contract.supplier_id,
            "total_amount": contract.total_amount,
        }),
    )?;
    tx.commit(changes).await?;
    tracing::info!(contract_id = %contract.id, total = %contract.total_amount, "contract created");
    Ok((StatusCode::CREATED, Json(contract)))
}

/// GET /v1/contracts/:id — Get a contract.
#[utoipa::path(
    get,
    path = "/v1/contracts/{id}",
    params(("id" = Uuid, Path, description = "Contract ID")),
    responses(
        (status = 200, description = "Contract found", body = Contract),
        (status = 404, description = "Contract not found", body = crate::error::ErrorBody),
    ),
    tag = "contracts"
)]
async fn get_contract(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<Contract>, AppError> {
    require_permission(&caller, "contracts.read")?;
    state
        .contracts
        .scoped(caller.organization_id, &id)
        .map(Json)
        .ok_or_else(|| AppError::not_found("contract", id))
}

/// PATCH /v1/contracts/:id — Update a contract.
///
/// A new total must cover the executed amount.
#[utoipa::path(
    patch,
    path = "/v1/contracts/{id}",
    params(("id" = Uuid, Path, description = "Contract ID")),
    request_body = UpdateContractRequest,
    responses(
        (status = 200, description = "Contract updated", body = Contract),
        (status = 404, description = "Contract not found", body = crate::error::ErrorBody),
        (status = 409, description = "Contract finished or cancelled", body = crate::error::ErrorBody),
        (status = 422, description = "Total below the executed amount", body = crate::error::ErrorBody),
    ),
    tag = "contracts"
)]
async fn update_contract(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<UpdateContractRequest>, JsonRejection>,
) -> Result<Json<Contract>, AppError> {
    require_permission(&caller, "contracts.update")?;
    let req = extract_validated_json(body)?;
    let org = caller.organization_id;

    let tx = state.begin().await;
    let (contract, changes) = {
        let now = Utc::now();
        let mut contract = live_contract(&state, org, ContractId::from_uuid(id))?;
        let previous_total = contract.total_amount;

        if let Some(description) = req.description {
            contract.description = description.trim().to_string();
        }
        if req.start_date.is_some() {
            contract.start_date = req.start_date;
        }
        if req.end_date.is_some() {
            contract.end_date = req.end_date;
        }
        check_dates(contract.start_date, contract.end_date).map_err(AppError::Validation)?;
        if req.document_url.is_some() {
            contract.document_url = non_blank(req.document_url);
        }

        let mut raised = Vec::new();
        if let Some(total) = req.total_amount {
            let ledger = adjust_total(contract.ledger(), total)?;
            contract.total_amount = ledger.total;
            let from = contract.status;
            contract.status = from.after_rebalance(ledger.balance());
            if contract.status != from {
                contract.transitions.push(TransitionRecord::new(
                    from,
                    contract.status,
                    Some("total adjusted".to_string()),
                    caller.user_id,
                    now,
                ));
            }
            if let Some(draft) =
                alerts::contract_alert(&contract, state.config.contract_low_balance_bps)
            {
                raised.extend(alerts::prepare(&state, org, draft, now));
            }
        }
        contract.updated_at = now;
        state.contracts.put(contract.clone());

        let mut changes = audited(
            &state,
            &caller,
            "contract.updated",
            &contract,
            json!({
                "description": contract.description,
                "previous_total": previous_total,
                "total_amount": contract.total_amount,
                "status": contract.status.as_str(),
            }),
        )?;
        alerts::store(&state, &raised, &mut changes)?;
        (contract, changes)
    };

    tx.commit(changes).await?;
    Ok(Json(contract))
}

fn close_contract(
    state: &WriteTx<'_>,
    caller: &CallerIdentity,
    id: Uuid,
    action: &'static str,
    close: impl FnOnce(&Contract) -> Result<ContractStatus, AppError>,
) -> Result<(Contract, Changes), AppError> {
    let contract = state
        .contracts
        .try_update_scoped(caller.organization_id, &id, |c| {
            let from = c.status;
            let now = Utc::now();
            c.status = close(c)?;
            c.transitions
                .push(TransitionRecord::new(from, c.status, None, caller.user_id, now));
            c.updated_at = now;
            Ok::<_, AppError>(c.clone())
        })
        .ok_or_else(|| AppError::not_found("contract", id))??;

    let changes = audited(
        state,
        caller,
        action,
        &contract,
        json!({
            "total_amount": contract.total_amount,
            "executed_amount": contract.executed_amount,
        }),
    )?;
    tracing::info!(contract_id = %contract.id, status = contract.status.as_str(), "contract closed");
    Ok((contract, changes))
}

/// POST /v1/contracts/:id/finish — Finish a contract.
#[utoipa::path(
    post,
    path = "/v1/contracts/{id}/finish",
    params(("id" = Uuid, Path, description = "Contract ID")),
    responses(
        (status = 200, description = "Contract finished", body = Contract),
        (status = 404, description = "Contract not found", body = crate::error::ErrorBody),
        (status = 409, description = "Contract already closed", body = crate::error::ErrorBody),
    ),
    tag = "contracts"
)]
async fn finish_contract(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<Contract>, AppError> {
    require_permission(&caller, "contracts.update")?;
    let tx = state.begin().await;
    let (contract, changes) = close_contract(&tx, &caller, id, "contract.finished", |c| {
        Ok(c.status.transition(ContractStatus::Finished)?)
    })?;
    tx.commit(changes).await?;
    Ok(Json(contract))
}

/// POST /v1/contracts/:id/cancel — Cancel a contract.
#[utoipa::path(
    post,
    path = "/v1/contracts/{id}/cancel",
    params(("id" = Uuid, Path, description = "Contract ID")),
    responses(
        (status = 200, description = "Contract cancelled", body = Contract),
        (status = 404, description = "Contract not found", body = crate::error::ErrorBody),
        (status = 409, description = "Contract closed or already executed against", body = crate::error::ErrorBody),
    ),
    tag = "contracts"
)]
async fn cancel_contract(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<Contract>, AppError> {
    require_permission(&caller, "contracts.update")?;
    let tx = state.begin().await;
    let (contract, changes) = close_contract(&tx, &caller, id, "contract.cancelled", |c| {
        Ok(c.status.cancel(c.executed_amount)?)
    })?;
    tx.commit(changes).await?;
    Ok(Json(contract))
}

/// GET /v1/contracts/:id/balance — Contract balance.
#[utoipa::path(
    get,
    path = "/v1/contracts/{id}/balance",
    params(("id" = Uuid, Path, description = "Contract ID")),
    responses(
        (status = 200, description = "Balance", body = ContractBalance),
        (status = 404, description = "Contract not found", body = crate::error::ErrorBody),
    ),
    tag = "contracts"
)]
async fn contract_balance(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<ContractBalance>, AppError> {
    require_permission(&caller, "contracts.read")?;
    state
        .contracts
        .scoped(caller.organization_id, &id)
        .map(|c| Json(ContractBalance::from(&c)))
        .ok_or_else(|| AppError::not_found("contract", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use obra_core::OrganizationId;

    #[test]
    fn balance_view_reports_consumption() {
        let now = Utc::now();
        let contract = Contract {
            id: ContractId::new(),
            organization_id: OrganizationId::new(),
            work_id: WorkId::new(),
            supplier_id: SupplierId::new(),
            description: "Estructura".into(),
            total_amount: Amount::from_cents(400_000),
            executed_amount: Amount::from_cents(100_000),
            currency: Currency::Ars,
            status: ContractStatus::Active,
            start_date: None,
            end_date: None,
            document_url: None,
            transitions: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        let view = ContractBalance::from(&contract);
        assert_eq!(view.balance, Amount::from_cents(300_000));
        assert_eq!(view.consumption_bps, 2_500);
    }

    #[test]
    fn create_request_requires_positive_total() {
        let req = CreateContractRequest {
            work_id: WorkId::new(),
            supplier_id: SupplierId::new(),
            description: "Estructura".into(),
            total_amount: Amount::ZERO,
            currency: None,
            start_date: None,
            end_date: None,
            document_url: None,
        };
        assert!(req.validate().is_err());
    }
}
