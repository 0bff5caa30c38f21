//! # Accounting API
//!
//! ## Endpoints
//!
//! - `GET /v1/accounting-records` — list journal entries
//! - `POST /v1/accounting-records` — post a manual entry
//! - `GET /v1/accounting-records/:id` — get an entry
//! - `GET /v1/accounting-records/trial-balance` — debit and credit per account
//!
//! Entries posted by expenses, incomes and cashboxes are never edited;
//! they are cancelled by reversal entries.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{NaiveDate, Utc};
use obra_core::{AccountingRecordId, Amount, WorkId};
use obra_fiscal::{trial_balance, validate_entry, AccountBalance, JournalLine};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::{require_permission, CallerIdentity};
use crate::error::AppError;
use crate::extractors::{extract_validated_json, require_text, Pagination, Validate};
use crate::routes::audited;
use crate::state::{AccountingRecord, AppState, EntrySource, SourceKind};

// ── Request/Response DTOs ───────────────────────────────────────────

/// A manual journal entry.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateEntryRequest {
    pub work_id: Option<WorkId>,
    pub entry_date: NaiveDate,
    pub description: String,
    pub lines: Vec<JournalLine>,
}

impl Validate for CreateEntryRequest {
    fn validate(&self) -> Result<(), String> {
        require_text("description", &self.description, 500)?;
        validate_entry(&self.lines).map(|_| ()).map_err(|e| e.to_string())
    }
}

/// Journal filters.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct JournalFilter {
    pub work_id: Option<Uuid>,
    /// `expense`, `income`, `cashbox` or `manual`.
    #[param(value_type = Option<String>)]
    pub source: Option<SourceKind>,
    /// First entry date included.
    pub from: Option<NaiveDate>,
    /// Last entry date included.
    pub to: Option<NaiveDate>,
}

impl JournalFilter {
    fn matches(&self, r: &AccountingRecord) -> bool {
        self.work_id
            .map_or(true, |w| r.work_id.map(|id| *id.as_uuid()) == Some(w))
            && self.source.map_or(true, |s| r.source.kind == s)
            && self.from.map_or(true, |d| r.entry_date >= d)
            && self.to.map_or(true, |d| r.entry_date <= d)
    }
}

/// Trial balance over the filtered entries.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TrialBalance {
    pub entries: usize,
    pub accounts: Vec<AccountBalance>,
    pub total_debit: Amount,
    pub total_credit: Amount,
}

// ── Router ──────────────────────────────────────────────────────────

/// Build the accounting router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/accounting-records",
            get(list_entries).post(create_entry),
        )
        .route("/v1/accounting-records/trial-balance", get(get_trial_balance))
        .route("/v1/accounting-records/:id", get(get_entry))
}

// ── Handlers ────────────────────────────────────────────────────────

/// GET /v1/accounting-records — List journal entries.
#[utoipa::path(
    get,
    path = "/v1/accounting-records",
    params(Pagination, JournalFilter),
    responses(
        (status = 200, description = "Journal entries", body = Vec<AccountingRecord>),
    ),
    tag = "accounting"
)]
async fn list_entries(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(page): Query<Pagination>,
    Query(filter): Query<JournalFilter>,
) -> Result<Json<Vec<AccountingRecord>>, AppError> {
    require_permission(&caller, "accounting.read")?;
    let org = caller.organization_id;
    let records = state
        .accounting_records
        .filter(|r| r.organization_id == org && filter.matches(r));
    Ok(Json(page.page(records, |r| r.created_at)))
}

/// POST /v1/accounting-records — Post a manual entry.
#[utoipa::path(
    post,
    path = "/v1/accounting-records",
    request_body = CreateEntryRequest,
    responses(
        (status = 201, description = "Entry posted", body = AccountingRecord),
        (status = 404, description = "Work not found", body = crate::error::ErrorBody),
        (status = 422, description = "Unbalanced or malformed entry", body = crate::error::ErrorBody),
    ),
    tag = "accounting"
)]
async fn create_entry(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<CreateEntryRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AccountingRecord>), AppError> {
    require_permission(&caller, "accounting.create")?;
    let req = extract_validated_json(body)?;
    let org = caller.organization_id;
    let tx = state.begin().await;
    if let Some(work_id) = req.work_id {
        if state.works.scoped(org, work_id.as_uuid()).is_none() {
            return Err(AppError::not_found("work", work_id));
        }
    }
    let total = validate_entry(&req.lines)?;

    let record = AccountingRecord {
        id: AccountingRecordId::new(),
        organization_id: org,
        work_id: req.work_id,
        entry_date: req.entry_date,
        description: req.description.trim().to_string(),
        lines: req.lines,
        source: EntrySource {
            kind: SourceKind::Manual,
            id: None,
        },
        reverses: None,
        created_by: Some(caller.user_id),
        created_at: Utc::now(),
    };
    state.accounting_records.put(record.clone());

    let changes = audited(
        &state,
        &caller,
        "accounting_record.created",
        &record,
        json!({ "entry_date": record.entry_date, "total": total }),
    )?;
    tx.commit(changes).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /v1/accounting-records/:id — Get a journal entry.
#[utoipa::path(
    get,
    path = "/v1/accounting-records/{id}",
    params(("id" = Uuid, Path, description = "Accounting record ID")),
    responses(
        (status = 200, description = "Entry found", body = AccountingRecord),
        (status = 404, description = "Entry not found", body = crate::error::ErrorBody),
    ),
    tag = "accounting"
)]
async fn get_entry(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<AccountingRecord>, AppError> {
    require_permission(&caller, "accounting.read")?;
    state
        .accounting_records
        .scoped(caller.organization_id, &id)
        .map(Json)
        .ok_or_else(|| AppError::not_found("accounting record", id))
}

/// Sum debits and credits per account over `records`.
pub fn summarize(records: &[AccountingRecord]) -> Result<TrialBalance, AppError> {
    let accounts = trial_balance(records.iter().map(|r| r.lines.as_slice()))?;
    let overflow = || AppError::Internal("amount overflow".into());
    Ok(TrialBalance {
        entries: records.len(),
        total_debit: Amount::checked_sum(accounts.iter().map(|a| a.debit)).ok_or_else(overflow)?,
        total_credit: Amount::checked_sum(accounts.iter().map(|a| a.credit))
            .ok_or_else(overflow)?,
        accounts,
    })
}

/// GET /v1/accounting-records/trial-balance — Trial balance.
#[utoipa::path(
    get,
    path = "/v1/accounting-records/trial-balance",
    params(JournalFilter),
    responses(
        (status = 200, description = "Debits and credits per account", body = TrialBalance),
    ),
    tag = "accounting"
)]
async fn get_trial_balance(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(filter): Query<JournalFilter>,
) -> Result<Json<TrialBalance>, AppError> {
    require_permission(&caller, "accounting.read")?;
    let org = caller.organization_id;
    let records = state
        .accounting_records
        .filter(|r| r.organization_id == org && filter.matches(r));
    Ok(Json(summarize(&records)?))
}
