//! # Taxes API
//!
//! ## Endpoints
//!
//! - `POST /v1/taxes/preview` — compute VAT, withholdings and perceptions
//!   for a document without storing anything
//! - `GET /v1/taxes/rules` — the rule table in use
//!
//! Previews apply the caller organization's agent flags, exactly as
//! expense and income registration do.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use obra_core::Amount;
use obra_fiscal::{Direction, DocumentType, FiscalCondition, TaxBreakdown, TaxRule};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::auth::{require_permission, CallerIdentity};
use crate::error::AppError;
use crate::extractors::{extract_validated_json, Validate};
use crate::ledger::compute_taxes;
use crate::routes::expenses::DEFAULT_VAT_RATE_BPS;
use crate::state::AppState;

/// A document to preview.
#[derive(Debug, Deserialize, ToSchema)]
pub struct TaxPreviewRequest {
    /// `purchase` for expenses, `sale` for incomes.
    pub direction: Direction,
    pub counterparty_condition: FiscalCondition,
    pub document_type: DocumentType,
    pub net_amount: Amount,
    /// Defaults to 2100 (21 %).
    pub vat_rate_bps: Option<u32>,
}

impl Validate for TaxPreviewRequest {
    fn validate(&self) -> Result<(), String> {
        if !self.net_amount.is_positive() {
            return Err("net_amount must be positive".to_string());
        }
        Ok(())
    }
}

/// Build the taxes router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/taxes/preview", post(preview))
        .route("/v1/taxes/rules", get(rules))
}

/// POST /v1/taxes/preview — Preview taxes for a document.
#[utoipa::path(
    post,
    path = "/v1/taxes/preview",
    request_body = TaxPreviewRequest,
    responses(
        (status = 200, description = "Tax breakdown", body = TaxBreakdown),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "taxes"
)]
async fn preview(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<TaxPreviewRequest>, JsonRejection>,
) -> Result<Json<TaxBreakdown>, AppError> {
    require_permission(&caller, "taxes.read")?;
    let req = extract_validated_json(body)?;
    let taxes = compute_taxes(
        &state,
        caller.organization_id,
        req.direction,
        req.counterparty_condition,
        req.document_type,
        req.net_amount,
        req.vat_rate_bps.unwrap_or(DEFAULT_VAT_RATE_BPS),
    )?;
    Ok(Json(taxes))
}

/// GET /v1/taxes/rules — List tax rules.
#[utoipa::path(
    get,
    path = "/v1/taxes/rules",
    responses(
        (status = 200, description = "Tax rules", body = Vec<TaxRule>),
    ),
    tag = "taxes"
)]
async fn rules(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<Vec<TaxRule>>, AppError> {
    require_permission(&caller, "taxes.read")?;
    Ok(Json(state.tax_engine.rules().to_vec()))
}
