//! # Suppliers API
//!
//! ## Endpoints
//!
//! - `GET /v1/suppliers` — list suppliers
//! - `POST /v1/suppliers` — register a supplier
//! - `GET /v1/suppliers/:id` — get a supplier
//! - `PATCH /v1/suppliers/:id` — update data, ART coverage or manual block
//! - `DELETE /v1/suppliers/:id` — deactivate a supplier
//! - `GET /v1/suppliers/:id/standing` — ART evaluation at today's date
//!
//! A CUIT is registered at most once per organization. Suppliers are never
//! removed because contracts and expenses keep pointing at them.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{NaiveDate, Utc};
use obra_core::{Cuit, Email, OrganizationId, SupplierId};
use obra_fiscal::FiscalCondition;
use obra_state::SupplierStanding;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{require_permission, CallerIdentity};
use crate::error::AppError;
use crate::extractors::{extract_validated_json, require_text, Pagination, Validate};
use crate::routes::{audited, non_blank};
use crate::state::{AppState, Supplier};

// ── Request/Response DTOs ───────────────────────────────────────────

/// Request to register a supplier.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateSupplierRequest {
    pub name: String,
    /// CUIT, with or without dashes.
    pub cuit: String,
    pub fiscal_condition: FiscalCondition,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// Whether the supplier works on site and must hold ART coverage.
    #[serde(default)]
    pub requires_art: bool,
    pub art_expires_on: Option<NaiveDate>,
    pub art_document_url: Option<String>,
}

fn check_contact(email: Option<&str>, phone: Option<&str>) -> Result<(), String> {
    if let Some(email) = email.filter(|e| !e.trim().is_empty()) {
        Email::new(email).map_err(|e| e.to_string())?;
    }
    if phone.is_some_and(|p| p.chars().count() > 50) {
        return Err("phone must be at most 50 characters".to_string());
    }
    Ok(())
}

impl Validate for CreateSupplierRequest {
    fn validate(&self) -> Result<(), String> {
        require_text("name", &self.name, 200)?;
        Cuit::new(&self.cuit).map_err(|e| e.to_string())?;
        check_contact(self.email.as_deref(), self.phone.as_deref())
    }
}

/// Changes to a supplier.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateSupplierRequest {
    pub name: Option<String>,
    pub cuit: Option<String>,
    pub fiscal_condition: Option<FiscalCondition>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub requires_art: Option<bool>,
    pub art_expires_on: Option<NaiveDate>,
    pub art_document_url: Option<String>,
    pub manually_blocked: Option<bool>,
    pub block_reason: Option<String>,
    pub active: Option<bool>,
}

impl Validate for UpdateSupplierRequest {
    fn validate(&self) -> Result<(), String> {
        if let Some(ref name) = self.name {
            require_text("name", name, 200)?;
        }
        if let Some(ref cuit) = self.cuit {
            Cuit::new(cuit).map_err(|e| e.to_string())?;
        }
        if self.block_reason.as_ref().is_some_and(|r| r.chars().count() > 500) {
            return Err("block_reason must be at most 500 characters".to_string());
        }
        check_contact(self.email.as_deref(), self.phone.as_deref())
    }
}

/// Standing of a supplier at a date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StandingView {
    pub supplier_id: SupplierId,
    pub evaluated_on: NaiveDate,
    /// `ok`, `art_expiring` or `blocked`.
    pub status: String,
    /// Days until the ART expires, when expiring.
    pub days_left: Option<i64>,
    /// ART expiry date, when expiring.
    pub expires_on: Option<NaiveDate>,
    /// Why the supplier is blocked.
    pub reason: Option<String>,
}

impl StandingView {
    fn new(supplier_id: SupplierId, evaluated_on: NaiveDate, standing: &SupplierStanding) -> Self {
        let mut view = Self {
            supplier_id,
            evaluated_on,
            status: standing.as_str().to_string(),
            days_left: None,
            expires_on: None,
            reason: None,
        };
        match standing {
            SupplierStanding::Ok => {}
            SupplierStanding::ArtExpiring {
                days_left,
                expires_on,
            } => {
                view.days_left = Some(*days_left);
                view.expires_on = Some(*expires_on);
            }
            SupplierStanding::Blocked { reason } => view.reason = Some(reason.to_string()),
        }
        view
    }
}

// ── Router ──────────────────────────────────────────────────────────

/// Build the suppliers router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/suppliers", get(list_suppliers).post(create_supplier))
        .route(
            "/v1/suppliers/:id",
            get(get_supplier)
                .patch(update_supplier)
                .delete(deactivate_supplier),
        )
        .route("/v1/suppliers/:id/standing", get(supplier_standing))
}

fn cuit_taken(state: &AppState, org: OrganizationId, cuit: &Cuit, except: Option<SupplierId>) -> bool {
    state
        .suppliers
        .any(|s| s.organization_id == org && Some(s.id) != except && s.cuit == *cuit)
}

fn duplicate_cuit(cuit: &Cuit) -> AppError {
    AppError::rule(
        "DUPLICATE",
        format!("a supplier with CUIT {} already exists", cuit.formatted()),
    )
}

fn normalized_email(email: Option<String>) -> Result<Option<String>, AppError> {
    non_blank(email)
        .map(|e| Email::new(&e).map(|e| e.as_str().to_string()))
        .transpose()
        .map_err(AppError::from)
}

// ── Handlers ────────────────────────────────────────────────────────

/// GET /v1/suppliers — List suppliers.
#[utoipa::path(
    get,
    path = "/v1/suppliers",
    params(Pagination),
    responses(
        (status = 200, description = "Suppliers of the organization", body = Vec<Supplier>),
    ),
    tag = "suppliers"
)]
async fn list_suppliers(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<Supplier>>, AppError> {
    require_permission(&caller, "suppliers.read")?;
    let suppliers = state.suppliers.list_scoped(caller.organization_id);
    Ok(Json(page.page(suppliers, |s| s.created_at)))
}

/// POST /v1/suppliers — Register a supplier.
#[utoipa::path(
    post,
    path = "/v1/suppliers",
    request_body = CreateSupplierRequest,
    responses(
        (status = 201, description = "Supplier registered", body = Supplier),
        (status = 409, description = "CUIT already registered", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "suppliers"
)]
async fn create_supplier(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<CreateSupplierRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Supplier>), AppError> {
    require_permission(&caller, "suppliers.create")?;
    let req = extract_validated_json(body)?;
    let org = caller.organization_id;
    let cuit = Cuit::new(&req.cuit)?;
    let email = normalized_email(req.email)?;

    let tx = state.begin().await;
    let supplier = {
        if cuit_taken(&state, org, &cuit, None) {
            return Err(duplicate_cuit(&cuit));
        }
        let now = Utc::now();
        let supplier = Supplier {
            id: SupplierId::new(),
            organization_id: org,
            name: req.name.trim().to_string(),
            cuit,
            fiscal_condition: req.fiscal_condition,
            email,
            phone: non_blank(req.phone),
            requires_art: req.requires_art,
            art_expires_on: req.art_expires_on,
            art_document_url: non_blank(req.art_document_url),
            manually_blocked: false,
            block_reason: None,
            active: true,
            created_at: now,
            updated_at: now,
        };
        state.suppliers.put(supplier.clone());
        supplier
    };

    let changes = audited(
        &state,
        &caller,
        "supplier.created",
        &supplier,
        json!({ "name": supplier.name, "cuit": supplier.cuit }),
    )?;
    tx.commit(changes).await?;
    Ok((StatusCode::CREATED, Json(supplier)))
}

/// GET /v1/suppliers/:id — Get a supplier.
#[utoipa::path(
    get,
    path = "/v1/suppliers/{id}",
    params(("id" = Uuid, Path, description = "Supplier ID")),
    responses(
        (status = 200, description = "Supplier found", body = Supplier),
        (status = 404, description = "Supplier not found", body = crate::error::ErrorBody),
    ),
    tag = "suppliers"
)]
async fn get_supplier(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<Supplier>, AppError> {
    require_permission(&caller, "suppliers.read")?;
    state
        .suppliers
        .scoped(caller.organization_id, &id)
        .map(Json)
        .ok_or_else(|| AppError::not_found("supplier", id))
}

/// PATCH /v1/suppliers/:id — Update a supplier.
#[utoipa::path(
    patch,
    path = "/v1/suppliers/{id}",
    params(("id" = Uuid, Path, description = "Supplier ID")),
    request_body = UpdateSupplierRequest,
    responses(
        (status = 200, description = "Supplier updated", body = Supplier),
        (status = 404, description = "Supplier not found", body = crate::error::ErrorBody),
        (status = 409, description = "CUIT already registered", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "suppliers"
)]
async fn update_supplier(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<UpdateSupplierRequest>, JsonRejection>,
) -> Result<Json<Supplier>, AppError> {
    require_permission(&caller, "suppliers.update")?;
    let req = extract_validated_json(body)?;
    let org = caller.organization_id;
    let cuit = req.cuit.as_deref().map(Cuit::new).transpose()?;
    let email = req.email.is_some().then(|| normalized_email(req.email)).transpose()?;

    let tx = state.begin().await;
    let supplier = {
        if let Some(ref cuit) = cuit {
            if cuit_taken(&state, org, cuit, Some(SupplierId::from_uuid(id))) {
                return Err(duplicate_cuit(cuit));
            }
        }
        state
            .suppliers
            .try_update_scoped(org, &id, |s| {
                if let Some(name) = req.name {
                    s.name = name.trim().to_string();
                }
                if let Some(cuit) = cuit {
                    s.cuit = cuit;
                }
                if let Some(condition) = req.fiscal_condition {
                    s.fiscal_condition = condition;
                }
                if let Some(email) = email {
                    s.email = email;
                }
                if req.phone.is_some() {
                    s.phone = non_blank(req.phone);
                }
                if let Some(requires_art) = req.requires_art {
                    s.requires_art = requires_art;
                }
                if req.art_expires_on.is_some() {
                    s.art_expires_on = req.art_expires_on;
                }
                if req.art_document_url.is_some() {
                    s.art_document_url = non_blank(req.art_document_url);
                }
                if let Some(blocked) = req.manually_blocked {
                    s.manually_blocked = blocked;
                    s.block_reason = if blocked { non_blank(req.block_reason) } else { None };
                } else if s.manually_blocked && req.block_reason.is_some() {
                    s.block_reason = non_blank(req.block_reason);
                }
                if let Some(active) = req.active {
                    s.active = active;
                }
                s.updated_at = Utc::now();
                Ok::<_, AppError>(s.clone())
            })
            .ok_or_else(|| AppError::not_found("supplier", id))??
    };

    let changes = audited(
        &state,
        &caller,
        "supplier.updated",
        &supplier,
        json!({
            "name": supplier.name,
            "requires_art": supplier.requires_art,
            "art_expires_on": supplier.art_expires_on,
            "manually_blocked": supplier.manually_blocked,
            "active": supplier.active,
        }),
    )?;
    tx.commit(changes).await?;
    Ok(Json(supplier))
}

/// DELETE /v1/suppliers/:id — Deactivate a supplier.
#[utoipa::path(
    delete,
    path = "/v1/suppliers/{id}",
    params(("id" = Uuid, Path, description = "Supplier ID")),
    responses(
        (status = 204, description = "Supplier deactivated"),
        (status = 404, description = "Supplier not found", body = crate::error::ErrorBody),
    ),
    tag = "suppliers"
)]
async fn deactivate_supplier(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    require_permission(&caller, "suppliers.delete")?;
    let tx = state.begin().await;
    let supplier = state
        .suppliers
        .try_update_scoped(caller.organization_id, &id, |s| {
            s.active = false;
            s.updated_at = Utc::now();
            Ok::<_, AppError>(s.clone())
        })
        .ok_or_else(|| AppError::not_found("supplier", id))??;

    let changes = audited(
        &state,
        &caller,
        "supplier.deactivated",
        &supplier,
        json!({ "name": supplier.name }),
    )?;
    tx.commit(changes).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/suppliers/:id/standing — ART evaluation.
#[utoipa::path(
    get,
    path = "/v1/suppliers/{id}/standing",
    params(("id" = Uuid, Path, description = "Supplier ID")),
    responses(
        (status = 200, description = "Current standing", body = StandingView),
        (status = 404, description = "Supplier not found", body = crate::error::ErrorBody),
    ),
    tag = "suppliers"
)]
async fn supplier_standing(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<StandingView>, AppError> {
    require_permission(&caller, "suppliers.read")?;
    let supplier = state
        .suppliers
        .scoped(caller.organization_id, &id)
        .ok_or_else(|| AppError::not_found("supplier", id))?;
    let today = Utc::now().date_naive();
    let standing = supplier.standing(today, state.config.art_warning_days);
    Ok(Json(StandingView::new(supplier.id, today, &standing)))
}
