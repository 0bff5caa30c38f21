//! # Organizations API
//!
//! ## Endpoints
//!
//! - `POST /v1/organizations` — provision a tenant with its administrator
//!   (platform administrators only)
//! - `GET /v1/organizations/current` — the caller's organization
//! - `PATCH /v1/organizations/current` — rename or change tax agent flags

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use obra_core::{Cuit, Email};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::auth::{
    hash_password_blocking, require_permission, require_platform_admin, CallerIdentity,
    MIN_PASSWORD_LEN,
};
use crate::bootstrap::{provision_organization, NewOrganization};
use crate::error::AppError;
use crate::extractors::{extract_validated_json, require_text, Validate};
use crate::routes::audited;
use crate::state::{AppState, Organization, Role, UserView};

// ── Request/Response DTOs ───────────────────────────────────────────

/// Request to provision an organization.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrganizationRequest {
    pub name: String,
    /// CUIT, with or without dashes.
    pub cuit: String,
    #[serde(default)]
    pub withholding_agent: bool,
    #[serde(default)]
    pub perception_agent: bool,
    pub admin_email: String,
    pub admin_display_name: String,
    pub admin_password: String,
}

impl Validate for CreateOrganizationRequest {
    fn validate(&self) -> Result<(), String> {
        require_text("name", &self.name, 200)?;
        require_text("admin_display_name", &self.admin_display_name, 200)?;
        Cuit::new(&self.cuit).map_err(|e| e.to_string())?;
        Email::new(&self.admin_email).map_err(|e| e.to_string())?;
        if self.admin_password.chars().count() < MIN_PASSWORD_LEN {
            return Err(format!(
                "admin_password must be at least {MIN_PASSWORD_LEN} characters"
            ));
        }
        Ok(())
    }
}

/// A provisioned organization.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrganizationCreated {
    pub organization: Organization,
    pub admin_role: Role,
    pub admin_user: UserView,
}

/// Changes to the caller's organization.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrganizationRequest {
    pub name: Option<String>,
    pub withholding_agent: Option<bool>,
    pub perception_agent: Option<bool>,
}

impl Validate for UpdateOrganizationRequest {
    fn validate(&self) -> Result<(), String> {
        if let Some(ref name) = self.name {
            require_text("name", name, 200)?;
        }
        Ok(())
    }
}

// ── Router ──────────────────────────────────────────────────────────

/// Build the organizations router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/organizations", post(create_organization))
        .route(
            "/v1/organizations/current",
            get(get_current).patch(update_current),
        )
}

// ── Handlers ────────────────────────────────────────────────────────

/// POST /v1/organizations — Provision a tenant.
#[utoipa::path(
    post,
    path = "/v1/organizations",
    request_body = CreateOrganizationRequest,
    responses(
        (status = 201, description = "Organization created", body = OrganizationCreated),
        (status = 403, description = "Not a platform administrator", body = crate::error::ErrorBody),
        (status = 409, description = "CUIT or email already registered", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "organizations"
)]
async fn create_organization(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<CreateOrganizationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<OrganizationCreated>), AppError> {
    require_platform_admin(&caller)?;
    let req = extract_validated_json(body)?;

    let input = NewOrganization {
        name: req.name.trim().to_string(),
        cuit: Cuit::new(&req.cuit)?,
        withholding_agent: req.withholding_agent,
        perception_agent: req.perception_agent,
        admin_email: Email::new(&req.admin_email)?,
        admin_display_name: req.admin_display_name.trim().to_string(),
        admin_password_hash: hash_password_blocking(req.admin_password, state.config.password_cost)
            .await?,
        platform_admin: false,
    };
    let tx = state.begin().await;
    let (provisioned, changes) = provision_organization(&tx, input, Some(caller.user_id))?;
    tx.commit(changes).await?;

    Ok((
        StatusCode::CREATED,
        Json(OrganizationCreated {
            organization: provisioned.organization,
            admin_role: provisioned.role,
            admin_user: UserView::from(&provisioned.user),
        }),
    ))
}

/// GET /v1/organizations/current — The caller's organization.
#[utoipa::path(
    get,
    path = "/v1/organizations/current",
    responses(
        (status = 200, description = "Caller's organization", body = Organization),
    ),
    tag = "organizations"
)]
async fn get_current(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<Organization>, AppError> {
    state
        .organizations
        .get(caller.organization_id.as_uuid())
        .map(Json)
        .ok_or_else(|| AppError::not_found("organization", caller.organization_id))
}

/// PATCH /v1/organizations/current — Update the caller's organization.
#[utoipa::path(
    patch,
    path = "/v1/organizations/current",
    request_body = UpdateOrganizationRequest,
    responses(
        (status = 200, description = "Organization updated", body = Organization),
        (status = 403, description = "Missing permission", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "organizations"
)]
async fn update_current(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<UpdateOrganizationRequest>, JsonRejection>,
) -> Result<Json<Organization>, AppError> {
    require_permission(&caller, "organizations.update")?;
    let req = extract_validated_json(body)?;
    let org = caller.organization_id;

    let tx = state.begin().await;
    let organization = state
        .organizations
        .try_update_scoped(org, org.as_uuid(), |o| {
            if let Some(name) = req.name {
                o.name = name.trim().to_string();
            }
            if let Some(flag) = req.withholding_agent {
                o.withholding_agent = flag;
            }
            if let Some(flag) = req.perception_agent {
                o.perception_agent = flag;
            }
            o.updated_at = Utc::now();
            Ok::<_, AppError>(o.clone())
        })
        .ok_or_else(|| AppError::not_found("organization", org))??;

    let changes = audited(
        &state,
        &caller,
        "organization.updated",
        &organization,
        json!({
            "name": organization.name,
            "withholding_agent": organization.withholding_agent,
            "perception_agent": organization.perception_agent,
        }),
    )?;
    tx.commit(changes).await?;
    Ok(Json(organization))
}
