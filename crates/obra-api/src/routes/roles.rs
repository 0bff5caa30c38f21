//! # Roles API
//!
//! ## Endpoints
//!
//! - `GET /v1/roles` — list roles
//! - `POST /v1/roles` — create a role
//! - `PATCH /v1/roles/:id` — rename or change permissions
//! - `DELETE /v1/roles/:id` — delete an unused, non-system role
//! - `GET /v1/roles/permissions` — the permission catalog
//!
//! Permissions are checked against the catalog on write. The system
//! administrator role keeps its name and cannot be deleted.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch};
use axum::{Json, Router};
use chrono::Utc;
use obra_core::{OrganizationId, Permission, RoleId, PERMISSION_CATALOG};
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::audit::AuditEvent;
use crate::auth::{require_permission, CallerIdentity};
use crate::db::Changes;
use crate::error::AppError;
use crate::extractors::{extract_validated_json, require_text, Pagination, Validate};
use crate::routes::audited;
use crate::state::{AppState, Role};

// ── Request/Response DTOs ───────────────────────────────────────────

/// Request to create a role.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateRoleRequest {
    pub name: String,
    #[schema(value_type = Vec<String>)]
    pub permissions: Vec<String>,
}

fn parse_permissions(raw: &[String]) -> Result<Vec<Permission>, String> {
    let mut parsed: Vec<Permission> = Vec::with_capacity(raw.len());
    for p in raw {
        let permission = Permission::new(p).map_err(|e| e.to_string())?;
        if !parsed.contains(&permission) {
            parsed.push(permission);
        }
    }
    Ok(parsed)
}

impl Validate for CreateRoleRequest {
    fn validate(&self) -> Result<(), String> {
        require_text("name", &self.name, 100)?;
        parse_permissions(&self.permissions).map(|_| ())
    }
}

/// Changes to a role.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateRoleRequest {
    pub name: Option<String>,
    #[schema(value_type = Option<Vec<String>>)]
    pub permissions: Option<Vec<String>>,
}

impl Validate for UpdateRoleRequest {
    fn validate(&self) -> Result<(), String> {
        if let Some(ref name) = self.name {
            require_text("name", name, 100)?;
        }
        if let Some(ref permissions) = self.permissions {
            parse_permissions(permissions)?;
        }
        Ok(())
    }
}

// ── Router ──────────────────────────────────────────────────────────

/// Build the roles router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/roles", get(list_roles).post(create_role))
        .route("/v1/roles/permissions", get(permission_catalog))
        .route("/v1/roles/:id", patch(update_role).delete(delete_role))
}

fn name_taken(state: &AppState, org: OrganizationId, name: &str, except: Option<RoleId>) -> bool {
    let name = name.trim().to_lowercase();
    state.roles.any(|r| {
        r.organization_id == org && Some(r.id) != except && r.name.to_lowercase() == name
    })
}

// ── Handlers ────────────────────────────────────────────────────────

/// GET /v1/roles — List roles.
#[utoipa::path(
    get,
    path = "/v1/roles",
    params(Pagination),
    responses(
        (status = 200, description = "Roles of the organization", body = Vec<Role>),
    ),
    tag = "roles"
)]
async fn list_roles(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<Role>>, AppError> {
    require_permission(&caller, "roles.read")?;
    let roles = state.roles.list_scoped(caller.organization_id);
    Ok(Json(page.page(roles, |r| r.created_at)))
}

/// POST /v1/roles — Create a role.
#[utoipa::path(
    post,
    path = "/v1/roles",
    request_body = CreateRoleRequest,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 409, description = "Name already used", body = crate::error::ErrorBody),
        (status = 422, description = "Unknown permission or invalid name", body = crate::error::ErrorBody),
    ),
    tag = "roles"
)]
async fn create_role(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<CreateRoleRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Role>), AppError> {
    require_permission(&caller, "roles.create")?;
    let req = extract_validated_json(body)?;
    let permissions = parse_permissions(&req.permissions).map_err(AppError::Validation)?;
    let org = caller.organization_id;
    let now = Utc::now();

    let tx = state.begin().await;
    let role = {
        if name_taken(&state, org, &req.name, None) {
            return Err(AppError::rule(
                "DUPLICATE",
                format!("a role named \"{}\" already exists", req.name.trim()),
            ));
        }
        let role = Role {
            id: RoleId::new(),
            organization_id: org,
            name: req.name.trim().to_string(),
            permissions,
            system: false,
            created_at: now,
            updated_at: now,
        };
        state.roles.put(role.clone());
        role
    };

    let changes = audited(
        &state,
        &caller,
        "role.created",
        &role,
        json!({ "name": role.name, "permissions": role.permissions }),
    )?;
    tx.commit(changes).await?;
    Ok((StatusCode::CREATED, Json(role)))
}

/// PATCH /v1/roles/:id — Update a role.
#[utoipa::path(
    patch,
    path = "/v1/roles/{id}",
    params(("id" = Uuid, Path, description = "Role ID")),
    request_body = UpdateRoleRequest,
    responses(
        (status = 200, description = "Role updated", body = Role),
        (status = 404, description = "Role not found", body = crate::error::ErrorBody),
        (status = 409, description = "System role renamed or name already used", body = crate::error::ErrorBody),
    ),
    tag = "roles"
)]
async fn update_role(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<UpdateRoleRequest>, JsonRejection>,
) -> Result<Json<Role>, AppError> {
    require_permission(&caller, "roles.update")?;
    let req = extract_validated_json(body)?;
    let permissions = req
        .permissions
        .as_deref()
        .map(parse_permissions)
        .transpose()
        .map_err(AppError::Validation)?;
    let org = caller.organization_id;

    let tx = state.begin().await;
    let role = {
        if let Some(ref name) = req.name {
            if name_taken(&state, org, name, Some(RoleId::from_uuid(id))) {
                return Err(AppError::rule(
                    "DUPLICATE",
                    format!("a role named \"{}\" already exists", name.trim()),
                ));
            }
        }
        state
            .roles
            .try_update_scoped(org, &id, |r| {
                if let Some(name) = req.name {
                    let name = name.trim().to_string();
                    if r.system && name != r.name {
                        return Err(AppError::Conflict(
                            "the system administrator role cannot be renamed".into(),
                        ));
                    }
                    r.name = name;
                }
                if let Some(permissions) = permissions {
                    r.permissions = permissions;
                }
                r.updated_at = Utc::now();
                Ok(r.clone())
            })
            .ok_or_else(|| AppError::not_found("role", id))??
    };

    let changes = audited(
        &state,
        &caller,
        "role.updated",
        &role,
        json!({ "name": role.name, "permissions": role.permissions }),
    )?;
    tx.commit(changes).await?;
    Ok(Json(role))
}

/// DELETE /v1/roles/:id — Delete a role.
#[utoipa::path(
    delete,
    path = "/v1/roles/{id}",
    params(("id" = Uuid, Path, description = "Role ID")),
    responses(
        (status = 204, description = "Role deleted"),
        (status = 404, description = "Role not found", body = crate::error::ErrorBody),
        (status = 409, description = "System role or role assigned to users", body = crate::error::ErrorBody),
    ),
    tag = "roles"
)]
async fn delete_role(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    require_permission(&caller, "roles.delete")?;
    let org = caller.organization_id;

    let tx = state.begin().await;
    let role = {
        let role = state
            .roles
            .scoped(org, &id)
            .ok_or_else(|| AppError::not_found("role", id))?;
        if role.system {
            return Err(AppError::Conflict(
                "the system administrator role cannot be deleted".into(),
            ));
        }
        let assigned = state
            .users
            .filter(|u| u.organization_id == org && u.role_id == role.id)
            .len();
        if assigned > 0 {
            return Err(AppError::Conflict(format!(
                "role \"{}\" is assigned to {assigned} user(s)",
                role.name
            )));
        }
        state.roles.remove(&id);
        role
    };

    let mut changes = Changes::new();
    changes.delete::<Role>(id);
    changes.audit(state.record_audit(
        org,
        AuditEvent::new(Some(caller.user_id), "role.deleted", "role", id)
            .with_metadata(json!({ "name": role.name })),
    ));
    tx.commit(changes).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/roles/permissions — Every permission a role can grant.
#[utoipa::path(
    get,
    path = "/v1/roles/permissions",
    responses(
        (status = 200, description = "Permission catalog", body = Vec<String>),
    ),
    tag = "roles"
)]
async fn permission_catalog(caller: CallerIdentity) -> Result<Json<Vec<&'static str>>, AppError> {
    require_permission(&caller, "roles.read")?;
    Ok(Json(PERMISSION_CATALOG.to_vec()))
}
