//! # Users API
//!
//! ## Endpoints
//!
//! - `GET /v1/users` — list users
//! - `POST /v1/users` — create a user
//! - `GET /v1/users/:id` — get a user
//! - `PATCH /v1/users/:id` — change display name, role or active flag
//!
//! Emails are unique across organizations, since login looks users up by
//! email alone. Password hashes never leave the service.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use obra_core::{Email, RoleId, UserId};
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{hash_password_blocking, require_permission, CallerIdentity, MIN_PASSWORD_LEN};
use crate::error::AppError;
use crate::extractors::{extract_validated_json, require_text, Pagination, Validate};
use crate::routes::audited;
use crate::state::{AppState, User, UserView};

// ── Request/Response DTOs ───────────────────────────────────────────

/// Request to create a user.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateUserRequest {
    pub email: String,
    pub display_name: String,
    pub password: String,
    pub role_id: RoleId,
}

impl Validate for CreateUserRequest {
    fn validate(&self) -> Result<(), String> {
        Email::new(&self.email).map_err(|e| e.to_string())?;
        require_text("display_name", &self.display_name, 200)?;
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            ));
        }
        Ok(())
    }
}

/// Changes to a user.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateUserRequest {
    pub display_name: Option<String>,
    pub role_id: Option<RoleId>,
    pub active: Option<bool>,
}

impl Validate for UpdateUserRequest {
    fn validate(&self) -> Result<(), String> {
        if let Some(ref name) = self.display_name {
            require_text("display_name", name, 200)?;
        }
        Ok(())
    }
}

// ── Router ──────────────────────────────────────────────────────────

/// Build the users router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/users", get(list_users).post(create_user))
        .route("/v1/users/:id", get(get_user).patch(update_user))
}

// ── Handlers ────────────────────────────────────────────────────────

/// GET /v1/users — List users.
#[utoipa::path(
    get,
    path = "/v1/users",
    params(Pagination),
    responses(
        (status = 200, description = "Users of the organization", body = Vec<UserView>),
    ),
    tag = "users"
)]
async fn list_users(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<UserView>>, AppError> {
    require_permission(&caller, "users.read")?;
    let users = page.page(state.users.list_scoped(caller.organization_id), |u| u.created_at);
    Ok(Json(users.iter().map(UserView::from).collect()))
}

/// POST /v1/users — Create a user.
#[utoipa::path(
    post,
    path = "/v1/users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created", body = UserView),
        (status = 404, description = "Role not found", body = crate::error::ErrorBody),
        (status = 409, description = "Email already registered", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "users"
)]
async fn create_user(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<UserView>), AppError> {
    require_permission(&caller, "users.create")?;
    let req = extract_validated_json(body)?;
    let org = caller.organization_id;
    let email = Email::new(&req.email)?;

    if state.roles.scoped(org, req.role_id.as_uuid()).is_none() {
        return Err(AppError::not_found("role", req.role_id));
    }
    let password_hash = hash_password_blocking(req.password, state.config.password_cost).await?;

    let tx = state.begin().await;
    let user = {
        if state.users.any(|u| u.email == email) {
            return Err(AppError::rule(
                "DUPLICATE",
                format!("a user with email {} already exists", email.as_str()),
            ));
        }
        let now = Utc::now();
        let user = User {
            id: UserId::new(),
            organization_id: org,
            email,
            display_name: req.display_name.trim().to_string(),
            password_hash,
            role_id: req.role_id,
            active: true,
            platform_admin: false,
            created_at: now,
            updated_at: now,
            last_login_at: None,
        };
        state.users.put(user.clone());
        user
    };

    let changes = audited(
        &state,
        &caller,
        "user.created",
        &user,
        json!({ "email": user.email, "role_id": user.role_id }),
    )?;
    tx.commit(changes).await?;
    Ok((StatusCode::CREATED, Json(UserView::from(&user))))
}

/// GET /v1/users/:id — Get a user.
#[utoipa::path(
    get,
    path = "/v1/users/{id}",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "User found", body = UserView),
        (status = 404, description = "User not found", body = crate::error::ErrorBody),
    ),
    tag = "users"
)]
async fn get_user(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<UserView>, AppError> {
    require_permission(&caller, "users.read")?;
    state
        .users
        .scoped(caller.organization_id, &id)
        .map(|u| Json(UserView::from(&u)))
        .ok_or_else(|| AppError::not_found("user", id))
}

/// PATCH /v1/users/:id — Update a user.
#[utoipa::path(
    patch,
    path = "/v1/users/{id}",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "User updated", body = UserView),
        (status = 404, description = "User or role not found", body = crate::error::ErrorBody),
        (status = 409, description = "Caller tried to deactivate itself", body = crate::error::ErrorBody),
    ),
    tag = "users"
)]
async fn update_user(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> Result<Json<UserView>, AppError> {
    require_permission(&caller, "users.update")?;
    let req = extract_validated_json(body)?;
    let org = caller.organization_id;

    if req.active == Some(false) && id == *caller.user_id.as_uuid() {
        return Err(AppError::Conflict("users cannot deactivate themselves".into()));
    }
    let tx = state.begin().await;
    if let Some(role_id) = req.role_id {
        if state.roles.scoped(org, role_id.as_uuid()).is_none() {
            return Err(AppError::not_found("role", role_id));
        }
    }

    let user = state
        .users
        .try_update_scoped(org, &id, |u| {
            if let Some(name) = req.display_name {
                u.display_name = name.trim().to_string();
            }
            if let Some(role_id) = req.role_id {
                u.role_id = role_id;
            }
            if let Some(active) = req.active {
                u.active = active;
            }
            u.updated_at = Utc::now();
            Ok::<_, AppError>(u.clone())
        })
        .ok_or_else(|| AppError::not_found("user", id))??;

    let changes = audited(
        &state,
        &caller,
        "user.updated",
        &user,
        json!({
            "display_name": user.display_name,
            "role_id": user.role_id,
            "active": user.active,
        }),
    )?;
    tx.commit(changes).await?;
    Ok(Json(UserView::from(&user)))
}
