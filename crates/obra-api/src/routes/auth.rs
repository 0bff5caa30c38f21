//! # Authentication Endpoints
//!
//! ## Endpoints
//!
//! - `POST /v1/auth/login` — exchange email and password for a bearer token
//! - `GET /v1/auth/csrf` — issue a CSRF token cookie
//! - `GET /v1/auth/me` — the authenticated user and its permissions
//! - `POST /v1/auth/change-password` — change the caller's password
//!
//! Login attempts are counted per client by the
//! [`LoginThrottle`](crate::middleware::brute_force::LoginThrottle). While a
//! client is locked out the endpoint answers 429 without looking at the
//! credentials.

use std::net::SocketAddr;

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use obra_core::{Email, Permission};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::audit::AuditEvent;
use crate::auth::{
    decoy_password_hash, hash_password_blocking, issue_token, verify_password_blocking,
    CallerIdentity, MIN_PASSWORD_LEN,
};
use crate::db::Changes;
use crate::error::AppError;
use crate::extractors::{extract_validated_json, Validate};
use crate::middleware::brute_force::{client_key, retry_after_secs};
use crate::middleware::csrf::{cookie_header, generate_token};
use crate::state::{AppState, Organization, UserView};

// ── Request/Response DTOs ───────────────────────────────────────────

/// Login credentials.
#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl Validate for LoginRequest {
    fn validate(&self) -> Result<(), String> {
        if self.email.trim().is_empty() {
            return Err("email must not be empty".to_string());
        }
        if self.password.is_empty() {
            return Err("password must not be empty".to_string());
        }
        Ok(())
    }
}

/// A signed session token.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub token: String,
    /// Always `"Bearer"`.
    pub token_type: String,
    /// Seconds until the token expires.
    pub expires_in: i64,
    pub user: UserView,
    pub permissions: Vec<Permission>,
}

/// The authenticated caller.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MeResponse {
    pub user: UserView,
    pub organization: Organization,
    pub role_name: String,
    pub permissions: Vec<Permission>,
}

/// Password change.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

impl Validate for ChangePasswordRequest {
    fn validate(&self) -> Result<(), String> {
        if self.new_password.chars().count() < MIN_PASSWORD_LEN {
            return Err(format!(
                "new_password must be at least {MIN_PASSWORD_LEN} characters"
            ));
        }
        if self.new_password == self.current_password {
            return Err("new_password must differ from current_password".to_string());
        }
        Ok(())
    }
}

/// A fresh CSRF token, also set in the `csrf_token` cookie.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CsrfResponse {
    pub csrf_token: String,
}

// ── Router ──────────────────────────────────────────────────────────

/// Endpoints reachable without a token.
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/v1/auth/login", post(login))
        .route("/v1/auth/csrf", get(csrf_token))
}

/// Endpoints for an authenticated caller.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/auth/me", get(me))
        .route("/v1/auth/change-password", post(change_password))
}

// ── Handlers ────────────────────────────────────────────────────────

/// POST /v1/auth/login — Exchange credentials for a token.
#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
        (status = 429, description = "Too many failed attempts", body = crate::error::ErrorBody),
    ),
    security(()),
    tag = "auth"
)]
async fn login(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, AppError> {
    let key = client_key(
        &headers,
        peer.map(|ConnectInfo(addr)| addr),
        state.config.trust_proxy_headers,
    );
    let req = extract_validated_json(body)?;

    let attempts_left = match state.login_throttle.begin_attempt(&key) {
        Ok(left) => left,
        Err(remaining) => {
            tracing::warn!(client = %key, "login rejected while locked out");
            return Err(AppError::TooManyRequests {
                retry_after_secs: retry_after_secs(remaining),
            });
        }
    };

    let candidate = Email::new(&req.email)
        .ok()
        .and_then(|email| state.user_by_email(&email))
        .filter(|u| u.active);
    let phc = match &candidate {
        Some(u) => u.password_hash.clone(),
        None => decoy_password_hash(&state).await?,
    };
    let verified = verify_password_blocking(req.password, phc).await?;
    let Some(candidate) = candidate.filter(|_| verified) else {
        return Err(rejected(&state, &key, attempts_left));
    };

    let tx = state.begin().await;
    let now = Utc::now();
    let user = state
        .users
        .try_update_scoped(candidate.organization_id, candidate.id.as_uuid(), |u| {
            if !u.active {
                return Err(());
            }
            u.last_login_at = Some(now);
            Ok(u.clone())
        })
        .and_then(Result::ok);
    let role = user.as_ref().and_then(|u| {
        state
            .organizations
            .get(u.organization_id.as_uuid())
            .filter(|o| o.active)
            .and_then(|_| state.roles.scoped(u.organization_id, u.role_id.as_uuid()))
    });
    let (Some(user), Some(role)) = (user, role) else {
        return Err(rejected(&state, &key, attempts_left));
    };
    let token = issue_token(&state.config.jwt_secret, &user, state.config.jwt_ttl_secs, now)?;

    let mut changes = Changes::new();
    changes.put(&user)?;
    changes.audit(state.record_audit(
        user.organization_id,
        AuditEvent::new(Some(user.id), "auth.login", "user", *user.id.as_uuid()),
    ));
    tx.commit(changes).await?;
    state.login_throttle.record_success(&key);

    tracing::info!(user_id = %user.id, organization_id = %user.organization_id, "user logged in");
    Ok(Json(LoginResponse {
        token,
        token_type: "Bearer".to_string(),
        expires_in: state.config.jwt_ttl_secs,
        user: UserView::from(&user),
        permissions: role.permissions,
    }))
}

/// GET /v1/auth/csrf — Issue a CSRF token.
#[utoipa::path(
    get,
    path = "/v1/auth/csrf",
    responses(
        (status = 200, description = "Token issued and cookie set", body = CsrfResponse),
    ),
    security(()),
    tag = "auth"
)]
async fn csrf_token() -> Response {
    let token = generate_token();
    let mut response = Json(CsrfResponse {
        csrf_token: token.clone(),
    })
    .into_response();
    if let Ok(cookie) = HeaderValue::from_str(&cookie_header(&token)) {
        response.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    response
}

/// GET /v1/auth/me — The authenticated caller.
#[utoipa::path(
    get,
    path = "/v1/auth/me",
    responses(
        (status = 200, description = "Current user", body = MeResponse),
        (status = 401, description = "Not authenticated", body = crate::error::ErrorBody),
    ),
    tag = "auth"
)]
async fn me(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<MeResponse>, AppError> {
    let org = caller.organization_id;
    let user = state
        .users
        .scoped(org, caller.user_id.as_uuid())
        .ok_or_else(|| AppError::not_found("user", caller.user_id))?;
    let organization = state
        .organizations
        .get(org.as_uuid())
        .ok_or_else(|| AppError::not_found("organization", org))?;
    let role = state
        .roles
        .scoped(org, caller.role_id.as_uuid())
        .ok_or_else(|| AppError::not_found("role", caller.role_id))?;
    Ok(Json(MeResponse {
        user: UserView::from(&user),
        organization,
        role_name: role.name,
        permissions: role.permissions,
    }))
}

/// Log a refused login and build its 401.
fn rejected(state: &AppState, key: &str, attempts_left: u32) -> AppError {
    if attempts_left == 0 {
        tracing::warn!(
            client = %key,
            lockout_secs = state.login_throttle.config().lockout.as_secs(),
            "login locked out after repeated failures"
        );
    } else {
        tracing::info!(client = %key, attempts_left, "login failed");
    }
    AppError::Unauthorized("invalid email or password".into())
}

/// POST /v1/auth/change-password — Change the caller's password.
#[utoipa::path(
    post,
    path = "/v1/auth/change-password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 204, description = "Password changed"),
        (status = 422, description = "Wrong current password or weak new password", body = crate::error::ErrorBody),
    ),
    tag = "auth"
)]
async fn change_password(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    let req = extract_validated_json(body)?;
    let org = caller.organization_id;
    let user = state
        .users
        .scoped(org, caller.user_id.as_uuid())
        .ok_or_else(|| AppError::not_found("user", caller.user_id))?;

    if !verify_password_blocking(req.current_password, user.password_hash.clone()).await? {
        return Err(AppError::Validation(
            "current_password is incorrect".to_string(),
        ));
    }
    let hash = hash_password_blocking(req.new_password, state.config.password_cost).await?;

    let tx = state.begin().await;
    let user = state
        .users
        .try_update_scoped(org, caller.user_id.as_uuid(), |u| {
            u.password_hash = hash;
            u.updated_at = Utc::now();
            Ok::<_, AppError>(u.clone())
        })
        .ok_or_else(|| AppError::not_found("user", caller.user_id))??;

    let mut changes = Changes::new();
    changes.put(&user)?;
    changes.audit(state.record_audit(
        org,
        AuditEvent::new(
            Some(caller.user_id),
            "auth.password_changed",
            "user",
            *user.id.as_uuid(),
        ),
    ));
    tx.commit(changes).await?;
    Ok(StatusCode::NO_CONTENT)
}
