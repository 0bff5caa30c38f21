//! # Authentication & Authorization
//!
//! Users log in with email and password and receive an HS256 JWT:
//!
//! ```text
//! { "sub": <user id>, "org": <organization id>, "iat": ..., "exp": ... }
//! ```
//!
//! Every protected request carries `Authorization: Bearer <token>`. The
//! middleware validates the token, reloads the user and the user's role
//! from the stores, and injects a [`CallerIdentity`] into the request
//! extensions. Deactivating a user or editing a role therefore takes
//! effect on the next request, without waiting for tokens to expire.
//!
//! ## Passwords
//!
//! Argon2id hashes in PHC string format. Hashing and verification run on
//! the blocking thread pool.

use argon2::password_hash::rand_core::OsRng as SaltRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use axum::extract::{Request, State};
use axum::http::header;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm as JwtAlgorithm, DecodingKey, EncodingKey, Header, Validation};
use obra_core::{any_grants, OrganizationId, Permission, RoleId, UserId};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::AppError;
use crate::state::{AppState, User};

// ── Secrets & Cost ──────────────────────────────────────────────────────────

/// HS256 signing secret. Zeroized on drop; `Debug` never prints it.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct JwtSecret {
    bytes: Vec<u8>,
    #[zeroize(skip)]
    ephemeral: bool,
}

impl JwtSecret {
    /// A secret from configuration.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            ephemeral: false,
        }
    }

    /// A random 256-bit secret that lives as long as the process.
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self {
            bytes,
            ephemeral: true,
        }
    }

    /// Whether the secret was generated at startup.
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for JwtSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtSecret")
            .field("bytes", &"[REDACTED]")
            .field("ephemeral", &self.ephemeral)
            .finish()
    }
}

/// Argon2id cost parameters for new hashes. Existing hashes carry their
/// own parameters in the PHC string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordCost {
    pub memory_kib: u32,
    pub iterations: u32,
}

impl PasswordCost {
    /// Lowest cost Argon2 accepts. Only for tests.
    pub const MINIMUM: PasswordCost = PasswordCost {
        memory_kib: 8,
        iterations: 1,
    };
}

impl Default for PasswordCost {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
        }
    }
}

/// Shortest accepted password.
pub const MIN_PASSWORD_LEN: usize = 8;

// ── Passwords ───────────────────────────────────────────────────────────────

fn hasher(cost: PasswordCost) -> Result<Argon2<'static>, AppError> {
    let params = Params::new(cost.memory_kib, cost.iterations, 1, None)
        .map_err(|e| AppError::Internal(format!("invalid argon2 parameters: {e}")))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hash a password into a PHC string.
pub fn hash_password(password: &str, cost: PasswordCost) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut SaltRng);
    hasher(cost)?
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))
}

/// Check a password against a PHC string. Malformed hashes never verify.
pub fn verify_password(password: &str, phc: &str) -> bool {
    match PasswordHash::new(phc) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "stored password hash is malformed");
            false
        }
    }
}

/// [`hash_password`] on the blocking pool.
pub async fn hash_password_blocking(password: String, cost: PasswordCost) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || {
        let mut password = password;
        let result = hash_password(&password, cost);
        password.zeroize();
        result
    })
    .await
    .map_err(|e| AppError::Internal(format!("password hashing task failed: {e}")))?
}

/// [`verify_password`] on the blocking pool.
pub async fn verify_password_blocking(password: String, phc: String) -> Result<bool, AppError> {
    tokio::task::spawn_blocking(move || {
        let mut password = password;
        let ok = verify_password(&password, &phc);
        password.zeroize();
        ok
    })
    .await
    .map_err(|e| AppError::Internal(format!("password verification task failed: {e}")))
}

/// A hash of a random password at the configured cost, created on first use.
///
/// Login verifies against it when the email matches no active user, so an
/// unknown address costs the same argon2 work as a known one.
pub async fn decoy_password_hash(state: &AppState) -> Result<String, AppError> {
    let cost = state.config.password_cost;
    state
        .decoy_password_hash
        .get_or_try_init(|| async move {
            let mut bytes = [0u8; 32];
            OsRng.fill_bytes(&mut bytes);
            let password: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
            hash_password_blocking(password, cost).await
        })
        .await
        .cloned()
}

// ── Tokens ──────────────────────────────────────────────────────────────────

/// JWT claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: Uuid,
    /// Organization id.
    pub org: Uuid,
    pub iat: i64,
    pub exp: i64,
}

/// Sign a token for `user`, valid for `ttl_secs` from `now`.
pub fn issue_token(
    secret: &JwtSecret,
    user: &User,
    ttl_secs: i64,
    now: DateTime<Utc>,
) -> Result<String, AppError> {
    let claims = Claims {
        sub: *user.id.as_uuid(),
        org: *user.organization_id.as_uuid(),
        iat: now.timestamp(),
        exp: now.timestamp() + ttl_secs,
    };
    encode(
        &Header::new(JwtAlgorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("token signing failed: {e}")))
}

/// Verify signature and expiry of a token.
pub fn decode_token(secret: &JwtSecret, token: &str) -> Result<Claims, String> {
    let mut validation = Validation::new(JwtAlgorithm::HS256);
    validation.leeway = 0;
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => "token expired".to_string(),
        _ => "invalid bearer token".to_string(),
    })
}

/// Constant-time comparison of secret tokens.
///
/// When lengths differ, performs a dummy comparison to avoid leaking
/// length information through timing variance.
pub fn constant_time_token_eq(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();
    if provided.len() != expected.len() {
        let _ = expected.ct_eq(expected);
        return false;
    }
    provided.ct_eq(expected).into()
}

// ── CallerIdentity ──────────────────────────────────────────────────────────

/// The authenticated caller, available to handlers via `FromRequestParts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: UserId,
    pub organization_id: OrganizationId,
    pub role_id: RoleId,
    /// Permissions of the caller's role at request time.
    pub permissions: Vec<Permission>,
    /// May create organizations.
    pub platform_admin: bool,
}

impl CallerIdentity {
    /// Whether the caller's role grants `permission`.
    pub fn can(&self, permission: &str) -> bool {
        any_grants(&self.permissions, permission)
    }
}

#[axum::async_trait]
impl<S: Send + Sync> axum::extract::FromRequestParts<S> for CallerIdentity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CallerIdentity>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("no caller identity in request context".into()))
    }
}

/// 403 unless the caller's role grants `permission`.
pub fn require_permission(caller: &CallerIdentity, permission: &str) -> Result<(), AppError> {
    if caller.can(permission) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "permission '{permission}' required"
        )))
    }
}

/// 403 unless the caller is a platform administrator.
pub fn require_platform_admin(caller: &CallerIdentity) -> Result<(), AppError> {
    if caller.platform_admin {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "platform administrator required".into(),
        ))
    }
}

/// Resolve the identity behind a token against the current stores.
pub fn resolve_identity(state: &AppState, claims: &Claims) -> Result<CallerIdentity, String> {
    let organization_id = OrganizationId::from_uuid(claims.org);
    let user = state
        .users
        .scoped(organization_id, &claims.sub)
        .ok_or("unknown user")?;
    if !user.active {
        return Err("user is inactive".into());
    }
    let organization = state
        .organizations
        .get(organization_id.as_uuid())
        .ok_or("unknown organization")?;
    if !organization.active {
        return Err("organization is inactive".into());
    }
    let role = state
        .roles
        .scoped(organization_id, user.role_id.as_uuid())
        .ok_or("user has no role")?;
    Ok(CallerIdentity {
        user_id: user.id,
        organization_id,
        role_id: role.id,
        permissions: role.permissions,
        platform_admin: user.platform_admin,
    })
}

// ── Middleware ───────────────────────────────────────────────────────────────

/// Validate the bearer token and inject the [`CallerIdentity`].
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let token = match auth_header {
        Some(value) => match value.strip_prefix("Bearer ") {
            Some(token) => token.trim(),
            None => {
                tracing::warn!("authentication failed: non-Bearer authorization scheme");
                return AppError::Unauthorized("authorization header must use Bearer scheme".into())
                    .into_response();
            }
        },
        None => {
            return AppError::Unauthorized("missing authorization header".into()).into_response();
        }
    };

    let identity = decode_token(&state.config.jwt_secret, token)
        .and_then(|claims| resolve_identity(&state, &claims));

    match identity {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(msg) => {
            tracing::warn!(reason = %msg, "authentication failed");
            AppError::Unauthorized(msg).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{AppConfig, Organization, Role};
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::middleware::from_fn_with_state;
    use axum::routing::get;
    use axum::Router;
    use obra_core::{Cuit, Email};
    use tower::ServiceExt;

    fn seeded() -> (AppState, User) {
        let state = AppState::with_config(
            AppConfig {
                password_cost: PasswordCost::MINIMUM,
                ..AppConfig::default()
            },
            None,
        );
        let now = Utc::now();
        let org = Organization {
            id: OrganizationId::new(),
            name: "Constructora Sur".into(),
            cuit: Cuit::new("30-71234567-1").unwrap(),
            withholding_agent: true,
            perception_agent: true,
            active: true,
            created_at: now,
            updated_at: now,
        };
        let role = Role {
            id: RoleId::new(),
            organization_id: org.id,
            name: "Compras".into(),
            permissions: vec![Permission::new("expenses.*").unwrap()],
            system: false,
            created_at: now,
            updated_at: now,
        };
        let user = User {
            id: UserId::new(),
            organization_id: org.id,
            email: Email::new("ana@sur.test").unwrap(),
            display_name: "Ana".into(),
            password_hash: hash_password("correct horse", PasswordCost::MINIMUM).unwrap(),
            role_id: role.id,
            active: true,
            platform_admin: false,
            created_at: now,
            updated_at: now,
            last_login_at: None,
        };
        state.organizations.put(org);
        state.roles.put(role);
        state.users.put(user.clone());
        (state, user)
    }

    fn app(state: AppState) -> Router {
        Router::new()
            .route(
                "/me",
                get(|caller: CallerIdentity| async move { caller.user_id.to_string() }),
            )
            .layer(from_fn_with_state(state.clone(), auth_middleware))
            .with_state(state)
    }

    fn get_with(token: Option<&str>) -> axum::http::Request<Body> {
        let mut builder = axum::http::Request::builder().uri("/me");
        if let Some(t) = token {
            builder = builder.header("Authorization", format!("Bearer {t}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn password_hash_verifies_and_rejects() {
        let phc = hash_password("s3cure-pass", PasswordCost::MINIMUM).unwrap();
        assert!(phc.starts_with("$argon2id$"));
        assert!(verify_password("s3cure-pass", &phc));
        assert!(!verify_password("s3cure-pasS", &phc));
        assert!(!verify_password("s3cure-pass", "not-a-hash"));
    }

    #[tokio::test]
    async fn decoy_hash_is_created_once_and_matches_nothing() {
        let (state, _) = seeded();
        let first = decoy_password_hash(&state).await.unwrap();
        let second = decoy_password_hash(&state).await.unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("$argon2id$"));
        assert!(!verify_password("correct horse", &first));
        assert!(!verify_password("", &first));
    }

    #[test]
    fn token_roundtrip_and_tamper() {
        let (state, user) = seeded();
        let secret = &state.config.jwt_secret;
        let token = issue_token(secret, &user, 60, Utc::now()).unwrap();
        let claims = decode_token(secret, &token).unwrap();
        assert_eq!(claims.sub, *user.id.as_uuid());
        assert_eq!(claims.exp - claims.iat, 60);

        let other = JwtSecret::new(b"another-secret".to_vec());
        assert!(decode_token(&other, &token).is_err());
    }

    #[test]
    fn expired_token_rejected() {
        let (state, user) = seeded();
        let issued = Utc::now() - chrono::Duration::hours(2);
        let token = issue_token(&state.config.jwt_secret, &user, 60, issued).unwrap();
        assert_eq!(
            decode_token(&state.config.jwt_secret, &token),
            Err("token expired".to_string())
        );
    }

    #[test]
    fn constant_time_eq_behaves_like_eq() {
        assert!(constant_time_token_eq("abc", "abc"));
        assert!(!constant_time_token_eq("abc", "abd"));
        assert!(!constant_time_token_eq("abc", "abcd"));
    }

    #[test]
    fn permissions_resolve_from_role() {
        let (state, user) = seeded();
        let claims = Claims {
            sub: *user.id.as_uuid(),
            org: *user.organization_id.as_uuid(),
            iat: 0,
            exp: 0,
        };
        let caller = resolve_identity(&state, &claims).unwrap();
        assert!(caller.can("expenses.validate"));
        assert!(!caller.can("works.write"));
        assert!(require_permission(&caller, "works.write").is_err());
        assert!(require_platform_admin(&caller).is_err());
    }

    #[test]
    fn token_for_other_organization_does_not_resolve() {
        let (state, user) = seeded();
        let claims = Claims {
            sub: *user.id.as_uuid(),
            org: Uuid::new_v4(),
            iat: 0,
            exp: 0,
        };
        assert!(resolve_identity(&state, &claims).is_err());
    }

    #[tokio::test]
    async fn middleware_accepts_valid_and_rejects_missing() {
        let (state, user) = seeded();
        let token = issue_token(&state.config.jwt_secret, &user, 60, Utc::now()).unwrap();

        let ok = app(state.clone()).oneshot(get_with(Some(&token))).await.unwrap();
        assert_eq!(ok.status(), StatusCode::OK);

        let missing = app(state.clone()).oneshot(get_with(None)).await.unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let garbage = app(state).oneshot(get_with(Some("x.y.z"))).await.unwrap();
        assert_eq!(garbage.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn deactivated_user_is_rejected_immediately() {
        let (state, user) = seeded();
        let token = issue_token(&state.config.jwt_secret, &user, 60, Utc::now()).unwrap();
        state
            .users
            .try_update_scoped(user.organization_id, user.id.as_uuid(), |u| {
                u.active = false;
                Ok::<_, ()>(())
            });
        let response = app(state).oneshot(get_with(Some(&token))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
