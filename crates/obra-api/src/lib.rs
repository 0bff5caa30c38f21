//! # obra-api — Axum API Service for Obra
//!
//! Construction finance for several organizations on one deployment: works,
//! suppliers with ART coverage, contracts with executed amounts and
//! balances, purchase and sale documents with taxes, per-user cashboxes,
//! double-entry accounting, alerts and a hash-chained audit trail.
//!
//! ## API Surface
//!
//! | Prefix                     | Module                     |
//! |----------------------------|----------------------------|
//! | `/v1/auth/*`               | [`routes::auth`]           |
//! | `/v1/organizations/*`      | [`routes::organizations`]  |
//! | `/v1/roles/*`              | [`routes::roles`]          |
//! | `/v1/users/*`              | [`routes::users`]          |
//! | `/v1/works/*`              | [`routes::works`]          |
//! | `/v1/suppliers/*`          | [`routes::suppliers`]      |
//! | `/v1/contracts/*`          | [`routes::contracts`]      |
//! | `/v1/expenses/*`           | [`routes::expenses`]       |
//! | `/v1/incomes/*`            | [`routes::incomes`]        |
//! | `/v1/cashboxes/*`          | [`routes::cashboxes`]      |
//! | `/v1/accounting-records/*` | [`routes::accounting`]     |
//! | `/v1/alerts/*`             | [`routes::alerts`]         |
//! | `/v1/audit/*`              | [`routes::audit`]          |
//! | `/v1/taxes/*`              | [`routes::taxes`]          |
//!
//! ## Middleware Stack (execution order)
//!
//! ```text
//! TraceLayer → MetricsMiddleware → AuthMiddleware → CsrfMiddleware → Handler
//! ```
//!
//! Login, the CSRF token, health checks, `/metrics` and `/openapi.json`
//! skip authentication.

pub mod alerts;
pub mod audit;
pub mod auth;
pub mod bootstrap;
pub mod db;
pub mod error;
pub mod extractors;
pub mod ledger;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod state;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Router};
use tower_http::trace::TraceLayer;

pub use crate::error::AppError;
pub use crate::state::AppState;

use crate::middleware::csrf::CsrfConfig;
use crate::middleware::metrics::ApiMetrics;

/// Assemble the application router with all routes and middleware.
pub fn app(state: AppState) -> Router {
    let metrics = ApiMetrics::new();
    let csrf = CsrfConfig {
        enabled: state.config.csrf_protection,
    };

    // Body size limit: 2 MiB.
    let api = Router::new()
        .merge(routes::auth::router())
        .merge(routes::organizations::router())
        .merge(routes::roles::router())
        .merge(routes::users::router())
        .merge(routes::works::router())
        .merge(routes::suppliers::router())
        .merge(routes::contracts::router())
        .merge(routes::expenses::router())
        .merge(routes::incomes::router())
        .merge(routes::cashboxes::router())
        .merge(routes::accounting::router())
        .merge(routes::alerts::router())
        .merge(routes::audit::router())
        .merge(routes::taxes::router())
        .layer(from_fn(middleware::csrf::csrf_middleware))
        .layer(from_fn_with_state(state.clone(), auth::auth_middleware))
        .layer(Extension(csrf));

    let public = Router::new()
        .merge(routes::auth::public_router())
        .merge(openapi::router())
        .route("/health/liveness", get(liveness))
        .route("/health/readiness", get(readiness))
        .route("/metrics", get(middleware::metrics::render_metrics));

    Router::new()
        .merge(public)
        .merge(api)
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024))
        .layer(from_fn(middleware::metrics::metrics_middleware))
        .layer(Extension(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness check.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness check.
///
/// Fails with 503 when the database (when configured) does not answer.
/// In-flight writes holding the ledger lock do not affect readiness.
async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    if let Some(pool) = &state.db_pool {
        if let Err(e) = sqlx::query("SELECT 1").execute(pool).await {
            tracing::warn!("Database health check failed: {e}");
            return (StatusCode::SERVICE_UNAVAILABLE, "database unreachable").into_response();
        }
    }

    (StatusCode::OK, "ready").into_response()
}
