//! # obra-api — Binary Entry Point
//!
//! Reads configuration from the environment, hydrates the stores from
//! Postgres when `DATABASE_URL` is set, creates the bootstrap administrator
//! and serves the API. `LOG_FORMAT=json` switches to JSON log lines.

use std::net::SocketAddr;
use std::time::Duration;

use obra_api::state::{AppConfig, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = AppConfig::from_env().map_err(|e| {
        tracing::error!("Configuration error: {e}");
        e
    })?;
    let port = config.port;

    // No DATABASE_URL means in-memory only.
    let db_pool = obra_api::db::init_pool().await.map_err(|e| {
        tracing::error!("Database initialization failed: {e}");
        e
    })?;

    let state = AppState::with_config(config, db_pool);

    state.hydrate_from_db().await.map_err(|e| {
        tracing::error!("Database hydration failed: {e}");
        e
    })?;

    obra_api::bootstrap::bootstrap_admin(&state)
        .await
        .map_err(|e| {
            tracing::error!("Bootstrap failed: {e}");
            e
        })?;

    spawn_alert_scan(state.clone());

    let app = obra_api::app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Obra API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Periodically evaluate suppliers and contracts of every organization.
fn spawn_alert_scan(state: AppState) {
    let every = Duration::from_secs(state.config.alert_scan_interval_secs.max(60));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let tx = state.begin().await;
            let result = match obra_api::alerts::scan(&tx, None, chrono::Utc::now()) {
                Ok((report, changes)) => tx.commit(changes).await.map(|()| report),
                Err(e) => Err(e),
            };
            match result {
                Ok(report) => tracing::info!(
                    suppliers = report.suppliers_checked,
                    contracts = report.contracts_checked,
                    raised = report.raised.len(),
                    "alert scan finished"
                ),
                Err(e) => tracing::error!(error = %e, "alert scan failed"),
            }
        }
    });
}
