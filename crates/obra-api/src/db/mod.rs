//! # Database Persistence Layer
//!
//! Provides Postgres persistence for the in-memory stores via SQLx.
//!
//! ## Architecture
//!
//! The database layer is **optional**. When `DATABASE_URL` is set, every
//! record is written through as a JSON document and every audit entry is
//! appended to `audit_events`. When absent, the API operates in
//! in-memory-only mode (suitable for development and testing).
//!
//! Changes produced by one operation are collected in a [`Changes`] set and
//! written in a single transaction, so an expense validation never persists
//! the expense without its contract, journal entry and cash movement.

pub mod audit;
pub mod documents;

use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use crate::audit::AuditEntry;
use crate::state::Record;

pub use documents::Document;

/// Initialize the database connection pool and run migrations.
///
/// Returns `None` if `DATABASE_URL` is not set (in-memory-only mode).
/// Returns `Err` if the URL is set but the connection or migration fails.
pub async fn init_pool() -> Result<Option<PgPool>, sqlx::Error> {
    let url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            tracing::warn!(
                "DATABASE_URL not set, running in-memory only mode. \
                 State will not survive restarts."
            );
            return Ok(None);
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(&url)
        .await?;

    tracing::info!("Connected to PostgreSQL");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    Ok(Some(pool))
}

/// Everything one operation wrote.
#[derive(Debug, Default)]
pub struct Changes {
    pub(crate) upserts: Vec<Document>,
    pub(crate) deletes: Vec<(&'static str, Uuid)>,
    pub(crate) audit: Vec<AuditEntry>,
}

impl Changes {
    /// An empty change set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a created or updated record.
    pub fn put<T: Record>(&mut self, record: &T) -> Result<&mut Self, serde_json::Error> {
        self.upserts.push(Document::of(record)?);
        Ok(self)
    }

    /// Record a deleted record.
    pub fn delete<T: Record>(&mut self, id: Uuid) -> &mut Self {
        self.deletes.push((T::KIND, id));
        self
    }

    /// Record an appended audit entry.
    pub fn audit(&mut self, entry: AuditEntry) -> &mut Self {
        self.audit.push(entry);
        self
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty() && self.audit.is_empty()
    }
}

/// Write a change set in one transaction.
pub async fn commit(pool: &PgPool, changes: &Changes) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    for document in &changes.upserts {
        documents::upsert(&mut *tx, document).await?;
    }
    for (kind, id) in &changes.deletes {
        documents::delete(&mut *tx, kind, *id).await?;
    }
    for entry in &changes.audit {
        audit::insert(&mut *tx, entry).await?;
    }
    tx.commit().await
}
