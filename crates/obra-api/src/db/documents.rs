//! Record persistence as JSON documents.
//!
//! All functions operate on the `documents` table. Each row holds one
//! serialized record under `(kind, id)`; the owning organization and the
//! creation time are copied into columns for indexing.

use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::state::Record;

/// A serialized record ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub kind: &'static str,
    pub id: Uuid,
    pub organization_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub body: serde_json::Value,
}

impl Document {
    /// Serialize a record.
    pub fn of<T: Record>(record: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind: T::KIND,
            id: record.key(),
            organization_id: *record.organization_id().as_uuid(),
            created_at: record.created_at(),
            body: serde_json::to_value(record)?,
        })
    }
}

/// Insert a document or replace its body.
pub async fn upsert<'e>(executor: impl PgExecutor<'e>, document: &Document) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO documents (kind, id, organization_id, body, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, NOW())
         ON CONFLICT (kind, id) DO UPDATE SET body = EXCLUDED.body, updated_at = NOW()",
    )
    .bind(document.kind)
    .bind(document.id)
    .bind(document.organization_id)
    .bind(&document.body)
    .bind(document.created_at)
    .execute(executor)
    .await?;

    Ok(())
}

/// Delete a document. Returns whether a row was removed.
pub async fn delete<'e>(
    executor: impl PgExecutor<'e>,
    kind: &str,
    id: Uuid,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM documents WHERE kind = $1 AND id = $2")
        .bind(kind)
        .bind(id)
        .execute(executor)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Load every record of one kind into memory on startup.
///
/// Rows that no longer deserialize are skipped with a warning rather than
/// failing the whole startup.
pub async fn load_all<T: Record>(pool: &PgPool) -> Result<Vec<T>, sqlx::Error> {
    let rows = sqlx::query_as::<_, DocumentRow>(
        "SELECT id, body FROM documents WHERE kind = $1 ORDER BY created_at",
    )
    .bind(T::KIND)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .filter_map(|row| match serde_json::from_value::<T>(row.body) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(
                    kind = T::KIND,
                    id = %row.id,
                    error = %e,
                    "failed to deserialize stored document, skipping"
                );
                None
            }
        })
        .collect())
}

/// Internal row type for SQLx mapping.
#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: Uuid,
    body: serde_json::Value,
}
