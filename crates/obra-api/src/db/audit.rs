//! Audit event persistence.
//!
//! Entries are hashed and linked in memory by [`crate::audit::AuditLog`];
//! this module only stores and reloads them. Rows are never updated.

use chrono::{DateTime, Utc};
use obra_core::{AuditEntryId, OrganizationId, UserId};
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::audit::AuditEntry;

/// Append one entry.
pub async fn insert<'e>(executor: impl PgExecutor<'e>, entry: &AuditEntry) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO audit_events (id, organization_id, sequence, actor_id, action,
         resource_type, resource_id, metadata, previous_hash, entry_hash, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(*entry.id.as_uuid())
    .bind(*entry.organization_id.as_uuid())
    .bind(entry.sequence)
    .bind(entry.actor_id.map(|a| *a.as_uuid()))
    .bind(&entry.action)
    .bind(&entry.resource_type)
    .bind(entry.resource_id)
    .bind(&entry.metadata)
    .bind(&entry.previous_hash)
    .bind(&entry.entry_hash)
    .bind(entry.created_at)
    .execute(executor)
    .await?;

    Ok(())
}

/// Load every entry, ordered by organization and sequence.
pub async fn load_all(pool: &PgPool) -> Result<Vec<AuditEntry>, sqlx::Error> {
    let rows = sqlx::query_as::<_, AuditEventRow>(
        "SELECT id, organization_id, sequence, actor_id, action, resource_type, resource_id,
         metadata, previous_hash, entry_hash, created_at
         FROM audit_events ORDER BY organization_id, sequence",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(AuditEventRow::into_entry).collect())
}

/// Database row for audit events.
#[derive(sqlx::FromRow)]
struct AuditEventRow {
    id: Uuid,
    organization_id: Uuid,
    sequence: i64,
    actor_id: Option<Uuid>,
    action: String,
    resource_type: String,
    resource_id: Uuid,
    metadata: serde_json::Value,
    previous_hash: String,
    entry_hash: String,
    created_at: DateTime<Utc>,
}

impl AuditEventRow {
    fn into_entry(self) -> AuditEntry {
        AuditEntry {
            id: AuditEntryId::from_uuid(self.id),
            organization_id: OrganizationId::from_uuid(self.organization_id),
            sequence: self.sequence,
            actor_id: self.actor_id.map(UserId::from_uuid),
            action: self.action,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            metadata: self.metadata,
            previous_hash: self.previous_hash,
            entry_hash: self.entry_hash,
            created_at: self.created_at,
        }
    }
}
