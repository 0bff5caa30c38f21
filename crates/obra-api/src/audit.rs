//! # Audit Log
//!
//! Every mutation appends an entry to its organization's hash chain:
//!
//! ```text
//! entry_hash = SHA-256(previous_hash ‖ action ‖ resource_type ‖ resource_id ‖ created_at)
//! ```
//!
//! The first entry of a chain links to 64 zeros. Changing, removing or
//! reordering an entry breaks the chain at that point, which
//! [`AuditLog::verify`] reports.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use obra_core::{AuditEntryId, OrganizationId, UserId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::UndoLog;

/// Previous hash of the first entry of every chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// One link of an organization's audit chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AuditEntry {
    pub id: AuditEntryId,
    pub organization_id: OrganizationId,
    /// Position in the organization's chain, starting at 0.
    pub sequence: i64,
    /// `None` for system actions (scans, bootstrap).
    pub actor_id: Option<UserId>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Uuid,
    #[schema(value_type = Object)]
    pub metadata: serde_json::Value,
    pub previous_hash: String,
    pub entry_hash: String,
    pub created_at: DateTime<Utc>,
}

/// What a caller records; the log fills in ids, links and hashes.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub actor_id: Option<UserId>,
    pub action: &'static str,
    pub resource_type: &'static str,
    pub resource_id: Uuid,
    pub metadata: serde_json::Value,
}

impl AuditEvent {
    /// An event without metadata.
    pub fn new(
        actor_id: Option<UserId>,
        action: &'static str,
        resource_type: &'static str,
        resource_id: Uuid,
    ) -> Self {
        Self {
            actor_id,
            action,
            resource_type,
            resource_id,
            metadata: serde_json::Value::Null,
        }
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Result of walking a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ChainIntegrityResult {
    pub total_events: usize,
    /// Entries whose `previous_hash` does not match the prior entry.
    pub broken_links: usize,
    /// Entries whose stored hash does not match their content.
    pub tampered_entries: usize,
    pub chain_valid: bool,
}

/// Compute an entry hash.
pub fn entry_hash(
    previous_hash: &str,
    action: &str,
    resource_type: &str,
    resource_id: &Uuid,
    created_at: &DateTime<Utc>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(previous_hash.as_bytes());
    hasher.update(action.as_bytes());
    hasher.update(resource_type.as_bytes());
    hasher.update(resource_id.to_string().as_bytes());
    hasher.update(
        created_at
            .to_rfc3339_opts(SecondsFormat::Micros, true)
            .as_bytes(),
    );
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// In-memory per-organization audit chains.
#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    chains: Arc<RwLock<HashMap<OrganizationId, Vec<AuditEntry>>>>,
    undo: UndoLog,
}

impl AuditLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty log whose appends are recorded in `undo`.
    pub fn recording(undo: &UndoLog) -> Self {
        Self {
            chains: Arc::default(),
            undo: undo.clone(),
        }
    }

    /// Append an event to `organization_id`'s chain.
    ///
    /// Timestamps are truncated to microseconds so that hashes survive a
    /// round trip through Postgres.
    pub fn append(
        &self,
        organization_id: OrganizationId,
        event: AuditEvent,
        now: DateTime<Utc>,
    ) -> AuditEntry {
        let created_at = now.trunc_subsecs(6);
        let mut chains = self.chains.write();
        let chain = chains.entry(organization_id).or_default();
        let previous_hash = chain
            .last()
            .map(|e| e.entry_hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        let entry = AuditEntry {
            id: AuditEntryId::new(),
            organization_id,
            sequence: chain.len() as i64,
            actor_id: event.actor_id,
            action: event.action.to_string(),
            resource_type: event.resource_type.to_string(),
            resource_id: event.resource_id,
            metadata: event.metadata,
            entry_hash: entry_hash(
                &previous_hash,
                event.action,
                event.resource_type,
                &event.resource_id,
                &created_at,
            ),
            previous_hash,
            created_at,
        };
        chain.push(entry.clone());
        drop(chains);

        let chains = Arc::clone(&self.chains);
        self.undo.record(move || {
            if let Some(chain) = chains.write().get_mut(&organization_id) {
                chain.pop();
            }
        });
        entry
    }

    /// Replace the in-memory chains with persisted entries.
    pub fn load(&self, mut entries: Vec<AuditEntry>) {
        entries.sort_by_key(|e| (e.organization_id, e.sequence));
        let mut chains = self.chains.write();
        chains.clear();
        for entry in entries {
            chains.entry(entry.organization_id).or_default().push(entry);
        }
    }

    /// Entries of one organization, oldest first.
    pub fn entries(&self, organization_id: OrganizationId) -> Vec<AuditEntry> {
        self.chains
            .read()
            .get(&organization_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of entries across organizations.
    pub fn len(&self) -> usize {
        self.chains.read().values().map(Vec::len).sum()
    }

    /// Whether no entry was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Walk an organization's chain.
    pub fn verify(&self, organization_id: OrganizationId) -> ChainIntegrityResult {
        verify_chain(&self.entries(organization_id))
    }
}

/// Check links and hashes of a chain ordered oldest first.
pub fn verify_chain(entries: &[AuditEntry]) -> ChainIntegrityResult {
    let mut broken_links = 0;
    let mut tampered_entries = 0;
    let mut expected_previous = GENESIS_HASH;

    for entry in entries {
        if entry.previous_hash != expected_previous {
            broken_links += 1;
        }
        let recomputed = entry_hash(
            &entry.previous_hash,
            &entry.action,
            &entry.resource_type,
            &entry.resource_id,
            &entry.created_at,
        );
        if recomputed != entry.entry_hash {
            tampered_entries += 1;
        }
        expected_previous = &entry.entry_hash;
    }

    ChainIntegrityResult {
        total_events: entries.len(),
        broken_links,
        tampered_entries,
        chain_valid: broken_links == 0 && tampered_entries == 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(org: OrganizationId, n: usize) -> AuditLog {
        let log = AuditLog::new();
        for _ in 0..n {
            log.append(
                org,
                AuditEvent::new(None, "expense.created", "expense", Uuid::new_v4()),
                Utc::now(),
            );
        }
        log
    }

    #[test]
    fn chain_links_from_genesis() {
        let org = OrganizationId::new();
        let log = filled(org, 3);
        let entries = log.entries(org);
        assert_eq!(entries[0].previous_hash, GENESIS_HASH);
        assert_eq!(entries[1].previous_hash, entries[0].entry_hash);
        assert_eq!(entries[2].sequence, 2);
        assert!(log.verify(org).chain_valid);
    }

    #[test]
    fn chains_are_per_organization() {
        let a = OrganizationId::new();
        let b = OrganizationId::new();
        let log = filled(a, 2);
        let first_b = log.append(
            b,
            AuditEvent::new(None, "work.created", "work", Uuid::new_v4()),
            Utc::now(),
        );
        assert_eq!(first_b.previous_hash, GENESIS_HASH);
        assert_eq!(first_b.sequence, 0);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn tampered_content_is_detected() {
        let org = OrganizationId::new();
        let log = filled(org, 3);
        let mut entries = log.entries(org);
        entries[1].action = "expense.deleted".to_string();
        let result = verify_chain(&entries);
        assert_eq!(result.tampered_entries, 1);
        assert_eq!(result.broken_links, 0);
        assert!(!result.chain_valid);
    }

    #[test]
    fn removed_entry_breaks_link() {
        let org = OrganizationId::new();
        let log = filled(org, 4);
        let mut entries = log.entries(org);
        entries.remove(1);
        let result = verify_chain(&entries);
        assert_eq!(result.broken_links, 1);
        assert!(!result.chain_valid);
    }

    #[test]
    fn load_restores_order() {
        let org = OrganizationId::new();
        let log = filled(org, 5);
        let mut entries = log.entries(org);
        entries.reverse();

        let restored = AuditLog::new();
        restored.load(entries);
        assert!(restored.verify(org).chain_valid);
        assert_eq!(restored.entries(org), log.entries(org));
    }

    #[test]
    fn hash_is_stable_for_microsecond_timestamps() {
        let at = DateTime::parse_from_rfc3339("2026-03-01T12:00:00.123456Z")
            .unwrap()
            .with_timezone(&Utc);
        let id = Uuid::nil();
        assert_eq!(
            entry_hash(GENESIS_HASH, "a", "b", &id, &at),
            entry_hash(GENESIS_HASH, "a", "b", &id, &at)
        );
        assert_ne!(
            entry_hash(GENESIS_HASH, "a", "b", &id, &at),
            entry_hash(GENESIS_HASH, "a", "c", &id, &at)
        );
    }
}
