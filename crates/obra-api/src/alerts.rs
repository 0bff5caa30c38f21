//! # Alert Evaluation
//!
//! Shared functions that turn supplier standings, contract balances and
//! cashbox closings into alerts. Used by the expense orchestration, the
//! cashbox close endpoint, `POST /v1/alerts/scan` and the background scan.
//!
//! At most one unacknowledged alert exists per `(kind, resource_id)`.
//! Callers hold the ledger lock between [`prepare`] and inserting the
//! result, so two concurrent evaluations cannot both raise the same alert.

use chrono::{DateTime, NaiveDate, Utc};
use obra_core::{AlertId, Amount, OrganizationId};
use obra_state::{BlockReason, Lifecycle, SupplierStanding};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::audit::AuditEvent;
use crate::db::Changes;
use crate::error::AppError;
use crate::state::{Alert, AlertKind, AppState, Cashbox, Contract, Severity, Supplier, WriteTx};

/// An alert that should exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertDraft {
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    pub resource_type: &'static str,
    pub resource_id: Uuid,
}

/// Alert implied by a supplier's ART standing, if any.
pub fn supplier_alert(supplier: &Supplier, today: NaiveDate, warning_days: u32) -> Option<AlertDraft> {
    let (kind, severity, message) = match supplier.standing(today, warning_days) {
        SupplierStanding::Ok => return None,
        SupplierStanding::ArtExpiring { days_left, expires_on } => (
            AlertKind::ArtExpiring,
            Severity::Warning,
            format!(
                "ART of supplier {} expires on {expires_on} ({days_left} days left)",
                supplier.name
            ),
        ),
        SupplierStanding::Blocked { reason } => match reason {
            BlockReason::ArtExpired { expired_on } => (
                AlertKind::ArtExpired,
                Severity::Critical,
                format!("ART of supplier {} expired on {expired_on}", supplier.name),
            ),
            BlockReason::ArtMissing => (
                AlertKind::ArtExpired,
                Severity::Critical,
                format!("supplier {} requires ART and has none on file", supplier.name),
            ),
            BlockReason::Manual { .. } => return None,
        },
    };
    Some(AlertDraft {
        kind,
        severity,
        message,
        resource_type: "supplier",
        resource_id: *supplier.id.as_uuid(),
    })
}

/// Alert implied by a contract's balance, if any.
pub fn contract_alert(contract: &Contract, low_balance_bps: u32) -> Option<AlertDraft> {
    if contract.status.is_terminal() {
        return None;
    }
    let ledger = contract.ledger();
    let (kind, severity, message) = if ledger.balance().is_zero() {
        (
            AlertKind::ContractBlocked,
            Severity::Critical,
            format!(
                "contract \"{}\" has no balance left and is blocked",
                contract.description
            ),
        )
    } else if ledger.is_low(low_balance_bps) {
        (
            AlertKind::ContractBalanceLow,
            Severity::Warning,
            format!(
                "contract \"{}\" has {} left of {}",
                contract.description,
                ledger.balance(),
                ledger.total
            ),
        )
    } else {
        return None;
    };
    Some(AlertDraft {
        kind,
        severity,
        message,
        resource_type: "contract",
        resource_id: *contract.id.as_uuid(),
    })
}

/// Alert for a cashbox closed with a difference.
pub fn cashbox_alert(cashbox: &Cashbox, difference: Amount) -> Option<AlertDraft> {
    if difference.is_zero() {
        return None;
    }
    let what = if difference.is_positive() { "surplus" } else { "shortage" };
    Some(AlertDraft {
        kind: AlertKind::CashboxDifference,
        severity: Severity::Warning,
        message: format!(
            "cashbox {} closed with a {what} of {difference}",
            cashbox.period
        ),
        resource_type: "cashbox",
        resource_id: *cashbox.id.as_uuid(),
    })
}

/// Build the alert for `draft` unless an open one already covers it.
///
/// Does not insert; the caller stores the alert once every other check of
/// its operation has passed.
pub fn prepare(
    state: &AppState,
    organization_id: OrganizationId,
    draft: AlertDraft,
    now: DateTime<Utc>,
) -> Option<Alert> {
    let duplicate = state.alerts.any(|a| {
        a.organization_id == organization_id
            && a.is_open()
            && a.kind == draft.kind
            && a.resource_id == draft.resource_id
    });
    if duplicate {
        return None;
    }
    Some(Alert {
        id: AlertId::new(),
        organization_id,
        kind: draft.kind,
        severity: draft.severity,
        message: draft.message,
        resource_type: draft.resource_type.to_string(),
        resource_id: draft.resource_id,
        created_at: now,
        acknowledged_at: None,
        acknowledged_by: None,
    })
}

/// Store raised alerts and record them in the audit chain and change set.
pub fn store(state: &AppState, alerts: &[Alert], changes: &mut Changes) -> Result<(), AppError> {
    for alert in alerts {
        changes.put(alert)?;
        state.alerts.put(alert.clone());
        tracing::info!(
            organization_id = %alert.organization_id,
            kind = ?alert.kind,
            resource_id = %alert.resource_id,
            "alert raised"
        );
        let entry = state.record_audit(
            alert.organization_id,
            AuditEvent::new(None, "alert.raised", "alert", *alert.id.as_uuid())
                .with_metadata(serde_json::json!({
                    "kind": alert.kind,
                    "resource_type": alert.resource_type,
                    "resource_id": alert.resource_id,
                })),
        );
        changes.audit(entry);
    }
    Ok(())
}

/// Outcome of a scan.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ScanReport {
    pub suppliers_checked: usize,
    pub contracts_checked: usize,
    /// Alerts created by this scan.
    pub raised: Vec<Alert>,
}

/// Evaluate suppliers and contracts of one organization, or of all of
/// them when `organization_id` is `None`.
pub fn scan(
    state: &WriteTx<'_>,
    organization_id: Option<OrganizationId>,
    now: DateTime<Utc>,
) -> Result<(ScanReport, Changes), AppError> {
    let today = now.date_naive();
    let in_scope = |org: OrganizationId| organization_id.map_or(true, |o| o == org);

    let suppliers = state.suppliers.filter(|s| s.active && in_scope(s.organization_id));
    let contracts = state
        .contracts
        .filter(|c| !c.status.is_terminal() && in_scope(c.organization_id));

    let drafts = suppliers
        .iter()
        .filter_map(|s| {
            supplier_alert(s, today, state.config.art_warning_days).map(|d| (s.organization_id, d))
        })
        .chain(contracts.iter().filter_map(|c| {
            contract_alert(c, state.config.contract_low_balance_bps).map(|d| (c.organization_id, d))
        }));

    let mut raised = Vec::new();
    for (org, draft) in drafts {
        if let Some(alert) = prepare(state, org, draft, now) {
            raised.push(alert);
        }
    }

    let mut changes = Changes::new();
    store(state, &raised, &mut changes)?;

    Ok((
        ScanReport {
            suppliers_checked: suppliers.len(),
            contracts_checked: contracts.len(),
            raised,
        },
        changes,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use obra_core::{ContractId, Cuit, Currency, SupplierId, WorkId};
    use obra_fiscal::FiscalCondition;
    use obra_state::ContractStatus;

    fn supplier(org: OrganizationId, art_expires_on: Option<NaiveDate>) -> Supplier {
        let now = Utc::now();
        Supplier {
            id: SupplierId::new(),
            organization_id: org,
            name: "Hormigones SA".into(),
            cuit: Cuit::new("30-71234567-1").unwrap(),
            fiscal_condition: FiscalCondition::ResponsableInscripto,
            email: None,
            phone: None,
            requires_art: true,
            art_expires_on,
            art_document_url: None,
            manually_blocked: false,
            block_reason: None,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn contract(org: OrganizationId, total: i64, executed: i64) -> Contract {
        let now = Utc::now();
        Contract {
            id: ContractId::new(),
            organization_id: org,
            work_id: WorkId::new(),
            supplier_id: SupplierId::new(),
            description: "Estructura".into(),
            total_amount: Amount::from_cents(total),
            executed_amount: Amount::from_cents(executed),
            currency: Currency::Ars,
            status: ContractStatus::Active.after_rebalance(Amount::from_cents(total - executed)),
            start_date: None,
            end_date: None,
            document_url: None,
            transitions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn supplier_alert_kinds() {
        let org = OrganizationId::new();
        let today = Utc::now().date_naive();

        let fine = supplier(org, Some(today + Duration::days(90)));
        assert_eq!(supplier_alert(&fine, today, 15), None);

        let expiring = supplier(org, Some(today + Duration::days(5)));
        let draft = supplier_alert(&expiring, today, 15).unwrap();
        assert_eq!(draft.kind, AlertKind::ArtExpiring);
        assert_eq!(draft.severity, Severity::Warning);

        let expired = supplier(org, Some(today - Duration::days(1)));
        assert_eq!(
            supplier_alert(&expired, today, 15).unwrap().kind,
            AlertKind::ArtExpired
        );

        let missing = supplier(org, None);
        assert_eq!(
            supplier_alert(&missing, today, 15).unwrap().severity,
            Severity::Critical
        );
    }

    #[test]
    fn contract_alert_thresholds() {
        let org = OrganizationId::new();
        assert_eq!(contract_alert(&contract(org, 10_000, 5_000), 1_000), None);
        assert_eq!(
            contract_alert(&contract(org, 10_000, 9_500), 1_000).unwrap().kind,
            AlertKind::ContractBalanceLow
        );
        assert_eq!(
            contract_alert(&contract(org, 10_000, 10_000), 1_000).unwrap().kind,
            AlertKind::ContractBlocked
        );
    }

    #[tokio::test]
    async fn scan_deduplicates_open_alerts() {
        let state = AppState::new();
        let org = OrganizationId::new();
        let today = Utc::now().date_naive();
        state.suppliers.put(supplier(org, Some(today - Duration::days(3))));
        state.contracts.put(contract(org, 10_000, 9_900));

        let tx = state.begin().await;
        let (first, changes) = scan(&tx, Some(org), Utc::now()).unwrap();
        assert_eq!(first.raised.len(), 2);
        assert_eq!(changes.audit.len(), 2);

        let (second, changes) = scan(&tx, Some(org), Utc::now()).unwrap();
        assert!(second.raised.is_empty());
        assert!(changes.is_empty());
        assert_eq!(state.alerts.len(), 2);
    }

    #[tokio::test]
    async fn acknowledged_alert_can_be_raised_again() {
        let state = AppState::new();
        let org = OrganizationId::new();
        state.contracts.put(contract(org, 10_000, 10_000));

        let tx = state.begin().await;
        let (first, _) = scan(&tx, Some(org), Utc::now()).unwrap();
        let mut alert = first.raised[0].clone();
        alert.acknowledged_at = Some(Utc::now());
        state.alerts.put(alert);

        let (second, _) = scan(&tx, Some(org), Utc::now()).unwrap();
        assert_eq!(second.raised.len(), 1);
    }

    #[tokio::test]
    async fn scan_respects_organization_scope() {
        let state = AppState::new();
        let org = OrganizationId::new();
        state.contracts.put(contract(org, 10_000, 10_000));
        let tx = state.begin().await;
        let (report, _) = scan(&tx, Some(OrganizationId::new()), Utc::now()).unwrap();
        assert_eq!(report.contracts_checked, 0);
        assert!(report.raised.is_empty());
    }
}
