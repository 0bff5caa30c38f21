//! # Ledger Orchestration
//!
//! Operations that read and write several records at once: expense
//! transitions, income registration and annulment, and cash movements.
//!
//! Each function runs inside the caller's [`WriteTx`], loads the records it
//! touches, validates everything on copies, and only then writes the
//! stores. A failed check therefore leaves every record untouched. The
//! caller commits the returned [`Changes`] before releasing the lock.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use obra_core::{
    AccountingRecordId, Amount, CashMovementId, CashboxId, ContractId, IncomeId, OrganizationId,
    SupplierId, UserId, WorkId,
};
use obra_fiscal::{
    collection_entry, expense_entry, income_entry, payment_entry, reconcile, reversal,
    CashLedger, DocumentType, FiscalCondition, JournalLine, MovementKind, Reconciliation,
    TaxBreakdown, TaxableDocument, Direction,
};
use obra_state::{ExpenseStatus, IncomeStatus, Lifecycle, TransitionRecord};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::alerts;
use crate::audit::AuditEvent;
use crate::auth::CallerIdentity;
use crate::db::Changes;
use crate::error::AppError;
use crate::state::{
    AccountingRecord, Alert, AppState, Cashbox, CashMovement, Contract, EntrySource, Expense,
    Income, SourceKind, Supplier, Work, WriteTx,
};

// ── Shared Checks ───────────────────────────────────────────────────────────

/// The work, which must accept new movements.
pub fn open_work(state: &AppState, org: OrganizationId, work_id: WorkId) -> Result<Work, AppError> {
    let work = state
        .works
        .scoped(org, work_id.as_uuid())
        .ok_or_else(|| AppError::not_found("work", work_id))?;
    if !work.status.accepts_movements() {
        return Err(AppError::rule(
            "WORK_CLOSED",
            format!("work {} is {} and accepts no movements", work.code, work.status),
        ));
    }
    Ok(work)
}

/// The supplier, which must be active and not blocked at `today`.
pub fn usable_supplier(
    state: &AppState,
    org: OrganizationId,
    supplier_id: SupplierId,
    today: NaiveDate,
) -> Result<Supplier, AppError> {
    let supplier = state
        .suppliers
        .scoped(org, supplier_id.as_uuid())
        .ok_or_else(|| AppError::not_found("supplier", supplier_id))?;
    if !supplier.active {
        return Err(AppError::rule(
            "SUPPLIER_BLOCKED",
            format!("supplier {} is inactive", supplier.name),
        ));
    }
    if let obra_state::SupplierStanding::Blocked { reason } =
        supplier.standing(today, state.config.art_warning_days)
    {
        return Err(AppError::rule(
            "SUPPLIER_BLOCKED",
            format!("supplier {} is blocked: {reason}", supplier.name),
        ));
    }
    Ok(supplier)
}

/// The cashbox, which must be open.
pub fn open_cashbox(
    state: &AppState,
    org: OrganizationId,
    cashbox_id: CashboxId,
) -> Result<Cashbox, AppError> {
    let cashbox = state
        .cashboxes
        .scoped(org, cashbox_id.as_uuid())
        .ok_or_else(|| AppError::not_found("cashbox", cashbox_id))?;
    if !cashbox.status.accepts_movements() {
        return Err(AppError::rule(
            "CASHBOX_CLOSED",
            format!("cashbox {} is closed", cashbox.period),
        ));
    }
    Ok(cashbox)
}

/// The contract, which must not be finished or cancelled.
pub fn live_contract(
    state: &AppState,
    org: OrganizationId,
    contract_id: ContractId,
) -> Result<Contract, AppError> {
    let contract = state
        .contracts
        .scoped(org, contract_id.as_uuid())
        .ok_or_else(|| AppError::not_found("contract", contract_id))?;
    if contract.status.is_terminal() {
        return Err(AppError::rule(
            "CONTRACT_NOT_ACTIVE",
            format!("contract is {}", contract.status),
        ));
    }
    Ok(contract)
}

/// Compute taxes for a document of the caller's organization.
pub fn compute_taxes(
    state: &AppState,
    org: OrganizationId,
    direction: Direction,
    counterparty_condition: FiscalCondition,
    document_type: DocumentType,
    net_amount: Amount,
    vat_rate_bps: u32,
) -> Result<TaxBreakdown, AppError> {
    let organization = state
        .organizations
        .get(org.as_uuid())
        .ok_or_else(|| AppError::not_found("organization", org))?;
    Ok(state.tax_engine.compute(&TaxableDocument {
        direction,
        counterparty_condition,
        document_type,
        net_amount,
        vat_rate_bps,
        agent: organization.agent_status(),
    })?)
}

/// The latest entry of `source` that has not been reversed yet.
fn open_posting(
    state: &AppState,
    org: OrganizationId,
    kind: SourceKind,
    source_id: Uuid,
) -> Option<AccountingRecord> {
    let records = state.accounting_records.filter(|r| {
        r.organization_id == org && r.source.kind == kind && r.source.id == Some(source_id)
    });
    let reversed: HashSet<AccountingRecordId> = records.iter().filter_map(|r| r.reverses).collect();
    records
        .into_iter()
        .filter(|r| r.reverses.is_none() && !reversed.contains(&r.id))
        .max_by_key(|r| r.created_at)
}

struct Posting<'a> {
    org: OrganizationId,
    work_id: Option<WorkId>,
    entry_date: NaiveDate,
    description: String,
    source: EntrySource,
    actor: UserId,
    now: DateTime<Utc>,
    lines: Vec<JournalLine>,
    reverses: Option<&'a AccountingRecord>,
}

impl Posting<'_> {
    fn into_record(self) -> AccountingRecord {
        AccountingRecord {
            id: AccountingRecordId::new(),
            organization_id: self.org,
            work_id: self.work_id,
            entry_date: self.entry_date,
            description: self.description,
            lines: self.lines,
            source: self.source,
            reverses: self.reverses.map(|r| r.id),
            created_by: Some(self.actor),
            created_at: self.now,
        }
    }
}

/// Reversal of the open posting of `source`, or of `fallback` when the
/// original entry cannot be found.
#[allow(clippy::too_many_arguments)]
fn reversal_posting(
    state: &AppState,
    org: OrganizationId,
    work_id: Option<WorkId>,
    source: EntrySource,
    fallback: Vec<JournalLine>,
    description: String,
    actor: UserId,
    now: DateTime<Utc>,
) -> AccountingRecord {
    let original = source
        .id
        .and_then(|id| open_posting(state, org, source.kind, id));
    if original.is_none() {
        tracing::warn!(
            organization_id = %org,
            source_kind = ?source.kind,
            source_id = ?source.id,
            "no open posting found to reverse, reversing recomputed lines"
        );
    }
    let lines = match &original {
        Some(o) => reversal(&o.lines),
        None => reversal(&fallback),
    };
    Posting {
        org,
        work_id,
        entry_date: now.date_naive(),
        description,
        source,
        actor,
        now,
        lines,
        reverses: original.as_ref(),
    }
    .into_record()
}

fn movement(
    kind: MovementKind,
    amount: Amount,
    concept: String,
    actor: UserId,
    now: DateTime<Utc>,
) -> CashMovement {
    CashMovement {
        id: CashMovementId::new(),
        kind,
        amount,
        concept,
        expense_id: None,
        income_id: None,
        reversal: false,
        recorded_by: actor,
        recorded_at: now,
    }
}

// ── Expense Transitions ─────────────────────────────────────────────────────

/// Everything an expense transition changed.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExpenseTransition {
    pub expense: Expense,
    /// The linked contract after reconciliation.
    pub contract: Option<Contract>,
    pub reconciliation: Option<Reconciliation>,
    /// Journal entries posted by the transition.
    pub accounting_records: Vec<AccountingRecord>,
    pub cash_movement: Option<CashMovement>,
    /// Alerts raised by the transition.
    pub alerts: Vec<Alert>,
}

/// Move an expense to `to`, reconciling its contract, cashbox and books.
pub fn transition_expense(
    state: &WriteTx<'_>,
    caller: &CallerIdentity,
    expense_id: Uuid,
    to: ExpenseStatus,
    reason: Option<String>,
) -> Result<(ExpenseTransition, Changes), AppError> {
    let now = Utc::now();
    let today = now.date_naive();
    let org = caller.organization_id;

    let mut expense = state
        .expenses
        .scoped(org, &expense_id)
        .ok_or_else(|| AppError::not_found("expense", expense_id))?;
    let from = expense.status;
    expense.status = from.transition(to)?;

    let entering = to.counts_against_contract() && !from.counts_against_contract();
    let leaving = from.counts_against_contract() && !to.counts_against_contract();

    if to == ExpenseStatus::Validated {
        open_work(state, org, expense.work_id)?;
        if let Some(supplier_id) = expense.supplier_id {
            usable_supplier(state, org, supplier_id, today)?;
        }
    }

    // Contract reconciliation.
    let mut contract_update: Option<(Contract, Reconciliation, bool)> = None;
    if let Some(contract_id) = expense.contract_id {
        let mut contract = state
            .contracts
            .scoped(org, contract_id.as_uuid())
            .ok_or_else(|| AppError::not_found("contract", contract_id))?;
        if entering && contract.status.is_terminal() {
            return Err(AppError::rule(
                "CONTRACT_NOT_ACTIVE",
                format!("contract is {}", contract.status),
            ));
        }
        let rec = reconcile(contract.ledger(), expense.taxes.gross, from, to)?;
        let previous = contract.status;
        if !rec.delta.is_zero() {
            contract.executed_amount = rec.executed_after;
            let next = previous.after_rebalance(rec.balance_after);
            if next != previous {
                contract.transitions.push(TransitionRecord::new(
                    previous,
                    next,
                    Some(format!("balance {}", rec.balance_after)),
                    caller.user_id,
                    now,
                ));
                contract.status = next;
            }
            contract.updated_at = now;
        }
        let changed = !rec.delta.is_zero();
        contract_update = Some((contract, rec, changed));
    }

    // Cash settlement.
    let payable = expense.taxes.payable;
    let mut cash_update: Option<(Cashbox, CashMovement)> = None;
    if let Some(cashbox_id) = expense.cashbox_id.filter(|_| entering || leaving) {
        if payable.is_positive() {
            let mut cashbox = open_cashbox(state, org, cashbox_id)?;
            let kind = if entering {
                MovementKind::Outflow
            } else {
                MovementKind::Inflow
            };
            CashLedger::apply(cashbox.balance()?, kind, payable)?;
            let mut m = movement(
                kind,
                payable,
                format!(
                    "{} {} {}",
                    if leaving { "reversal of" } else { "payment of" },
                    expense.document_type,
                    expense.document_number
                ),
                caller.user_id,
                now,
            );
            m.expense_id = Some(expense.id);
            m.reversal = leaving;
            cashbox.movements.push(m.clone());
            cash_update = Some((cashbox, m));
        }
    }

    // Journal.
    let expense_source = EntrySource {
        kind: SourceKind::Expense,
        id: Some(expense_id),
    };
    let mut postings = Vec::new();
    if entering {
        postings.push(
            Posting {
                org,
                work_id: Some(expense.work_id),
                entry_date: expense.issue_date,
                description: format!(
                    "expense {} {}: {}",
                    expense.document_type, expense.document_number, expense.description
                ),
                source: expense_source,
                actor: caller.user_id,
                now,
                lines: expense_entry(&expense.taxes)?,
                reverses: None,
            }
            .into_record(),
        );
    } else if leaving {
        postings.push(reversal_posting(
            state,
            org,
            Some(expense.work_id),
            expense_source,
            expense_entry(&expense.taxes)?,
            format!(
                "reversal of expense {} {} ({})",
                expense.document_type,
                expense.document_number,
                to.as_str()
            ),
            caller.user_id,
            now,
        ));
    }
    if let Some((cashbox, m)) = &cash_update {
        let source = EntrySource {
            kind: SourceKind::Cashbox,
            id: Some(*m.id.as_uuid()),
        };
        if entering {
            postings.push(
                Posting {
                    org,
                    work_id: Some(expense.work_id),
                    entry_date: today,
                    description: format!("cash payment from cashbox {}", cashbox.period),
                    source,
                    actor: caller.user_id,
                    now,
                    lines: payment_entry(payable)?,
                    reverses: None,
                }
                .into_record(),
            );
        } else {
            let paid = cashbox
                .movements
                .iter()
                .rev()
                .find(|p| p.expense_id == Some(expense.id) && !p.reversal);
            let paid_source = EntrySource {
                kind: SourceKind::Cashbox,
                id: paid.map(|p| *p.id.as_uuid()),
            };
            let mut record = reversal_posting(
                state,
                org,
                Some(expense.work_id),
                paid_source,
                payment_entry(payable)?,
                format!("reversal of cash payment from cashbox {}", cashbox.period),
                caller.user_id,
                now,
            );
            record.source = source;
            postings.push(record);
        }
    }

    expense.transitions.push(TransitionRecord::new(
        from,
        to,
        reason.clone(),
        caller.user_id,
        now,
    ));
    expense.status_reason = reason.clone();
    expense.updated_at = now;

    // Alerts.
    let mut raised = Vec::new();
    if let Some((contract, _, true)) = &contract_update {
        if let Some(draft) = alerts::contract_alert(contract, state.config.contract_low_balance_bps) {
            raised.extend(alerts::prepare(state, org, draft, now));
        }
    }

    // Every check passed: write.
    let mut changes = Changes::new();
    changes.put(&expense)?;
    if let Some((contract, _, true)) = &contract_update {
        changes.put(contract)?;
    }
    if let Some((cashbox, _)) = &cash_update {
        changes.put(cashbox)?;
    }
    for record in &postings {
        changes.put(record)?;
    }

    state.expenses.put(expense.clone());
    if let Some((contract, _, true)) = &contract_update {
        state.contracts.put(contract.clone());
    }
    if let Some((cashbox, _)) = &cash_update {
        state.cashboxes.put(cashbox.clone());
    }
    for record in &postings {
        state.accounting_records.put(record.clone());
    }
    alerts::store(state, &raised, &mut changes)?;

    let delta = contract_update.as_ref().map(|(_, rec, _)| rec.delta);
    let entry = state.record_audit(
        org,
        AuditEvent::new(
            Some(caller.user_id),
            match to {
                ExpenseStatus::Validated => "expense.validated",
                ExpenseStatus::Observed => "expense.observed",
                ExpenseStatus::Annulled => "expense.annulled",
                ExpenseStatus::Pending => "expense.reopened",
            },
            "expense",
            expense_id,
        )
        .with_metadata(json!({
            "from": from.as_str(),
            "to": to.as_str(),
            "reason": reason,
            "contract_delta": delta,
        })),
    );
    changes.audit(entry);

    tracing::info!(
        expense_id = %expense_id,
        from = from.as_str(),
        to = to.as_str(),
        "expense transitioned"
    );

    Ok((
        ExpenseTransition {
            expense,
            contract: contract_update.as_ref().map(|(c, _, _)| c.clone()),
            reconciliation: contract_update.map(|(_, rec, _)| rec),
            accounting_records: postings,
            cash_movement: cash_update.map(|(_, m)| m),
            alerts: raised,
        },
        changes,
    ))
}

// ── Incomes ─────────────────────────────────────────────────────────────────

/// Validated input of a new income.
#[derive(Debug, Clone)]
pub struct NewIncome {
    pub work_id: WorkId,
    pub cashbox_id: Option<CashboxId>,
    pub client_name: String,
    pub client_fiscal_condition: FiscalCondition,
    pub document_type: DocumentType,
    pub document_number: String,
    pub issue_date: NaiveDate,
    pub description: String,
    pub net_amount: Amount,
    pub vat_rate_bps: u32,
}

/// Everything an income registration or annulment changed.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IncomeOutcome {
    pub income: Income,
    pub accounting_records: Vec<AccountingRecord>,
    pub cash_movement: Option<CashMovement>,
}

/// Register an income, posting it to the books and, with a cashbox, to cash.
pub fn register_income(
    state: &WriteTx<'_>,
    caller: &CallerIdentity,
    input: NewIncome,
) -> Result<(IncomeOutcome, Changes), AppError> {
    let now = Utc::now();
    let org = caller.organization_id;

    open_work(state, org, input.work_id)?;
    let taxes = compute_taxes(
        state,
        org,
        Direction::Sale,
        input.client_fiscal_condition,
        input.document_type,
        input.net_amount,
        input.vat_rate_bps,
    )?;

    let income = Income {
        id: IncomeId::new(),
        organization_id: org,
        work_id: input.work_id,
        cashbox_id: input.cashbox_id,
        client_name: input.client_name,
        client_fiscal_condition: input.client_fiscal_condition,
        document_type: input.document_type,
        document_number: input.document_number,
        issue_date: input.issue_date,
        description: input.description,
        net_amount: input.net_amount,
        vat_rate_bps: taxes.vat_rate_bps,
        taxes,
        status: IncomeStatus::Registered,
        status_reason: None,
        transitions: Vec::new(),
        created_by: caller.user_id,
        created_at: now,
        updated_at: now,
    };

    let mut postings = vec![Posting {
        org,
        work_id: Some(income.work_id),
        entry_date: income.issue_date,
        description: format!(
            "income {} {}: {}",
            income.document_type, income.document_number, income.description
        ),
        source: EntrySource {
            kind: SourceKind::Income,
            id: Some(*income.id.as_uuid()),
        },
        actor: caller.user_id,
        now,
        lines: income_entry(&income.taxes)?,
        reverses: None,
    }
    .into_record()];

    let collected = income.taxes.payable;
    let mut cash_update = None;
    if let Some(cashbox_id) = income.cashbox_id {
        let mut cashbox = owned_open_cashbox(state, caller, cashbox_id)?;
        if collected.is_positive() {
            CashLedger::apply(cashbox.balance()?, MovementKind::Inflow, collected)?;
            let mut m = movement(
                MovementKind::Inflow,
                collected,
                format!("collection of {} {}", income.document_type, income.document_number),
                caller.user_id,
                now,
            );
            m.income_id = Some(income.id);
            cashbox.movements.push(m.clone());
            postings.push(
                Posting {
                    org,
                    work_id: Some(income.work_id),
                    entry_date: now.date_naive(),
                    description: format!("cash collection into cashbox {}", cashbox.period),
                    source: EntrySource {
                        kind: SourceKind::Cashbox,
                        id: Some(*m.id.as_uuid()),
                    },
                    actor: caller.user_id,
                    now,
                    lines: collection_entry(collected)?,
                    reverses: None,
                }
                .into_record(),
            );
            cash_update = Some((cashbox, m));
        }
    }

    let mut changes = Changes::new();
    changes.put(&income)?;
    if let Some((cashbox, _)) = &cash_update {
        changes.put(cashbox)?;
    }
    for record in &postings {
        changes.put(record)?;
    }

    state.incomes.put(income.clone());
    if let Some((cashbox, _)) = &cash_update {
        state.cashboxes.put(cashbox.clone());
    }
    for record in &postings {
        state.accounting_records.put(record.clone());
    }
    let entry = state.record_audit(
        org,
        AuditEvent::new(Some(caller.user_id), "income.created", "income", *income.id.as_uuid())
            .with_metadata(json!({
                "document_type": income.document_type,
                "document_number": income.document_number,
                "gross": income.taxes.gross,
            })),
    );
    changes.audit(entry);

    Ok((
        IncomeOutcome {
            income,
            accounting_records: postings,
            cash_movement: cash_update.map(|(_, m)| m),
        },
        changes,
    ))
}

/// Annul an income, reversing its journal entry and cash collection.
pub fn annul_income(
    state: &WriteTx<'_>,
    caller: &CallerIdentity,
    income_id: Uuid,
    reason: String,
) -> Result<(IncomeOutcome, Changes), AppError> {
    let now = Utc::now();
    let org = caller.organization_id;

    let mut income = state
        .incomes
        .scoped(org, &income_id)
        .ok_or_else(|| AppError::not_found("income", income_id))?;
    let from = income.status;
    income.status = from.transition(IncomeStatus::Annulled)?;

    let mut postings = vec![reversal_posting(
        state,
        org,
        Some(income.work_id),
        EntrySource {
            kind: SourceKind::Income,
            id: Some(income_id),
        },
        income_entry(&income.taxes)?,
        format!(
            "reversal of income {} {}",
            income.document_type, income.document_number
        ),
        caller.user_id,
        now,
    )];

    let collected = income.taxes.payable;
    let mut cash_update = None;
    if let Some(cashbox_id) = income.cashbox_id.filter(|_| collected.is_positive()) {
        let mut cashbox = open_cashbox(state, org, cashbox_id)?;
        CashLedger::apply(cashbox.balance()?, MovementKind::Outflow, collected)?;
        let original = cashbox
            .movements
            .iter()
            .rev()
            .find(|m| m.income_id == Some(income.id) && !m.reversal)
            .map(|m| *m.id.as_uuid());
        let mut m = movement(
            MovementKind::Outflow,
            collected,
            format!(
                "reversal of {} {}",
                income.document_type, income.document_number
            ),
            caller.user_id,
            now,
        );
        m.income_id = Some(income.id);
        m.reversal = true;
        cashbox.movements.push(m.clone());
        let mut record = reversal_posting(
            state,
            org,
            Some(income.work_id),
            EntrySource {
                kind: SourceKind::Cashbox,
                id: original,
            },
            collection_entry(collected)?,
            format!("reversal of cash collection into cashbox {}", cashbox.period),
            caller.user_id,
            now,
        );
        record.source = EntrySource {
            kind: SourceKind::Cashbox,
            id: Some(*m.id.as_uuid()),
        };
        postings.push(record);
        cash_update = Some((cashbox, m));
    }

    income.transitions.push(TransitionRecord::new(
        from,
        IncomeStatus::Annulled,
        Some(reason.clone()),
        caller.user_id,
        now,
    ));
    income.status_reason = Some(reason.clone());
    income.updated_at = now;

    let mut changes = Changes::new();
    changes.put(&income)?;
    if let Some((cashbox, _)) = &cash_update {
        changes.put(cashbox)?;
    }
    for record in &postings {
        changes.put(record)?;
    }

    state.incomes.put(income.clone());
    if let Some((cashbox, _)) = &cash_update {
        state.cashboxes.put(cashbox.clone());
    }
    for record in &postings {
        state.accounting_records.put(record.clone());
    }
    let entry = state.record_audit(
        org,
        AuditEvent::new(Some(caller.user_id), "income.annulled", "income", income_id)
            .with_metadata(json!({ "reason": reason })),
    );
    changes.audit(entry);

    Ok((
        IncomeOutcome {
            income,
            accounting_records: postings,
            cash_movement: cash_update.map(|(_, m)| m),
        },
        changes,
    ))
}

// ── Cashboxes ───────────────────────────────────────────────────────────────

/// The caller's own open cashbox.
pub fn owned_open_cashbox(
    state: &AppState,
    caller: &CallerIdentity,
    cashbox_id: CashboxId,
) -> Result<Cashbox, AppError> {
    let cashbox = open_cashbox(state, caller.organization_id, cashbox_id)?;
    if cashbox.user_id != caller.user_id {
        return Err(AppError::Forbidden(
            "only the owner of a cashbox may move it".into(),
        ));
    }
    Ok(cashbox)
}

/// Record a manual movement in the caller's open cashbox.
pub fn record_movement(
    state: &WriteTx<'_>,
    caller: &CallerIdentity,
    cashbox_id: Uuid,
    kind: MovementKind,
    amount: Amount,
    concept: String,
) -> Result<(Cashbox, CashMovement, Changes), AppError> {
    let now = Utc::now();
    let org = caller.organization_id;

    let mut cashbox = owned_open_cashbox(state, caller, CashboxId::from_uuid(cashbox_id))?;
    let balance = CashLedger::apply(cashbox.balance()?, kind, amount)?;
    let m = movement(kind, amount, concept, caller.user_id, now);
    cashbox.movements.push(m.clone());

    let mut changes = Changes::new();
    changes.put(&cashbox)?;
    state.cashboxes.put(cashbox.clone());
    let entry = state.record_audit(
        org,
        AuditEvent::new(Some(caller.user_id), "cashbox.movement", "cashbox", cashbox_id)
            .with_metadata(json!({
                "kind": kind.as_str(),
                "amount": amount,
                "balance": balance,
            })),
    );
    changes.audit(entry);

    Ok((cashbox, m, changes))
}
