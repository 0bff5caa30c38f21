//! # obra-fiscal — Money Logic
//!
//! Pure, deterministic computations over [`obra_core::Amount`]:
//!
//! - **Tax engine** (`tax.rs`): VAT, withholdings and perceptions for a
//!   document from a rule table.
//! - **Reconciliation** (`reconcile.rs`): contract executed amount and
//!   balance as expenses move in and out of `validated`.
//! - **Journal** (`journal.rs`): balanced double-entry lines for booked
//!   documents, reversals, manual-entry validation and trial balances.
//! - **Cash** (`cash.rs`): cashbox balances, overdraft checks and closing
//!   differences.
//!
//! Nothing here performs I/O or reads the clock. The API crate owns
//! persistence and orchestration.

pub mod cash;
pub mod journal;
pub mod reconcile;
pub mod tax;

pub use cash::{CashError, CashLedger, Closing, MovementKind};
pub use journal::{
    collection_entry, expense_entry, income_entry, payment_entry, reversal, trial_balance,
    validate as validate_entry, Account, AccountBalance, JournalError, JournalLine,
};
pub use reconcile::{adjust_total, reconcile, ContractLedger, ReconcileError, Reconciliation};
pub use tax::{
    standard_rules, AgentStatus, Direction, DocumentType, FiscalCondition, TaxBase, TaxBreakdown,
    TaxEngine, TaxError, TaxKind, TaxLine, TaxNature, TaxRule, TaxableDocument,
};
