#![deny(missing_docs)]

//! # obra-core — Foundational Types for Obra
//!
//! Every other crate in the workspace depends on this one. It has no
//! internal crate dependencies.
//!
//! ## Design Principles
//!
//! 1. **Newtype wrappers for identifiers.** You cannot pass a [`WorkId`]
//!    where a [`ContractId`] is expected.
//!
//! 2. **Money is integer cents.** [`Amount`] never touches floating point.
//!    Rates are basis points and are applied with truncation.
//!
//! 3. **Validated strings at construction.** [`Cuit`], [`Email`] and
//!    [`Period`] reject malformed input when built, so a value of those types
//!    is always well-formed.
//!
//! 4. **[`ObraError`] hierarchy.** Structured errors with `thiserror`.

pub mod access;
pub mod error;
pub mod identity;
pub mod money;
pub mod temporal;

pub use access::{any_grants, Permission, PERMISSION_CATALOG};
pub use error::{ObraError, StateTransitionError, ValidationError};
pub use identity::{
    AccountingRecordId, AlertId, AuditEntryId, CashMovementId, CashboxId, ContractId, Cuit,
    Email, ExpenseId, IncomeId, OrganizationId, RoleId, SupplierId, UserId, WorkId,
};
pub use money::{Amount, Currency, BPS_SCALE};
pub use temporal::Period;
