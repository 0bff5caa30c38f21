//! # obra-state — Lifecycle State Machines
//!
//! Every record with a status in Obra moves through a small state machine.
//! States are plain enums persisted as snake_case strings; transitions are
//! checked at runtime through the [`Lifecycle`] trait so that a record loaded
//! from storage is held to the same rules as one created in memory.
//!
//! ## State Machines
//!
//! - **Work** (`work.rs`): `planning → in_progress ⇄ paused → finished`,
//!   with `cancelled` reachable from every non-terminal state.
//!
//! - **Contract** (`contract.rs`): `active ⇄ blocked` driven by the contract
//!   balance, `finished` and `cancelled` closed manually.
//!
//! - **Expense** (`expense.rs`): `pending → validated | observed | annulled`
//!   with re-validation of observed expenses. Only validated expenses count
//!   against a contract.
//!
//! - **Income** (`income.rs`): `registered → annulled`.
//!
//! - **Cashbox** (`cashbox.rs`): `open → closed`.
//!
//! - **Supplier standing** (`supplier.rs`): not a state machine but a pure
//!   evaluation of ART coverage and manual blocks at a given date.

pub mod cashbox;
pub mod contract;
pub mod expense;
pub mod income;
pub mod supplier;
pub mod transition;
pub mod work;

pub use cashbox::CashboxStatus;
pub use contract::ContractStatus;
pub use expense::ExpenseStatus;
pub use income::IncomeStatus;
pub use supplier::{BlockReason, SupplierStanding, DEFAULT_ART_WARNING_DAYS};
pub use transition::{Lifecycle, TransitionRecord};
pub use work::WorkStatus;
