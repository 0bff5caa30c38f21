//! # Expense Lifecycle
//!
//! ```text
//!            ┌──────────▶ Validated ◀──────┐
//!            │               │  │          │
//! Pending ───┼──▶ Observed ◀─┘  │          │
//!            │      │  └────────┼──────────┘
//!            ▼      ▼           ▼
//!            └──▶ Annulled ◀────┘
//! ```
//!
//! Only `Validated` counts toward the contract's executed amount. Moving
//! into or out of it is what drives contract reconciliation, journal
//! postings and cashbox movements.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::transition::Lifecycle;

/// Status of a purchase document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseStatus {
    /// Loaded, awaiting review.
    #[default]
    Pending,
    /// Approved; charged to the contract and the books.
    Validated,
    /// Returned for correction.
    Observed,
    /// Voided (terminal).
    Annulled,
}

impl ExpenseStatus {
    /// Whether an expense in this state is part of its contract's executed
    /// amount.
    pub fn counts_against_contract(&self) -> bool {
        matches!(self, Self::Validated)
    }

    /// Whether the document fields may still be edited.
    pub fn is_editable(&self) -> bool {
        matches!(self, Self::Pending | Self::Observed)
    }
}

impl Lifecycle for ExpenseStatus {
    const ENTITY: &'static str = "expense";

    fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Validated => "validated",
            Self::Observed => "observed",
            Self::Annulled => "annulled",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Annulled)
    }

    fn can_transition_to(&self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Validated)
                | (Self::Pending, Self::Observed)
                | (Self::Pending, Self::Annulled)
                | (Self::Observed, Self::Validated)
                | (Self::Observed, Self::Annulled)
                | (Self::Validated, Self::Observed)
                | (Self::Validated, Self::Annulled)
        )
    }
}

impl std::fmt::Display for ExpenseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
