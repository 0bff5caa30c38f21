//! # Income Lifecycle
//!
//! Incomes are booked on registration. The only way back is annulment,
//! which posts reversing entries.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::transition::Lifecycle;

/// Status of a sale document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum IncomeStatus {
    /// Booked.
    #[default]
    Registered,
    /// Voided (terminal).
    Annulled,
}

impl Lifecycle for IncomeStatus {
    const ENTITY: &'static str = "income";

    fn as_str(&self) -> &'static str {
        match self {
            Self::Registered => "registered",
            Self::Annulled => "annulled",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Annulled)
    }

    fn can_transition_to(&self, to: Self) -> bool {
        matches!((self, to), (Self::Registered, Self::Annulled))
    }
}

impl std::fmt::Display for IncomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
