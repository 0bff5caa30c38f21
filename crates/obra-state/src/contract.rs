//! # Contract Lifecycle
//!
//! `Active` and `Blocked` are not chosen by users: they follow the contract
//! balance after every reconciliation ([`ContractStatus::after_rebalance`]).
//! Users can only finish a contract, or cancel one nothing was executed
//! against.

use obra_core::{Amount, StateTransitionError};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::transition::Lifecycle;

/// Status of a supplier contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    /// Balance available; expenses may be validated against it.
    #[default]
    Active,
    /// Balance exhausted.
    Blocked,
    /// Closed by the user (terminal).
    Finished,
    /// Voided before any execution (terminal).
    Cancelled,
}

impl ContractStatus {
    /// Status implied by the balance left after a reconciliation.
    ///
    /// Terminal statuses are kept as they are.
    pub fn after_rebalance(self, balance: Amount) -> Self {
        match self {
            Self::Active | Self::Blocked if balance.is_positive() => Self::Active,
            Self::Active | Self::Blocked => Self::Blocked,
            terminal => terminal,
        }
    }

    /// Cancel the contract. Only allowed while nothing has been executed.
    pub fn cancel(self, executed: Amount) -> Result<Self, StateTransitionError> {
        let next = self.transition(Self::Cancelled)?;
        if !executed.is_zero() {
            return Err(StateTransitionError::Precondition {
                entity: Self::ENTITY,
                reason: "a contract with executed expenses cannot be cancelled",
            });
        }
        Ok(next)
    }
}

impl Lifecycle for ContractStatus {
    const ENTITY: &'static str = "contract";

    fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Blocked => "blocked",
            Self::Finished => "finished",
            Self::Cancelled => "cancelled",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled)
    }

    fn can_transition_to(&self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Active | Self::Blocked, Self::Finished)
                | (Self::Active | Self::Blocked, Self::Cancelled)
        )
    }
}

impl std::fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
