//! # Cashbox Lifecycle

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::transition::Lifecycle;

/// Status of a user's cash till.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CashboxStatus {
    /// Accepting movements.
    #[default]
    Open,
    /// Counted and closed (terminal).
    Closed,
}

impl CashboxStatus {
    /// Whether movements may be recorded.
    pub fn accepts_movements(&self) -> bool {
        matches!(self, Self::Open)
    }
}

impl Lifecycle for CashboxStatus {
    const ENTITY: &'static str = "cashbox";

    fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    fn can_transition_to(&self, to: Self) -> bool {
        matches!((self, to), (Self::Open, Self::Closed))
    }
}

impl std::fmt::Display for CashboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obra_core::StateTransitionError;

    #[test]
    fn close_is_final() {
        let s = CashboxStatus::Open.transition(CashboxStatus::Closed).unwrap();
        assert!(!s.accepts_movements());
        assert!(matches!(
            s.transition(CashboxStatus::Closed),
            Err(StateTransitionError::Terminal { entity: "cashbox", .. })
        ));
    }
}
