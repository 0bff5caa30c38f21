//! # Work Lifecycle
//!
//! ```text
//! Planning ──▶ InProgress ──▶ Finished
//!    │            │  ▲
//!    │            ▼  │
//!    │          Paused
//!    │            │
//!    └────────────┴──▶ Cancelled
//! ```

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::transition::Lifecycle;

/// Status of a construction project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    /// Being budgeted, no site activity yet.
    #[default]
    Planning,
    /// Under construction.
    InProgress,
    /// Temporarily stopped.
    Paused,
    /// Delivered (terminal).
    Finished,
    /// Abandoned (terminal).
    Cancelled,
}

impl WorkStatus {
    /// Whether new contracts, expenses and incomes may attach to the work.
    pub fn accepts_movements(&self) -> bool {
        !self.is_terminal()
    }
}

impl Lifecycle for WorkStatus {
    const ENTITY: &'static str = "work";

    fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::InProgress => "in_progress",
            Self::Paused => "paused",
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
            (Self::Planning, Self::InProgress)
                | (Self::InProgress, Self::Paused)
                | (Self::Paused, Self::InProgress)
                | (Self::InProgress, Self::Finished)
                | (Self::Planning, Self::Cancelled)
                | (Self::InProgress, Self::Cancelled)
                | (Self::Paused, Self::Cancelled)
        )
    }
}

impl std::fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obra_core::StateTransitionError;

    #[test]
    fn full_lifecycle() {
        let s = WorkStatus::Planning;
        let s = s.transition(WorkStatus::InProgress).unwrap();
        let s = s.transition(WorkStatus::Paused).unwrap();
        let s = s.transition(WorkStatus::InProgress).unwrap();
        let s = s.transition(WorkStatus::Finished).unwrap();
        assert!(s.is_terminal());
        assert!(!s.accepts_movements());
    }

    #[test]
    fn paused_cannot_finish_directly() {
        let err = WorkStatus::Paused.transition(WorkStatus::Finished).unwrap_err();
        assert_eq!(
            err,
            StateTransitionError::InvalidTransition {
                entity: "work",
                from: "paused",
                to: "finished",
            }
        );
    }

    #[test]
    fn cancelled_is_terminal() {
        let s = WorkStatus::Planning.transition(WorkStatus::Cancelled).unwrap();
        assert!(matches!(
            s.transition(WorkStatus::InProgress),
            Err(StateTransitionError::Terminal { .. })
        ));
    }

    #[test]
    fn same_state_is_rejected() {
        assert!(WorkStatus::InProgress.transition(WorkStatus::InProgress).is_err());
    }

    #[test]
    fn serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&WorkStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
    }
}
