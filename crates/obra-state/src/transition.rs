//! # Runtime-Checked Transitions
//!
//! [`Lifecycle`] is implemented by every status enum. The provided
//! [`Lifecycle::transition`] method rejects moves out of terminal states and
//! moves the table does not list, so callers only ever write the table.

use chrono::{DateTime, Utc};
use obra_core::{StateTransitionError, UserId};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A status enum with a transition table.
pub trait Lifecycle: Copy + Eq + Sized {
    /// Entity name used in error messages (e.g. `"expense"`).
    const ENTITY: &'static str;

    /// Canonical snake_case state name.
    fn as_str(&self) -> &'static str;

    /// Whether no transition leaves this state.
    fn is_terminal(&self) -> bool;

    /// Whether the table allows `self → to`.
    fn can_transition_to(&self, to: Self) -> bool;

    /// Check `self → to` against the table and return the new state.
    fn transition(self, to: Self) -> Result<Self, StateTransitionError> {
        if self.is_terminal() {
            return Err(StateTransitionError::Terminal {
                entity: Self::ENTITY,
                state: self.as_str(),
            });
        }
        if !self.can_transition_to(to) {
            return Err(StateTransitionError::InvalidTransition {
                entity: Self::ENTITY,
                from: self.as_str(),
                to: to.as_str(),
            });
        }
        Ok(to)
    }
}

/// One entry of a record's status history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TransitionRecord {
    /// State before the transition.
    pub from: String,
    /// State after the transition.
    pub to: String,
    /// Free-text reason given by the actor, if any.
    pub reason: Option<String>,
    /// The user who triggered the transition.
    pub actor: UserId,
    /// When the transition was applied.
    pub at: DateTime<Utc>,
}

impl TransitionRecord {
    /// Record a transition between two states of the same lifecycle.
    pub fn new<S: Lifecycle>(
        from: S,
        to: S,
        reason: Option<String>,
        actor: UserId,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            from: from.as_str().to_string(),
            to: to.as_str().to_string(),
            reason,
            actor,
            at,
        }
    }
}
