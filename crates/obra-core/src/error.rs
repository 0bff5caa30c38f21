//! # Error Hierarchy
//!
//! Structured error types shared by the whole workspace, built with
//! `thiserror`. Each variant carries the offending input so an operator
//! can diagnose a rejection without reading code.

use thiserror::Error;

/// Top-level error type for Obra domain operations.
#[derive(Error, Debug)]
pub enum ObraError {
    /// Domain primitive validation failure.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Lifecycle state machine violation.
    #[error("state transition error: {0}")]
    StateTransition(#[from] StateTransitionError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Validation errors for domain primitives and request fields.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// CUIT is not 11 digits or its check digit does not match.
    #[error("invalid CUIT: \"{0}\" (expected 11 digits with a valid check digit, optionally XX-XXXXXXXX-X)")]
    InvalidCuit(String),

    /// Email address is malformed.
    #[error("invalid email address: \"{0}\"")]
    InvalidEmail(String),

    /// Accounting period is not `YYYY-MM`.
    #[error("invalid period: \"{0}\" (expected YYYY-MM)")]
    InvalidPeriod(String),

    /// Monetary amount could not be parsed.
    #[error("invalid amount: \"{0}\" (expected a decimal number with up to 2 decimals)")]
    InvalidAmount(String),

    /// Amount arithmetic left the representable range.
    #[error("amount overflow")]
    AmountOverflow,

    /// Permission string is not `module.action`, `module.*` or `*`.
    #[error("invalid permission: \"{0}\"")]
    InvalidPermission(String),

    /// A named request field failed a business rule.
    #[error("{field}: {reason}")]
    Field {
        /// The field name as it appears in the request.
        field: String,
        /// Human-readable reason for the rejection.
        reason: String,
    },
}

impl ValidationError {
    /// Build a field-level validation error.
    pub fn field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Field {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by lifecycle state machines.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateTransitionError {
    /// The attempted transition is not allowed from the current state.
    #[error("{entity} cannot move from {from} to {to}")]
    InvalidTransition {
        /// The kind of record (e.g. "expense").
        entity: &'static str,
        /// The current state name.
        from: &'static str,
        /// The requested state name.
        to: &'static str,
    },

    /// The record is in a terminal state and accepts no transitions.
    #[error("{entity} is {state} and can no longer change")]
    Terminal {
        /// The kind of record.
        entity: &'static str,
        /// The terminal state name.
        state: &'static str,
    },

    /// The transition is allowed in principle but a guard condition failed.
    #[error("{entity}: {reason}")]
    Precondition {
        /// The kind of record.
        entity: &'static str,
        /// The failed condition, phrased for the caller.
        reason: &'static str,
    },
}
