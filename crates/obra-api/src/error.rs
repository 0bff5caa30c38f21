//! # API Error Types
//!
//! Structured error type implementing `axum::response::IntoResponse`.
//! Maps domain errors from obra-core, obra-state and obra-fiscal to HTTP
//! status codes and JSON bodies carrying a machine-readable code, the
//! English message, and the Spanish text shown to end users.
//! Internal error details never reach the client.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use obra_fiscal::{CashError, JournalError, ReconcileError, TaxError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Structured JSON error response body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Inner error detail.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g. "NOT_FOUND", "CONTRACT_BALANCE_EXCEEDED").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// User-facing Spanish message for the code.
    pub message_es: String,
    /// Additional details, present only for client errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorBody {
    /// Build a body for `code`, filling `message_es` from the translation table.
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.to_string(),
                message: message.into(),
                message_es: message_es(code).to_string(),
                details: None,
            },
        }
    }
}

/// Application-level error type that implements [`IntoResponse`] for Axum.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found, or owned by another organization (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Request validation failed (422).
    #[error("validation error: {0}")]
    Validation(String),

    /// Request body could not be parsed (400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Missing, invalid or expired credentials (401).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Caller lacks a permission (403).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Unsafe request without a matching CSRF token (403).
    #[error("forbidden: {0}")]
    Csrf(String),

    /// Conflict with current resource state (409).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A business rule rejected the operation (409) with a specific code.
    #[error("{message}")]
    Rule {
        /// Machine-readable code, also the `message_es` lookup key.
        code: &'static str,
        /// Human-readable message.
        message: String,
    },

    /// Login locked out for this client (429).
    #[error("too many failed login attempts, retry in {retry_after_secs}s")]
    TooManyRequests {
        /// Seconds until the lockout ends.
        retry_after_secs: u64,
    },

    /// Internal server error (500). Message is logged but not returned to client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Return the HTTP status code and machine-readable error code for this error.
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::Csrf(_) => (StatusCode::FORBIDDEN, "CSRF_MISMATCH"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::Rule { code, .. } => (StatusCode::CONFLICT, code),
            Self::TooManyRequests { .. } => (StatusCode::TOO_MANY_REQUESTS, "TOO_MANY_ATTEMPTS"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    /// Shorthand for a not-found error on a record kind.
    pub fn not_found(kind: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{kind} {id} not found"))
    }

    /// Shorthand for a rule rejection.
    pub fn rule(code: &'static str, message: impl Into<String>) -> Self {
        Self::Rule {
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            Self::Internal(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        };

        if matches!(&self, Self::Internal(_)) {
            tracing::error!(error = %self, "internal server error");
        }

        let body = ErrorBody::new(code, message);
        let mut response = (status, Json(body)).into_response();

        if let Self::TooManyRequests { retry_after_secs } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

// ---------------------------------------------------------------------------
// Spanish messages
// ---------------------------------------------------------------------------

/// User-facing Spanish text for an error code.
pub fn message_es(code: &str) -> &'static str {
    match code {
        "NOT_FOUND" => "El recurso solicitado no existe.",
        "VALIDATION_ERROR" => "Los datos enviados no son válidos.",
        "BAD_REQUEST" => "La solicitud está mal formada.",
        "UNAUTHORIZED" => "Credenciales inválidas o sesión expirada.",
        "FORBIDDEN" => "No tiene permisos para realizar esta acción.",
        "CSRF_MISMATCH" => "La sesión no es válida. Recargue la página e intente nuevamente.",
        "CONFLICT" => "La operación entra en conflicto con el estado actual del recurso.",
        "INVALID_TRANSITION" => "El cambio de estado solicitado no está permitido.",
        "CONTRACT_BALANCE_EXCEEDED" => "El importe supera el saldo disponible del contrato.",
        "CONTRACT_NOT_ACTIVE" => "El contrato no admite nuevos movimientos.",
        "SUPPLIER_BLOCKED" => "El proveedor está bloqueado.",
        "WORK_CLOSED" => "La obra no admite nuevos movimientos.",
        "INSUFFICIENT_FUNDS" => "Saldo insuficiente en la caja.",
        "CASHBOX_CLOSED" => "La caja está cerrada.",
        "CASHBOX_ALREADY_OPEN" => "Ya tiene una caja abierta.",
        "DUPLICATE" => "Ya existe un registro con esos datos.",
        "TOO_MANY_ATTEMPTS" => "Demasiados intentos fallidos. Intente nuevamente más tarde.",
        "INTERNAL_ERROR" => "Ocurrió un error inesperado. Intente nuevamente.",
        _ => "Ocurrió un error al procesar la solicitud.",
    }
}

// ---------------------------------------------------------------------------
// Domain error conversions
// ---------------------------------------------------------------------------

impl From<obra_core::ValidationError> for AppError {
    fn from(err: obra_core::ValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<obra_core::StateTransitionError> for AppError {
    fn from(err: obra_core::StateTransitionError) -> Self {
        Self::rule("INVALID_TRANSITION", err.to_string())
    }
}

impl From<ReconcileError> for AppError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::ExceedsContractTotal { .. } => {
                Self::rule("CONTRACT_BALANCE_EXCEEDED", err.to_string())
            }
            ReconcileError::InvalidTotal(_) => Self::Validation(err.to_string()),
            ReconcileError::NegativeExecuted { .. } | ReconcileError::Overflow => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<CashError> for AppError {
    fn from(err: CashError) -> Self {
        match err {
            CashError::InsufficientFunds { .. } => Self::rule("INSUFFICIENT_FUNDS", err.to_string()),
            CashError::NonPositiveAmount(_)
            | CashError::NegativeOpening(_)
            | CashError::Overflow => Self::Validation(err.to_string()),
        }
    }
}

impl From<JournalError> for AppError {
    fn from(err: JournalError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<TaxError> for AppError {
    fn from(err: TaxError) -> Self {
        match err {
            TaxError::DuplicateRule(_) => Self::Internal(err.to_string()),
            TaxError::NonPositiveNet(_) | TaxError::RateOutOfRange { .. } | TaxError::Overflow => {
                Self::Validation(err.to_string())
            }
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("serialization error: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Internal(format!("database error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use obra_core::Amount;

    #[test]
    fn status_codes() {
        let cases = [
            (AppError::NotFound("x".into()), StatusCode::NOT_FOUND, "NOT_FOUND"),
            (
                AppError::Validation("x".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
                "VALIDATION_ERROR",
            ),
            (AppError::BadRequest("x".into()), StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            (AppError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            (AppError::Forbidden("x".into()), StatusCode::FORBIDDEN, "FORBIDDEN"),
            (AppError::Csrf("x".into()), StatusCode::FORBIDDEN, "CSRF_MISMATCH"),
            (AppError::Conflict("x".into()), StatusCode::CONFLICT, "CONFLICT"),
            (
                AppError::rule("SUPPLIER_BLOCKED", "x"),
                StatusCode::CONFLICT,
                "SUPPLIER_BLOCKED",
            ),
            (
                AppError::TooManyRequests { retry_after_secs: 3 },
                StatusCode::TOO_MANY_REQUESTS,
                "TOO_MANY_ATTEMPTS",
            ),
            (
                AppError::Internal("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
            ),
        ];
        for (err, status, code) in cases {
            assert_eq!(err.status_and_code(), (status, code), "{err}");
        }
    }

    #[test]
    fn every_emitted_code_has_a_translation() {
        for code in [
            "NOT_FOUND",
            "VALIDATION_ERROR",
            "BAD_REQUEST",
            "UNAUTHORIZED",
            "FORBIDDEN",
            "CONFLICT",
            "INVALID_TRANSITION",
            "CONTRACT_BALANCE_EXCEEDED",
            "SUPPLIER_BLOCKED",
            "INSUFFICIENT_FUNDS",
            "TOO_MANY_ATTEMPTS",
            "INTERNAL_ERROR",
        ] {
            assert_ne!(message_es(code), message_es("SOMETHING_ELSE"), "{code}");
        }
    }

    #[test]
    fn reconcile_exceed_maps_to_conflict_code() {
        let err: AppError = ReconcileError::ExceedsContractTotal {
            requested: Amount::from_cents(500),
            available: Amount::from_cents(100),
        }
        .into();
        assert_eq!(
            err.status_and_code(),
            (StatusCode::CONFLICT, "CONTRACT_BALANCE_EXCEEDED")
        );
    }

    #[test]
    fn negative_executed_is_internal() {
        let err: AppError = ReconcileError::NegativeExecuted {
            executed: Amount::ZERO,
            delta: Amount::from_cents(-1),
        }
        .into();
        assert!(matches!(err, AppError::Internal(_)));
    }

    #[test]
    fn cash_and_journal_mapping() {
        let insufficient: AppError = CashError::InsufficientFunds {
            balance: Amount::ZERO,
            requested: Amount::from_cents(1),
        }
        .into();
        assert_eq!(insufficient.status_and_code().1, "INSUFFICIENT_FUNDS");

        let unbalanced: AppError = JournalError::Unbalanced {
            debit: Amount::from_cents(1),
            credit: Amount::from_cents(2),
        }
        .into();
        assert!(matches!(unbalanced, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn internal_message_is_hidden() {
        let response = AppError::Internal("db password wrong".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"]["message"], "An internal error occurred");
        assert!(!body.windows(8).any(|w| w == b"password"));
    }

    #[tokio::test]
    async fn lockout_sets_retry_after() {
        let response = AppError::TooManyRequests {
            retry_after_secs: 42,
        }
        .into_response();
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"]["code"], "TOO_MANY_ATTEMPTS");
        assert_eq!(
            value["error"]["message_es"],
            "Demasiados intentos fallidos. Intente nuevamente más tarde."
        );
    }
}
