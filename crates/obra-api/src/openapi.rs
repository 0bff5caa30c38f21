//! # OpenAPI Document
//!
//! Collects every utoipa-annotated handler into one OpenAPI document,
//! served unauthenticated at `/openapi.json`.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::state::AppState;

/// Registers the JWT bearer scheme.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some("Access token returned by POST /v1/auth/login."))
                        .build(),
                ),
            );
        }
    }
}

/// The Obra API surface.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Obra API",
        version = "0.1.0",
        description = "Construction finance backend: works, suppliers, contracts, expenses, incomes, cashboxes, accounting, alerts and audit.\n\nEvery `/v1/*` endpoint except login and the CSRF token requires `Authorization: Bearer <token>`. Records are scoped to the caller's organization.",
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development server"),
    ),
    security(
        ("bearer_auth" = [])
    ),
    paths(
        // ── Auth ────────────────────────────────────────────────────────
        crate::routes::auth::login,
        crate::routes::auth::csrf_token,
        crate::routes::auth::me,
        crate::routes::auth::change_password,
        // ── Organizations, roles, users ─────────────────────────────────
        crate::routes::organizations::create_organization,
        crate::routes::organizations::get_current,
        crate::routes::organizations::update_current,
        crate::routes::roles::list_roles,
        crate::routes::roles::create_role,
        crate::routes::roles::update_role,
        crate::routes::roles::delete_role,
        crate::routes::roles::permission_catalog,
        crate::routes::users::list_users,
        crate::routes::users::create_user,
        crate::routes::users::get_user,
        crate::routes::users::update_user,
        // ── Works ───────────────────────────────────────────────────────
        crate::routes::works::list_works,
        crate::routes::works::create_work,
        crate::routes::works::get_work,
        crate::routes::works::update_work,
        crate::routes::works::change_status,
        crate::routes::works::work_summary,
        // ── Suppliers ───────────────────────────────────────────────────
        crate::routes::suppliers::list_suppliers,
        crate::routes::suppliers::create_supplier,
        crate::routes::suppliers::get_supplier,
        crate::routes::suppliers::update_supplier,
        crate::routes::suppliers::deactivate_supplier,
        crate::routes::suppliers::supplier_standing,
        // ── Contracts ───────────────────────────────────────────────────
        crate::routes::contracts::list_contracts,
        crate::routes::contracts::create_contract,
        crate::routes::contracts::get_contract,
        crate::routes::contracts::update_contract,
        crate::routes::contracts::finish_contract,
        crate::routes::contracts::cancel_contract,
        crate::routes::contracts::contract_balance,
        // ── Expenses ────────────────────────────────────────────────────
        crate::routes::expenses::list_expenses,
        crate::routes::expenses::create_expense,
        crate::routes::expenses::get_expense,
        crate::routes::expenses::update_expense,
        crate::routes::expenses::delete_expense,
        crate::routes::expenses::validate_expense,
        crate::routes::expenses::observe_expense,
        crate::routes::expenses::annul_expense,
        // ── Incomes ─────────────────────────────────────────────────────
        crate::routes::incomes::list_incomes,
        crate::routes::incomes::create_income,
        crate::routes::incomes::get_income,
        crate::routes::incomes::annul,
        // ── Cashboxes ───────────────────────────────────────────────────
        crate::routes::cashboxes::list_cashboxes,
        crate::routes::cashboxes::open_cashbox,
        crate::routes::cashboxes::get_cashbox,
        crate::routes::cashboxes::add_movement,
        crate::routes::cashboxes::close_cashbox,
        // ── Accounting ──────────────────────────────────────────────────
        crate::routes::accounting::list_entries,
        crate::routes::accounting::create_entry,
        crate::routes::accounting::get_entry,
        crate::routes::accounting::get_trial_balance,
        // ── Alerts, audit, taxes ────────────────────────────────────────
        crate::routes::alerts::list_alerts,
        crate::routes::alerts::acknowledge,
        crate::routes::alerts::run_scan,
        crate::routes::audit::list_audit,
        crate::routes::audit::verify_audit,
        crate::routes::taxes::preview,
        crate::routes::taxes::rules,
    ),
    components(
        schemas(
            // ── Records ─────────────────────────────────────────────────
            crate::state::Organization,
            crate::state::Role,
            crate::state::UserView,
            crate::state::Work,
            crate::state::Supplier,
            crate::state::Contract,
            crate::state::Expense,
            crate::state::Income,
            crate::state::Cashbox,
            crate::state::CashMovement,
            crate::state::AccountingRecord,
            crate::state::EntrySource,
            crate::state::SourceKind,
            crate::state::Alert,
            crate::state::AlertKind,
            crate::state::Severity,
            crate::audit::AuditEntry,
            crate::audit::ChainIntegrityResult,
            // ── Lifecycles ──────────────────────────────────────────────
            obra_state::WorkStatus,
            obra_state::ContractStatus,
            obra_state::ExpenseStatus,
            obra_state::IncomeStatus,
            obra_state::CashboxStatus,
            obra_state::TransitionRecord,
            // ── Money and fiscal ────────────────────────────────────────
            obra_core::Amount,
            obra_core::Currency,
            obra_fiscal::Account,
            obra_fiscal::JournalLine,
            obra_fiscal::AccountBalance,
            obra_fiscal::MovementKind,
            obra_fiscal::Closing,
            obra_fiscal::FiscalCondition,
            obra_fiscal::DocumentType,
            obra_fiscal::Direction,
            obra_fiscal::TaxNature,
            obra_fiscal::TaxKind,
            obra_fiscal::TaxBase,
            obra_fiscal::TaxRule,
            obra_fiscal::TaxLine,
            obra_fiscal::TaxBreakdown,
            obra_fiscal::ContractLedger,
            obra_fiscal::Reconciliation,
            // ── Errors ──────────────────────────────────────────────────
            crate::error::ErrorBody,
            crate::error::ErrorDetail,
            // ── Request/response DTOs ───────────────────────────────────
            crate::routes::auth::LoginRequest,
            crate::routes::auth::LoginResponse,
            crate::routes::auth::MeResponse,
            crate::routes::auth::ChangePasswordRequest,
            crate::routes::auth::CsrfResponse,
            crate::routes::organizations::CreateOrganizationRequest,
            crate::routes::organizations::OrganizationCreated,
            crate::routes::organizations::UpdateOrganizationRequest,
            crate::routes::roles::CreateRoleRequest,
            crate::routes::roles::UpdateRoleRequest,
            crate::routes::users::CreateUserRequest,
            crate::routes::users::UpdateUserRequest,
            crate::routes::works::CreateWorkRequest,
            crate::routes::works::UpdateWorkRequest,
            crate::routes::works::ChangeWorkStatusRequest,
            crate::routes::works::WorkSummary,
            crate::routes::suppliers::CreateSupplierRequest,
            crate::routes::suppliers::UpdateSupplierRequest,
            crate::routes::suppliers::StandingView,
            crate::routes::contracts::CreateContractRequest,
            crate::routes::contracts::UpdateContractRequest,
            crate::routes::contracts::ContractBalance,
            crate::routes::expenses::CreateExpenseRequest,
            crate::routes::expenses::UpdateExpenseRequest,
            crate::routes::expenses::ReasonRequest,
            crate::routes::incomes::CreateIncomeRequest,
            crate::routes::cashboxes::OpenCashboxRequest,
            crate::routes::cashboxes::MovementRequest,
            crate::routes::cashboxes::MovementRecorded,
            crate::routes::cashboxes::CloseCashboxRequest,
            crate::routes::cashboxes::CashboxClosed,
            crate::routes::accounting::CreateEntryRequest,
            crate::routes::accounting::TrialBalance,
            crate::routes::taxes::TaxPreviewRequest,
            crate::ledger::ExpenseTransition,
            crate::ledger::IncomeOutcome,
            crate::alerts::ScanReport,
        ),
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "Login with brute-force protection, CSRF token, current user"),
        (name = "organizations", description = "Tenants and their fiscal agent flags"),
        (name = "roles", description = "Roles and the permission catalog"),
        (name = "users", description = "Users of the caller's organization"),
        (name = "works", description = "Construction works and their financial summary"),
        (name = "suppliers", description = "Suppliers, ART coverage and blocking"),
        (name = "contracts", description = "Supplier contracts with executed amount and balance"),
        (name = "expenses", description = "Purchase documents: validation, observation, annulment"),
        (name = "incomes", description = "Sale documents and collections"),
        (name = "cashboxes", description = "Per-user cashboxes, movements and closing"),
        (name = "accounting", description = "Journal entries and trial balance"),
        (name = "alerts", description = "Alert inbox and on-demand scans"),
        (name = "audit", description = "Hash-chained audit trail"),
        (name = "taxes", description = "Tax previews and rule table"),
    )
)]
pub struct ApiDoc;

/// Build the OpenAPI router.
pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

/// GET /openapi.json — The generated OpenAPI document.
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_generates() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "Obra API");
        assert!(!spec.paths.paths.is_empty());
    }

    #[test]
    fn document_covers_the_ledger_paths() {
        let spec = ApiDoc::openapi();
        for path in [
            "/v1/auth/login",
            "/v1/works/{id}/summary",
            "/v1/contracts/{id}/balance",
            "/v1/expenses/{id}/validate",
            "/v1/cashboxes/{id}/close",
            "/v1/accounting-records/trial-balance",
            "/v1/audit/verify",
            "/v1/taxes/preview",
        ] {
            assert!(spec.paths.paths.contains_key(path), "missing {path}");
        }
    }

    #[test]
    fn bearer_scheme_is_registered() {
        let spec = ApiDoc::openapi();
        let components = spec.components.expect("components");
        assert!(components.security_schemes.contains_key("bearer_auth"));
    }

    #[test]
    fn error_body_schema_is_registered() {
        let spec = ApiDoc::openapi();
        let components = spec.components.expect("components");
        assert!(components.schemas.contains_key("ErrorBody"));
        assert!(components.schemas.contains_key("TaxBreakdown"));
    }
}
