//! # Application State
//!
//! Shared state for the Axum application, passed to all route handlers
//! via the `State` extractor.
//!
//! ## Architecture
//!
//! The in-memory stores are the source of truth at runtime. When a
//! database pool is configured every change is written through to
//! Postgres as a JSON document and the stores are hydrated from it on
//! start. Every record carries its `organization_id`; handlers read and
//! write through the `*_scoped` methods so that a record of another
//! organization is indistinguishable from a missing one.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use obra_core::{
    AccountingRecordId, AlertId, Amount, CashMovementId, CashboxId, ContractId, Cuit, Currency,
    Email, ExpenseId, IncomeId, OrganizationId, Period, Permission, RoleId, SupplierId, UserId,
    WorkId,
};
use obra_fiscal::{
    AgentStatus, CashError, CashLedger, ContractLedger, DocumentType, FiscalCondition,
    JournalLine, MovementKind, TaxBreakdown, TaxEngine,
};
use obra_state::{
    CashboxStatus, ContractStatus, ExpenseStatus, IncomeStatus, SupplierStanding,
    TransitionRecord, WorkStatus, DEFAULT_ART_WARNING_DAYS,
};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditEvent, AuditLog};
use crate::auth::{JwtSecret, PasswordCost};
use crate::db::Changes;
use crate::error::AppError;
use crate::middleware::brute_force::{LoginThrottle, LoginThrottleConfig};

// -- Undo Log -----------------------------------------------------------------

type Undo = Box<dyn FnOnce() + Send>;

/// Reverse operations for every store write made inside a [`WriteTx`].
///
/// Inactive outside a transaction: hydration and test fixtures write
/// through without recording anything.
#[derive(Clone, Default)]
pub struct UndoLog {
    entries: Arc<Mutex<Option<Vec<Undo>>>>,
}

impl std::fmt::Debug for UndoLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.lock();
        f.debug_struct("UndoLog")
            .field("active", &entries.is_some())
            .field("pending", &entries.as_ref().map_or(0, Vec::len))
            .finish()
    }
}

impl UndoLog {
    /// An inactive log.
    pub fn new() -> Self {
        Self::default()
    }

    fn begin(&self) {
        *self.entries.lock() = Some(Vec::new());
    }

    fn is_active(&self) -> bool {
        self.entries.lock().is_some()
    }

    /// Remember how to reverse a write. Ignored while inactive.
    pub(crate) fn record(&self, undo: impl FnOnce() + Send + 'static) {
        if let Some(entries) = self.entries.lock().as_mut() {
            entries.push(Box::new(undo));
        }
    }

    /// Keep every recorded write.
    fn discard(&self) {
        self.entries.lock().take();
    }

    /// Reverse every recorded write, newest first. Returns how many.
    fn rollback(&self) -> usize {
        let undos = self.entries.lock().take().unwrap_or_default();
        let count = undos.len();
        for undo in undos.into_iter().rev() {
            undo();
        }
        count
    }
}

// -- Generic In-Memory Store --------------------------------------------------

/// Thread-safe, cloneable in-memory key-value store.
///
/// All operations are synchronous (the RwLock is `parking_lot`, not `tokio::sync`)
/// because we never hold the lock across `.await` points. Writes made while
/// the shared [`UndoLog`] is active can be reversed.
#[derive(Debug)]
pub struct Store<T: Clone + Send + Sync> {
    data: Arc<RwLock<HashMap<Uuid, T>>>,
    undo: UndoLog,
}

impl<T: Clone + Send + Sync> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            undo: self.undo.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Store<T> {
    /// Create an empty store with its own, never activated, undo log.
    pub fn new() -> Self {
        Self::recording(&UndoLog::new())
    }

    /// Create an empty store whose writes are recorded in `undo`.
    pub fn recording(undo: &UndoLog) -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            undo: undo.clone(),
        }
    }

    fn remember(&self, id: Uuid, prior: Option<T>) {
        let data = Arc::clone(&self.data);
        self.undo.record(move || {
            let mut data = data.write();
            match prior {
                Some(value) => {
                    data.insert(id, value);
                }
                None => {
                    data.remove(&id);
                }
            }
        });
    }

    /// Insert a record, returning the previous value if the key existed.
    pub fn insert(&self, id: Uuid, value: T) -> Option<T> {
        let prior = self.data.write().insert(id, value);
        if self.undo.is_active() {
            self.remember(id, prior.clone());
        }
        prior
    }

    /// Retrieve a record by ID.
    pub fn get(&self, id: &Uuid) -> Option<T> {
        self.data.read().get(id).cloned()
    }

    /// List all records.
    pub fn list(&self) -> Vec<T> {
        self.data.read().values().cloned().collect()
    }

    /// Records matching a predicate.
    pub fn filter(&self, f: impl Fn(&T) -> bool) -> Vec<T> {
        self.data.read().values().filter(|v| f(v)).cloned().collect()
    }

    /// Whether any record matches a predicate.
    pub fn any(&self, f: impl Fn(&T) -> bool) -> bool {
        self.data.read().values().any(f)
    }

    /// Remove a record by ID.
    pub fn remove(&self, id: &Uuid) -> Option<T> {
        let prior = self.data.write().remove(id);
        if prior.is_some() && self.undo.is_active() {
            self.remember(*id, prior.clone());
        }
        prior
    }

    /// Return the number of records.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + Send + Sync + 'static> Default for Store<T> {
    fn default() -> Self {
        Self::new()
    }
}

// -- Tenant-Scoped Records ----------------------------------------------------

/// A persisted, organization-owned record.
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Document kind used as the persistence discriminator.
    const KIND: &'static str;

    /// Store key.
    fn key(&self) -> Uuid;

    /// Owning organization.
    fn organization_id(&self) -> OrganizationId;

    /// Creation time, used for list ordering.
    fn created_at(&self) -> DateTime<Utc>;
}

macro_rules! record {
    ($ty:ty, $kind:literal, org = $org:ident, created = $created:ident) => {
        impl Record for $ty {
            const KIND: &'static str = $kind;

            fn key(&self) -> Uuid {
                *self.id.as_uuid()
            }

            fn organization_id(&self) -> OrganizationId {
                self.$org
            }

            fn created_at(&self) -> DateTime<Utc> {
                self.$created
            }
        }
    };
}

impl<T: Record> Store<T> {
    /// Insert or replace a record under its own key.
    pub fn put(&self, record: T) {
        self.insert(record.key(), record);
    }

    /// A record owned by `org`. Records of other organizations are `None`.
    pub fn scoped(&self, org: OrganizationId, id: &Uuid) -> Option<T> {
        self.data
            .read()
            .get(id)
            .filter(|r| r.organization_id() == org)
            .cloned()
    }

    /// All records owned by `org`.
    pub fn list_scoped(&self, org: OrganizationId) -> Vec<T> {
        self.filter(|r| r.organization_id() == org)
    }

    /// Atomically read-validate-update a record owned by `org`.
    ///
    /// Returns `None` if the record doesn't exist for that organization.
    pub fn try_update_scoped<R, E>(
        &self,
        org: OrganizationId,
        id: &Uuid,
        f: impl FnOnce(&mut T) -> Result<R, E>,
    ) -> Option<Result<R, E>> {
        let mut guard = self.data.write();
        let entry = guard.get_mut(id).filter(|r| r.organization_id() == org)?;
        let mut draft = entry.clone();
        let result = f(&mut draft);
        if result.is_ok() {
            let prior = std::mem::replace(entry, draft);
            drop(guard);
            self.remember(*id, Some(prior));
        }
        Some(result)
    }
}

// -- Organizations, Roles, Users ----------------------------------------------

/// A tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    pub cuit: Cuit,
    /// Withholding rules apply to this organization's expenses.
    pub withholding_agent: bool,
    /// Perception rules apply to this organization's incomes.
    pub perception_agent: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Organization {
    /// The organization's tax agent flags.
    pub fn agent_status(&self) -> AgentStatus {
        AgentStatus {
            withholding_agent: self.withholding_agent,
            perception_agent: self.perception_agent,
        }
    }
}

record!(Organization, "organization", org = id, created = created_at);

/// A named permission set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Role {
    pub id: RoleId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub permissions: Vec<Permission>,
    /// The organization's administrator role. Cannot be deleted or renamed.
    pub system: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

record!(Role, "role", org = organization_id, created = created_at);

/// A login account. Carries the password hash, so it is never returned as
/// is; responses use [`UserView`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub organization_id: OrganizationId,
    pub email: Email,
    pub display_name: String,
    pub password_hash: String,
    pub role_id: RoleId,
    pub active: bool,
    pub platform_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

record!(User, "user", org = organization_id, created = created_at);

/// A user as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UserView {
    pub id: UserId,
    pub organization_id: OrganizationId,
    pub email: Email,
    pub display_name: String,
    pub role_id: RoleId,
    pub active: bool,
    pub platform_admin: bool,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            organization_id: user.organization_id,
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            role_id: user.role_id,
            active: user.active,
            platform_admin: user.platform_admin,
            created_at: user.created_at,
            last_login_at: user.last_login_at,
        }
    }
}

// -- Works, Suppliers, Contracts ----------------------------------------------

/// A construction project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Work {
    pub id: WorkId,
    pub organization_id: OrganizationId,
    /// Short code, unique per organization.
    pub code: String,
    pub name: String,
    pub address: Option<String>,
    pub client_name: Option<String>,
    pub status: WorkStatus,
    pub budget: Amount,
    pub currency: Currency,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub transitions: Vec<TransitionRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

record!(Work, "work", org = organization_id, created = created_at);

/// A supplier and its ART coverage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Supplier {
    pub id: SupplierId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub cuit: Cuit,
    pub fiscal_condition: FiscalCondition,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub requires_art: bool,
    pub art_expires_on: Option<NaiveDate>,
    pub art_document_url: Option<String>,
    pub manually_blocked: bool,
    pub block_reason: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Supplier {
    /// Standing at `today`.
    pub fn standing(&self, today: NaiveDate, warning_days: u32) -> SupplierStanding {
        SupplierStanding::evaluate(
            self.requires_art,
            self.art_expires_on,
            self.manually_blocked,
            self.block_reason.as_deref(),
            today,
            warning_days,
        )
    }
}

record!(Supplier, "supplier", org = organization_id, created = created_at);

/// A contract with a supplier for a work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Contract {
    pub id: ContractId,
    pub organization_id: OrganizationId,
    pub work_id: WorkId,
    pub supplier_id: SupplierId,
    pub description: String,
    pub total_amount: Amount,
    /// Sum of the gross amounts of validated expenses.
    pub executed_amount: Amount,
    pub currency: Currency,
    pub status: ContractStatus,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub document_url: Option<String>,
    pub transitions: Vec<TransitionRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contract {
    /// Total and executed amounts.
    pub fn ledger(&self) -> ContractLedger {
        ContractLedger {
            total: self.total_amount,
            executed: self.executed_amount,
        }
    }
}

record!(Contract, "contract", org = organization_id, created = created_at);

// -- Expenses & Incomes -------------------------------------------------------

/// A purchase document charged to a work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Expense {
    pub id: ExpenseId,
    pub organization_id: OrganizationId,
    pub work_id: WorkId,
    pub contract_id: Option<ContractId>,
    pub supplier_id: Option<SupplierId>,
    pub cashbox_id: Option<CashboxId>,
    /// Fiscal condition of the issuer, taken from the supplier when there is one.
    pub counterparty_condition: FiscalCondition,
    pub document_type: DocumentType,
    pub document_number: String,
    pub issue_date: NaiveDate,
    pub description: String,
    pub net_amount: Amount,
    pub vat_rate_bps: u32,
    pub taxes: TaxBreakdown,
    pub status: ExpenseStatus,
    pub status_reason: Option<String>,
    pub document_url: Option<String>,
    pub transitions: Vec<TransitionRecord>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

record!(Expense, "expense", org = organization_id, created = created_at);

/// A sale document credited to a work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Income {
    pub id: IncomeId,
    pub organization_id: OrganizationId,
    pub work_id: WorkId,
    pub cashbox_id: Option<CashboxId>,
    pub client_name: String,
    pub client_fiscal_condition: FiscalCondition,
    pub document_type: DocumentType,
    pub document_number: String,
    pub issue_date: NaiveDate,
    pub description: String,
    pub net_amount: Amount,
    pub vat_rate_bps: u32,
    pub taxes: TaxBreakdown,
    pub status: IncomeStatus,
    pub status_reason: Option<String>,
    pub transitions: Vec<TransitionRecord>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

record!(Income, "income", org = organization_id, created = created_at);

// -- Cashboxes ----------------------------------------------------------------

/// One movement of a cashbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CashMovement {
    pub id: CashMovementId,
    pub kind: MovementKind,
    pub amount: Amount,
    pub concept: String,
    pub expense_id: Option<ExpenseId>,
    pub income_id: Option<IncomeId>,
    /// Compensates an earlier movement of the same document.
    pub reversal: bool,
    pub recorded_by: UserId,
    pub recorded_at: DateTime<Utc>,
}

/// A user's till for one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Cashbox {
    pub id: CashboxId,
    pub organization_id: OrganizationId,
    /// Owner. Only the owner records movements and closes the cashbox.
    pub user_id: UserId,
    pub period: Period,
    pub currency: Currency,
    pub opening_balance: Amount,
    pub movements: Vec<CashMovement>,
    pub status: CashboxStatus,
    pub declared_balance: Option<Amount>,
    pub closing_balance: Option<Amount>,
    pub difference: Option<Amount>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Cashbox {
    /// Current balance from the opening balance and movements.
    pub fn balance(&self) -> Result<Amount, CashError> {
        CashLedger::balance(
            self.opening_balance,
            self.movements.iter().map(|m| (m.kind, m.amount)),
        )
    }
}

record!(Cashbox, "cashbox", org = organization_id, created = opened_at);

// -- Accounting ---------------------------------------------------------------

/// What produced a journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Expense,
    Income,
    /// Cash settlement of an expense or income through a cashbox.
    Cashbox,
    Manual,
}

/// Origin of a journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct EntrySource {
    pub kind: SourceKind,
    /// The expense, income or cashbox id; `None` for manual entries.
    pub id: Option<Uuid>,
}

/// A journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AccountingRecord {
    pub id: AccountingRecordId,
    pub organization_id: OrganizationId,
    pub work_id: Option<WorkId>,
    pub entry_date: NaiveDate,
    pub description: String,
    pub lines: Vec<JournalLine>,
    pub source: EntrySource,
    /// The entry this one cancels.
    pub reverses: Option<AccountingRecordId>,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

record!(AccountingRecord, "accounting_record", org = organization_id, created = created_at);

// -- Alerts -------------------------------------------------------------------

/// What an alert is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    ArtExpiring,
    ArtExpired,
    ContractBalanceLow,
    ContractBlocked,
    CashboxDifference,
}

/// How urgent an alert is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// A raised alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Alert {
    pub id: AlertId,
    pub organization_id: OrganizationId,
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    pub resource_type: String,
    pub resource_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<UserId>,
}

impl Alert {
    /// Whether the alert still needs attention.
    pub fn is_open(&self) -> bool {
        self.acknowledged_at.is_none()
    }
}

record!(Alert, "alert", org = organization_id, created = created_at);

// -- Configuration ------------------------------------------------------------

/// Errors reading configuration from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed.
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Credentials for the first platform administrator.
#[derive(Clone)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: String,
    pub org_name: String,
    pub org_cuit: String,
}

impl std::fmt::Debug for BootstrapAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapAdmin")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .field("org_name", &self.org_name)
            .field("org_cuit", &self.org_cuit)
            .finish()
    }
}

/// Application configuration.
///
/// Custom `Debug` redacts the JWT secret and bootstrap password.
#[derive(Clone)]
pub struct AppConfig {
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// HS256 signing secret.
    pub jwt_secret: JwtSecret,
    /// Token lifetime in seconds.
    pub jwt_ttl_secs: i64,
    /// Login brute-force guard.
    pub login: LoginThrottleConfig,
    /// Key the login throttle on `X-Forwarded-For`.
    pub trust_proxy_headers: bool,
    /// Require `X-CSRF-Token` on unsafe authenticated requests.
    pub csrf_protection: bool,
    /// Days before ART expiry that raise a warning.
    pub art_warning_days: u32,
    /// Balance share (bps of the total) at or below which a contract is low.
    pub contract_low_balance_bps: u32,
    /// Seconds between background alert scans.
    pub alert_scan_interval_secs: u64,
    /// Argon2 cost for new password hashes.
    pub password_cost: PasswordCost,
    /// First administrator, created when no user exists.
    pub bootstrap: Option<BootstrapAdmin>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field("jwt_secret", &self.jwt_secret)
            .field("jwt_ttl_secs", &self.jwt_ttl_secs)
            .field("login", &self.login)
            .field("trust_proxy_headers", &self.trust_proxy_headers)
            .field("csrf_protection", &self.csrf_protection)
            .field("art_warning_days", &self.art_warning_days)
            .field("contract_low_balance_bps", &self.contract_low_balance_bps)
            .field("alert_scan_interval_secs", &self.alert_scan_interval_secs)
            .field("password_cost", &self.password_cost)
            .field("bootstrap", &self.bootstrap)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            jwt_secret: JwtSecret::generate(),
            jwt_ttl_secs: 8 * 60 * 60,
            login: LoginThrottleConfig::default(),
            trust_proxy_headers: false,
            csrf_protection: false,
            art_warning_days: DEFAULT_ART_WARNING_DAYS,
            contract_low_balance_bps: 1_000,
            alert_scan_interval_secs: 3_600,
            password_cost: PasswordCost::default(),
            bootstrap: None,
        }
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: e.to_string(),
            })
        }
        _ => Ok(default),
    }
}

fn parse_flag(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    match lookup(var).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if v.is_empty() => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                var,
                reason: format!("expected a boolean, got \"{v}\""),
            }),
        },
    }
}

impl AppConfig {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = LoginThrottleConfig::default();
        let jwt_secret = match lookup("JWT_SECRET").filter(|s| !s.is_empty()) {
            Some(secret) => JwtSecret::new(secret.into_bytes()),
            None => {
                tracing::warn!(
                    "JWT_SECRET not set, using an ephemeral secret. Tokens will not survive restarts."
                );
                JwtSecret::generate()
            }
        };

        let bootstrap = match (
            lookup("BOOTSTRAP_ADMIN_EMAIL"),
            lookup("BOOTSTRAP_ADMIN_PASSWORD"),
        ) {
            (Some(email), Some(password)) => Some(BootstrapAdmin {
                email,
                password,
                org_name: lookup("BOOTSTRAP_ORG_NAME").unwrap_or_else(|| "Obra".to_string()),
                org_cuit: lookup("BOOTSTRAP_ORG_CUIT").unwrap_or_else(|| "30-00000000-7".to_string()),
            }),
            _ => None,
        };

        let cost = PasswordCost::default();
        Ok(Self {
            port: parse_var(&lookup, "PORT", 8080)?,
            jwt_secret,
            jwt_ttl_secs: parse_var(&lookup, "JWT_TTL_SECS", 8 * 60 * 60)?,
            login: LoginThrottleConfig {
                max_attempts: parse_var(&lookup, "LOGIN_MAX_ATTEMPTS", defaults.max_attempts)?,
                window: std::time::Duration::from_secs(parse_var(
                    &lookup,
                    "LOGIN_WINDOW_SECS",
                    defaults.window.as_secs(),
                )?),
                lockout: std::time::Duration::from_secs(parse_var(
                    &lookup,
                    "LOGIN_LOCKOUT_SECS",
                    defaults.lockout.as_secs(),
                )?),
            }
            .clamped(),
            trust_proxy_headers: parse_flag(&lookup, "TRUST_PROXY_HEADERS", false)?,
            csrf_protection: parse_flag(&lookup, "CSRF_PROTECTION", false)?,
            art_warning_days: parse_var(&lookup, "ART_WARNING_DAYS", DEFAULT_ART_WARNING_DAYS)?,
            contract_low_balance_bps: parse_var(&lookup, "CONTRACT_LOW_BALANCE_BPS", 1_000)?,
            alert_scan_interval_secs: parse_var(&lookup, "ALERT_SCAN_INTERVAL_SECS", 3_600)?,
            password_cost: PasswordCost {
                memory_kib: parse_var(&lookup, "ARGON2_MEMORY_KIB", cost.memory_kib)?,
                iterations: parse_var(&lookup, "ARGON2_ITERATIONS", cost.iterations)?,
            },
            bootstrap,
        })
    }
}

// -- Application State --------------------------------------------------------

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub organizations: Store<Organization>,
    pub roles: Store<Role>,
    pub users: Store<User>,
    pub works: Store<Work>,
    pub suppliers: Store<Supplier>,
    pub contracts: Store<Contract>,
    pub expenses: Store<Expense>,
    pub incomes: Store<Income>,
    pub cashboxes: Store<Cashbox>,
    pub accounting_records: Store<AccountingRecord>,
    pub alerts: Store<Alert>,

    /// Per-organization audit chains.
    pub audit: AuditLog,

    /// Serializes every write, from the first read it depends on through
    /// the database transaction. Taken through [`AppState::begin`].
    pub ledger: Arc<tokio::sync::Mutex<()>>,

    /// Reverse operations for the writes of the transaction in progress.
    pub undo: UndoLog,

    pub login_throttle: LoginThrottle,
    pub tax_engine: Arc<TaxEngine>,

    /// Verified in place of a stored hash when a login names no active user.
    pub(crate) decoy_password_hash: Arc<tokio::sync::OnceCell<String>>,

    /// When `None`, the API operates in in-memory-only mode.
    pub db_pool: Option<PgPool>,

    pub config: AppConfig,
}

impl AppState {
    /// State with default configuration and no database.
    pub fn new() -> Self {
        Self::with_config(AppConfig::default(), None)
    }

    /// State with the given configuration and optional database pool.
    pub fn with_config(config: AppConfig, db_pool: Option<PgPool>) -> Self {
        let undo = UndoLog::new();
        Self {
            organizations: Store::recording(&undo),
            roles: Store::recording(&undo),
            users: Store::recording(&undo),
            works: Store::recording(&undo),
            suppliers: Store::recording(&undo),
            contracts: Store::recording(&undo),
            expenses: Store::recording(&undo),
            incomes: Store::recording(&undo),
            cashboxes: Store::recording(&undo),
            accounting_records: Store::recording(&undo),
            alerts: Store::recording(&undo),
            audit: AuditLog::recording(&undo),
            ledger: Arc::new(tokio::sync::Mutex::new(())),
            undo,
            login_throttle: LoginThrottle::new(config.login),
            tax_engine: Arc::new(TaxEngine::standard()),
            decoy_password_hash: Arc::new(tokio::sync::OnceCell::new()),
            db_pool,
            config,
        }
    }

    /// Wait for exclusive write access.
    ///
    /// Every store write and audit append made while the returned
    /// transaction is held is undone unless [`WriteTx::commit`] persists it.
    pub async fn begin(&self) -> WriteTx<'_> {
        let ledger = self.ledger.lock().await;
        self.undo.begin();
        WriteTx {
            state: self,
            _ledger: ledger,
        }
    }

    /// Find an active or inactive user by email, across organizations.
    pub fn user_by_email(&self, email: &Email) -> Option<User> {
        self.users.filter(|u| &u.email == email).into_iter().next()
    }

    /// Append an audit entry to the caller's organization chain.
    pub fn record_audit(&self, organization_id: OrganizationId, event: AuditEvent) -> AuditEntry {
        self.audit.append(organization_id, event, Utc::now())
    }

    async fn persist(&self, changes: &Changes) -> Result<(), AppError> {
        let Some(pool) = &self.db_pool else {
            return Ok(());
        };
        if changes.is_empty() {
            return Ok(());
        }
        crate::db::commit(pool, changes).await.map_err(|e| {
            tracing::error!(
                documents = changes.upserts.len(),
                deletes = changes.deletes.len(),
                audit_entries = changes.audit.len(),
                error = %e,
                "failed to persist changes"
            );
            AppError::Internal("database persist failed, change rolled back".into())
        })
    }

    /// Hydrate in-memory stores from the database.
    ///
    /// Called once on startup when a database pool is available.
    pub async fn hydrate_from_db(&self) -> Result<(), String> {
        let pool = match &self.db_pool {
            Some(pool) => pool,
            None => return Ok(()),
        };

        async fn load<T: Record>(pool: &PgPool, store: &Store<T>) -> Result<usize, String> {
            let records = crate::db::documents::load_all::<T>(pool)
                .await
                .map_err(|e| format!("failed to load {}: {e}", T::KIND))?;
            let count = records.len();
            for record in records {
                store.put(record);
            }
            Ok(count)
        }

        let organizations = load(pool, &self.organizations).await?;
        let roles = load(pool, &self.roles).await?;
        let users = load(pool, &self.users).await?;
        let works = load(pool, &self.works).await?;
        let suppliers = load(pool, &self.suppliers).await?;
        let contracts = load(pool, &self.contracts).await?;
        let expenses = load(pool, &self.expenses).await?;
        let incomes = load(pool, &self.incomes).await?;
        let cashboxes = load(pool, &self.cashboxes).await?;
        let accounting_records = load(pool, &self.accounting_records).await?;
        let alerts = load(pool, &self.alerts).await?;

        let audit_entries = crate::db::audit::load_all(pool)
            .await
            .map_err(|e| format!("failed to load audit events: {e}"))?;
        let audit_count = audit_entries.len();
        self.audit.load(audit_entries);

        tracing::info!(
            organizations,
            roles,
            users,
            works,
            suppliers,
            contracts,
            expenses,
            incomes,
            cashboxes,
            accounting_records,
            alerts,
            audit_events = audit_count,
            "Hydrated in-memory stores from database"
        );

        Ok(())
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

// -- Write Transactions -------------------------------------------------------

/// Exclusive write access to the stores, from [`AppState::begin`].
///
/// Holds the ledger lock until committed or dropped, so the database sees
/// writes in the order the stores applied them. Dropping it without a
/// successful commit reverses every store write and audit append made
/// since it began.
pub struct WriteTx<'a> {
    state: &'a AppState,
    _ledger: tokio::sync::MutexGuard<'a, ()>,
}

impl WriteTx<'_> {
    /// Persist `changes` in one database transaction, then release the lock.
    ///
    /// On failure the in-memory writes are reversed before the error is
    /// returned.
    pub async fn commit(self, changes: Changes) -> Result<(), AppError> {
        self.state.persist(&changes).await?;
        self.state.undo.discard();
        Ok(())
    }
}

impl std::ops::Deref for WriteTx<'_> {
    type Target = AppState;

    fn deref(&self) -> &AppState {
        self.state
    }
}

impl Drop for WriteTx<'_> {
    fn drop(&mut self) {
        let undone = self.state.undo.rollback();
        if undone > 0 {
            tracing::debug!(undone, "reverted uncommitted store writes");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obra_core::Amount;

    fn sample_work(org: OrganizationId, code: &str) -> Work {
        let now = Utc::now();
        Work {
            id: WorkId::new(),
            organization_id: org,
            code: code.to_string(),
            name: "Edificio Norte".to_string(),
            address: None,
            client_name: None,
            status: WorkStatus::Planning,
            budget: Amount::from_cents(1_000_000),
            currency: Currency::Ars,
            start_date: None,
            end_date: None,
            transitions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn store_insert_and_get_roundtrip() {
        let store: Store<Work> = Store::new();
        let work = sample_work(OrganizationId::new(), "N-1");
        store.put(work.clone());
        assert_eq!(store.get(work.id.as_uuid()), Some(work));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn store_clone_shares_underlying_data() {
        let a: Store<Work> = Store::new();
        let b = a.clone();
        a.put(sample_work(OrganizationId::new(), "N-1"));
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn scoped_hides_other_organizations() {
        let store: Store<Work> = Store::new();
        let org_a = OrganizationId::new();
        let org_b = OrganizationId::new();
        let work = sample_work(org_a, "N-1");
        store.put(work.clone());

        assert!(store.scoped(org_a, work.id.as_uuid()).is_some());
        assert!(store.scoped(org_b, work.id.as_uuid()).is_none());
        assert_eq!(store.list_scoped(org_b).len(), 0);
        assert!(store
            .try_update_scoped(org_b, work.id.as_uuid(), |w| {
                w.name = "hijacked".into();
                Ok::<_, ()>(())
            })
            .is_none());
        assert_eq!(store.get(work.id.as_uuid()).unwrap().name, "Edificio Norte");
    }

    #[test]
    fn failed_try_update_leaves_record_untouched() {
        let store: Store<Work> = Store::new();
        let org = OrganizationId::new();
        let work = sample_work(org, "N-1");
        store.put(work.clone());

        let result = store.try_update_scoped(org, work.id.as_uuid(), |w| {
            w.name = "changed".into();
            Err::<(), _>("rejected")
        });
        assert_eq!(result, Some(Err("rejected")));
        assert_eq!(store.get(work.id.as_uuid()), Some(work));
    }

    #[tokio::test]
    async fn dropped_transaction_reverts_every_write() {
        let state = AppState::new();
        let org = OrganizationId::new();
        let kept = sample_work(org, "N-1");
        let doomed = sample_work(org, "N-2");
        state.works.put(kept.clone());
        state.works.put(doomed.clone());

        {
            let tx = state.begin().await;
            tx.works.put(sample_work(org, "N-3"));
            tx.works.remove(doomed.id.as_uuid());
            tx.works
                .try_update_scoped(org, kept.id.as_uuid(), |w| {
                    w.name = "renamed".into();
                    Ok::<_, ()>(())
                })
                .unwrap()
                .unwrap();
            tx.record_audit(org, AuditEvent::new(None, "work.updated", "work", *kept.id.as_uuid()));
            assert_eq!(tx.works.len(), 2);
            assert_eq!(tx.audit.len(), 1);
        }

        assert_eq!(state.works.len(), 2);
        assert_eq!(state.works.get(kept.id.as_uuid()), Some(kept));
        assert_eq!(state.works.get(doomed.id.as_uuid()), Some(doomed));
        assert!(state.audit.is_empty());
        assert!(!state.undo.is_active());
    }

    #[tokio::test]
    async fn committed_transaction_keeps_writes() {
        let state = AppState::new();
        let org = OrganizationId::new();
        let tx = state.begin().await;
        tx.works.put(sample_work(org, "N-1"));
        tx.record_audit(org, AuditEvent::new(None, "work.created", "work", Uuid::new_v4()));
        tx.commit(Changes::new()).await.unwrap();

        assert_eq!(state.works.len(), 1);
        assert_eq!(state.audit.len(), 1);
        assert!(state.audit.verify(org).chain_valid);

        // A later aborted transaction does not reach back past the commit.
        drop(state.begin().await);
        assert_eq!(state.works.len(), 1);
    }

    #[test]
    fn writes_outside_a_transaction_are_not_recorded() {
        let state = AppState::new();
        state.works.put(sample_work(OrganizationId::new(), "N-1"));
        assert_eq!(state.undo.rollback(), 0);
        assert_eq!(state.works.len(), 1);
    }

    #[tokio::test]
    async fn transactions_are_serialized() {
        let state = AppState::new();
        let tx = state.begin().await;
        let waiting = tokio::time::timeout(std::time::Duration::from_millis(50), state.begin()).await;
        assert!(waiting.is_err());
        drop(tx);
        let next = tokio::time::timeout(std::time::Duration::from_millis(50), state.begin()).await;
        assert!(next.is_ok());
    }

    #[test]
    fn config_from_lookup_defaults_and_overrides() {
        let vars: HashMap<&str, &str> = [
            ("PORT", "9000"),
            ("JWT_SECRET", "s3cret"),
            ("LOGIN_MAX_ATTEMPTS", "3"),
            ("CSRF_PROTECTION", "true"),
        ]
        .into_iter()
        .collect();
        let config = AppConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.login.max_attempts, 3);
        assert_eq!(config.login.window.as_secs(), 900);
        assert!(config.csrf_protection);
        assert!(!config.trust_proxy_headers);
        assert_eq!(config.contract_low_balance_bps, 1_000);
        assert!(!config.jwt_secret.is_ephemeral());
        assert!(config.bootstrap.is_none());
    }

    #[test]
    fn config_rejects_garbage() {
        let err = AppConfig::from_lookup(|k| (k == "PORT").then(|| "eighty".to_string()));
        assert!(matches!(err, Err(ConfigError::Invalid { var: "PORT", .. })));
        let err = AppConfig::from_lookup(|k| (k == "CSRF_PROTECTION").then(|| "maybe".to_string()));
        assert!(err.is_err());
    }

    #[test]
    fn config_debug_redacts_secrets() {
        let config = AppConfig {
            jwt_secret: JwtSecret::new(b"top-secret-value".to_vec()),
            bootstrap: Some(BootstrapAdmin {
                email: "admin@obra.test".into(),
                password: "hunter22".into(),
                org_name: "Obra".into(),
                org_cuit: "30-00000000-7".into(),
            }),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("top-secret-value"));
        assert!(!debug.contains("hunter22"));
        assert!(debug.contains("[REDACTED]"));
    }
}
