//! # Identity Newtypes
//!
//! Identifier newtypes for every record kind, plus the two validated
//! identity strings the backend handles: the Argentine tax identifier
//! ([`Cuit`]) and user login addresses ([`Email`]).
//!
//! UUID-based identifiers are always valid by construction. String-based
//! identifiers validate their format in `new()`.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ValidationError;

// ---------------------------------------------------------------------------
// UUID-based identifiers (always valid by construction)
// ---------------------------------------------------------------------------

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Access the underlying UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id!(
    /// A tenant: one construction company and everything it owns.
    OrganizationId
);
uuid_id!(
    /// A login account inside an organization.
    UserId
);
uuid_id!(
    /// A named set of ACL permissions.
    RoleId
);
uuid_id!(
    /// A construction project (obra).
    WorkId
);
uuid_id!(
    /// A supplier (proveedor) of goods, services or labor.
    SupplierId
);
uuid_id!(
    /// An agreement between the organization and a supplier for a work.
    ContractId
);
uuid_id!(
    /// A purchase document charged to a work.
    ExpenseId
);
uuid_id!(
    /// A sale document credited to a work.
    IncomeId
);
uuid_id!(
    /// A user-scoped cash till for one period.
    CashboxId
);
uuid_id!(
    /// A single inflow or outflow inside a cashbox.
    CashMovementId
);
uuid_id!(
    /// A journal entry in the organization's books.
    AccountingRecordId
);
uuid_id!(
    /// A raised alert.
    AlertId
);
uuid_id!(
    /// An entry of the tamper-evident audit chain.
    AuditEntryId
);

// ---------------------------------------------------------------------------
// CUIT
// ---------------------------------------------------------------------------

/// Weights applied to the first ten CUIT digits for the mod-11 check.
const CUIT_WEIGHTS: [u32; 10] = [5, 4, 3, 2, 7, 6, 5, 4, 3, 2];

/// Argentine tax identifier (Clave Única de Identificación Tributaria).
///
/// Stored as 11 bare digits. Accepts the dashed `XX-XXXXXXXX-X` form on
/// input. The last digit is a mod-11 check digit over the first ten.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "String", into = "String")]
#[schema(value_type = String, example = "30-71234567-1")]
pub struct Cuit(String);

impl Cuit {
    /// Parse and validate a CUIT.
    pub fn new(s: impl AsRef<str>) -> Result<Self, ValidationError> {
        let raw = s.as_ref().trim();
        let digits: String = raw.chars().filter(|c| *c != '-').collect();
        if digits.len() != 11 || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(ValidationError::InvalidCuit(raw.to_string()));
        }
        if raw.contains('-') && !Self::dashes_well_placed(raw) {
            return Err(ValidationError::InvalidCuit(raw.to_string()));
        }

        let values: Vec<u32> = digits.chars().filter_map(|c| c.to_digit(10)).collect();
        let sum: u32 = values
            .iter()
            .zip(CUIT_WEIGHTS.iter())
            .map(|(d, w)| d * w)
            .sum();
        let expected = match 11 - (sum % 11) {
            11 => 0,
            10 => return Err(ValidationError::InvalidCuit(raw.to_string())),
            n => n,
        };
        if values[10] != expected {
            return Err(ValidationError::InvalidCuit(raw.to_string()));
        }
        Ok(Self(digits))
    }

    fn dashes_well_placed(raw: &str) -> bool {
        let bytes = raw.as_bytes();
        raw.len() == 13 && bytes[2] == b'-' && bytes[11] == b'-'
    }

    /// The 11 bare digits.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The dashed presentation form `XX-XXXXXXXX-X`.
    pub fn formatted(&self) -> String {
        format!("{}-{}-{}", &self.0[..2], &self.0[2..10], &self.0[10..])
    }
}

impl std::fmt::Display for Cuit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.formatted())
    }
}

impl TryFrom<String> for Cuit {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Cuit> for String {
    fn from(value: Cuit) -> Self {
        value.0
    }
}

// ---------------------------------------------------------------------------
// Email
// ---------------------------------------------------------------------------

/// A login email address, normalized to lower case.
///
/// Validation is structural only (one `@`, non-empty parts, dotted domain,
/// no whitespace, at most 254 characters). Deliverability is not checked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "String", into = "String")]
#[schema(value_type = String, example = "admin@constructora.com.ar")]
pub struct Email(String);

impl Email {
    /// Parse, validate and normalize an email address.
    pub fn new(s: impl AsRef<str>) -> Result<Self, ValidationError> {
        let normalized = s.as_ref().trim().to_lowercase();
        let invalid = || ValidationError::InvalidEmail(s.as_ref().trim().to_string());

        if normalized.is_empty()
            || normalized.len() > 254
            || normalized.chars().any(char::is_whitespace)
        {
            return Err(invalid());
        }
        let mut parts = normalized.split('@');
        let (local, domain) = match (parts.next(), parts.next(), parts.next()) {
            (Some(l), Some(d), None) => (l, d),
            _ => return Err(invalid()),
        };
        if local.is_empty()
            || domain.len() < 3
            || !domain.contains('.')
            || domain.starts_with('.')
            || domain.ends_with('.')
        {
            return Err(invalid());
        }
        Ok(Self(normalized))
    }

    /// The normalized address.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Email {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Email {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Email> for String {
    fn from(value: Email) -> Self {
        value.0
    }
}
