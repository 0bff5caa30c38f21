//! # Supplier Standing
//!
//! Suppliers that work on site must hold a current ART (labor-risk
//! insurance) certificate. Standing is evaluated at a given date from the
//! supplier's ART data and manual block flag:
//!
//! - manually blocked → blocked
//! - ART required and missing → blocked
//! - ART required and `expires_on < today` → blocked
//! - ART required and expiring within the warning window → warning
//! - otherwise → ok
//!
//! A blocked supplier cannot receive new contracts or expenses, and its
//! pending expenses cannot be validated.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Days before expiry at which an ART starts raising warnings.
pub const DEFAULT_ART_WARNING_DAYS: u32 = 15;

/// Why a supplier is blocked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockReason {
    /// Blocked by a user.
    Manual {
        /// Reason recorded with the block.
        note: Option<String>,
    },
    /// ART is required but no expiry date is on file.
    ArtMissing,
    /// ART expired.
    ArtExpired {
        /// Expiry date on file.
        expired_on: NaiveDate,
    },
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual { note: Some(note) } => write!(f, "manually blocked: {note}"),
            Self::Manual { note: None } => f.write_str("manually blocked"),
            Self::ArtMissing => f.write_str("ART certificate missing"),
            Self::ArtExpired { expired_on } => write!(f, "ART expired on {expired_on}"),
        }
    }
}

/// Result of evaluating a supplier at a date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SupplierStanding {
    /// Nothing to report.
    Ok,
    /// ART still valid but expiring soon.
    ArtExpiring {
        /// Days until expiry; 0 means it expires today.
        days_left: i64,
        /// Expiry date on file.
        expires_on: NaiveDate,
    },
    /// The supplier may not be used.
    Blocked {
        /// Why.
        reason: BlockReason,
    },
}

impl SupplierStanding {
    /// Evaluate standing at `today`.
    pub fn evaluate(
        requires_art: bool,
        art_expires_on: Option<NaiveDate>,
        manually_blocked: bool,
        block_note: Option<&str>,
        today: NaiveDate,
        warning_days: u32,
    ) -> Self {
        if manually_blocked {
            return Self::Blocked {
                reason: BlockReason::Manual {
                    note: block_note.map(str::to_string),
                },
            };
        }
        if !requires_art {
            return Self::Ok;
        }
        let Some(expires_on) = art_expires_on else {
            return Self::Blocked {
                reason: BlockReason::ArtMissing,
            };
        };
        if expires_on < today {
            return Self::Blocked {
                reason: BlockReason::ArtExpired {
                    expired_on: expires_on,
                },
            };
        }
        let days_left = (expires_on - today).num_days();
        if days_left <= i64::from(warning_days) {
            Self::ArtExpiring {
                days_left,
                expires_on,
            }
        } else {
            Self::Ok
        }
    }

    /// Whether the supplier may not be used.
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }

    /// Canonical status name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::ArtExpiring { .. } => "art_expiring",
            Self::Blocked { .. } => "blocked",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn eval(requires: bool, expires: Option<NaiveDate>, manual: bool) -> SupplierStanding {
        SupplierStanding::evaluate(
            requires,
            expires,
            manual,
            None,
            day(2024, 6, 1),
            DEFAULT_ART_WARNING_DAYS,
        )
    }

    #[test]
    fn no_art_required_is_ok() {
        assert_eq!(eval(false, None, false), SupplierStanding::Ok);
        assert_eq!(eval(false, Some(day(2020, 1, 1)), false), SupplierStanding::Ok);
    }

    #[test]
    fn missing_art_blocks() {
        assert_eq!(
            eval(true, None, false),
            SupplierStanding::Blocked {
                reason: BlockReason::ArtMissing
            }
        );
    }

    #[test]
    fn expired_art_blocks() {
        let s = eval(true, Some(day(2024, 5, 31)), false);
        assert!(s.is_blocked());
        assert_eq!(
            s,
            SupplierStanding::Blocked {
                reason: BlockReason::ArtExpired {
                    expired_on: day(2024, 5, 31)
                }
            }
        );
    }

    #[test]
    fn expiring_today_is_warning_not_block() {
        assert_eq!(
            eval(true, Some(day(2024, 6, 1)), false),
            SupplierStanding::ArtExpiring {
                days_left: 0,
                expires_on: day(2024, 6, 1)
            }
        );
    }

    #[test]
    fn warning_window_boundary() {
        assert!(matches!(
            eval(true, Some(day(2024, 6, 16)), false),
            SupplierStanding::ArtExpiring { days_left: 15, .. }
        ));
        assert_eq!(eval(true, Some(day(2024, 6, 17)), false), SupplierStanding::Ok);
    }

    #[test]
    fn manual_block_wins() {
        let s = SupplierStanding::evaluate(
            false,
            None,
            true,
            Some("unpaid fines"),
            day(2024, 6, 1),
            DEFAULT_ART_WARNING_DAYS,
        );
        assert!(s.is_blocked());
        if let SupplierStanding::Blocked { reason } = s {
            assert_eq!(reason.to_string(), "manually blocked: unpaid fines");
        }
    }

    #[test]
    fn serializes_with_status_tag() {
        let json = serde_json::to_value(eval(true, None, false)).unwrap();
        assert_eq!(json["status"], "blocked");
        assert_eq!(json["reason"]["kind"], "art_missing");
    }
}
