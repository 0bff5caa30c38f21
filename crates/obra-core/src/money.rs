//! # Money
//!
//! [`Amount`] is a signed count of cents. It serializes as a decimal string
//! with exactly two decimals (`"1234.50"`) so that no JSON consumer ever
//! routes money through a float.
//!
//! Rates are expressed in basis points (1 bp = 0.01 %, [`BPS_SCALE`] = 100 %).
//! Applying a rate truncates toward zero: a withholding computed here never
//! exceeds the statutory rate.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ValidationError;

/// Basis points in 100 %.
pub const BPS_SCALE: u32 = 10_000;

/// A monetary amount in cents.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(try_from = "String", into = "String")]
#[schema(value_type = String, example = "1234.50")]
pub struct Amount(i64);

impl Amount {
    /// Zero.
    pub const ZERO: Amount = Amount(0);

    /// Build an amount from a count of cents.
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// The amount in cents.
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Parse a decimal string such as `"1500"`, `"1500.5"` or `"-12.34"`.
    ///
    /// Decimals beyond the second are truncated. Whitespace around the value
    /// is ignored. Values that do not fit in `i64` cents are rejected.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let trimmed = s.trim();
        let invalid = || ValidationError::InvalidAmount(trimmed.to_string());
        if trimmed.is_empty() {
            return Err(invalid());
        }

        let (negative, unsigned) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };
        let (int_str, frac_str) = match unsigned.split_once('.') {
            Some((i, f)) => (i, f),
            None => (unsigned, ""),
        };
        if int_str.is_empty()
            || !int_str.chars().all(|c| c.is_ascii_digit())
            || !frac_str.chars().all(|c| c.is_ascii_digit())
        {
            return Err(invalid());
        }

        let integer: i64 = int_str
            .parse()
            .map_err(|_| ValidationError::AmountOverflow)?;
        let frac: i64 = match frac_str.len() {
            0 => 0,
            1 => frac_str.parse::<i64>().map_err(|_| invalid())? * 10,
            _ => frac_str[..2].parse::<i64>().map_err(|_| invalid())?,
        };

        let cents = integer
            .checked_mul(100)
            .and_then(|v| v.checked_add(frac))
            .ok_or(ValidationError::AmountOverflow)?;
        Ok(Self(if negative { -cents } else { cents }))
    }

    /// Checked addition.
    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    /// Checked subtraction.
    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// Negation. `None` only for `i64::MIN` cents.
    pub fn checked_neg(self) -> Option<Amount> {
        self.0.checked_neg().map(Amount)
    }

    /// Multiply by a rate in basis points, truncating toward zero.
    ///
    /// Returns `None` if the result does not fit.
    pub fn apply_bps(self, bps: u32) -> Option<Amount> {
        let product = i128::from(self.0) * i128::from(bps) / i128::from(BPS_SCALE);
        i64::try_from(product).ok().map(Amount)
    }

    /// How much of `whole` this amount represents, in basis points.
    ///
    /// Returns 0 when `whole` is not positive.
    pub fn share_bps(self, whole: Amount) -> i64 {
        if whole.0 <= 0 {
            return 0;
        }
        let share = i128::from(self.0) * i128::from(BPS_SCALE) / i128::from(whole.0);
        i64::try_from(share).unwrap_or(i64::MAX)
    }

    /// Sum an iterator of amounts, `None` on overflow.
    pub fn checked_sum<I: IntoIterator<Item = Amount>>(items: I) -> Option<Amount> {
        items
            .into_iter()
            .try_fold(Amount::ZERO, |acc, a| acc.checked_add(a))
    }

    /// Strictly greater than zero.
    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Strictly less than zero.
    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Exactly zero.
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl TryFrom<String> for Amount {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Amount> for String {
    fn from(value: Amount) -> Self {
        value.to_string()
    }
}

/// Currencies an organization can keep books in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// Argentine peso.
    #[default]
    Ars,
    /// United States dollar.
    Usd,
}

impl Currency {
    /// ISO 4217 code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ars => "ARS",
            Self::Usd => "USD",
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
