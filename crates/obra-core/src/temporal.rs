//! # Accounting Periods
//!
//! A [`Period`] is a calendar month written `YYYY-MM`. Cashboxes are opened
//! per period and reports group by it.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ValidationError;

/// A calendar month (`YYYY-MM`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "String", into = "String")]
#[schema(value_type = String, example = "2024-05")]
pub struct Period(NaiveDate);

impl Period {
    /// Parse `YYYY-MM`. Years outside 2000..=2100 are rejected.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let trimmed = s.trim();
        let invalid = || ValidationError::InvalidPeriod(trimmed.to_string());
        let (y, m) = trimmed.split_once('-').ok_or_else(invalid)?;
        if y.len() != 4 || m.len() != 2 {
            return Err(invalid());
        }
        let year: i32 = y.parse().map_err(|_| invalid())?;
        let month: u32 = m.parse().map_err(|_| invalid())?;
        if !(2000..=2100).contains(&year) {
            return Err(invalid());
        }
        NaiveDate::from_ymd_opt(year, month, 1)
            .map(Self)
            .ok_or_else(invalid)
    }

    /// The period containing `date`.
    pub fn of(date: NaiveDate) -> Self {
        Self(date.with_day(1).unwrap_or(date))
    }

    /// First day of the month.
    pub fn first_day(&self) -> NaiveDate {
        self.0
    }

    /// Calendar year.
    pub fn year(&self) -> i32 {
        self.0.year()
    }

    /// Calendar month, 1..=12.
    pub fn month(&self) -> u32 {
        self.0.month()
    }

    /// Whether `date` falls inside this period.
    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.0.year() && date.month() == self.0.month()
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.0.year(), self.0.month())
    }
}

impl TryFrom<String> for Period {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Period> for String {
    fn from(value: Period) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays() {
        let p = Period::parse("2024-05").unwrap();
        assert_eq!(p.year(), 2024);
        assert_eq!(p.month(), 5);
        assert_eq!(p.to_string(), "2024-05");
    }

    #[test]
    fn rejects_malformed() {
        for bad in ["2024-5", "2024-13", "2024-00", "24-05", "2024/05", "", "1999-12", "abcd-ef"] {
            assert!(Period::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn contains_dates_of_its_month() {
        let p = Period::parse("2024-02").unwrap();
        assert!(p.contains(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()));
        assert!(!p.contains(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()));
        assert_eq!(Period::of(NaiveDate::from_ymd_opt(2024, 2, 10).unwrap()), p);
    }

    #[test]
    fn ordering_is_chronological() {
        assert!(Period::parse("2023-12").unwrap() < Period::parse("2024-01").unwrap());
    }

    #[test]
    fn serde_round_trip_validates() {
        let json = serde_json::to_string(&Period::parse("2024-05").unwrap()).unwrap();
        assert_eq!(json, "\"2024-05\"");
        assert!(serde_json::from_str::<Period>("\"2024-13\"").is_err());
    }
}
