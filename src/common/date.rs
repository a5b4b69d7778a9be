//! Packed date codec.
//!
//! Dates are stored column-wise as `u32` with the field layout
//! `year << 9 | month << 5 | day`, which makes the numeric order equal the
//! calendar order. The value `0` is reserved for NULL.

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A day, packed so that the `u32` ordering is the calendar ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Date(pub u32);

impl Date {
    /// The NULL sentinel, smaller than every real date.
    pub const NULL: Date = Date(0);

    /// Largest representable date, used as an open upper bound.
    pub const MAX: Date = Date(u32::MAX);

    pub fn from_ymd(year: u32, month: u32, day: u32) -> Date {
        Date((year << 9) | (month << 5) | day)
    }

    /// Parse `YYYY-MM-DD`. Rejects impossible calendar dates.
    pub fn parse(text: &str) -> Option<Date> {
        let parsed = chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
        Some(Date::from_ymd(
            parsed.year() as u32,
            parsed.month(),
            parsed.day(),
        ))
    }

    pub fn is_null(self) -> bool {
        self == Date::NULL
    }

    pub fn year(self) -> u32 {
        self.0 >> 9
    }

    pub fn month(self) -> u32 {
        (self.0 >> 5) & 0xF
    }

    pub fn day(self) -> u32 {
        self.0 & 0x1F
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "null")
        } else {
            write!(f, "{:04}-{:02}-{:02}", self.year(), self.month(), self.day())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packing_preserves_calendar_order() {
        let a = Date::parse("2024-01-31").unwrap();
        let b = Date::parse("2024-02-01").unwrap();
        let c = Date::parse("2025-01-01").unwrap();
        assert!(a < b);
        assert!(b < c);
        assert!(Date::NULL < a);
    }

    #[test]
    fn fields_round_trip() {
        let date = Date::parse("2021-03-18").unwrap();
        assert_eq!(date.year(), 2021);
        assert_eq!(date.month(), 3);
        assert_eq!(date.day(), 18);
        assert_eq!(date.to_string(), "2021-03-18");
    }

    #[test]
    fn impossible_dates_are_rejected() {
        assert_eq!(Date::parse("2021-02-30"), None);
        assert_eq!(Date::parse("2021-13-01"), None);
        assert_eq!(Date::parse("not-a-date"), None);
    }
}
