//! Field-level semantic types for the positional codec.
//!
//! TDDF stores money as zero-padded digit strings counting the smallest
//! currency unit and dates as MMDDCCYY. Both decode to typed values here;
//! a malformed field becomes an absent value, never a zero or a panic, so
//! downstream sums cannot silently absorb bad data.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic interpretation applied to a fixed-width field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    AmountCents,
    DateMmddccyy,
}

/// A monetary amount carried as integer cents.
///
/// TDDF amount fields are non-negative zero-padded digit strings; the
/// decoded integer divided by 100 is the currency amount. Keeping cents as
/// the canonical representation avoids floating-point drift in aggregation
/// sums; [`Amount::as_decimal`] converts for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Amount {
    cents: i64,
}

impl Amount {
    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    /// Decode a fixed-width digit string into an amount.
    ///
    /// Returns `None` when the field is not all ASCII digits; the caller
    /// records a field-level decode failure and leaves the value absent.
    pub fn from_digits(raw: &str) -> Option<Self> {
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        // Leading zeros stripped; an all-zero field is a legitimate 0.00.
        let stripped = raw.trim_start_matches('0');
        let cents = if stripped.is_empty() {
            0
        } else {
            stripped.parse::<i64>().ok()?
        };
        Some(Self { cents })
    }

    pub fn cents(&self) -> i64 {
        self.cents
    }

    /// Currency value as an exact decimal (cents / 100).
    pub fn as_decimal(&self) -> BigDecimal {
        BigDecimal::from(self.cents) / BigDecimal::from(100)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.cents / 100, self.cents % 100)
    }
}

impl std::ops::Add for Amount {
    type Output = Amount;

    fn add(self, rhs: Amount) -> Amount {
        Amount {
            cents: self.cents + rhs.cents,
        }
    }
}

/// Parse an 8-character MMDDCCYY date field.
///
/// Century "20" maps to the 2000s and "19" to the 1900s; any other century
/// prefix defaults to the 2000s (the upstream network emitted malformed
/// centuries in early revisions). Invalid calendar dates return `None`.
pub fn parse_mmddccyy(raw: &str) -> Option<NaiveDate> {
    if raw.len() != 8 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let month: u32 = raw[0..2].parse().ok()?;
    let day: u32 = raw[2..4].parse().ok()?;
    let century: i32 = raw[4..6].parse().ok()?;
    let year_in_century: i32 = raw[6..8].parse().ok()?;

    let year = match century {
        19 => 1900 + year_in_century,
        _ => 2000 + year_in_century,
    };

    NaiveDate::from_ymd_opt(year, month, day)
}

/// One decoded field value; absent fields are simply omitted from the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Amount(Amount),
    Date(NaiveDate),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_amount(&self) -> Option<Amount> {
        match self {
            FieldValue::Amount(a) => Some(*a),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            FieldValue::Date(d) => Some(*d),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_amount_strips_leading_zeros() {
        let amount = Amount::from_digits("000000000005502").unwrap();
        assert_eq!(amount.cents(), 5502);
        assert_eq!(amount.to_string(), "55.02");
    }

    #[test]
    fn test_amount_eleven_digit_window() {
        let amount = Amount::from_digits("00000008539").unwrap();
        assert_eq!(amount.cents(), 8539);
        assert_eq!(amount.to_string(), "85.39");
    }

    #[test]
    fn test_amount_all_zeros_is_zero() {
        let amount = Amount::from_digits("000000000000000").unwrap();
        assert_eq!(amount.cents(), 0);
        assert_eq!(amount.to_string(), "0.00");
    }

    #[test]
    fn test_amount_rejects_non_digits() {
        assert!(Amount::from_digits("0000000000550A").is_none());
        assert!(Amount::from_digits("   5502").is_none());
        assert!(Amount::from_digits("").is_none());
    }

    #[test]
    fn test_amount_decimal_conversion() {
        let amount = Amount::from_cents(5502);
        assert_eq!(amount.as_decimal(), BigDecimal::from_str("55.02").unwrap());
    }

    #[test]
    fn test_date_parses_current_century() {
        assert_eq!(
            parse_mmddccyy("11282022"),
            NaiveDate::from_ymd_opt(2022, 11, 28)
        );
    }

    #[test]
    fn test_date_parses_prior_century() {
        assert_eq!(
            parse_mmddccyy("01151999"),
            NaiveDate::from_ymd_opt(1999, 1, 15)
        );
    }

    #[test]
    fn test_date_unknown_century_defaults_to_2000s() {
        assert_eq!(
            parse_mmddccyy("06300822"),
            NaiveDate::from_ymd_opt(2022, 6, 30)
        );
    }

    #[test]
    fn test_date_invalid_calendar_is_absent() {
        assert!(parse_mmddccyy("02302022").is_none());
        assert!(parse_mmddccyy("13012022").is_none());
        assert!(parse_mmddccyy("00002022").is_none());
    }

    #[test]
    fn test_date_non_numeric_is_absent_not_a_crash() {
        assert!(parse_mmddccyy("NOVEMBER").is_none());
        assert!(parse_mmddccyy("112822").is_none());
    }

    #[test]
    fn test_field_value_serialization() {
        let value = FieldValue::Amount(Amount::from_cents(5502));
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json["kind"], "amount");

        let back: FieldValue = serde_json::from_value(json).unwrap();
        assert_eq!(back.as_amount().unwrap().cents(), 5502);
    }
}
