//! Aggregation tier selection and period arithmetic.
//!
//! The tier granularity for a scope widens as the scope accumulates
//! records, keeping bucket rebuild cost roughly flat: small scopes get
//! daily buckets, huge scopes get quarterly ones. Period bounds are
//! half-open `[start, end)` date ranges.

use crate::config::AggregationConfig;
use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bucket granularity, ordered from finest to coarsest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationTier {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
}

impl AggregationTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationTier::Daily => "daily",
            AggregationTier::Weekly => "weekly",
            AggregationTier::Monthly => "monthly",
            AggregationTier::Quarterly => "quarterly",
        }
    }

    /// Stable key naming the period containing `on` at this granularity
    pub fn period_key(&self, on: NaiveDate) -> String {
        match self {
            AggregationTier::Daily => on.format("%Y-%m-%d").to_string(),
            AggregationTier::Weekly => {
                let week = on.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            AggregationTier::Monthly => on.format("%Y-%m").to_string(),
            AggregationTier::Quarterly => {
                let start = quarter_start(on);
                format!("{}-Q{}", start.year(), start.month0() / 3 + 1)
            }
        }
    }

    /// Half-open `[start, end)` bounds of the period containing `on`
    pub fn period_bounds(&self, on: NaiveDate) -> (NaiveDate, NaiveDate) {
        match self {
            AggregationTier::Daily => (on, on + Duration::days(1)),
            AggregationTier::Weekly => {
                let start = week_start(on);
                (start, start + Duration::days(7))
            }
            AggregationTier::Monthly => {
                let start = month_start(on);
                (start, next_month_start(start))
            }
            AggregationTier::Quarterly => {
                let start = quarter_start(on);
                let mut end = start;
                for _ in 0..3 {
                    end = next_month_start(end);
                }
                (start, end)
            }
        }
    }
}

impl fmt::Display for AggregationTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AggregationTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "quarterly" => Ok(Self::Quarterly),
            _ => Err(format!("Invalid aggregation tier: {s}")),
        }
    }
}

/// Pick the tier for a scope from its in-scope record count.
///
/// Monotonic in the count: more records never selects a finer tier.
pub fn select_tier(record_count: i64, config: &AggregationConfig) -> AggregationTier {
    if record_count >= config.quarterly_threshold as i64 {
        AggregationTier::Quarterly
    } else if record_count >= config.monthly_threshold as i64 {
        AggregationTier::Monthly
    } else if record_count >= config.weekly_threshold as i64 {
        AggregationTier::Weekly
    } else {
        AggregationTier::Daily
    }
}

// ISO weeks start on Monday
fn week_start(on: NaiveDate) -> NaiveDate {
    on - Duration::days(i64::from(on.weekday().num_days_from_monday()))
}

fn month_start(on: NaiveDate) -> NaiveDate {
    on - Duration::days(i64::from(on.day0()))
}

fn next_month_start(month_start: NaiveDate) -> NaiveDate {
    // 32 days from the 1st always lands in the following month
    let inside_next = month_start + Duration::days(32);
    inside_next - Duration::days(i64::from(inside_next.day0()))
}

fn quarter_start(on: NaiveDate) -> NaiveDate {
    let mut start = month_start(on);
    for _ in 0..(on.month0() % 3) {
        start = month_start(start - Duration::days(1));
    }
    start
}
