//! Property tests for tier selection and period arithmetic.
//!
//! Cached buckets are addressed by `(tier, period_key)`, so the period
//! math has to tile the calendar with no gaps or overlaps and keys have
//! to be stable for every date inside a period. These properties are
//! checked over randomized dates rather than a handful of fixtures.

use chrono::{Duration, NaiveDate};
use mdas_core::aggregation::{select_tier, AggregationTier};
use mdas_core::config::AggregationConfig;
use proptest::prelude::*;

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).unwrap()
}

/// Dates from 2000 through roughly 2040
fn date_strategy() -> impl Strategy<Value = NaiveDate> {
    (0i64..15_000).prop_map(|days| base_date() + Duration::days(days))
}

fn tier_strategy() -> impl Strategy<Value = AggregationTier> {
    prop_oneof![
        Just(AggregationTier::Daily),
        Just(AggregationTier::Weekly),
        Just(AggregationTier::Monthly),
        Just(AggregationTier::Quarterly),
    ]
}

proptest! {
    /// Property: growing a scope never moves it to a finer tier
    #[test]
    fn tier_selection_is_monotonic(a in 0i64..5_000_000, b in 0i64..5_000_000) {
        let config = AggregationConfig::default();
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(select_tier(lo, &config) <= select_tier(hi, &config));
    }

    /// Property: the period always contains the date it was derived from
    #[test]
    fn period_bounds_contain_the_request_date(on in date_strategy(), tier in tier_strategy()) {
        let (start, end) = tier.period_bounds(on);
        prop_assert!(start <= on, "{tier}: start {start} is after {on}");
        prop_assert!(on < end, "{tier}: {on} falls outside half-open end {end}");
    }

    /// Property: a period's end is exactly the next period's start
    #[test]
    fn periods_tile_with_no_gap_or_overlap(on in date_strategy(), tier in tier_strategy()) {
        let (_, end) = tier.period_bounds(on);
        let (next_start, _) = tier.period_bounds(end);
        prop_assert_eq!(next_start, end);
    }

    /// Property: every date inside a period produces the same key and bounds
    #[test]
    fn period_key_is_stable_within_bounds(on in date_strategy(), tier in tier_strategy()) {
        let (start, end) = tier.period_bounds(on);
        let key = tier.period_key(on);

        let mut day = start;
        while day < end {
            prop_assert_eq!(&tier.period_key(day), &key);
            prop_assert_eq!(tier.period_bounds(day), (start, end));
            day += Duration::days(1);
        }
    }

    /// Property: adjacent periods never collide on the cache key
    #[test]
    fn adjacent_periods_have_distinct_keys(on in date_strategy(), tier in tier_strategy()) {
        let (_, end) = tier.period_bounds(on);
        prop_assert_ne!(tier.period_key(on), tier.period_key(end));
    }

    /// Property: a daily bucket sits inside every coarser period, and a
    /// monthly bucket inside its quarter. Weeks are exempt from nesting
    /// because an ISO week can straddle a month boundary.
    #[test]
    fn finer_periods_nest_inside_coarser_ones(on in date_strategy()) {
        let (day_start, day_end) = AggregationTier::Daily.period_bounds(on);
        for coarser in [
            AggregationTier::Weekly,
            AggregationTier::Monthly,
            AggregationTier::Quarterly,
        ] {
            let (start, end) = coarser.period_bounds(on);
            prop_assert!(start <= day_start && day_end <= end, "daily escapes {coarser}");
        }

        let (month_start, month_end) = AggregationTier::Monthly.period_bounds(on);
        let (quarter_start, quarter_end) = AggregationTier::Quarterly.period_bounds(on);
        prop_assert!(quarter_start <= month_start && month_end <= quarter_end);
    }

    /// Property: counts below every threshold, including nonsense negative
    /// ones, stay daily
    #[test]
    fn sub_threshold_counts_select_daily(count in i64::MIN..10_000) {
        let config = AggregationConfig::default();
        prop_assert_eq!(select_tier(count, &config), AggregationTier::Daily);
    }
}

mod tier_name_invariants {
    use mdas_core::aggregation::AggregationTier;
    use std::str::FromStr;

    const ALL_TIERS: [AggregationTier; 4] = [
        AggregationTier::Daily,
        AggregationTier::Weekly,
        AggregationTier::Monthly,
        AggregationTier::Quarterly,
    ];

    #[test]
    fn test_tier_names_round_trip() {
        for tier in ALL_TIERS {
            let parsed = AggregationTier::from_str(tier.as_str()).unwrap();
            assert_eq!(parsed, tier);
        }
    }

    #[test]
    fn test_tier_names_match_serde_form() {
        // Stored bucket rows and in-process values must agree on naming.
        for tier in ALL_TIERS {
            let json = serde_json::to_value(tier).unwrap();
            assert_eq!(json, serde_json::Value::String(tier.as_str().to_string()));
        }
    }

    #[test]
    fn test_unknown_tier_name_is_rejected() {
        assert!(AggregationTier::from_str("hourly").is_err());
        assert!(AggregationTier::from_str("Daily").is_err());
    }
}
