//! # Deduplication Engine
//!
//! ## Architecture: Pure Partitioning plus a Storage Application Step
//!
//! Settlement files routinely re-deliver transactions that earlier files
//! already carried. Duplicate resolution runs per upload after decoding:
//! records partition by business key, each multi-member group keeps its
//! earliest-created record, and the rest are marked duplicates with a
//! back-reference to the winner. Duplicates stay queryable for audit but
//! are excluded from every aggregate.
//!
//! The partitioning itself is a pure function over loaded records so the
//! winner-selection rules are unit-testable without a database. The engine
//! wraps it with the mark-clearing and mark-writing storage steps, which
//! makes a retried run converge on the same resolution.
//!
//! Business keys are derived at decode time and stored on the record:
//! record type plus reference number when the line carries one
//! (`by_reference`), otherwise the full raw line (`by_raw_line`).

use crate::constants::{events, DedupBasis};
use crate::error::{CoreError, Result};
use crate::events::publisher::EventPublisher;
use crate::models::{ExtractRecord, ScopeGeneration};
use serde::Serialize;
use sqlx::PgPool;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument};

/// One resolved group of records sharing a business key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup {
    /// Record kept for aggregation
    pub winner_id: i64,
    /// Records marked as duplicates of the winner
    pub duplicate_ids: Vec<i64>,
    /// How the shared business key was derived
    pub basis: DedupBasis,
}

/// Per-run duplicate findings, partitioned by key basis
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DedupReport {
    /// Groups with more than one member keyed by reference number
    pub groups_by_reference: usize,
    /// Records marked duplicate within reference-keyed groups
    pub excess_by_reference: usize,
    /// Groups with more than one member keyed by raw-line equality
    pub groups_by_raw_line: usize,
    /// Records marked duplicate within raw-line-keyed groups
    pub excess_by_raw_line: usize,
}

impl DedupReport {
    pub fn total_groups(&self) -> usize {
        self.groups_by_reference + self.groups_by_raw_line
    }

    pub fn total_excess(&self) -> usize {
        self.excess_by_reference + self.excess_by_raw_line
    }
}

/// Partition records by stored business key and pick each group's winner.
///
/// Only groups with more than one member are returned. The winner is the
/// earliest-created record; records created in the same instant (one bulk
/// decode pass) tie-break on the lowest line number. Output group order
/// follows key order, so runs over the same records produce the same
/// resolution.
pub fn partition_records(records: &[ExtractRecord]) -> Vec<DuplicateGroup> {
    let mut by_key: BTreeMap<(&str, &str), Vec<&ExtractRecord>> = BTreeMap::new();
    for record in records {
        by_key
            .entry((record.business_key_basis.as_str(), record.business_key.as_str()))
            .or_default()
            .push(record);
    }

    let mut groups = Vec::new();
    for ((basis, _key), mut members) in by_key {
        if members.len() < 2 {
            continue;
        }

        members.sort_by_key(|r| (r.created_at, r.line_no));
        let winner = members[0];
        let basis = match basis {
            "by_reference" => DedupBasis::ByReference,
            _ => DedupBasis::ByRawLine,
        };

        groups.push(DuplicateGroup {
            winner_id: winner.id,
            duplicate_ids: members[1..].iter().map(|r| r.id).collect(),
            basis,
        });
    }

    groups
}

/// Duplicate resolution runner for one upload's records
#[derive(Debug, Clone)]
pub struct DeduplicationEngine {
    pool: PgPool,
    event_publisher: EventPublisher,
}

impl DeduplicationEngine {
    pub fn new(pool: PgPool, event_publisher: EventPublisher) -> Self {
        Self {
            pool,
            event_publisher,
        }
    }

    /// Resolve duplicates among the upload's records.
    ///
    /// Existing marks are cleared first so a rerun reflects the current
    /// record set rather than layering onto a stale resolution.
    #[instrument(skip(self))]
    pub async fn run_for_upload(&self, file_upload_id: i64) -> Result<DedupReport> {
        let cleared = ExtractRecord::clear_duplicate_marks(&self.pool, file_upload_id).await?;

        let records = ExtractRecord::list_for_upload(&self.pool, file_upload_id).await?;
        let groups = partition_records(&records);

        let mut report = DedupReport::default();
        for group in &groups {
            ExtractRecord::mark_duplicates(&self.pool, group.winner_id, &group.duplicate_ids)
                .await?;

            match group.basis {
                DedupBasis::ByReference => {
                    report.groups_by_reference += 1;
                    report.excess_by_reference += group.duplicate_ids.len();
                }
                DedupBasis::ByRawLine => {
                    report.groups_by_raw_line += 1;
                    report.excess_by_raw_line += group.duplicate_ids.len();
                }
            }
        }

        // Marks changed which records count toward aggregates, so every
        // scope touched by this upload must invalidate its cached buckets.
        if cleared > 0 || !groups.is_empty() {
            let scopes: BTreeSet<&str> =
                records.iter().map(|r| r.record_type.as_str()).collect();
            for scope in scopes {
                ScopeGeneration::bump(&self.pool, scope).await?;
            }
        }

        if report.total_groups() > 0 {
            // Duplicates are a data-quality finding, not an error
            info!(
                file_upload_id = file_upload_id,
                groups_by_reference = report.groups_by_reference,
                excess_by_reference = report.excess_by_reference,
                groups_by_raw_line = report.groups_by_raw_line,
                excess_by_raw_line = report.excess_by_raw_line,
                "Duplicate resolution complete"
            );
        } else {
            debug!(
                file_upload_id = file_upload_id,
                records = records.len(),
                "No duplicates found"
            );
        }

        self.event_publisher
            .publish(
                events::DEDUP_COMPLETED,
                serde_json::json!({
                    "file_upload_id": file_upload_id,
                    "records": records.len(),
                    "duplicate_groups": report.total_groups(),
                    "excess_records": report.total_excess(),
                }),
            )
            .await
            .map_err(|e| CoreError::AggregationError(format!("Dedup event publish failed: {e}")))?;

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn record(
        id: i64,
        line_no: i32,
        basis: DedupBasis,
        business_key: &str,
        created_offset_secs: i64,
    ) -> ExtractRecord {
        let base = Utc.with_ymd_and_hms(2022, 11, 28, 3, 0, 0).unwrap();
        ExtractRecord {
            id,
            file_upload_id: 1,
            line_no,
            record_type: "detail_transaction".to_string(),
            fields: serde_json::json!({}),
            business_key_basis: basis.as_str().to_string(),
            business_key: business_key.to_string(),
            amount_cents: Some(5502),
            business_date: None,
            is_duplicate: false,
            duplicate_of: None,
            created_at: base + Duration::seconds(created_offset_secs),
            updated_at: base + Duration::seconds(created_offset_secs),
        }
    }

    #[test]
    fn test_earliest_created_record_wins() {
        let records = vec![
            record(10, 5, DedupBasis::ByReference, "detail_transaction:REF001", 30),
            record(11, 9, DedupBasis::ByReference, "detail_transaction:REF001", 0),
            record(12, 2, DedupBasis::ByReference, "detail_transaction:REF002", 0),
        ];

        let groups = partition_records(&records);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].winner_id, 11);
        assert_eq!(groups[0].duplicate_ids, vec![10]);
        assert_eq!(groups[0].basis, DedupBasis::ByReference);
    }

    #[test]
    fn test_creation_tie_breaks_on_lowest_line_number() {
        let records = vec![
            record(20, 8, DedupBasis::ByRawLine, "raw line text", 0),
            record(21, 3, DedupBasis::ByRawLine, "raw line text", 0),
            record(22, 12, DedupBasis::ByRawLine, "raw line text", 0),
        ];

        let groups = partition_records(&records);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].winner_id, 21);
        assert_eq!(groups[0].duplicate_ids, vec![20, 22]);
        assert_eq!(groups[0].basis, DedupBasis::ByRawLine);
    }

    #[test]
    fn test_singleton_groups_are_not_reported() {
        let records = vec![
            record(30, 1, DedupBasis::ByReference, "detail_transaction:A", 0),
            record(31, 2, DedupBasis::ByReference, "detail_transaction:B", 0),
        ];

        assert!(partition_records(&records).is_empty());
    }

    #[test]
    fn test_same_key_different_basis_never_collides() {
        // A reference-keyed record and a raw-line record whose raw text
        // happens to equal the key must not group together
        let records = vec![
            record(40, 1, DedupBasis::ByReference, "detail_transaction:X", 0),
            record(41, 2, DedupBasis::ByRawLine, "detail_transaction:X", 0),
        ];

        assert!(partition_records(&records).is_empty());
    }

    #[test]
    fn test_report_totals() {
        let report = DedupReport {
            groups_by_reference: 2,
            excess_by_reference: 3,
            groups_by_raw_line: 1,
            excess_by_raw_line: 1,
        };
        assert_eq!(report.total_groups(), 3);
        assert_eq!(report.total_excess(), 4);
    }
}
