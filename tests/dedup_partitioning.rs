//! Duplicate partitioning rules over realistic record sets.
//!
//! Partitioning is pure, so the winner-selection and grouping invariants
//! are checked here exhaustively; the storage application step is covered
//! by the database-backed tests.

use chrono::{Duration, TimeZone, Utc};
use mdas_core::constants::DedupBasis;
use mdas_core::dedup::partition_records;
use mdas_core::models::ExtractRecord;

fn record(
    id: i64,
    file_upload_id: i64,
    line_no: i32,
    basis: DedupBasis,
    business_key: &str,
    created_offset_secs: i64,
) -> ExtractRecord {
    let base = Utc.with_ymd_and_hms(2022, 11, 28, 3, 0, 0).unwrap();
    ExtractRecord {
        id,
        file_upload_id,
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
fn earliest_created_record_wins_regardless_of_id() {
    let records = vec![
        record(30, 1, 5, DedupBasis::ByReference, "detail_transaction:R1", 60),
        record(10, 1, 9, DedupBasis::ByReference, "detail_transaction:R1", 0),
        record(20, 1, 2, DedupBasis::ByReference, "detail_transaction:R1", 30),
    ];

    let groups = partition_records(&records);
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].winner_id, 10);
    assert_eq!(groups[0].duplicate_ids, vec![20, 30]);
    assert_eq!(groups[0].basis, DedupBasis::ByReference);
}

#[test]
fn line_number_breaks_created_at_ties() {
    // Bulk-inserted rows share a transaction timestamp; the earlier
    // physical line wins.
    let records = vec![
        record(2, 1, 40, DedupBasis::ByReference, "detail_transaction:R1", 0),
        record(1, 1, 12, DedupBasis::ByReference, "detail_transaction:R1", 0),
    ];

    let groups = partition_records(&records);
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].winner_id, 1);
    assert_eq!(groups[0].duplicate_ids, vec![2]);
}

#[test]
fn singletons_form_no_groups() {
    let records = vec![
        record(1, 1, 1, DedupBasis::ByReference, "detail_transaction:R1", 0),
        record(2, 1, 2, DedupBasis::ByReference, "detail_transaction:R2", 0),
        record(3, 1, 3, DedupBasis::ByRawLine, "some raw line text", 0),
    ];

    assert!(partition_records(&records).is_empty());
}

#[test]
fn bases_partition_independently() {
    // The same key text under different bases is two different identities.
    let records = vec![
        record(1, 1, 1, DedupBasis::ByReference, "shared-key", 0),
        record(2, 1, 2, DedupBasis::ByRawLine, "shared-key", 0),
        record(3, 1, 3, DedupBasis::ByReference, "shared-key", 10),
        record(4, 1, 4, DedupBasis::ByRawLine, "shared-key", 10),
    ];

    let groups = partition_records(&records);
    assert_eq!(groups.len(), 2);

    // Output order is deterministic: basis string, then key.
    assert_eq!(groups[0].basis, DedupBasis::ByRawLine);
    assert_eq!(groups[0].winner_id, 2);
    assert_eq!(groups[0].duplicate_ids, vec![4]);
    assert_eq!(groups[1].basis, DedupBasis::ByReference);
    assert_eq!(groups[1].winner_id, 1);
    assert_eq!(groups[1].duplicate_ids, vec![3]);
}

#[test]
fn cross_upload_duplicates_group_together() {
    // Re-delivered transactions arrive in a later file; the original
    // upload's record keeps winning.
    let records = vec![
        record(100, 7, 3, DedupBasis::ByReference, "detail_transaction:R9", 0),
        record(
            200,
            8,
            3,
            DedupBasis::ByReference,
            "detail_transaction:R9",
            86_400,
        ),
    ];

    let groups = partition_records(&records);
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].winner_id, 100);
    assert_eq!(groups[0].duplicate_ids, vec![200]);
}

#[test]
fn large_group_keeps_exactly_one_winner() {
    let mut records = Vec::new();
    for i in 0..50 {
        records.push(record(
            i + 1,
            1,
            (i + 1) as i32,
            DedupBasis::ByRawLine,
            "identical raw line",
            i,
        ));
    }

    let groups = partition_records(&records);
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].winner_id, 1);
    assert_eq!(groups[0].duplicate_ids.len(), 49);
    assert!(!groups[0].duplicate_ids.contains(&1));
}

#[test]
fn empty_input_yields_no_groups() {
    assert!(partition_records(&[]).is_empty());
}
