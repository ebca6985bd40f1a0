//! The validated → decoding → decoded pass.
//!
//! Lines decode in increasing line-number order. Each successfully decoded
//! line commits its extract record, the scope generation bump, and the
//! line outcome in one transaction, so an interrupted pass leaves every
//! line either fully committed or still pending. A resumed or retried pass
//! skips lines that already carry a terminal outcome.

use crate::codec::{DecodedLine, TddfDecoder};
use crate::constants::{DedupBasis, LineOutcome};
use crate::error::Result;
use crate::models::{ExtractRecord, FileUpload, LineCounts, NewExtractRecord, RawLine};
use serde::Serialize;
use sqlx::PgPool;
use tracing::{debug, info};

/// Counters from a completed decode pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecodeRunReport {
    /// Lines that produced an extract record
    pub lines_decoded: i32,
    /// Blank lines and lines already resolved by an earlier pass
    pub lines_skipped: i32,
    /// Lines the decoder rejected outright
    pub lines_failed: i32,
    /// Per-field failures across decoded lines (line survived)
    pub field_failures: i32,
}

impl DecodeRunReport {
    /// True when the pass produced nothing usable
    pub fn produced_nothing(&self) -> bool {
        self.lines_decoded == 0
    }
}

/// Decode executor for one upload's raw lines
#[derive(Debug, Clone)]
pub struct DecodeRunner {
    pool: PgPool,
    decoder: TddfDecoder,
}

impl DecodeRunner {
    pub fn new(pool: PgPool, decoder: TddfDecoder) -> Self {
        Self { pool, decoder }
    }

    /// Layout version the runner decodes with
    pub fn layout_name(&self) -> &str {
        self.decoder.layout_name()
    }

    /// Decode every pending line of the upload and refresh the upload's
    /// line counters from the stored outcomes.
    pub async fn run(&self, file_upload_id: i64) -> Result<DecodeRunReport> {
        let lines = RawLine::list_for_upload(&self.pool, file_upload_id).await?;

        let mut report = DecodeRunReport::default();
        for line in &lines {
            if line.outcome != LineOutcome::Pending.as_str() {
                // Committed by an interrupted earlier pass; counts are
                // rebuilt from stored outcomes below
                debug!(
                    file_upload_id = file_upload_id,
                    line_no = line.line_no,
                    outcome = %line.outcome,
                    "Line already resolved, skipping"
                );
                continue;
            }

            if line.raw_text.trim().is_empty() {
                RawLine::mark_outcome(
                    &self.pool,
                    file_upload_id,
                    line.line_no,
                    LineOutcome::Skipped,
                    Some("blank line"),
                )
                .await?;
                continue;
            }

            match self.decoder.decode_line(&line.raw_text) {
                Ok(decoded) => {
                    report.field_failures += decoded.field_failures.len() as i32;
                    self.commit_decoded_line(file_upload_id, line, &decoded)
                        .await?;
                }
                Err(decode_error) => {
                    // Line-level failure: recorded on the line, never
                    // aborts the file
                    RawLine::mark_outcome(
                        &self.pool,
                        file_upload_id,
                        line.line_no,
                        LineOutcome::Failed,
                        Some(&decode_error.to_string()),
                    )
                    .await?;
                }
            }
        }

        let counts = self.refresh_counts(file_upload_id, lines.len() as i32).await?;
        report.lines_decoded = counts.lines_decoded;
        report.lines_skipped = counts.lines_skipped;
        report.lines_failed = counts.lines_failed;

        info!(
            file_upload_id = file_upload_id,
            layout_version = self.decoder.layout_name(),
            lines_decoded = report.lines_decoded,
            lines_skipped = report.lines_skipped,
            lines_failed = report.lines_failed,
            field_failures = report.field_failures,
            "Decode pass complete"
        );

        Ok(report)
    }

    /// Commit one decoded line: extract record upsert, scope generation
    /// bump, and outcome mark in a single transaction.
    async fn commit_decoded_line(
        &self,
        file_upload_id: i64,
        line: &RawLine,
        decoded: &DecodedLine,
    ) -> Result<()> {
        let new_record = build_extract_record(file_upload_id, line, decoded);

        let mut tx = self.pool.begin().await?;

        ExtractRecord::upsert(&mut *tx, &new_record).await?;
        crate::models::ScopeGeneration::bump(&mut *tx, &new_record.record_type).await?;

        let reason = if decoded.field_failures.is_empty() {
            None
        } else {
            Some(format!(
                "{} field(s) failed to decode",
                decoded.field_failures.len()
            ))
        };
        RawLine::mark_outcome(
            &mut *tx,
            file_upload_id,
            line.line_no,
            LineOutcome::Decoded,
            reason.as_deref(),
        )
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Recompute the upload's line counters from stored outcomes
    async fn refresh_counts(&self, file_upload_id: i64, lines_seen: i32) -> Result<LineCounts> {
        let tallies = RawLine::count_by_outcome(&self.pool, file_upload_id).await?;

        let mut counts = LineCounts {
            lines_seen,
            ..LineCounts::default()
        };
        for tally in tallies {
            match tally.outcome.as_str() {
                "decoded" => counts.lines_decoded = tally.count as i32,
                "skipped" => counts.lines_skipped = tally.count as i32,
                "failed" => counts.lines_failed = tally.count as i32,
                _ => {}
            }
        }

        FileUpload::update_counts(&self.pool, file_upload_id, counts).await?;
        Ok(counts)
    }
}

/// Derive the persistable record from a decoded line.
///
/// The business key prefers the extracted reference number (qualified by
/// record type so references never collide across families); lines without
/// one key on their full raw text.
fn build_extract_record(
    file_upload_id: i64,
    line: &RawLine,
    decoded: &DecodedLine,
) -> NewExtractRecord {
    let record_type = decoded.record_type();

    let (basis, business_key) = match decoded.record.reference_number() {
        Some(reference) => (
            DedupBasis::ByReference,
            format!("{}:{}", record_type.as_str(), reference),
        ),
        None => (DedupBasis::ByRawLine, line.raw_text.clone()),
    };

    NewExtractRecord {
        file_upload_id,
        line_no: line.line_no,
        record_type: record_type.as_str().to_string(),
        fields: serde_json::to_value(&decoded.fields).unwrap_or_default(),
        business_key_basis: basis,
        business_key,
        amount_cents: decoded.record.primary_amount().map(|a| a.cents()),
        business_date: decoded.record.business_date(),
    }
}
