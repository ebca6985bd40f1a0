//! # RawLine Model
//!
//! One physical line of an uploaded file, captured verbatim at validation.
//!
//! ## Overview
//!
//! Raw lines are bulk-created when a file passes validation and keyed by
//! `(file_upload_id, line_no)`, which makes re-validation after a crash
//! idempotent: `ON CONFLICT DO NOTHING` leaves existing rows alone. Each
//! decode pass writes an outcome exactly once per line through a guarded
//! update that only moves rows out of `pending`; a retry resets outcomes
//! to `pending` first.

use crate::constants::LineOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RawLine {
    pub id: i64,
    pub file_upload_id: i64,
    pub line_no: i32,
    pub raw_text: String,
    pub record_type: Option<String>,
    pub outcome: String,
    pub outcome_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// New RawLine for bulk creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRawLine {
    pub line_no: i32,
    pub raw_text: String,
    pub record_type: Option<String>,
}

/// Per-outcome line tally for one upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct OutcomeCount {
    pub outcome: String,
    pub count: i64,
}

impl RawLine {
    /// Bulk-create the lines of one upload. Idempotent: lines already
    /// present from an interrupted earlier pass are left untouched.
    ///
    /// Returns the number of rows actually inserted.
    pub async fn bulk_create(
        pool: &PgPool,
        file_upload_id: i64,
        lines: &[NewRawLine],
    ) -> Result<u64, sqlx::Error> {
        if lines.is_empty() {
            return Ok(0);
        }

        let line_nos: Vec<i32> = lines.iter().map(|l| l.line_no).collect();
        let raw_texts: Vec<String> = lines.iter().map(|l| l.raw_text.clone()).collect();
        let record_types: Vec<Option<String>> =
            lines.iter().map(|l| l.record_type.clone()).collect();

        let result = sqlx::query(
            r#"
            INSERT INTO mdas_raw_lines (file_upload_id, line_no, raw_text, record_type)
            SELECT $1, line_no, raw_text, record_type
            FROM UNNEST($2::int[], $3::text[], $4::varchar[])
                AS t(line_no, raw_text, record_type)
            ON CONFLICT (file_upload_id, line_no) DO NOTHING
            "#,
        )
        .bind(file_upload_id)
        .bind(&line_nos)
        .bind(&raw_texts)
        .bind(&record_types)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Record a decode outcome for one line.
    ///
    /// Guarded: only a `pending` line accepts an outcome, so replays of an
    /// interrupted decode pass cannot overwrite earlier results. Returns
    /// false when the guard rejected the write.
    pub async fn mark_outcome(
        executor: impl sqlx::PgExecutor<'_>,
        file_upload_id: i64,
        line_no: i32,
        outcome: LineOutcome,
        reason: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE mdas_raw_lines
            SET outcome = $3, outcome_reason = $4
            WHERE file_upload_id = $1 AND line_no = $2 AND outcome = 'pending'
            "#,
        )
        .bind(file_upload_id)
        .bind(line_no)
        .bind(outcome.as_str())
        .bind(reason)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Reset every line of an upload to `pending` ahead of a retry pass
    pub async fn reset_outcomes(pool: &PgPool, file_upload_id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE mdas_raw_lines
            SET outcome = 'pending', outcome_reason = NULL
            WHERE file_upload_id = $1 AND outcome <> 'pending'
            "#,
        )
        .bind(file_upload_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// All lines of an upload in physical order
    pub async fn list_for_upload(
        pool: &PgPool,
        file_upload_id: i64,
    ) -> Result<Vec<RawLine>, sqlx::Error> {
        sqlx::query_as::<_, RawLine>(
            r#"
            SELECT * FROM mdas_raw_lines
            WHERE file_upload_id = $1
            ORDER BY line_no ASC
            "#,
        )
        .bind(file_upload_id)
        .fetch_all(pool)
        .await
    }

    /// Outcome tallies for one upload
    pub async fn count_by_outcome(
        pool: &PgPool,
        file_upload_id: i64,
    ) -> Result<Vec<OutcomeCount>, sqlx::Error> {
        sqlx::query_as::<_, OutcomeCount>(
            r#"
            SELECT outcome, COUNT(*) AS count
            FROM mdas_raw_lines
            WHERE file_upload_id = $1
            GROUP BY outcome
            "#,
        )
        .bind(file_upload_id)
        .fetch_all(pool)
        .await
    }
}
