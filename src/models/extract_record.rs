//! # ExtractRecord Model
//!
//! The decoded, typed representation of one settlement line.
//!
//! ## Overview
//!
//! Extract records are keyed by `(file_upload_id, line_no)` and written
//! through an upsert, so reprocessing a file replaces field content without
//! duplicating rows. The upsert deliberately leaves `created_at` untouched:
//! duplicate resolution keeps the earliest-created record, and that choice
//! must not drift when a retry rewrites the same line.
//!
//! The business key columns carry the identity used for duplicate
//! detection: the key basis (`by_reference` | `by_raw_line`) plus the key
//! value itself.

use crate::constants::DedupBasis;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ExtractRecord {
    pub id: i64,
    pub file_upload_id: i64,
    pub line_no: i32,
    pub record_type: String,
    pub fields: serde_json::Value,
    pub business_key_basis: String,
    pub business_key: String,
    pub amount_cents: Option<i64>,
    pub business_date: Option<NaiveDate>,
    pub is_duplicate: bool,
    pub duplicate_of: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New ExtractRecord for upsert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewExtractRecord {
    pub file_upload_id: i64,
    pub line_no: i32,
    pub record_type: String,
    pub fields: serde_json::Value,
    pub business_key_basis: DedupBasis,
    pub business_key: String,
    pub amount_cents: Option<i64>,
    pub business_date: Option<NaiveDate>,
}

impl ExtractRecord {
    /// Insert or replace the decoded content for one line.
    ///
    /// `created_at` survives replacement; `updated_at` moves. Duplicate
    /// marks are cleared because new field content invalidates any earlier
    /// resolution.
    pub async fn upsert(
        executor: impl sqlx::PgExecutor<'_>,
        record: &NewExtractRecord,
    ) -> Result<ExtractRecord, sqlx::Error> {
        sqlx::query_as::<_, ExtractRecord>(
            r#"
            INSERT INTO mdas_extract_records
                (file_upload_id, line_no, record_type, fields,
                 business_key_basis, business_key, amount_cents, business_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (file_upload_id, line_no) DO UPDATE
            SET record_type = EXCLUDED.record_type,
                fields = EXCLUDED.fields,
                business_key_basis = EXCLUDED.business_key_basis,
                business_key = EXCLUDED.business_key,
                amount_cents = EXCLUDED.amount_cents,
                business_date = EXCLUDED.business_date,
                is_duplicate = FALSE,
                duplicate_of = NULL,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(record.file_upload_id)
        .bind(record.line_no)
        .bind(&record.record_type)
        .bind(&record.fields)
        .bind(record.business_key_basis.as_str())
        .bind(&record.business_key)
        .bind(record.amount_cents)
        .bind(record.business_date)
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<ExtractRecord>, sqlx::Error> {
        sqlx::query_as::<_, ExtractRecord>("SELECT * FROM mdas_extract_records WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// All records of one upload in line order, duplicates included
    pub async fn list_for_upload(
        pool: &PgPool,
        file_upload_id: i64,
    ) -> Result<Vec<ExtractRecord>, sqlx::Error> {
        sqlx::query_as::<_, ExtractRecord>(
            r#"
            SELECT * FROM mdas_extract_records
            WHERE file_upload_id = $1
            ORDER BY line_no ASC
            "#,
        )
        .bind(file_upload_id)
        .fetch_all(pool)
        .await
    }

    /// Mark a group's losers as duplicates of the retained record
    pub async fn mark_duplicates(
        pool: &PgPool,
        winner_id: i64,
        loser_ids: &[i64],
    ) -> Result<u64, sqlx::Error> {
        if loser_ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            UPDATE mdas_extract_records
            SET is_duplicate = TRUE, duplicate_of = $1, updated_at = NOW()
            WHERE id = ANY($2)
            "#,
        )
        .bind(winner_id)
        .bind(loser_ids)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Clear duplicate marks for one upload ahead of a re-resolution
    pub async fn clear_duplicate_marks(
        pool: &PgPool,
        file_upload_id: i64,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE mdas_extract_records
            SET is_duplicate = FALSE, duplicate_of = NULL, updated_at = NOW()
            WHERE file_upload_id = $1 AND is_duplicate = TRUE
            "#,
        )
        .bind(file_upload_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Count non-duplicate records in an aggregation scope
    pub async fn count_in_scope(
        pool: &PgPool,
        record_type: &str,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM mdas_extract_records
            WHERE record_type = $1
              AND business_date >= $2 AND business_date < $3
              AND is_duplicate = FALSE
            "#,
        )
        .bind(record_type)
        .bind(period_start)
        .bind(period_end)
        .fetch_one(pool)
        .await
    }

    /// Sum and count of non-duplicate records in an aggregation scope.
    /// This is the rebuild scan: record type plus period bounds, never the
    /// whole corpus.
    pub async fn scope_metrics(
        pool: &PgPool,
        record_type: &str,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Result<ScopeMetrics, sqlx::Error> {
        sqlx::query_as::<_, ScopeMetrics>(
            r#"
            SELECT COUNT(*) AS record_count,
                   COALESCE(SUM(amount_cents), 0)::BIGINT AS total_amount_cents
            FROM mdas_extract_records
            WHERE record_type = $1
              AND business_date >= $2 AND business_date < $3
              AND is_duplicate = FALSE
            "#,
        )
        .bind(record_type)
        .bind(period_start)
        .bind(period_end)
        .fetch_one(pool)
        .await
    }

    /// Total non-duplicate record count for one record type, across all
    /// periods. Drives tier selection.
    pub async fn count_for_record_type(
        pool: &PgPool,
        record_type: &str,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM mdas_extract_records
            WHERE record_type = $1 AND is_duplicate = FALSE
            "#,
        )
        .bind(record_type)
        .fetch_one(pool)
        .await
    }
}

/// Aggregate rebuild scan result
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRow)]
pub struct ScopeMetrics {
    pub record_count: i64,
    pub total_amount_cents: i64,
}
