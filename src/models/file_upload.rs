//! # FileUpload Model
//!
//! Registration record and lifecycle anchor for one uploaded settlement file.
//!
//! ## Overview
//!
//! A `FileUpload` row is created once per registered file and never deleted;
//! archival and deletion are soft marks carrying the acting operator and a
//! reason. The `phase` column denormalizes the current lifecycle state for
//! cheap backlog queries; the authoritative history lives in
//! `mdas_upload_transitions`.
//!
//! ## Database Schema
//!
//! Maps to `mdas_file_uploads`:
//! ```sql
//! CREATE TABLE mdas_file_uploads (
//!   id BIGSERIAL PRIMARY KEY,
//!   filename VARCHAR NOT NULL,
//!   size_bytes BIGINT NOT NULL,
//!   storage_ref VARCHAR NOT NULL,
//!   phase VARCHAR NOT NULL DEFAULT 'received',
//!   lines_seen INTEGER, lines_decoded INTEGER,
//!   lines_skipped INTEGER, lines_failed INTEGER,
//!   errors JSONB,
//!   -- soft-mark metadata, timestamps
//! );
//! ```

use crate::state_machine::UploadState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct FileUpload {
    pub id: i64,
    pub filename: String,
    pub size_bytes: i64,
    pub storage_ref: String,
    pub phase: String,
    pub layout_version: Option<String>,
    pub lines_seen: i32,
    pub lines_decoded: i32,
    pub lines_skipped: i32,
    pub lines_failed: i32,
    pub errors: serde_json::Value,
    pub archived_by: Option<String>,
    pub archived_reason: Option<String>,
    pub deleted_by: Option<String>,
    pub deleted_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New FileUpload for registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFileUpload {
    pub filename: String,
    pub size_bytes: i64,
    pub storage_ref: String,
}

/// Line counters accumulated during a decode pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineCounts {
    pub lines_seen: i32,
    pub lines_decoded: i32,
    pub lines_skipped: i32,
    pub lines_failed: i32,
}

/// One row of the backlog summary: a phase and how many uploads sit in it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PhaseCount {
    pub phase: String,
    pub count: i64,
}

impl FileUpload {
    /// Register a new upload in phase `received`
    pub async fn create(pool: &PgPool, new_upload: NewFileUpload) -> Result<FileUpload, sqlx::Error> {
        sqlx::query_as::<_, FileUpload>(
            r#"
            INSERT INTO mdas_file_uploads (filename, size_bytes, storage_ref)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(&new_upload.filename)
        .bind(new_upload.size_bytes)
        .bind(&new_upload.storage_ref)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<FileUpload>, sqlx::Error> {
        sqlx::query_as::<_, FileUpload>("SELECT * FROM mdas_file_uploads WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Current lifecycle state parsed from the denormalized phase column
    pub fn current_phase(&self) -> Option<UploadState> {
        UploadState::from_str(&self.phase).ok()
    }

    /// Update the denormalized phase column. The transition table is the
    /// authoritative record; callers go through the state machine, which
    /// writes both.
    pub async fn update_phase(
        executor: impl sqlx::PgExecutor<'_>,
        id: i64,
        phase: UploadState,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE mdas_file_uploads SET phase = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(phase.to_string())
            .execute(executor)
            .await?;
        Ok(())
    }

    /// Record the layout version a decode pass used
    pub async fn set_layout_version(
        pool: &PgPool,
        id: i64,
        layout_version: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE mdas_file_uploads SET layout_version = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(layout_version)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Overwrite the line counters with a pass's final tallies
    pub async fn update_counts(
        pool: &PgPool,
        id: i64,
        counts: LineCounts,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE mdas_file_uploads
            SET lines_seen = $2, lines_decoded = $3, lines_skipped = $4,
                lines_failed = $5, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(counts.lines_seen)
        .bind(counts.lines_decoded)
        .bind(counts.lines_skipped)
        .bind(counts.lines_failed)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Append one error entry to the JSONB error list
    pub async fn append_error(
        pool: &PgPool,
        id: i64,
        error: &serde_json::Value,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE mdas_file_uploads
            SET errors = errors || jsonb_build_array($2::jsonb), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Record the soft archive mark. Phase movement happens through the
    /// state machine; this writes the audit columns only.
    pub async fn mark_archived(
        executor: impl sqlx::PgExecutor<'_>,
        id: i64,
        actor: &str,
        reason: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE mdas_file_uploads
            SET archived_by = $2, archived_reason = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(actor)
        .bind(reason)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Record the soft delete mark
    pub async fn mark_deleted(
        executor: impl sqlx::PgExecutor<'_>,
        id: i64,
        actor: &str,
        reason: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE mdas_file_uploads
            SET deleted_by = $2, deleted_reason = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(actor)
        .bind(reason)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Oldest uploads sitting in the given phase, for backlog polling
    pub async fn list_in_phase(
        pool: &PgPool,
        phase: UploadState,
        limit: i64,
    ) -> Result<Vec<FileUpload>, sqlx::Error> {
        sqlx::query_as::<_, FileUpload>(
            r#"
            SELECT * FROM mdas_file_uploads
            WHERE phase = $1
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            "#,
        )
        .bind(phase.to_string())
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Backlog counts grouped by phase
    pub async fn counts_by_phase(pool: &PgPool) -> Result<Vec<PhaseCount>, sqlx::Error> {
        sqlx::query_as::<_, PhaseCount>(
            r#"
            SELECT phase, COUNT(*) AS count
            FROM mdas_file_uploads
            GROUP BY phase
            ORDER BY phase
            "#,
        )
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_phase_parses_known_states() {
        let upload = sample_upload("decoding");
        assert_eq!(upload.current_phase(), Some(UploadState::Decoding));

        let upload = sample_upload("not-a-phase");
        assert_eq!(upload.current_phase(), None);
    }

    fn sample_upload(phase: &str) -> FileUpload {
        FileUpload {
            id: 1,
            filename: "BANK.TDDF.20221128".to_string(),
            size_bytes: 10_240,
            storage_ref: "uploads/1".to_string(),
            phase: phase.to_string(),
            layout_version: None,
            lines_seen: 0,
            lines_decoded: 0,
            lines_skipped: 0,
            lines_failed: 0,
            errors: serde_json::json!([]),
            archived_by: None,
            archived_reason: None,
            deleted_by: None,
            deleted_reason: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}
