use super::errors::{PersistenceError, PersistenceResult};
use crate::models::FileUpload;
use crate::state_machine::UploadState;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::PgPool;
use std::str::FromStr;

/// Trait for persisting state transitions
#[async_trait]
pub trait TransitionPersistence<T> {
    /// Persist a state transition
    async fn persist_transition(
        &self,
        entity: &T,
        from_state: Option<String>,
        to_state: String,
        event: &str,
        metadata: Option<Value>,
        pool: &PgPool,
    ) -> PersistenceResult<()>;

    /// Resolve the current state from persisted transitions
    async fn resolve_current_state(
        &self,
        entity_id: i64,
        pool: &PgPool,
    ) -> PersistenceResult<Option<String>>;

    /// Get the next sort key for ordering transitions
    async fn get_next_sort_key(&self, entity_id: i64, pool: &PgPool) -> PersistenceResult<i32>;
}

/// Upload transition persistence against `mdas_upload_transitions`.
///
/// Each persisted transition also refreshes the denormalized `phase`
/// column on `mdas_file_uploads`, inside the same transaction, so backlog
/// queries never observe a phase the audit trail does not contain.
pub struct UploadTransitionPersistence;

#[async_trait]
impl TransitionPersistence<FileUpload> for UploadTransitionPersistence {
    async fn persist_transition(
        &self,
        upload: &FileUpload,
        from_state: Option<String>,
        to_state: String,
        event: &str,
        metadata: Option<Value>,
        pool: &PgPool,
    ) -> PersistenceResult<()> {
        let sort_key = self.get_next_sort_key(upload.id, pool).await?;

        let transition_metadata = metadata.unwrap_or_else(|| {
            serde_json::json!({
                "event": event,
                "timestamp": Utc::now(),
            })
        });

        let mut tx = pool.begin().await?;

        // The partial unique index on (file_upload_id) WHERE most_recent
        // is checked per statement and cannot be deferred, so the old
        // flag must drop before the new most_recent row goes in.
        sqlx::query(
            r#"
            UPDATE mdas_upload_transitions
            SET most_recent = false
            WHERE file_upload_id = $1 AND sort_key < $2
            "#,
        )
        .bind(upload.id)
        .bind(sort_key)
        .execute(&mut *tx)
        .await
        .map_err(|e| PersistenceError::TransitionSaveFailed {
            reason: format!("Failed to update most_recent flags: {e}"),
        })?;

        sqlx::query(
            r#"
            INSERT INTO mdas_upload_transitions
            (file_upload_id, from_phase, to_phase, sort_key, most_recent, metadata)
            VALUES ($1, $2, $3, $4, true, $5)
            "#,
        )
        .bind(upload.id)
        .bind(&from_state)
        .bind(&to_state)
        .bind(sort_key)
        .bind(&transition_metadata)
        .execute(&mut *tx)
        .await
        .map_err(|e| PersistenceError::TransitionSaveFailed {
            reason: format!("Failed to insert transition: {e}"),
        })?;

        if let Ok(phase) = UploadState::from_str(&to_state) {
            FileUpload::update_phase(&mut *tx, upload.id, phase)
                .await
                .map_err(|e| PersistenceError::TransitionSaveFailed {
                    reason: format!("Failed to refresh denormalized phase: {e}"),
                })?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn resolve_current_state(
        &self,
        file_upload_id: i64,
        pool: &PgPool,
    ) -> PersistenceResult<Option<String>> {
        let state = sqlx::query_scalar::<_, String>(
            r#"
            SELECT to_phase
            FROM mdas_upload_transitions
            WHERE file_upload_id = $1 AND most_recent = true
            ORDER BY sort_key DESC
            LIMIT 1
            "#,
        )
        .bind(file_upload_id)
        .fetch_optional(pool)
        .await?;

        Ok(state)
    }

    async fn get_next_sort_key(
        &self,
        file_upload_id: i64,
        pool: &PgPool,
    ) -> PersistenceResult<i32> {
        let next_key = sqlx::query_scalar::<_, i32>(
            r#"
            SELECT (COALESCE(MAX(sort_key), 0) + 1)::int4 AS next_key
            FROM mdas_upload_transitions
            WHERE file_upload_id = $1
            "#,
        )
        .bind(file_upload_id)
        .fetch_one(pool)
        .await?;

        Ok(next_key)
    }
}
