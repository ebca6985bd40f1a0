use super::errors::{business_rule_violation, claim_not_held, GuardResult};
use crate::models::FileUpload;
use async_trait::async_trait;
use sqlx::PgPool;

/// Trait for implementing state transition guards
#[async_trait]
pub trait StateGuard<T> {
    /// Check if a transition is allowed
    async fn check(&self, entity: &T, pool: &PgPool) -> GuardResult<bool>;

    /// Get a description of this guard for logging
    fn description(&self) -> &'static str;
}

/// Guard requiring the acting owner to hold an unexpired claim on the
/// upload. Every phase write runs behind this check: a transition without
/// a live claim is a programming error in the caller, not a race to win.
pub struct ClaimHeldGuard {
    owner_id: String,
}

impl ClaimHeldGuard {
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
        }
    }
}

#[async_trait]
impl StateGuard<FileUpload> for ClaimHeldGuard {
    async fn check(&self, upload: &FileUpload, pool: &PgPool) -> GuardResult<bool> {
        let held = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM mdas_upload_claims
                WHERE file_upload_id = $1
                  AND owner_id = $2
                  AND expires_at > NOW()
            )
            "#,
        )
        .bind(upload.id)
        .bind(&self.owner_id)
        .fetch_one(pool)
        .await?;

        if !held {
            return Err(claim_not_held(upload.id, self.owner_id.clone()));
        }

        Ok(true)
    }

    fn description(&self) -> &'static str {
        "Acting owner must hold an unexpired claim on the upload"
    }
}

/// Guard allowing retry only when the recorded failure is retryable.
/// Fatal validation failures (empty file, unrecognizable shape) stamp a
/// non-retryable error entry and stay failed.
pub struct RetryableFailureGuard;

#[async_trait]
impl StateGuard<FileUpload> for RetryableFailureGuard {
    async fn check(&self, upload: &FileUpload, pool: &PgPool) -> GuardResult<bool> {
        let errors = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT errors FROM mdas_file_uploads WHERE id = $1",
        )
        .bind(upload.id)
        .fetch_one(pool)
        .await?;

        // The latest entry describes the failure being retried. Entries
        // without an explicit flag count as retryable.
        let latest_retryable = errors
            .as_array()
            .and_then(|entries| entries.last())
            .and_then(|entry| entry.get("retryable"))
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(true);

        if !latest_retryable {
            return Err(business_rule_violation(format!(
                "Upload {} failed fatally and cannot be retried",
                upload.id
            )));
        }

        Ok(true)
    }

    fn description(&self) -> &'static str {
        "Latest recorded failure must be retryable"
    }
}
