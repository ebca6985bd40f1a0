use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::PgPool;

use super::errors::{ActionError, ActionResult};
use super::events::UploadEvent;
use super::states::UploadState;
use crate::constants::events;
use crate::events::publisher::EventPublisher;
use crate::models::FileUpload;

/// Trait for implementing state transition actions
#[async_trait]
pub trait StateAction<T> {
    /// Execute the action
    async fn execute(
        &self,
        entity: &T,
        from_state: Option<String>,
        to_state: String,
        event: &UploadEvent,
        pool: &PgPool,
    ) -> ActionResult<()>;

    /// Get a description of this action for logging
    fn description(&self) -> &'static str;
}

/// Action to publish lifecycle events when phase transitions occur
pub struct PublishTransitionEventAction {
    event_publisher: EventPublisher,
}

impl PublishTransitionEventAction {
    pub fn new(event_publisher: EventPublisher) -> Self {
        Self { event_publisher }
    }
}

#[async_trait]
impl StateAction<FileUpload> for PublishTransitionEventAction {
    async fn execute(
        &self,
        upload: &FileUpload,
        from_state: Option<String>,
        to_state: String,
        event: &UploadEvent,
        _pool: &PgPool,
    ) -> ActionResult<()> {
        let event_name = determine_upload_event_name(&from_state, &to_state);

        if let Some(event_name) = event_name {
            let context = build_upload_event_context(upload, &from_state, &to_state, event);

            self.event_publisher
                .publish(event_name, context)
                .await
                .map_err(|_| ActionError::EventPublishFailed {
                    event_name: event_name.to_string(),
                })?;
        }

        Ok(())
    }

    fn description(&self) -> &'static str {
        "Publish lifecycle event for upload phase transition"
    }
}

/// Action to write the audit columns when an upload is soft-marked
pub struct SoftMarkAction;

#[async_trait]
impl StateAction<FileUpload> for SoftMarkAction {
    async fn execute(
        &self,
        upload: &FileUpload,
        _from_state: Option<String>,
        to_state: String,
        event: &UploadEvent,
        pool: &PgPool,
    ) -> ActionResult<()> {
        let (actor, reason) = match event.actor_and_reason() {
            Some(pair) => pair,
            None => return Ok(()),
        };

        if to_state == UploadState::Archived.to_string() {
            FileUpload::mark_archived(pool, upload.id, actor, reason).await?;
            tracing::info!(
                file_upload_id = upload.id,
                actor = actor,
                "Upload archived"
            );
        } else if to_state == UploadState::Deleted.to_string() {
            FileUpload::mark_deleted(pool, upload.id, actor, reason).await?;
            tracing::info!(
                file_upload_id = upload.id,
                actor = actor,
                "Upload soft-deleted"
            );
        }

        Ok(())
    }

    fn description(&self) -> &'static str {
        "Record soft archive or delete audit columns"
    }
}

/// Action to append the failure entry when an upload enters `failed`
pub struct AppendFailureAction;

#[async_trait]
impl StateAction<FileUpload> for AppendFailureAction {
    async fn execute(
        &self,
        upload: &FileUpload,
        from_state: Option<String>,
        to_state: String,
        event: &UploadEvent,
        pool: &PgPool,
    ) -> ActionResult<()> {
        if to_state != UploadState::Failed.to_string() {
            return Ok(());
        }

        if let UploadEvent::Fail { message, retryable } = event {
            let entry = serde_json::json!({
                "phase": from_state,
                "message": message,
                "retryable": retryable,
                "at": Utc::now(),
            });
            FileUpload::append_error(pool, upload.id, &entry).await?;

            tracing::error!(
                file_upload_id = upload.id,
                error_message = message.as_str(),
                retryable = retryable,
                "Upload transitioned to failed"
            );
        }

        Ok(())
    }

    fn description(&self) -> &'static str {
        "Append structured failure entry to the upload error list"
    }
}

// Helper functions for event processing

fn determine_upload_event_name(
    from_state: &Option<String>,
    to_state: &str,
) -> Option<&'static str> {
    match (from_state.as_deref(), to_state) {
        (_, "validated") => Some(events::UPLOAD_VALIDATED),
        (_, "decoded") => Some(events::UPLOAD_DECODED),
        (_, "done") => Some(events::UPLOAD_COMPLETED),
        (_, "failed") => Some(events::UPLOAD_FAILED),
        (Some("failed"), "retrying") => Some(events::UPLOAD_RETRIED),
        (_, "archived") => Some(events::UPLOAD_ARCHIVED),
        (_, "deleted") => Some(events::UPLOAD_DELETED),
        _ => None,
    }
}

fn build_upload_event_context(
    upload: &FileUpload,
    from_state: &Option<String>,
    to_state: &str,
    event: &UploadEvent,
) -> Value {
    serde_json::json!({
        "file_upload_id": upload.id,
        "filename": upload.filename,
        "from_phase": from_state,
        "to_phase": to_state,
        "event": event.event_type(),
        "transitioned_at": Utc::now()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_name_determination() {
        assert_eq!(
            determine_upload_event_name(&Some("received".to_string()), "validated"),
            Some(events::UPLOAD_VALIDATED)
        );

        assert_eq!(
            determine_upload_event_name(&Some("aggregating".to_string()), "done"),
            Some(events::UPLOAD_COMPLETED)
        );

        assert_eq!(
            determine_upload_event_name(&Some("failed".to_string()), "retrying"),
            Some(events::UPLOAD_RETRIED)
        );

        // Mid-pipeline phases stay quiet; the completion events carry the signal
        assert_eq!(
            determine_upload_event_name(&Some("validated".to_string()), "decoding"),
            None
        );
    }

    #[test]
    fn test_event_context_shape() {
        let from = Some("decoding".to_string());
        let event = UploadEvent::fail_with_error("storage read timed out");
        let json = serde_json::json!({
            "from_phase": from,
            "to_phase": "failed",
            "event": event.event_type(),
        });
        assert_eq!(json["event"], "fail");
        assert_eq!(json["to_phase"], "failed");
    }
}
