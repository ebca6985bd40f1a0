use super::{
    actions::{AppendFailureAction, PublishTransitionEventAction, SoftMarkAction, StateAction},
    errors::{StateMachineError, StateMachineResult},
    events::UploadEvent,
    guards::{ClaimHeldGuard, RetryableFailureGuard, StateGuard},
    persistence::{TransitionPersistence, UploadTransitionPersistence},
    states::UploadState,
};
use crate::events::publisher::EventPublisher;
use crate::models::FileUpload;
use serde_json::Value;
use sqlx::PgPool;

/// State machine driving one upload through its lifecycle phases.
///
/// Every transition write requires a currently-owned, unexpired claim on
/// the upload held under `owner_id`; transitions attempted without one are
/// rejected before anything is persisted.
pub struct UploadStateMachine {
    upload: FileUpload,
    owner_id: String,
    pool: PgPool,
    event_publisher: EventPublisher,
    persistence: UploadTransitionPersistence,
}

impl UploadStateMachine {
    /// Create a new state machine instance for the upload, operating under
    /// the given claim owner identity
    pub fn new(
        upload: FileUpload,
        owner_id: impl Into<String>,
        pool: PgPool,
        event_publisher: EventPublisher,
    ) -> Self {
        Self {
            upload,
            owner_id: owner_id.into(),
            pool,
            event_publisher,
            persistence: UploadTransitionPersistence,
        }
    }

    /// Get the current phase of the upload from the transition history
    pub async fn current_state(&self) -> StateMachineResult<UploadState> {
        match self
            .persistence
            .resolve_current_state(self.upload.id, &self.pool)
            .await?
        {
            Some(state_str) => state_str.parse().map_err(|_| {
                StateMachineError::Internal(format!("Invalid phase in database: {state_str}"))
            }),
            None => Ok(UploadState::default()), // No transitions yet, return default state
        }
    }

    /// Attempt to transition the upload phase
    pub async fn transition(&mut self, event: UploadEvent) -> StateMachineResult<UploadState> {
        let current_state = self.current_state().await?;
        let target_state = Self::determine_target_state(current_state, &event)?;

        // Check guards
        self.check_guards(current_state, target_state, &event)
            .await?;

        // Persist the transition
        let event_str = serde_json::to_string(&event)?;
        self.persistence
            .persist_transition(
                &self.upload,
                Some(current_state.to_string()),
                target_state.to_string(),
                &event_str,
                transition_metadata(&event),
                &self.pool,
            )
            .await?;

        // Execute actions
        self.execute_actions(current_state, target_state, &event)
            .await?;

        Ok(target_state)
    }

    /// Determine the target phase based on current phase and event
    pub fn determine_target_state(
        current_state: UploadState,
        event: &UploadEvent,
    ) -> StateMachineResult<UploadState> {
        let target = match (current_state, event) {
            // Forward pipeline transitions
            (UploadState::Received, UploadEvent::Validate) => UploadState::Validated,
            (UploadState::Validated, UploadEvent::StartDecoding) => UploadState::Decoding,
            (UploadState::Decoding, UploadEvent::FinishDecoding) => UploadState::Decoded,
            (UploadState::Decoded, UploadEvent::StartAggregating) => UploadState::Aggregating,
            (UploadState::Aggregating, UploadEvent::Complete) => UploadState::Done,

            // Downstream dedup/aggregation errors roll back to decoded so a
            // later pass skips the codec; everything else fails the file
            (UploadState::Aggregating, UploadEvent::Fail { retryable: true, .. }) => {
                UploadState::Decoded
            }
            (from_state, UploadEvent::Fail { .. }) if !from_state.is_terminal() => {
                UploadState::Failed
            }

            // Operator retry path
            (UploadState::Failed, UploadEvent::Retry) => UploadState::Retrying,
            (UploadState::Retrying, UploadEvent::Validate) => UploadState::Validated,

            // Soft-mark transitions out of the resting phases
            (UploadState::Done | UploadState::Failed, UploadEvent::Archive { .. }) => {
                UploadState::Archived
            }
            (UploadState::Done | UploadState::Failed, UploadEvent::Delete { .. }) => {
                UploadState::Deleted
            }

            // Invalid transitions
            (from_state, _) => {
                return Err(StateMachineError::InvalidTransition {
                    from: Some(from_state.to_string()),
                    to: format!("{event:?}"),
                })
            }
        };

        Ok(target)
    }

    /// Check guard conditions for the transition
    async fn check_guards(
        &self,
        current_state: UploadState,
        target_state: UploadState,
        event: &UploadEvent,
    ) -> StateMachineResult<()> {
        // Every transition write requires an unexpired claim held by this owner
        let claim_guard = ClaimHeldGuard::new(self.owner_id.clone());
        claim_guard.check(&self.upload, &self.pool).await?;

        match (current_state, target_state, event) {
            // Retry is blocked when the latest failure was marked non-retryable
            (UploadState::Failed, UploadState::Retrying, UploadEvent::Retry) => {
                let guard = RetryableFailureGuard;
                guard.check(&self.upload, &self.pool).await?;
            }

            // No additional guards for other transitions
            _ => {}
        }

        Ok(())
    }

    /// Execute actions after successful transition
    async fn execute_actions(
        &self,
        from_state: UploadState,
        to_state: UploadState,
        event: &UploadEvent,
    ) -> StateMachineResult<()> {
        let actions: Vec<Box<dyn StateAction<FileUpload> + Send + Sync>> = vec![
            Box::new(PublishTransitionEventAction::new(
                self.event_publisher.clone(),
            )),
            Box::new(AppendFailureAction),
            Box::new(SoftMarkAction),
        ];

        for action in actions {
            action
                .execute(
                    &self.upload,
                    Some(from_state.to_string()),
                    to_state.to_string(),
                    event,
                    &self.pool,
                )
                .await?;
        }

        Ok(())
    }

    /// Check if the upload is in a terminal phase
    pub async fn is_terminal(&self) -> StateMachineResult<bool> {
        let current_state = self.current_state().await?;
        Ok(current_state.is_terminal())
    }

    /// Check if the upload is currently being processed
    pub async fn is_active(&self) -> StateMachineResult<bool> {
        let current_state = self.current_state().await?;
        Ok(current_state.is_active())
    }

    /// Get upload information
    pub fn upload(&self) -> &FileUpload {
        &self.upload
    }

    /// Get upload ID
    pub fn file_upload_id(&self) -> i64 {
        self.upload.id
    }

    /// Get the claim owner identity this machine operates under
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }
}

/// Event payload details worth keeping on the transition row itself
fn transition_metadata(event: &UploadEvent) -> Option<Value> {
    match event {
        UploadEvent::Fail { message, retryable } => Some(serde_json::json!({
            "error": message,
            "retryable": retryable,
        })),
        UploadEvent::Archive { actor, reason } | UploadEvent::Delete { actor, reason } => {
            Some(serde_json::json!({
                "actor": actor,
                "reason": reason,
            }))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_pipeline_transitions() {
        assert_eq!(
            UploadStateMachine::determine_target_state(UploadState::Received, &UploadEvent::Validate)
                .unwrap(),
            UploadState::Validated
        );

        assert_eq!(
            UploadStateMachine::determine_target_state(
                UploadState::Validated,
                &UploadEvent::StartDecoding
            )
            .unwrap(),
            UploadState::Decoding
        );

        assert_eq!(
            UploadStateMachine::determine_target_state(
                UploadState::Aggregating,
                &UploadEvent::Complete
            )
            .unwrap(),
            UploadState::Done
        );
    }

    #[test]
    fn test_failure_transitions() {
        assert_eq!(
            UploadStateMachine::determine_target_state(
                UploadState::Decoding,
                &UploadEvent::fail_with_error("zero lines decoded")
            )
            .unwrap(),
            UploadState::Failed
        );

        // Retryable downstream failure returns to decoded, skipping the codec
        assert_eq!(
            UploadStateMachine::determine_target_state(
                UploadState::Aggregating,
                &UploadEvent::fail_with_error("aggregate bucket write lost race")
            )
            .unwrap(),
            UploadState::Decoded
        );

        // Fatal downstream failure still fails the file
        assert_eq!(
            UploadStateMachine::determine_target_state(
                UploadState::Aggregating,
                &UploadEvent::fail_fatal("scope metrics query returned corrupt totals")
            )
            .unwrap(),
            UploadState::Failed
        );
    }

    #[test]
    fn test_retry_path() {
        assert_eq!(
            UploadStateMachine::determine_target_state(UploadState::Failed, &UploadEvent::Retry)
                .unwrap(),
            UploadState::Retrying
        );

        assert_eq!(
            UploadStateMachine::determine_target_state(UploadState::Retrying, &UploadEvent::Validate)
                .unwrap(),
            UploadState::Validated
        );
    }

    #[test]
    fn test_soft_mark_transitions() {
        assert_eq!(
            UploadStateMachine::determine_target_state(
                UploadState::Done,
                &UploadEvent::archive("ops", "quarter closed")
            )
            .unwrap(),
            UploadState::Archived
        );

        assert_eq!(
            UploadStateMachine::determine_target_state(
                UploadState::Failed,
                &UploadEvent::delete("ops", "duplicate submission")
            )
            .unwrap(),
            UploadState::Deleted
        );
    }

    #[test]
    fn test_invalid_transitions() {
        // Cannot complete from received
        assert!(UploadStateMachine::determine_target_state(
            UploadState::Received,
            &UploadEvent::Complete
        )
        .is_err());

        // Cannot retry an upload that has not failed
        assert!(UploadStateMachine::determine_target_state(
            UploadState::Done,
            &UploadEvent::Retry
        )
        .is_err());

        // Terminal phases accept nothing, including another failure
        assert!(UploadStateMachine::determine_target_state(
            UploadState::Archived,
            &UploadEvent::fail_with_error("late storage error")
        )
        .is_err());

        // Soft marks only apply from the resting phases
        assert!(UploadStateMachine::determine_target_state(
            UploadState::Decoding,
            &UploadEvent::archive("ops", "mid-flight archive")
        )
        .is_err());
    }
}
