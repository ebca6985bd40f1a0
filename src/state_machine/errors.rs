use thiserror::Error;

pub type StateMachineResult<T> = Result<T, StateMachineError>;
pub type GuardResult<T> = Result<T, GuardError>;
pub type ActionResult<T> = Result<T, ActionError>;
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Top-level state machine failures
#[derive(Debug, Error)]
pub enum StateMachineError {
    #[error("Invalid transition from {from:?} via {to}")]
    InvalidTransition { from: Option<String>, to: String },

    #[error("Guard rejected transition: {0}")]
    Guard(#[from] GuardError),

    #[error("Action failed after transition: {0}")]
    Action(#[from] ActionError),

    #[error("Transition persistence failed: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal state machine error: {0}")]
    Internal(String),
}

/// Failures raised by transition guards
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("No unexpired claim on upload {file_upload_id} held by '{owner_id}'")]
    ClaimNotHeld {
        file_upload_id: i64,
        owner_id: String,
    },

    #[error("Business rule violation: {0}")]
    BusinessRuleViolation(String),

    #[error("Guard query failed: {0}")]
    Database(#[from] sqlx::Error),
}

/// Constructor for claim guard rejections
pub fn claim_not_held(file_upload_id: i64, owner_id: impl Into<String>) -> GuardError {
    GuardError::ClaimNotHeld {
        file_upload_id,
        owner_id: owner_id.into(),
    }
}

/// Constructor for business rule rejections
pub fn business_rule_violation(message: impl Into<String>) -> GuardError {
    GuardError::BusinessRuleViolation(message.into())
}

/// Failures raised by post-transition actions
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Action '{action}' failed: {reason}")]
    ExecutionFailed { action: String, reason: String },

    #[error("Failed to publish event '{event_name}'")]
    EventPublishFailed { event_name: String },

    #[error("Action query failed: {0}")]
    Database(#[from] sqlx::Error),
}

/// Failures writing or reading the transition table
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Failed to save transition: {reason}")]
    TransitionSaveFailed { reason: String },

    #[error("Transition query failed: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<StateMachineError> for crate::error::CoreError {
    fn from(error: StateMachineError) -> Self {
        crate::error::CoreError::StateTransitionError(error.to_string())
    }
}
