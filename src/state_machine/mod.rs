// State machine module for the upload lifecycle
//
// Drives each file upload through its processing phases with persisted,
// audit-friendly transitions. Every transition write is guarded by claim
// ownership so two workers can never advance the same file concurrently.

pub mod actions;
pub mod errors;
pub mod events;
pub mod guards;
pub mod persistence;
pub mod states;
pub mod upload_state_machine;

// Re-export main types for convenient access
pub use errors::{ActionError, GuardError, PersistenceError, StateMachineError};
pub use events::UploadEvent;
pub use states::UploadState;
pub use upload_state_machine::UploadStateMachine;

// Common traits and utilities
pub use actions::StateAction;
pub use guards::StateGuard;
pub use persistence::TransitionPersistence;
