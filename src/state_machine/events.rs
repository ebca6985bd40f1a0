use serde::{Deserialize, Serialize};

/// Events that can trigger upload phase transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum UploadEvent {
    /// Shape-check the file and capture its line inventory
    Validate,
    /// Begin a decode pass
    StartDecoding,
    /// All lines carry an outcome
    FinishDecoding,
    /// Begin dedup and aggregate rebuild
    StartAggregating,
    /// Mark the upload fully processed
    Complete,
    /// Record a file-level failure with the reason
    Fail { message: String, retryable: bool },
    /// Operator-initiated retry from `failed`
    Retry,
    /// Soft-archive, recording who and why
    Archive { actor: String, reason: String },
    /// Soft-delete, recording who and why
    Delete { actor: String, reason: String },
}

impl UploadEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::StartDecoding => "start_decoding",
            Self::FinishDecoding => "finish_decoding",
            Self::StartAggregating => "start_aggregating",
            Self::Complete => "complete",
            Self::Fail { .. } => "fail",
            Self::Retry => "retry",
            Self::Archive { .. } => "archive",
            Self::Delete { .. } => "delete",
        }
    }

    /// Extract error message if this is a failure event
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail { message, .. } => Some(message),
            _ => None,
        }
    }

    /// Extract actor and reason if this is a soft-mark event
    pub fn actor_and_reason(&self) -> Option<(&str, &str)> {
        match self {
            Self::Archive { actor, reason } | Self::Delete { actor, reason } => {
                Some((actor, reason))
            }
            _ => None,
        }
    }

    /// Check if this event represents a terminal transition
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Archive { .. } | Self::Delete { .. })
    }
}

impl UploadEvent {
    /// Create a retryable failure event with the given error message
    pub fn fail_with_error(error: impl Into<String>) -> Self {
        Self::Fail {
            message: error.into(),
            retryable: true,
        }
    }

    /// Create a failure event that a later retry must not clear
    pub fn fail_fatal(error: impl Into<String>) -> Self {
        Self::Fail {
            message: error.into(),
            retryable: false,
        }
    }

    /// Create an archive event
    pub fn archive(actor: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Archive {
            actor: actor.into(),
            reason: reason.into(),
        }
    }

    /// Create a delete event
    pub fn delete(actor: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Delete {
            actor: actor.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_types() {
        assert_eq!(UploadEvent::Validate.event_type(), "validate");
        assert_eq!(
            UploadEvent::fail_with_error("bad shape").event_type(),
            "fail"
        );
        assert_eq!(
            UploadEvent::archive("ops", "quarter closed").event_type(),
            "archive"
        );
    }

    #[test]
    fn test_error_message_extraction() {
        let event = UploadEvent::fail_with_error("no recognizable record tags");
        assert_eq!(event.error_message(), Some("no recognizable record tags"));
        assert_eq!(UploadEvent::Complete.error_message(), None);
    }

    #[test]
    fn test_fatal_failures_are_not_retryable() {
        assert!(matches!(
            UploadEvent::fail_fatal("file is empty"),
            UploadEvent::Fail {
                retryable: false,
                ..
            }
        ));
        assert!(matches!(
            UploadEvent::fail_with_error("storage read timed out"),
            UploadEvent::Fail {
                retryable: true,
                ..
            }
        ));
    }

    #[test]
    fn test_actor_and_reason_extraction() {
        let event = UploadEvent::delete("ops", "duplicate submission");
        assert_eq!(event.actor_and_reason(), Some(("ops", "duplicate submission")));
        assert!(event.is_terminal());
        assert_eq!(UploadEvent::Retry.actor_and_reason(), None);
    }

    #[test]
    fn test_event_serde_tagging() {
        let event = UploadEvent::fail_with_error("decode produced zero records");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Fail");
        assert_eq!(json["data"]["retryable"], true);
        let back: UploadEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
