use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle phases of an uploaded settlement file.
///
/// The happy path runs `received → validated → decoding → decoded →
/// aggregating → done`. `failed` is reachable from every non-terminal
/// phase; the operator retry path loops `failed → retrying → validated`.
/// `archived` and `deleted` are terminal soft-marks entered from `done`
/// or `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    /// Registered, content stored, nothing verified yet
    Received,
    /// Shape-checked and line inventory captured
    Validated,
    /// A worker is decoding lines
    Decoding,
    /// All lines carry an outcome
    Decoded,
    /// Dedup and aggregate rebuild in progress
    Aggregating,
    /// Fully processed
    Done,
    /// Stopped on a file-level error
    Failed,
    /// Operator-initiated retry, passing through on the way to validated
    Retrying,
    /// Soft-archived by an operator
    Archived,
    /// Soft-deleted by an operator; the row itself is retained
    Deleted,
}

impl UploadState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Archived | Self::Deleted)
    }

    /// Check if this is an error state that may allow recovery
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Check if this is an active state (a worker is processing the file)
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Decoding | Self::Aggregating | Self::Retrying)
    }

    /// Check if this phase sits in the worker backlog: a claimable upload
    /// with its next processing step pending
    pub fn is_awaiting_work(&self) -> bool {
        matches!(self, Self::Received | Self::Validated | Self::Decoded)
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Received => write!(f, "received"),
            Self::Validated => write!(f, "validated"),
            Self::Decoding => write!(f, "decoding"),
            Self::Decoded => write!(f, "decoded"),
            Self::Aggregating => write!(f, "aggregating"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
            Self::Retrying => write!(f, "retrying"),
            Self::Archived => write!(f, "archived"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

impl std::str::FromStr for UploadState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(Self::Received),
            "validated" => Ok(Self::Validated),
            "decoding" => Ok(Self::Decoding),
            "decoded" => Ok(Self::Decoded),
            "aggregating" => Ok(Self::Aggregating),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            "retrying" => Ok(Self::Retrying),
            "archived" => Ok(Self::Archived),
            "deleted" => Ok(Self::Deleted),
            _ => Err(format!("Invalid upload state: {s}")),
        }
    }
}

/// Default state for newly registered uploads
impl Default for UploadState {
    fn default() -> Self {
        Self::Received
    }
}
