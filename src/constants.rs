//! # System Constants
//!
//! Core constants and shared enums that define the operational boundaries of
//! the MDAS ingestion core: lifecycle event names, line outcomes, claim
//! defaults, and the audit reasons written by the sweeper.

use serde::{Deserialize, Serialize};

// Re-export the lifecycle state type under its reporting-facing alias
pub use crate::state_machine::UploadState as UploadPhase;

/// Lifecycle events published by the ingestion core
pub mod events {
    // Upload lifecycle events
    pub const UPLOAD_REGISTERED: &str = "upload.registered";
    pub const UPLOAD_VALIDATED: &str = "upload.validated";
    pub const UPLOAD_DECODED: &str = "upload.decoded";
    pub const UPLOAD_COMPLETED: &str = "upload.completed";
    pub const UPLOAD_FAILED: &str = "upload.failed";
    pub const UPLOAD_RETRIED: &str = "upload.retried";
    pub const UPLOAD_ARCHIVED: &str = "upload.archived";
    pub const UPLOAD_DELETED: &str = "upload.deleted";

    // Claim lifecycle events
    pub const CLAIM_ACQUIRED: &str = "claim.acquired";
    pub const CLAIM_RELEASED: &str = "claim.released";
    pub const CLAIM_RECLAIMED: &str = "claim.reclaimed";

    // Data-quality and aggregation events
    pub const DEDUP_COMPLETED: &str = "dedup.completed";
    pub const AGGREGATE_REBUILT: &str = "aggregate.rebuilt";
}

/// Terminal and in-flight outcomes for one physical line of a TDDF file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineOutcome {
    Pending,
    Decoded,
    Skipped,
    Failed,
}

impl LineOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineOutcome::Pending => "pending",
            LineOutcome::Decoded => "decoded",
            LineOutcome::Skipped => "skipped",
            LineOutcome::Failed => "failed",
        }
    }
}

impl std::str::FromStr for LineOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "decoded" => Ok(Self::Decoded),
            "skipped" => Ok(Self::Skipped),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid line outcome: {s}")),
        }
    }
}

/// How a record's business key was derived during deduplication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupBasis {
    ByReference,
    ByRawLine,
}

impl DedupBasis {
    pub fn as_str(&self) -> &'static str {
        match self {
            DedupBasis::ByReference => "by_reference",
            DedupBasis::ByRawLine => "by_raw_line",
        }
    }
}

/// System-wide operational defaults
pub mod system {
    /// Default claim time-to-live, matching the legacy uploader's 30 minute
    /// stale-lock window.
    pub const DEFAULT_CLAIM_TTL_MINUTES: u32 = 30;

    /// Default heartbeat cadence for renewing a held claim.
    pub const DEFAULT_HEARTBEAT_INTERVAL_SECONDS: u64 = 60;

    /// Default sweep cadence for the stale-claim sweeper.
    pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 300;

    /// Bounded transient-error retries before a file-level failure is recorded.
    pub const MAX_TRANSIENT_RETRIES: u32 = 3;

    /// Audit reason written when the sweeper reclaims an expired claim.
    pub const RECLAIM_REASON: &str = "claim expired";

    /// Owner-id prefix used by sweeper-held claims in audit output.
    pub const SWEEPER_OWNER_PREFIX: &str = "sweeper";

    /// Owner-id prefix used by ingestion worker claims in audit output.
    pub const WORKER_OWNER_PREFIX: &str = "worker";
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_line_outcome_round_trip() {
        for outcome in [
            LineOutcome::Pending,
            LineOutcome::Decoded,
            LineOutcome::Skipped,
            LineOutcome::Failed,
        ] {
            assert_eq!(LineOutcome::from_str(outcome.as_str()).unwrap(), outcome);
        }
    }

    #[test]
    fn test_unknown_outcome_rejected() {
        assert!(LineOutcome::from_str("exploded").is_err());
    }

    #[test]
    fn test_dedup_basis_labels() {
        assert_eq!(DedupBasis::ByReference.as_str(), "by_reference");
        assert_eq!(DedupBasis::ByRawLine.as_str(), "by_raw_line");
    }
}
