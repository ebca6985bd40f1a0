//! # Claim Management
//!
//! Cross-process exclusivity over file uploads. The manager hands out
//! TTL-bounded claims through atomic conditional writes; the sweeper
//! recovers uploads whose claim expired mid-flight.

pub mod manager;
pub mod sweeper;

// Re-export key types for convenience
pub use manager::{AcquireOutcome, ClaimManager, ClaimedUpload, ReleaseOutcome, RenewOutcome};
pub use sweeper::{StaleClaimSweeper, SweepStats};
