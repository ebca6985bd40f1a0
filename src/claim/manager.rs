//! # Claim Manager
//!
//! ## Architecture: Cross-Process Claims over Shared Upload Storage
//!
//! The ClaimManager hands out time-bounded exclusive claims on file uploads
//! so only one worker processes a file at a time, across processes and
//! hosts. Acquisition is one atomic conditional write: of N concurrent
//! acquirers, exactly one observes the row as absent-or-expired and wins.
//!
//! ## Key Features
//!
//! - **Atomic Acquisition**: `INSERT ... ON CONFLICT DO UPDATE ... WHERE expired`
//! - **TTL Expiry**: claims lapse on their own; a crashed worker never wedges a file
//! - **Heartbeat Support**: owners renew claims during long-running decode passes
//! - **Conditional Renewal**: an expired claim cannot be renewed, only re-acquired
//!
//! ## Usage
//!
//! ```rust
//! use mdas_core::claim::{AcquireOutcome, ClaimManager};
//! use sqlx::PgPool;
//!
//! # async fn example(pool: PgPool) -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ClaimManager::new(pool);
//!
//! match manager.try_acquire(42, "worker-host123-uuid").await? {
//!     AcquireOutcome::Granted(claim) => {
//!         println!("Claimed upload {} until {}", claim.file_upload_id, claim.expires_at);
//!
//!         // Process the file, renewing periodically...
//!
//!         manager.release(42, "worker-host123-uuid").await?;
//!     }
//!     AcquireOutcome::Denied => {
//!         // Another worker holds it; move on to the next file
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use crate::config::ClaimsConfig;
use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, error, instrument};

/// A granted claim on a file upload
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ClaimedUpload {
    /// Upload this claim covers
    pub file_upload_id: i64,
    /// Worker identity holding the claim
    pub owner_id: String,
    /// When this claim was acquired
    pub acquired_at: DateTime<Utc>,
    /// When this claim lapses unless renewed
    pub expires_at: DateTime<Utc>,
}

impl ClaimedUpload {
    /// Elapsed time since acquisition, for reclaim audit logging
    pub fn held_for(&self, now: DateTime<Utc>) -> Duration {
        (now - self.acquired_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Result of a claim acquisition attempt
#[derive(Debug, Clone)]
pub enum AcquireOutcome {
    /// This owner now holds the claim
    Granted(ClaimedUpload),
    /// Another owner holds an unexpired claim
    Denied,
}

impl AcquireOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted(_))
    }
}

/// Result of a claim release attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The claim row was removed
    Released,
    /// No claim row for this upload is owned by the caller
    NotOwner,
}

/// Result of a claim renewal (heartbeat) attempt
#[derive(Debug, Clone)]
pub enum RenewOutcome {
    /// Expiry pushed out; the new deadline is attached
    Renewed(DateTime<Utc>),
    /// The claim had already lapsed; the owner must re-acquire
    Expired,
}

impl RenewOutcome {
    pub fn is_renewed(&self) -> bool {
        matches!(self, Self::Renewed(_))
    }
}

/// Claim management component for cross-process upload processing
#[derive(Debug, Clone)]
pub struct ClaimManager {
    pool: PgPool,
    config: ClaimsConfig,
}

impl ClaimManager {
    /// Create a new claim manager with default claim settings
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            config: ClaimsConfig::default(),
        }
    }

    /// Create a new claim manager with the given claim settings
    pub fn with_config(pool: PgPool, config: ClaimsConfig) -> Self {
        Self { pool, config }
    }

    /// Attempt to claim an upload for exclusive processing.
    ///
    /// Uses the configured TTL. Re-acquisition by the current owner
    /// refreshes the expiry, so callers may acquire at the top of every
    /// work cycle without tracking whether they already hold the claim.
    #[instrument(skip(self))]
    pub async fn try_acquire(&self, file_upload_id: i64, owner_id: &str) -> Result<AcquireOutcome> {
        self.try_acquire_with_ttl(file_upload_id, owner_id, self.config.claim_ttl())
            .await
    }

    /// Attempt to claim an upload with an explicit TTL
    pub async fn try_acquire_with_ttl(
        &self,
        file_upload_id: i64,
        owner_id: &str,
        ttl: Duration,
    ) -> Result<AcquireOutcome> {
        let query = r#"
            INSERT INTO mdas_upload_claims (file_upload_id, owner_id, acquired_at, expires_at)
            VALUES ($1, $2, NOW(), NOW() + make_interval(secs => $3))
            ON CONFLICT (file_upload_id) DO UPDATE
            SET owner_id = EXCLUDED.owner_id,
                acquired_at = NOW(),
                expires_at = NOW() + make_interval(secs => $3)
            WHERE mdas_upload_claims.expires_at <= NOW()
               OR mdas_upload_claims.owner_id = EXCLUDED.owner_id
            RETURNING file_upload_id, owner_id, acquired_at, expires_at
        "#;

        let claim = sqlx::query_as::<_, ClaimedUpload>(query)
            .bind(file_upload_id)
            .bind(owner_id)
            .bind(ttl.as_secs_f64())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to acquire claim on upload {}: {}", file_upload_id, e);
                CoreError::ClaimError(format!("Claim acquisition failed: {e}"))
            })?;

        match claim {
            Some(claim) => {
                debug!(
                    file_upload_id = file_upload_id,
                    owner_id = owner_id,
                    expires_at = %claim.expires_at,
                    "Claim granted"
                );
                Ok(AcquireOutcome::Granted(claim))
            }
            None => {
                // Denial is ordinary control flow under contention, never an error
                debug!(
                    file_upload_id = file_upload_id,
                    owner_id = owner_id,
                    "Claim denied, upload is held by another owner"
                );
                Ok(AcquireOutcome::Denied)
            }
        }
    }

    /// Release a claim when processing is complete or on error
    #[instrument(skip(self))]
    pub async fn release(&self, file_upload_id: i64, owner_id: &str) -> Result<ReleaseOutcome> {
        let query = r#"
            DELETE FROM mdas_upload_claims
            WHERE file_upload_id = $1 AND owner_id = $2
        "#;

        let result = sqlx::query(query)
            .bind(file_upload_id)
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to release claim on upload {}: {}", file_upload_id, e);
                CoreError::ClaimError(format!("Claim release failed: {e}"))
            })?;

        if result.rows_affected() == 1 {
            debug!(
                file_upload_id = file_upload_id,
                owner_id = owner_id,
                "Claim released"
            );
            Ok(ReleaseOutcome::Released)
        } else {
            debug!(
                file_upload_id = file_upload_id,
                owner_id = owner_id,
                "Claim not released, not owned by this worker"
            );
            Ok(ReleaseOutcome::NotOwner)
        }
    }

    /// Extend a held claim to prevent expiry during long-running passes
    /// (heartbeat). An already-expired claim is never revived here; the
    /// sweeper may have reclaimed it, so the owner must re-acquire.
    #[instrument(skip(self))]
    pub async fn renew(&self, file_upload_id: i64, owner_id: &str) -> Result<RenewOutcome> {
        let query = r#"
            UPDATE mdas_upload_claims
            SET expires_at = NOW() + make_interval(secs => $3)
            WHERE file_upload_id = $1 AND owner_id = $2 AND expires_at > NOW()
            RETURNING expires_at
        "#;

        let renewed = sqlx::query_scalar::<_, DateTime<Utc>>(query)
            .bind(file_upload_id)
            .bind(owner_id)
            .bind(self.config.claim_ttl().as_secs_f64())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to renew claim on upload {}: {}", file_upload_id, e);
                CoreError::ClaimError(format!("Claim renewal failed: {e}"))
            })?;

        match renewed {
            Some(expires_at) => {
                debug!(
                    file_upload_id = file_upload_id,
                    owner_id = owner_id,
                    expires_at = %expires_at,
                    "Claim renewed"
                );
                Ok(RenewOutcome::Renewed(expires_at))
            }
            None => {
                debug!(
                    file_upload_id = file_upload_id,
                    owner_id = owner_id,
                    "Claim not renewed, already expired or not owned"
                );
                Ok(RenewOutcome::Expired)
            }
        }
    }

    /// Expired claims on uploads whose phase is not terminal, oldest expiry
    /// first. The sweeper feeds on this.
    pub async fn list_expired(&self, limit: i64) -> Result<Vec<ClaimedUpload>> {
        let query = r#"
            SELECT c.file_upload_id, c.owner_id, c.acquired_at, c.expires_at
            FROM mdas_upload_claims c
            JOIN mdas_file_uploads u ON u.id = c.file_upload_id
            WHERE c.expires_at <= NOW()
              AND u.phase NOT IN ('archived', 'deleted')
            ORDER BY c.expires_at ASC
            LIMIT $1
        "#;

        let claims = sqlx::query_as::<_, ClaimedUpload>(query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to list expired claims: {}", e);
                CoreError::ClaimError(format!("Expired claim listing failed: {e}"))
            })?;

        Ok(claims)
    }

    /// Current unexpired claim on an upload, if any. A lapsed claim row
    /// grants nothing, so it does not count as a claim here even before
    /// the sweeper removes it.
    pub async fn current_claim(&self, file_upload_id: i64) -> Result<Option<ClaimedUpload>> {
        let query = r#"
            SELECT file_upload_id, owner_id, acquired_at, expires_at
            FROM mdas_upload_claims
            WHERE file_upload_id = $1 AND expires_at > NOW()
        "#;

        let claim = sqlx::query_as::<_, ClaimedUpload>(query)
            .bind(file_upload_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to look up claim on upload {}: {}", file_upload_id, e);
                CoreError::ClaimError(format!("Claim lookup failed: {e}"))
            })?;

        Ok(claim)
    }

    /// Get the claim settings in effect
    pub fn config(&self) -> &ClaimsConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_held_for_measures_elapsed_time() {
        let acquired = Utc::now() - chrono::Duration::minutes(45);
        let claim = ClaimedUpload {
            file_upload_id: 7,
            owner_id: "worker-a".to_string(),
            acquired_at: acquired,
            expires_at: acquired + chrono::Duration::minutes(30),
        };

        let held = claim.held_for(Utc::now());
        assert!(held >= Duration::from_secs(44 * 60));
        assert!(held < Duration::from_secs(46 * 60));
    }

    #[test]
    fn test_outcome_helpers() {
        assert!(!AcquireOutcome::Denied.is_granted());
        assert!(!RenewOutcome::Expired.is_renewed());
        assert_eq!(ReleaseOutcome::NotOwner, ReleaseOutcome::NotOwner);
    }
}
