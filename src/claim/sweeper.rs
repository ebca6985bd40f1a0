//! # Stale-Claim Sweeper
//!
//! Background loop that finds uploads whose claim expired mid-flight (a
//! worker crashed or stalled past its TTL) and returns them to a
//! processable state. Reclaiming uses the same conditional-write discipline
//! as ordinary acquisition: the sweeper first takes the expired claim under
//! its own owner id, so it can never trample a live renewal.

use crate::claim::manager::{AcquireOutcome, ClaimManager, ClaimedUpload};
use crate::config::SweeperConfig;
use crate::constants::{events, system};
use crate::error::{CoreError, Result};
use crate::events::publisher::EventPublisher;
use crate::models::FileUpload;
use crate::state_machine::{UploadEvent, UploadState, UploadStateMachine};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Expired claims examined per sweep pass
const SWEEP_BATCH_LIMIT: i64 = 100;

/// Counters from one sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    /// Expired claims found on non-terminal uploads
    pub scanned: usize,
    /// Claims taken over and resolved by this sweeper
    pub reclaimed: usize,
    /// Claims that were renewed or taken by someone else first
    pub skipped_by_race: usize,
}

/// Background sweeper for claims that expired while work was in flight
pub struct StaleClaimSweeper {
    pool: PgPool,
    claim_manager: ClaimManager,
    event_publisher: EventPublisher,
    config: SweeperConfig,
    owner_id: String,
    shutdown_notify: Arc<Notify>,
    running: Arc<AtomicBool>,
}

impl StaleClaimSweeper {
    /// Create a new sweeper with its own claim owner identity
    pub fn new(pool: PgPool, config: SweeperConfig, event_publisher: EventPublisher) -> Self {
        let owner_id = format!("{}-{}", system::SWEEPER_OWNER_PREFIX, Uuid::new_v4());
        Self {
            claim_manager: ClaimManager::new(pool.clone()),
            pool,
            event_publisher,
            config,
            owner_id,
            shutdown_notify: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Claim owner identity this sweeper reclaims under
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Request the sweep loop to stop after the current pass
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.shutdown_notify.notify_waiters();
    }

    /// Main sweep loop. Runs one pass per configured interval until
    /// stopped; a failed pass is logged and the loop continues.
    pub async fn run(&self) -> Result<()> {
        if !self.config.enabled {
            info!(owner_id = %self.owner_id, "Sweeper disabled by configuration");
            return Ok(());
        }

        self.running.store(true, Ordering::Release);
        info!(
            owner_id = %self.owner_id,
            interval_seconds = self.config.sweep_interval_seconds,
            requeue_on_reclaim = self.config.requeue_on_reclaim,
            "Starting stale-claim sweep loop"
        );

        while self.running.load(Ordering::Acquire) {
            match self.sweep_once().await {
                Ok(stats) if stats.scanned > 0 => {
                    info!(
                        scanned = stats.scanned,
                        reclaimed = stats.reclaimed,
                        skipped_by_race = stats.skipped_by_race,
                        "Sweep pass complete"
                    );
                }
                Ok(_) => {
                    debug!("Sweep pass found no expired claims");
                }
                Err(e) => {
                    error!(error = %e, "Sweep pass failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.sweep_interval()) => {},
                _ = self.shutdown_notify.notified() => {
                    debug!("Shutdown notification received");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::Release);
        info!(owner_id = %self.owner_id, "Sweep loop ended");
        Ok(())
    }

    /// One sweep pass over currently-expired claims
    #[instrument(skip(self), fields(owner_id = %self.owner_id))]
    pub async fn sweep_once(&self) -> Result<SweepStats> {
        let expired = self.claim_manager.list_expired(SWEEP_BATCH_LIMIT).await?;

        let mut stats = SweepStats {
            scanned: expired.len(),
            ..SweepStats::default()
        };

        for claim in expired {
            match self
                .claim_manager
                .try_acquire(claim.file_upload_id, &self.owner_id)
                .await?
            {
                AcquireOutcome::Denied => {
                    // The previous owner renewed in time, or a competing
                    // sweeper won the conditional write. Ordinary control
                    // flow either way.
                    stats.skipped_by_race += 1;
                    debug!(
                        file_upload_id = claim.file_upload_id,
                        previous_owner = %claim.owner_id,
                        "Expired claim taken elsewhere before reclaim"
                    );
                }
                AcquireOutcome::Granted(_) => {
                    match self.reclaim(&claim).await {
                        Ok(()) => stats.reclaimed += 1,
                        Err(e) => {
                            error!(
                                file_upload_id = claim.file_upload_id,
                                error = %e,
                                "Reclaim failed, claim will lapse for a later pass"
                            );
                        }
                    }

                    self.claim_manager
                        .release(claim.file_upload_id, &self.owner_id)
                        .await?;
                }
            }
        }

        Ok(stats)
    }

    /// Resolve one reclaimed upload: fail it with the expiry reason, then
    /// optionally walk it back to `validated` for automatic retry.
    async fn reclaim(&self, expired: &ClaimedUpload) -> Result<()> {
        let upload = match FileUpload::find_by_id(&self.pool, expired.file_upload_id).await? {
            Some(upload) => upload,
            None => {
                warn!(
                    file_upload_id = expired.file_upload_id,
                    "Expired claim references a missing upload"
                );
                return Ok(());
            }
        };

        let elapsed = expired.held_for(chrono::Utc::now());
        let mut machine = UploadStateMachine::new(
            upload,
            self.owner_id.clone(),
            self.pool.clone(),
            self.event_publisher.clone(),
        );

        let current = machine.current_state().await?;
        if matches!(current, UploadState::Done | UploadState::Failed) {
            // Already at rest; dropping the stale claim row is all that is needed
            debug!(
                file_upload_id = expired.file_upload_id,
                phase = %current,
                "Stale claim cleared without phase change"
            );
            return Ok(());
        }

        let landed = machine
            .transition(UploadEvent::fail_with_error(system::RECLAIM_REASON))
            .await?;

        // A claim that lapsed mid-aggregation lands back in `decoded`,
        // which is already the retry point for downstream work.
        let mut requeued = landed == UploadState::Decoded;
        if self.config.requeue_on_reclaim && landed == UploadState::Failed {
            machine.transition(UploadEvent::Retry).await?;
            machine.transition(UploadEvent::Validate).await?;
            requeued = true;
        }

        info!(
            file_upload_id = expired.file_upload_id,
            previous_owner = %expired.owner_id,
            elapsed_seconds = elapsed.as_secs(),
            requeued = requeued,
            "🔒 Reclaimed expired claim"
        );

        self.event_publisher
            .publish(
                events::CLAIM_RECLAIMED,
                serde_json::json!({
                    "file_upload_id": expired.file_upload_id,
                    "previous_owner": expired.owner_id,
                    "elapsed_seconds": elapsed.as_secs(),
                    "requeued": requeued,
                }),
            )
            .await
            .map_err(|e| CoreError::ClaimError(format!("Reclaim event publish failed: {e}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweeper_owner_ids_are_unique_and_prefixed() {
        let config = SweeperConfig::default();
        let a = format!("{}-{}", system::SWEEPER_OWNER_PREFIX, Uuid::new_v4());
        let b = format!("{}-{}", system::SWEEPER_OWNER_PREFIX, Uuid::new_v4());
        assert!(a.starts_with("sweeper-"));
        assert_ne!(a, b);
        assert!(config.enabled);
    }

    #[test]
    fn test_sweep_stats_default_is_zeroed() {
        let stats = SweepStats::default();
        assert_eq!(stats.scanned, 0);
        assert_eq!(stats.reclaimed, 0);
        assert_eq!(stats.skipped_by_race, 0);
    }
}
