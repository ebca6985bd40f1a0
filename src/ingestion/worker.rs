//! # Ingestion Worker
//!
//! Claim-scoped backlog processor that advances uploads through the
//! pipeline phases.
//!
//! ## Architecture
//!
//! The worker polls the backlog phases in pipeline order, claims one
//! upload at a time, and drives it through every remaining phase under
//! that claim:
//!
//! ```text
//! received/retrying --validate--> validated --decode--> decoded --aggregate--> done
//! ```
//!
//! Each phase step ends with a recorded transition, so a worker killed
//! mid-file leaves a resumable database state behind: the claim expires,
//! the sweeper reclaims it, and the next owner continues from the last
//! recorded phase. Between steps the worker renews its claim; a renewal
//! that comes back expired means another owner may already be working the
//! upload, and the worker abandons it immediately.
//!
//! ## Key Features
//!
//! - **Exclusive processing**: every phase transition happens under a
//!   held claim, checked again transactionally at persist time
//! - **Bounded transient retry**: content-store reads retry with
//!   exponential backoff before a file-level failure is recorded
//! - **Crash safety**: an unexpected step error records a retryable
//!   file-level failure; if even that write fails, the claim is simply
//!   left to expire for the sweeper

use crate::claim::{AcquireOutcome, ClaimManager, ReleaseOutcome, RenewOutcome};
use crate::codec::{LayoutRegistry, TddfDecoder};
use crate::config::{IngestionConfig, MdasConfig};
use crate::constants::{events, system};
use crate::dedup::DeduplicationEngine;
use crate::error::{CoreError, Result};
use crate::events::publisher::EventPublisher;
use crate::ingestion::decoder_run::DecodeRunner;
use crate::ingestion::validator::{UploadValidator, ValidationVerdict};
use crate::models::FileUpload;
use crate::state_machine::{UploadEvent, UploadState, UploadStateMachine};
use crate::storage::{ContentStore, StorageError};
use sqlx::PgPool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Phases the worker polls for claimable work, in pipeline order.
/// Retrying uploads re-enter at validation.
const BACKLOG_PHASES: [UploadState; 4] = [
    UploadState::Received,
    UploadState::Retrying,
    UploadState::Validated,
    UploadState::Decoded,
];

/// Backlog rows fetched per phase per pass
const BACKLOG_BATCH_LIMIT: i64 = 25;

/// Counters for one worker pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Backlog entries examined
    pub files_examined: usize,
    /// Claims granted to this worker
    pub files_claimed: usize,
    /// Uploads that reached `done` this pass
    pub files_completed: usize,
    /// Uploads that recorded a file-level failure this pass
    pub files_failed: usize,
    /// Claims another owner already held
    pub claims_denied: usize,
}

/// Backlog processor owning one claim identity
pub struct IngestionWorker {
    pool: PgPool,
    config: IngestionConfig,
    claim_manager: ClaimManager,
    content_store: Arc<dyn ContentStore>,
    event_publisher: EventPublisher,
    validator: UploadValidator,
    decode_runner: DecodeRunner,
    dedup_engine: DeduplicationEngine,
    owner_id: String,
    shutdown_notify: Arc<Notify>,
    running: Arc<AtomicBool>,
}

impl IngestionWorker {
    /// Create a worker from the loaded configuration.
    ///
    /// Fails when the configured layout version is not registered.
    pub fn new(
        pool: PgPool,
        config: &MdasConfig,
        content_store: Arc<dyn ContentStore>,
        event_publisher: EventPublisher,
    ) -> Result<Self> {
        let registry = LayoutRegistry::builtin()
            .map_err(|e| CoreError::CodecError(format!("Layout registry init failed: {e}")))?;
        let layout = registry.get(&config.ingestion.layout_version).map_err(|e| {
            CoreError::ConfigurationError(format!(
                "Configured layout version '{}' is not available: {e}",
                config.ingestion.layout_version
            ))
        })?;

        let owner_id = format!("{}-{}", system::WORKER_OWNER_PREFIX, Uuid::new_v4());
        Ok(Self {
            claim_manager: ClaimManager::with_config(pool.clone(), config.claims.clone()),
            validator: UploadValidator::new(pool.clone()),
            decode_runner: DecodeRunner::new(pool.clone(), TddfDecoder::new(layout)),
            dedup_engine: DeduplicationEngine::new(pool.clone(), event_publisher.clone()),
            config: config.ingestion.clone(),
            content_store,
            event_publisher,
            owner_id,
            shutdown_notify: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(false)),
            pool,
        })
    }

    /// The claim owner identity this worker writes into claim rows
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Signal the poll loop to stop after the current pass
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.shutdown_notify.notify_waiters();
    }

    /// Main poll loop. Runs one pass per configured interval until
    /// stopped; a failed pass is logged and the loop continues.
    pub async fn run(&self) -> Result<()> {
        self.running.store(true, Ordering::Release);
        info!(
            owner_id = %self.owner_id,
            layout_version = self.decode_runner.layout_name(),
            poll_interval_seconds = self.config.poll_interval_seconds,
            "Starting ingestion worker loop"
        );

        while self.running.load(Ordering::Acquire) {
            match self.run_once().await {
                Ok(stats) if stats.files_claimed > 0 => {
                    info!(
                        examined = stats.files_examined,
                        claimed = stats.files_claimed,
                        completed = stats.files_completed,
                        failed = stats.files_failed,
                        denied = stats.claims_denied,
                        "Worker pass complete"
                    );
                }
                Ok(_) => {
                    debug!("No claimable work in backlog");
                }
                Err(e) => {
                    error!(error = %e, "Worker pass failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval()) => {},
                _ = self.shutdown_notify.notified() => {
                    debug!("Shutdown notification received");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::Release);
        info!(owner_id = %self.owner_id, "Ingestion worker loop ended");
        Ok(())
    }

    /// One backlog pass: claim and process every upload this worker can
    /// win, phase by phase in pipeline order.
    #[instrument(skip(self), fields(owner_id = %self.owner_id))]
    pub async fn run_once(&self) -> Result<WorkerStats> {
        let mut stats = WorkerStats::default();

        for phase in BACKLOG_PHASES {
            let backlog = FileUpload::list_in_phase(&self.pool, phase, BACKLOG_BATCH_LIMIT)
                .await
                .map_err(|e| {
                    error!(phase = %phase, error = %e, "Backlog query failed");
                    CoreError::DatabaseError(format!("Backlog query failed: {e}"))
                })?;

            for upload in backlog {
                stats.files_examined += 1;

                let claimed = match self
                    .claim_manager
                    .try_acquire(upload.id, &self.owner_id)
                    .await?
                {
                    AcquireOutcome::Granted(claimed) => claimed,
                    AcquireOutcome::Denied => {
                        stats.claims_denied += 1;
                        continue;
                    }
                };
                stats.files_claimed += 1;

                self.event_publisher
                    .publish(
                        events::CLAIM_ACQUIRED,
                        serde_json::json!({
                            "file_upload_id": upload.id,
                            "owner_id": self.owner_id,
                            "expires_at": claimed.expires_at,
                        }),
                    )
                    .await
                    .map_err(|e| CoreError::ClaimError(format!("Claim event publish failed: {e}")))?;

                match self.process_claimed(&upload).await {
                    Ok(UploadState::Done) => stats.files_completed += 1,
                    Ok(UploadState::Failed) => stats.files_failed += 1,
                    Ok(_) => {}
                    Err(e) => {
                        error!(
                            file_upload_id = upload.id,
                            error = %e,
                            "Processing aborted under claim"
                        );
                    }
                }

                if let ReleaseOutcome::Released =
                    self.claim_manager.release(upload.id, &self.owner_id).await?
                {
                    self.event_publisher
                        .publish(
                            events::CLAIM_RELEASED,
                            serde_json::json!({
                                "file_upload_id": upload.id,
                                "owner_id": self.owner_id,
                            }),
                        )
                        .await
                        .map_err(|e| {
                            CoreError::ClaimError(format!("Claim event publish failed: {e}"))
                        })?;
                }
            }
        }

        Ok(stats)
    }

    /// Advance one claimed upload as far as it will go.
    ///
    /// Each iteration re-reads the recorded phase, so an upload adopted
    /// mid-pipeline (after a claim expiry) continues from wherever its
    /// previous owner left off. Returns the phase the upload rested in
    /// when the worker let go of it.
    async fn process_claimed(&self, upload: &FileUpload) -> Result<UploadState> {
        let mut machine = UploadStateMachine::new(
            upload.clone(),
            self.owner_id.clone(),
            self.pool.clone(),
            self.event_publisher.clone(),
        );

        loop {
            let state = machine.current_state().await?;
            let step_result = match state {
                UploadState::Received | UploadState::Retrying => {
                    self.validate_step(&mut machine, upload).await
                }
                UploadState::Validated | UploadState::Decoding => {
                    self.decode_step(&mut machine, upload, state).await
                }
                UploadState::Decoded | UploadState::Aggregating => {
                    self.aggregate_step(&mut machine, upload, state).await
                }
                resting => return Ok(resting),
            };

            if let Err(step_err) = step_result {
                error!(
                    file_upload_id = upload.id,
                    phase = %state,
                    error = %step_err,
                    "Phase step failed; recording file-level failure"
                );
                // If this write fails too, the claim is left to expire and
                // the sweeper picks the upload back up.
                let landed = machine
                    .transition(UploadEvent::fail_with_error(format!(
                        "{} step failed: {step_err}",
                        state
                    )))
                    .await?;
                return Ok(landed);
            }

            match self.claim_manager.renew(upload.id, &self.owner_id).await? {
                RenewOutcome::Renewed(_) => {}
                RenewOutcome::Expired => {
                    warn!(
                        file_upload_id = upload.id,
                        "Claim expired mid-processing; abandoning upload"
                    );
                    return Ok(machine.current_state().await?);
                }
            }
        }
    }

    /// received/retrying -> validated, or a recorded failure
    async fn validate_step(
        &self,
        machine: &mut UploadStateMachine,
        upload: &FileUpload,
    ) -> Result<()> {
        let lines = match self.read_content(&upload.storage_ref).await {
            Ok(lines) => lines,
            Err(e) if e.is_transient() => {
                // Retries already exhausted inside read_content
                machine
                    .transition(UploadEvent::fail_with_error(format!(
                        "content read failed: {e}"
                    )))
                    .await?;
                return Ok(());
            }
            Err(e) => {
                machine
                    .transition(UploadEvent::fail_fatal(format!("content unavailable: {e}")))
                    .await?;
                return Ok(());
            }
        };

        match self.validator.validate(upload.id, &lines).await? {
            ValidationVerdict::Passed(_) => {
                machine.transition(UploadEvent::Validate).await?;
            }
            ValidationVerdict::Unprocessable { reason } => {
                warn!(
                    file_upload_id = upload.id,
                    reason = %reason,
                    "Upload failed validation"
                );
                machine.transition(UploadEvent::fail_fatal(reason)).await?;
            }
        }
        Ok(())
    }

    /// validated/decoding -> decoded, or a recorded failure when the pass
    /// produces no records
    async fn decode_step(
        &self,
        machine: &mut UploadStateMachine,
        upload: &FileUpload,
        entered_from: UploadState,
    ) -> Result<()> {
        if entered_from == UploadState::Validated {
            machine.transition(UploadEvent::StartDecoding).await?;
            FileUpload::set_layout_version(&self.pool, upload.id, self.decode_runner.layout_name())
                .await?;
        }

        let report = self.decode_runner.run(upload.id).await?;
        if report.produced_nothing() {
            machine
                .transition(UploadEvent::fail_with_error(
                    "decode pass produced no records",
                ))
                .await?;
        } else {
            machine.transition(UploadEvent::FinishDecoding).await?;
        }
        Ok(())
    }

    /// decoded/aggregating -> done. A failure here rolls the upload back
    /// to decoded rather than failing it outright.
    async fn aggregate_step(
        &self,
        machine: &mut UploadStateMachine,
        upload: &FileUpload,
        entered_from: UploadState,
    ) -> Result<()> {
        if entered_from == UploadState::Decoded {
            machine.transition(UploadEvent::StartAggregating).await?;
        }

        let report = self.dedup_engine.run_for_upload(upload.id).await?;
        machine.transition(UploadEvent::Complete).await?;
        info!(
            file_upload_id = upload.id,
            duplicate_groups = report.total_groups(),
            excess_records = report.total_excess(),
            "Upload processing complete"
        );
        Ok(())
    }

    /// Read upload content with bounded exponential backoff on transient
    /// storage errors. Non-transient errors return immediately.
    async fn read_content(&self, storage_ref: &str) -> std::result::Result<Vec<String>, StorageError> {
        let max_attempts = self.config.max_transient_retries.max(1);
        let mut attempt: u32 = 0;
        loop {
            match self.content_store.read_lines(storage_ref).await {
                Ok(lines) => return Ok(lines),
                Err(e) if e.is_transient() && attempt + 1 < max_attempts => {
                    let backoff = Duration::from_secs(1u64 << attempt);
                    warn!(
                        storage_ref,
                        attempt = attempt + 1,
                        backoff_seconds = backoff.as_secs(),
                        error = %e,
                        "Transient storage error; backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
