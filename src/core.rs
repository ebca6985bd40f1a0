//! # Unified Ingestion Core
//!
//! Single bootstrap path for the settlement ingestion system. Every entry
//! point builds an [`IngestionCore`] and gets the same component wiring:
//! one pool, one event publisher, one content store, one claim manager.
//!
//! ## Architecture
//!
//! - Binaries and embedding hosts call [`IngestionCore::new`] for
//!   environment-aware configuration loading
//! - Tests call [`IngestionCore::from_pool_and_config`] with a pool they
//!   already hold
//! - Long-running components (worker, sweeper) are built from the core so
//!   they share its configuration and event channel
//!
//! ## Usage
//!
//! ```no_run
//! use mdas_core::core::IngestionCore;
//! use mdas_core::models::NewFileUpload;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let core = IngestionCore::new().await?;
//! let upload = core
//!     .register_upload(NewFileUpload {
//!         filename: "settlement-2022-11-28.tddf".to_string(),
//!         size_bytes: 1_048_576,
//!         storage_ref: "2022/11/28/settlement.tddf".to_string(),
//!     })
//!     .await?;
//!
//! let status = core.upload_status(upload.id).await?;
//! println!("upload {} is {}", upload.id, status.phase());
//! # Ok(())
//! # }
//! ```

use crate::aggregation::TieredAggregationCache;
use crate::claim::{AcquireOutcome, ClaimManager, ClaimedUpload, StaleClaimSweeper};
use crate::config::ConfigManager;
use crate::constants::events;
use crate::error::{CoreError, Result};
use crate::events::publisher::EventPublisher;
use crate::ingestion::IngestionWorker;
use crate::models::{AggregateBucket, FileUpload, NewFileUpload, PhaseCount};
use crate::state_machine::{UploadEvent, UploadState, UploadStateMachine};
use crate::storage::{ContentStore, LocalContentStore};
use chrono::NaiveDate;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Point-in-time view of one upload: the row plus any live claim
#[derive(Debug, Clone)]
pub struct UploadStatus {
    pub upload: FileUpload,
    pub claim: Option<ClaimedUpload>,
}

impl UploadStatus {
    /// Authoritative phase, read from the denormalized column that every
    /// transition refreshes transactionally
    pub fn phase(&self) -> UploadState {
        self.upload.current_phase().unwrap_or_default()
    }

    /// Whether some owner currently holds an unexpired claim
    pub fn is_claimed(&self) -> bool {
        self.claim.is_some()
    }
}

/// Unified ingestion core that all entry points use
pub struct IngestionCore {
    /// Database connection pool shared by every component
    pub database_pool: PgPool,

    /// Claim coordination for exclusive upload processing
    pub claim_manager: Arc<ClaimManager>,

    /// Uploaded file content access
    pub content_store: Arc<dyn ContentStore>,

    /// In-process lifecycle event channel
    pub event_publisher: EventPublisher,

    /// Tiered aggregate cache serving read queries
    pub aggregation_cache: Arc<TieredAggregationCache>,

    config_manager: Arc<ConfigManager>,
}

impl IngestionCore {
    /// Create an IngestionCore with environment-aware configuration loading
    pub async fn new() -> Result<Self> {
        let config_manager = ConfigManager::load()
            .map_err(|e| CoreError::ConfigurationError(format!("Failed to load configuration: {e}")))?;

        Self::from_config(config_manager).await
    }

    /// Create an IngestionCore from a loaded configuration manager
    pub async fn from_config(config_manager: Arc<ConfigManager>) -> Result<Self> {
        let config = config_manager.config();

        let database_pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.database.pool)
            .acquire_timeout(config.checkout_timeout())
            .connect(&config.database_url())
            .await
            .map_err(|e| {
                CoreError::DatabaseError(format!("Failed to connect to database: {e}"))
            })?;

        info!(
            environment = config_manager.environment(),
            pool_size = config.database.pool,
            "Database connection established from configuration"
        );

        Self::from_pool_and_config(database_pool, config_manager)
    }

    /// Create an IngestionCore around an existing pool.
    ///
    /// The unified wiring lives here so every entry point gets identical
    /// component initialization.
    pub fn from_pool_and_config(
        database_pool: PgPool,
        config_manager: Arc<ConfigManager>,
    ) -> Result<Self> {
        let config = config_manager.config();

        let event_publisher = EventPublisher::new(config.events.broadcast_buffer_size);
        let claim_manager = Arc::new(ClaimManager::with_config(
            database_pool.clone(),
            config.claims.clone(),
        ));
        let content_store: Arc<dyn ContentStore> =
            Arc::new(LocalContentStore::from_config(&config.storage));
        let aggregation_cache = Arc::new(TieredAggregationCache::new(
            database_pool.clone(),
            config.aggregation.clone(),
            event_publisher.clone(),
        ));

        info!(
            environment = config_manager.environment(),
            layout_version = %config.ingestion.layout_version,
            "Ingestion core components created"
        );

        Ok(Self {
            database_pool,
            claim_manager,
            content_store,
            event_publisher,
            aggregation_cache,
            config_manager,
        })
    }

    /// The configuration this core was built from
    pub fn config_manager(&self) -> &Arc<ConfigManager> {
        &self.config_manager
    }

    /// Build an ingestion worker sharing this core's pool, store, and
    /// event channel. Each call produces a worker with its own claim
    /// owner identity.
    pub fn build_worker(&self) -> Result<IngestionWorker> {
        IngestionWorker::new(
            self.database_pool.clone(),
            self.config_manager.config(),
            self.content_store.clone(),
            self.event_publisher.clone(),
        )
    }

    /// Build a stale-claim sweeper sharing this core's pool and event
    /// channel
    pub fn build_sweeper(&self) -> StaleClaimSweeper {
        StaleClaimSweeper::new(
            self.database_pool.clone(),
            self.config_manager.config().sweeper.clone(),
            self.event_publisher.clone(),
        )
    }

    /// Register a new upload in `received`, ready for worker pickup
    #[instrument(skip(self, new_upload), fields(filename = %new_upload.filename))]
    pub async fn register_upload(&self, new_upload: NewFileUpload) -> Result<FileUpload> {
        let upload = FileUpload::create(&self.database_pool, new_upload).await?;

        info!(
            file_upload_id = upload.id,
            filename = %upload.filename,
            size_bytes = upload.size_bytes,
            "📥 Registered upload"
        );

        self.event_publisher
            .publish(
                events::UPLOAD_REGISTERED,
                serde_json::json!({
                    "file_upload_id": upload.id,
                    "filename": upload.filename,
                    "size_bytes": upload.size_bytes,
                    "storage_ref": upload.storage_ref,
                }),
            )
            .await
            .map_err(|e| CoreError::ValidationError(format!("Registration event publish failed: {e}")))?;

        Ok(upload)
    }

    /// Current phase, counts, errors, and claim for one upload
    pub async fn upload_status(&self, file_upload_id: i64) -> Result<UploadStatus> {
        let upload = FileUpload::find_by_id(&self.database_pool, file_upload_id)
            .await?
            .ok_or_else(|| {
                CoreError::ValidationError(format!("Upload {file_upload_id} not found"))
            })?;
        let claim = self.claim_manager.current_claim(file_upload_id).await?;

        Ok(UploadStatus { upload, claim })
    }

    /// Apply one lifecycle event under a caller-held claim.
    ///
    /// The caller must already own the upload's claim; the transition's
    /// claim guard rejects everything else. Workers do not use this path,
    /// it exists for operators and embedding hosts driving uploads
    /// manually.
    pub async fn advance_upload(
        &self,
        file_upload_id: i64,
        owner_id: &str,
        event: UploadEvent,
    ) -> Result<UploadState> {
        let upload = FileUpload::find_by_id(&self.database_pool, file_upload_id)
            .await?
            .ok_or_else(|| {
                CoreError::ValidationError(format!("Upload {file_upload_id} not found"))
            })?;

        let mut machine = UploadStateMachine::new(
            upload,
            owner_id,
            self.database_pool.clone(),
            self.event_publisher.clone(),
        );
        Ok(machine.transition(event).await?)
    }

    /// Requeue a failed upload for another processing attempt.
    ///
    /// Takes a short-lived claim under the operator's identity, records
    /// the retry transition, and releases. The upload lands in `retrying`
    /// and the next worker pass picks it up at validation. The retry
    /// guard refuses uploads whose latest failure was fatal.
    #[instrument(skip(self))]
    pub async fn retry_upload(&self, file_upload_id: i64, operator_id: &str) -> Result<UploadState> {
        self.with_operator_claim(file_upload_id, operator_id, UploadEvent::Retry)
            .await
    }

    /// Soft-archive a finished upload, recording who and why
    #[instrument(skip(self))]
    pub async fn archive_upload(
        &self,
        file_upload_id: i64,
        actor: &str,
        reason: &str,
    ) -> Result<UploadState> {
        self.with_operator_claim(
            file_upload_id,
            actor,
            UploadEvent::Archive {
                actor: actor.to_string(),
                reason: reason.to_string(),
            },
        )
        .await
    }

    /// Soft-delete a finished upload, recording who and why
    #[instrument(skip(self))]
    pub async fn delete_upload(
        &self,
        file_upload_id: i64,
        actor: &str,
        reason: &str,
    ) -> Result<UploadState> {
        self.with_operator_claim(
            file_upload_id,
            actor,
            UploadEvent::Delete {
                actor: actor.to_string(),
                reason: reason.to_string(),
            },
        )
        .await
    }

    /// Claim, transition, release. Operator actions hold the claim only
    /// as long as the single transition takes.
    async fn with_operator_claim(
        &self,
        file_upload_id: i64,
        operator_id: &str,
        event: UploadEvent,
    ) -> Result<UploadState> {
        let claimed = match self
            .claim_manager
            .try_acquire(file_upload_id, operator_id)
            .await?
        {
            AcquireOutcome::Granted(claimed) => claimed,
            AcquireOutcome::Denied => {
                return Err(CoreError::ClaimError(format!(
                    "Upload {file_upload_id} is claimed by another owner"
                )));
            }
        };

        let result = self
            .advance_upload(file_upload_id, operator_id, event)
            .await;

        // Release even when the transition failed; a lingering operator
        // claim would block workers until it expired.
        if let Err(e) = self
            .claim_manager
            .release(claimed.file_upload_id, operator_id)
            .await
        {
            warn!(
                file_upload_id,
                operator_id,
                error = %e,
                "Failed to release operator claim; it will expire on its own"
            );
        }

        result
    }

    /// Aggregate metrics for the period containing `on`, served from the
    /// tiered cache
    pub async fn request_aggregate(&self, scope: &str, on: NaiveDate) -> Result<AggregateBucket> {
        self.aggregation_cache.get_aggregate(scope, on).await
    }

    /// Backlog depth per phase across all uploads
    pub async fn queue_status(&self) -> Result<Vec<PhaseCount>> {
        Ok(FileUpload::counts_by_phase(&self.database_pool).await?)
    }

    /// Verify the database answers queries
    pub async fn health_check(&self) -> Result<bool> {
        let healthy: i32 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.database_pool)
            .await?;
        Ok(healthy == 1)
    }
}
