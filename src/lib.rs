#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # MDAS Core Rust
//!
//! Rust implementation of the merchant settlement-file ingestion core:
//! decoding fixed-width TDDF settlement files into queryable records with
//! crash-safe, exactly-once processing semantics.
//!
//! ## Overview
//!
//! Acquiring banks deliver nightly settlement files as fixed-width
//! mainframe extracts. This crate ingests them end to end: uploads are
//! registered, shape-checked, decoded line by line against versioned
//! layout definitions, de-duplicated by business key, and rolled into
//! tiered aggregates. Every pass is resumable, so a crashed or killed
//! worker never loses work and never double-counts a record.
//!
//! ## Architecture
//!
//! Processing is organized around a database-backed lifecycle. Each
//! upload moves through phases recorded as an append-only transition
//! audit, and every transition happens under an exclusive TTL claim:
//!
//! ```text
//! received -> validated -> decoding -> decoded -> aggregating -> done
//!                 ^                                    |
//!                 +---- retrying <--- failed <---------+
//! ```
//!
//! Workers poll the backlog, claim one upload at a time, and advance it
//! phase by phase. A worker that dies simply stops renewing its claim;
//! the stale-claim sweeper reclaims the upload and processing resumes
//! from the last recorded phase.
//!
//! ## Key Features
//!
//! - **Versioned fixed-width codec**: layout definitions decode EBCDIC-era
//!   record families (batch headers, detail transactions, extensions)
//!   with per-field error capture
//! - **Exactly-once effects**: idempotent upserts keyed by natural
//!   identifiers make decode and aggregation passes safely re-runnable
//! - **TTL claims**: exclusive processing without distributed locks,
//!   enforced transactionally at transition persist time
//! - **Business-key deduplication**: re-delivered transactions are kept
//!   for audit but excluded from every aggregate
//! - **Tiered aggregation**: daily through quarterly buckets selected by
//!   scope volume, invalidated by generation counters
//!
//! ## Module Organization
//!
//! - [`core`] - Unified bootstrap and operation facade
//! - [`models`] - Data layer over PostgreSQL via SQLx
//! - [`state_machine`] - Upload lifecycle with guards and audit
//! - [`claim`] - Claim manager and stale-claim sweeper
//! - [`codec`] - Fixed-width TDDF layout registry and decoder
//! - [`ingestion`] - Validation and decode passes plus the worker loop
//! - [`dedup`] - Business-key duplicate resolution
//! - [`aggregation`] - Tier selection and the aggregate cache
//! - [`storage`] - Uploaded content access
//! - [`config`] - Environment-aware YAML configuration
//! - [`events`] - In-process lifecycle event broadcast
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mdas_core::core::IngestionCore;
//! use mdas_core::models::NewFileUpload;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let core = IngestionCore::new().await?;
//!
//! let upload = core
//!     .register_upload(NewFileUpload {
//!         filename: "settlement-2022-11-28.tddf".to_string(),
//!         size_bytes: 1_048_576,
//!         storage_ref: "2022/11/28/settlement.tddf".to_string(),
//!     })
//!     .await?;
//!
//! let worker = core.build_worker()?;
//! worker.run_once().await?;
//!
//! let status = core.upload_status(upload.id).await?;
//! println!("upload {} is {}", upload.id, status.phase());
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! Unit tests cover the pure logic (codec, partitioning, tier math);
//! database-backed tests are gated behind `#[ignore]` and expect
//! `DATABASE_URL` to point at a migrated PostgreSQL instance:
//!
//! ```bash
//! cargo test --lib              # Unit tests
//! cargo test -- --ignored       # Database integration tests
//! ```

pub mod aggregation;
pub mod claim;
pub mod codec;
pub mod config;
pub mod constants;
pub mod core;
pub mod database;
pub mod dedup;
pub mod error;
pub mod events;
pub mod ingestion;
pub mod logging;
pub mod models;
pub mod state_machine;
pub mod storage;

pub use aggregation::{select_tier, AggregationTier, TieredAggregationCache};
pub use claim::{AcquireOutcome, ClaimManager, ClaimedUpload, StaleClaimSweeper};
pub use codec::{LayoutRegistry, RecordType, TddfDecoder};
pub use config::{ConfigManager, MdasConfig};
pub use constants::{system, DedupBasis, LineOutcome, UploadPhase};
// Re-export constants events with different name to avoid conflict
pub use constants::events as system_events;
pub use crate::core::{IngestionCore, UploadStatus};
pub use dedup::{DedupReport, DeduplicationEngine};
pub use error::{CoreError, Result};
pub use events::{EventPublisher, PublishedEvent};
pub use ingestion::{DecodeRunner, IngestionWorker, UploadValidator};
pub use models::{AggregateBucket, ExtractRecord, FileUpload, RawLine};
pub use state_machine::{UploadEvent, UploadState, UploadStateMachine};
