//! # Ingestion Pipeline
//!
//! The passes that move an upload from raw bytes to aggregate-ready
//! records, and the worker loop that runs them under claims.
//!
//! - [`validator`]: shape-checks content and writes the immutable raw
//!   line inventory
//! - [`decoder_run`]: decodes pending lines into extract records, one
//!   committed line at a time
//! - [`worker`]: claims backlog uploads and drives them through the
//!   phase state machine

pub mod decoder_run;
pub mod validator;
pub mod worker;

pub use decoder_run::{DecodeRunReport, DecodeRunner};
pub use validator::{UploadValidator, ValidationReport, ValidationVerdict};
pub use worker::{IngestionWorker, WorkerStats};
