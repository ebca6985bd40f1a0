//! # Data Models
//!
//! SQLx row types and the queries that read and write them. Every table
//! keyed by natural identifiers writes through idempotent upserts so that
//! crash-and-retry processing never duplicates rows.

pub mod aggregate_bucket;
pub mod extract_record;
pub mod file_upload;
pub mod raw_line;

pub use aggregate_bucket::{AggregateBucket, NewAggregateBucket, ScopeGeneration};
pub use extract_record::{ExtractRecord, NewExtractRecord, ScopeMetrics};
pub use file_upload::{FileUpload, LineCounts, NewFileUpload, PhaseCount};
pub use raw_line::{NewRawLine, OutcomeCount, RawLine};
