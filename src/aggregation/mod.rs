//! # Workload-Adaptive Aggregation
//!
//! Pre-aggregated reporting metrics over decoded settlement records. The
//! tier module decides bucket granularity from scope volume; the cache
//! module computes, persists, and serves the buckets.

pub mod cache;
pub mod tier;

// Re-export key types for convenience
pub use cache::TieredAggregationCache;
pub use tier::{select_tier, AggregationTier};
