//! # Lifecycle Events
//!
//! In-process broadcast of ingestion lifecycle events. Every durable state
//! change (phase transitions, claim churn, aggregate rebuilds) publishes a
//! named event with a JSON context so operational tooling can observe the
//! pipeline without polling the database.

pub mod publisher;

// Re-export key types for convenience
pub use publisher::{EventPublisher, PublishError, PublishedEvent};
