//! # Database Operations
//!
//! SQLx-backed Postgres layer: connection management with pooling and the
//! migration system with advisory-lock concurrency control.
//!
//! ## Key Components
//!
//! - [`connection`] - Database connection management and pooling
//! - [`migrations`] - Schema migration system with concurrency control
//!
//! All query execution lives with the row types in [`crate::models`]; this
//! module only owns the pool and the schema.

pub mod connection;
pub mod migrations;

pub use connection::DatabaseConnection;
pub use migrations::DatabaseMigrations;
