//! # Database Migration System
//!
//! Handles both development and test environments with proper concurrency
//! control.
//!
//! ## Overview
//!
//! This module implements a hybrid migration strategy:
//! - **Development/Production**: Incremental migrations with version tracking
//! - **Testing**: Fresh schema rebuilds with database-level locking for
//!   parallel execution
//!
//! Migration SQL is embedded at compile time, so the library migrates
//! correctly regardless of the process working directory.
//!
//! ## Concurrency Control
//!
//! PostgreSQL advisory locks prevent race conditions when multiple test
//! threads attempt to rebuild the schema simultaneously:
//!
//! ```sql
//! -- One thread acquires exclusive lock
//! SELECT pg_try_advisory_lock(7726335553042199)
//!
//! -- Other threads wait for schema to be ready
//! SELECT EXISTS (
//!     SELECT FROM information_schema.tables
//!     WHERE table_name = 'mdas_schema_migrations'
//! )
//! ```

use sqlx::{PgPool, Row};

/// A single embedded migration: version timestamp, human-readable name,
/// and the SQL body.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Version timestamp (YYYYMMDDHHMMSS format)
    pub version: &'static str,
    /// Human-readable migration name
    pub name: &'static str,
    pub sql: &'static str,
}

/// All migrations, in version order.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "20250301000000",
        name: "ingestion schema",
        sql: include_str!("../../migrations/20250301000000_ingestion_schema.sql"),
    },
    Migration {
        version: "20250412000000",
        name: "aggregation tables",
        sql: include_str!("../../migrations/20250412000000_aggregation_tables.sql"),
    },
];

/// Manages database schema migrations with concurrency safety.
pub struct DatabaseMigrations;

impl DatabaseMigrations {
    /// Run all migrations in order
    pub async fn run_all(pool: &PgPool) -> Result<(), sqlx::Error> {
        let database_url = std::env::var("DATABASE_URL").unwrap_or_default();
        let is_test = database_url.contains("test");

        if is_test {
            // For test databases, database-level locking ensures only one
            // thread initializes the schema.
            Self::run_fresh_schema_with_lock(pool).await?;
            return Ok(());
        }

        Self::ensure_migration_table(pool).await?;
        Self::run_outstanding_migrations(pool).await
    }

    /// Run fresh schema for tests with database-level locking
    async fn run_fresh_schema_with_lock(pool: &PgPool) -> Result<(), sqlx::Error> {
        // Lock key: deterministic hash of "mdas_test_schema_init"
        const LOCK_KEY: i64 = 7726335553042199;

        let lock_acquired = sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1)")
            .bind(LOCK_KEY)
            .fetch_one(pool)
            .await?;

        if lock_acquired {
            let result = Self::run_fresh_schema(pool).await;

            // Always release the lock
            sqlx::query("SELECT pg_advisory_unlock($1)")
                .bind(LOCK_KEY)
                .execute(pool)
                .await?;

            result
        } else {
            Self::wait_for_schema_ready(pool).await
        }
    }

    /// Wait for another thread's schema rebuild to finish
    async fn wait_for_schema_ready(pool: &PgPool) -> Result<(), sqlx::Error> {
        use tokio::time::{sleep, Duration};

        // Wait up to 30 seconds for schema to be ready
        for _ in 0..60 {
            sleep(Duration::from_millis(500)).await;

            let schema_ready = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS (SELECT FROM information_schema.tables WHERE table_name = 'mdas_schema_migrations')"
            )
            .fetch_one(pool)
            .await?;

            if schema_ready {
                return Ok(());
            }
        }

        Err(sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "Timeout waiting for schema initialization",
        )))
    }

    /// Fresh schema for tests: drops and recreates everything
    async fn run_fresh_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(
            r#"
            DROP SCHEMA public CASCADE;
            CREATE SCHEMA public;
            GRANT ALL ON SCHEMA public TO PUBLIC;
        "#,
        )
        .execute(pool)
        .await?;

        Self::ensure_migration_table(pool).await?;

        for migration in MIGRATIONS {
            sqlx::raw_sql(migration.sql).execute(pool).await?;
            Self::record_migration(pool, migration.version).await?;
        }

        Ok(())
    }

    /// Run only outstanding migrations (not already applied)
    async fn run_outstanding_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
        let applied_migrations = Self::get_applied_migrations(pool).await?;

        for migration in MIGRATIONS {
            if !applied_migrations.contains(migration.version) {
                tracing::info!(
                    version = migration.version,
                    name = migration.name,
                    "applying migration"
                );
                sqlx::raw_sql(migration.sql).execute(pool).await?;
                Self::record_migration(pool, migration.version).await?;
            }
        }

        Ok(())
    }

    /// Ensure migration tracking table exists
    async fn ensure_migration_table(pool: &PgPool) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS mdas_schema_migrations (
                version VARCHAR(14) PRIMARY KEY,
                applied_at TIMESTAMPTZ DEFAULT NOW()
            )
        "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Get list of applied migration versions
    async fn get_applied_migrations(
        pool: &PgPool,
    ) -> Result<std::collections::HashSet<String>, sqlx::Error> {
        let rows = sqlx::query("SELECT version FROM mdas_schema_migrations")
            .fetch_all(pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("version"))
            .collect())
    }

    /// Record that a migration has been applied
    async fn record_migration(pool: &PgPool, version: &str) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO mdas_schema_migrations (version) VALUES ($1)")
            .bind(version)
            .execute(pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_version_ordered() {
        let versions: Vec<&str> = MIGRATIONS.iter().map(|m| m.version).collect();
        let mut sorted = versions.clone();
        sorted.sort_unstable();
        assert_eq!(versions, sorted);
        assert!(versions
            .iter()
            .all(|v| v.len() == 14 && v.chars().all(|c| c.is_ascii_digit())));
    }

    #[test]
    fn test_embedded_sql_is_nonempty() {
        for migration in MIGRATIONS {
            assert!(
                migration.sql.contains("CREATE TABLE"),
                "{} carries no DDL",
                migration.version
            );
        }
    }
}
