//! # AggregateBucket Model
//!
//! Persisted aggregate metrics plus the per-scope generation counters that
//! decide bucket freshness.
//!
//! ## Staleness Protocol
//!
//! Every write of extract records into a scope bumps that scope's row in
//! `mdas_aggregate_generations` inside the writer's transaction. A bucket
//! stamped with generation G is fresh while the scope counter still reads
//! G; a higher counter means records landed after the bucket was computed
//! and the next read must rebuild. Bucket persistence compares generations
//! instead of blindly overwriting, so a slow rebuild can never clobber a
//! newer one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AggregateBucket {
    pub id: i64,
    pub scope_key: String,
    pub period_key: String,
    pub tier: String,
    pub record_count: i64,
    pub total_amount_cents: i64,
    pub generation: i64,
    pub computed_at: DateTime<Utc>,
}

/// New AggregateBucket for persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAggregateBucket {
    pub scope_key: String,
    pub period_key: String,
    pub tier: String,
    pub record_count: i64,
    pub total_amount_cents: i64,
    pub generation: i64,
}

impl AggregateBucket {
    pub async fn find(
        pool: &PgPool,
        scope_key: &str,
        period_key: &str,
    ) -> Result<Option<AggregateBucket>, sqlx::Error> {
        sqlx::query_as::<_, AggregateBucket>(
            "SELECT * FROM mdas_aggregate_buckets WHERE scope_key = $1 AND period_key = $2",
        )
        .bind(scope_key)
        .bind(period_key)
        .fetch_optional(pool)
        .await
    }

    /// Persist a rebuilt bucket, compare-generation-then-replace.
    ///
    /// The conditional update only wins when the stored bucket's generation
    /// is at or below the incoming one. Returns `None` when a concurrent
    /// rebuild already stored a newer bucket; the caller should re-read.
    pub async fn upsert_if_newer(
        pool: &PgPool,
        bucket: &NewAggregateBucket,
    ) -> Result<Option<AggregateBucket>, sqlx::Error> {
        sqlx::query_as::<_, AggregateBucket>(
            r#"
            INSERT INTO mdas_aggregate_buckets
                (scope_key, period_key, tier, record_count, total_amount_cents, generation)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (scope_key, period_key) DO UPDATE
            SET tier = EXCLUDED.tier,
                record_count = EXCLUDED.record_count,
                total_amount_cents = EXCLUDED.total_amount_cents,
                generation = EXCLUDED.generation,
                computed_at = NOW()
            WHERE mdas_aggregate_buckets.generation <= EXCLUDED.generation
            RETURNING *
            "#,
        )
        .bind(&bucket.scope_key)
        .bind(&bucket.period_key)
        .bind(&bucket.tier)
        .bind(bucket.record_count)
        .bind(bucket.total_amount_cents)
        .bind(bucket.generation)
        .fetch_optional(pool)
        .await
    }
}

/// Per-scope write counter backing bucket freshness checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ScopeGeneration {
    pub scope_key: String,
    pub generation: i64,
    pub updated_at: DateTime<Utc>,
}

impl ScopeGeneration {
    /// Bump a scope's generation, creating the counter row on first touch.
    ///
    /// Callers run this inside the same transaction that commits records
    /// into the scope, so a bucket can never observe the records without
    /// observing the bump.
    pub async fn bump(
        executor: impl sqlx::PgExecutor<'_>,
        scope_key: &str,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO mdas_aggregate_generations (scope_key, generation)
            VALUES ($1, 1)
            ON CONFLICT (scope_key) DO UPDATE
            SET generation = mdas_aggregate_generations.generation + 1,
                updated_at = NOW()
            RETURNING generation
            "#,
        )
        .bind(scope_key)
        .fetch_one(executor)
        .await
    }

    /// Current generation for a scope; zero when nothing was ever written
    pub async fn current(pool: &PgPool, scope_key: &str) -> Result<i64, sqlx::Error> {
        let generation = sqlx::query_scalar::<_, i64>(
            "SELECT generation FROM mdas_aggregate_generations WHERE scope_key = $1",
        )
        .bind(scope_key)
        .fetch_optional(pool)
        .await?;

        Ok(generation.unwrap_or(0))
    }
}
