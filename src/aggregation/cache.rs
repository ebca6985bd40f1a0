//! # Tiered Aggregation Cache
//!
//! ## Architecture: Lazy Rebuild with Generation-Stamped Freshness
//!
//! Aggregates are never maintained incrementally. Each `(scope, period)`
//! bucket is computed on first request, kept in an in-process map, and
//! persisted. Freshness rides on the per-scope generation counter: record
//! writes bump it, and a bucket stamped with an older generation is
//! rebuilt on the next read. A bucket is therefore never served stale
//! beyond one generation, without any cross-process cache invalidation
//! traffic.
//!
//! Rebuilds rescan only the in-scope slice (record type + period bounds,
//! duplicates excluded). Persistence is compare-generation-then-replace,
//! so a slow rebuild losing the race simply adopts the fresher bucket.

use crate::aggregation::tier::{select_tier, AggregationTier};
use crate::config::AggregationConfig;
use crate::constants::events;
use crate::error::{CoreError, Result};
use crate::events::publisher::EventPublisher;
use crate::models::{AggregateBucket, ExtractRecord, NewAggregateBucket, ScopeGeneration};
use chrono::NaiveDate;
use dashmap::DashMap;
use sqlx::PgPool;
use tracing::{debug, info, instrument};

/// Lazily-computed aggregate store with tier-adaptive bucket granularity
pub struct TieredAggregationCache {
    pool: PgPool,
    config: AggregationConfig,
    event_publisher: EventPublisher,
    cache: DashMap<(String, String), AggregateBucket>,
}

impl TieredAggregationCache {
    pub fn new(pool: PgPool, config: AggregationConfig, event_publisher: EventPublisher) -> Self {
        Self {
            pool,
            config,
            event_publisher,
            cache: DashMap::new(),
        }
    }

    /// Aggregate metrics for the period containing `on`, at the tier the
    /// scope's record volume currently selects.
    ///
    /// Serves from the in-process map when the bucket's generation matches
    /// the scope counter, falls back to the persisted bucket, and rebuilds
    /// from extract records otherwise.
    #[instrument(skip(self))]
    pub async fn get_aggregate(&self, scope: &str, on: NaiveDate) -> Result<AggregateBucket> {
        let current_generation = ScopeGeneration::current(&self.pool, scope).await?;
        let in_scope_count = ExtractRecord::count_for_record_type(&self.pool, scope).await?;
        let tier = select_tier(in_scope_count, &self.config);
        let period_key = tier.period_key(on);
        let cache_key = (scope.to_string(), period_key.clone());

        if let Some(cached) = self.cache.get(&cache_key) {
            if cached.generation >= current_generation {
                debug!(
                    scope = scope,
                    period_key = %period_key,
                    generation = cached.generation,
                    "Aggregate served from in-process cache"
                );
                return Ok(cached.clone());
            }
        }

        if let Some(stored) = AggregateBucket::find(&self.pool, scope, &period_key).await? {
            if stored.generation >= current_generation {
                debug!(
                    scope = scope,
                    period_key = %period_key,
                    generation = stored.generation,
                    "Aggregate served from persisted bucket"
                );
                self.cache.insert(cache_key, stored.clone());
                return Ok(stored);
            }
        }

        self.rebuild(scope, tier, on, current_generation, period_key, cache_key)
            .await
    }

    /// Recompute one bucket from in-scope records and persist it
    async fn rebuild(
        &self,
        scope: &str,
        tier: AggregationTier,
        on: NaiveDate,
        generation: i64,
        period_key: String,
        cache_key: (String, String),
    ) -> Result<AggregateBucket> {
        let (period_start, period_end) = tier.period_bounds(on);
        let metrics =
            ExtractRecord::scope_metrics(&self.pool, scope, period_start, period_end).await?;

        let new_bucket = NewAggregateBucket {
            scope_key: scope.to_string(),
            period_key: period_key.clone(),
            tier: tier.as_str().to_string(),
            record_count: metrics.record_count,
            total_amount_cents: metrics.total_amount_cents,
            generation,
        };

        let saved = match AggregateBucket::upsert_if_newer(&self.pool, &new_bucket).await? {
            Some(saved) => saved,
            None => {
                // A concurrent rebuild stored a fresher bucket; adopt it.
                // Normal control flow under contention.
                debug!(
                    scope = scope,
                    period_key = %period_key,
                    "Bucket write lost generation race, adopting newer bucket"
                );
                AggregateBucket::find(&self.pool, scope, &period_key)
                    .await?
                    .ok_or_else(|| {
                        CoreError::AggregationError(format!(
                            "Bucket for scope '{scope}' period '{period_key}' vanished after lost race"
                        ))
                    })?
            }
        };

        self.cache.insert(cache_key, saved.clone());

        info!(
            scope = scope,
            period_key = %period_key,
            tier = %tier,
            generation = saved.generation,
            record_count = saved.record_count,
            total_amount_cents = saved.total_amount_cents,
            "Aggregate bucket rebuilt"
        );

        self.event_publisher
            .publish(
                events::AGGREGATE_REBUILT,
                serde_json::json!({
                    "scope": scope,
                    "period_key": period_key,
                    "tier": tier.as_str(),
                    "generation": saved.generation,
                    "record_count": saved.record_count,
                }),
            )
            .await
            .map_err(|e| {
                CoreError::AggregationError(format!("Aggregate event publish failed: {e}"))
            })?;

        Ok(saved)
    }

    /// Number of buckets currently held in the in-process map
    pub fn cached_buckets(&self) -> usize {
        self.cache.len()
    }
}
