//! # Ingestion Core Configuration System
//!
//! YAML-based configuration with environment overlays. All tunables that
//! govern claiming, sweeping, decoding, and aggregation live here; code
//! reads validated values instead of scattering hardcoded fallbacks.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mdas_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let ttl = manager.config().claim_ttl();
//! let layout = &manager.config().ingestion.layout_version;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring mdas-config.yaml
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MdasConfig {
    /// Database connection and pooling configuration
    pub database: DatabaseConfig,

    /// Upload claim lifetime and heartbeat settings
    pub claims: ClaimsConfig,

    /// Stale-claim sweeper settings
    pub sweeper: SweeperConfig,

    /// Decode pipeline settings
    pub ingestion: IngestionConfig,

    /// Aggregate tier thresholds and cache settings
    pub aggregation: AggregationConfig,

    /// Uploaded file content storage
    pub storage: StorageConfig,

    /// In-process event publication
    pub events: EventsConfig,
}

/// Database connection and pooling configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Explicit connection URL; `${DATABASE_URL}` defers to the environment
    pub url: Option<String>,
    pub host: String,
    pub username: String,
    pub password: String,
    pub pool: u32,
    pub checkout_timeout_seconds: u64,
    /// Environment-specific database name override
    pub database: Option<String>,
    /// Skip migration check on startup (useful for development/testing)
    pub skip_migration_check: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            username: "mdas".to_string(),
            password: String::new(),
            pool: 10,
            checkout_timeout_seconds: 10,
            database: None,
            skip_migration_check: false,
        }
    }
}

impl DatabaseConfig {
    /// Get database name for the current environment
    pub fn database_name(&self, environment: &str) -> String {
        if let Some(db_name) = &self.database {
            return db_name.clone();
        }

        match environment {
            "production" => {
                std::env::var("POSTGRES_DB").unwrap_or_else(|_| "mdas_production".to_string())
            }
            _ => format!("mdas_{environment}"),
        }
    }

    /// Build complete database URL from configuration
    pub fn database_url(&self, environment: &str) -> String {
        if let Some(url) = &self.url {
            if url.starts_with("${DATABASE_URL}") {
                if let Ok(env_url) = std::env::var("DATABASE_URL") {
                    return env_url;
                }
            } else if !url.is_empty() && url != "${DATABASE_URL}" {
                return url.clone();
            }
        }

        let port = std::env::var("DATABASE_PORT").unwrap_or_else(|_| "5432".to_string());

        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.username,
            self.password,
            self.host,
            port,
            self.database_name(environment)
        )
    }
}

/// Upload claim lifetime and heartbeat settings
///
/// The TTL is the only cancellation mechanism in the system: a worker that
/// dies simply stops renewing, and the sweeper reclaims after expiry.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClaimsConfig {
    /// Claim lifetime in minutes. Must fall in 1..=120.
    pub ttl_minutes: u32,
    /// How often a working owner renews its claim. Must be shorter than
    /// the TTL or renewal cannot keep a claim alive.
    pub heartbeat_interval_seconds: u64,
}

impl Default for ClaimsConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: crate::constants::system::DEFAULT_CLAIM_TTL_MINUTES,
            heartbeat_interval_seconds: crate::constants::system::DEFAULT_HEARTBEAT_INTERVAL_SECONDS,
        }
    }
}

impl ClaimsConfig {
    /// Claim lifetime as a Duration
    pub fn claim_ttl(&self) -> Duration {
        Duration::from_secs(u64::from(self.ttl_minutes) * 60)
    }

    /// Heartbeat renewal interval as a Duration
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }
}

/// Stale-claim sweeper settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SweeperConfig {
    pub enabled: bool,
    pub sweep_interval_seconds: u64,
    /// When true, reclaimed uploads return to `validated` for automatic
    /// retry instead of being failed.
    pub requeue_on_reclaim: bool,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_seconds: crate::constants::system::DEFAULT_SWEEP_INTERVAL_SECONDS,
            requeue_on_reclaim: false,
        }
    }
}

impl SweeperConfig {
    /// Sweeper pass interval as a Duration
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

/// Decode pipeline settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Deployment environment; set by the loader, not the YAML body
    pub environment: String,
    /// Active layout version name served by the registry
    pub layout_version: String,
    /// Transient storage errors get this many attempts before the failure
    /// becomes file-level
    pub max_transient_retries: u32,
    /// Worker backlog poll interval when no work was found
    pub poll_interval_seconds: u64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            layout_version: "2022.2".to_string(),
            max_transient_retries: crate::constants::system::MAX_TRANSIENT_RETRIES,
            poll_interval_seconds: 5,
        }
    }
}

impl IngestionConfig {
    /// Worker poll interval as a Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }
}

/// Aggregate tier thresholds and cache settings
///
/// Thresholds must be ordered weekly <= monthly <= quarterly so that the
/// tier step function stays monotonic in record count.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub weekly_threshold: u64,
    pub monthly_threshold: u64,
    pub quarterly_threshold: u64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            weekly_threshold: 10_000,
            monthly_threshold: 100_000,
            quarterly_threshold: 1_000_000,
        }
    }
}

/// Uploaded file content storage
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for the local filesystem content store
    pub root: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: "var/uploads".to_string(),
        }
    }
}

/// In-process event publication
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Broadcast channel capacity; slow subscribers past this lag drop
    /// events rather than block publishers
    pub broadcast_buffer_size: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            broadcast_buffer_size: 1024,
        }
    }
}

impl MdasConfig {
    /// Validate all constraints the rest of the system assumes hold.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.database.url.is_none() && self.database.host.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "database.host",
                "database configuration",
            ));
        }

        if self.database.pool == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.pool",
                "0",
                "pool size must be greater than 0",
            ));
        }

        if !(1..=120).contains(&self.claims.ttl_minutes) {
            return Err(ConfigurationError::invalid_value(
                "claims.ttl_minutes",
                self.claims.ttl_minutes.to_string(),
                "claim TTL must fall in 1..=120 minutes",
            ));
        }

        let ttl_seconds = u64::from(self.claims.ttl_minutes) * 60;
        if self.claims.heartbeat_interval_seconds == 0
            || self.claims.heartbeat_interval_seconds >= ttl_seconds
        {
            return Err(ConfigurationError::invalid_value(
                "claims.heartbeat_interval_seconds",
                self.claims.heartbeat_interval_seconds.to_string(),
                format!("heartbeat must be non-zero and shorter than the {ttl_seconds}s TTL"),
            ));
        }

        if self.sweeper.sweep_interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "sweeper.sweep_interval_seconds",
                "0",
                "sweep interval must be greater than 0",
            ));
        }

        if self.ingestion.layout_version.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "ingestion.layout_version",
                "ingestion configuration",
            ));
        }

        if self.ingestion.max_transient_retries == 0 {
            return Err(ConfigurationError::invalid_value(
                "ingestion.max_transient_retries",
                "0",
                "at least one attempt is required",
            ));
        }

        if self.aggregation.weekly_threshold > self.aggregation.monthly_threshold
            || self.aggregation.monthly_threshold > self.aggregation.quarterly_threshold
        {
            return Err(ConfigurationError::invalid_value(
                "aggregation",
                format!(
                    "weekly={} monthly={} quarterly={}",
                    self.aggregation.weekly_threshold,
                    self.aggregation.monthly_threshold,
                    self.aggregation.quarterly_threshold
                ),
                "tier thresholds must be ordered weekly <= monthly <= quarterly",
            ));
        }

        if self.storage.root.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "storage.root",
                "storage configuration",
            ));
        }

        if self.events.broadcast_buffer_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "events.broadcast_buffer_size",
                "0",
                "broadcast buffer must hold at least one event",
            ));
        }

        Ok(())
    }

    /// Get database URL for the current environment
    pub fn database_url(&self) -> String {
        self.database.database_url(&self.ingestion.environment)
    }

    pub fn is_test_environment(&self) -> bool {
        self.ingestion.environment == "test"
    }

    pub fn is_development_environment(&self) -> bool {
        self.ingestion.environment == "development"
    }

    pub fn is_production_environment(&self) -> bool {
        self.ingestion.environment == "production"
    }

    /// Claim lifetime as a Duration
    pub fn claim_ttl(&self) -> Duration {
        self.claims.claim_ttl()
    }

    /// Heartbeat renewal interval as a Duration
    pub fn heartbeat_interval(&self) -> Duration {
        self.claims.heartbeat_interval()
    }

    /// Sweeper pass interval as a Duration
    pub fn sweep_interval(&self) -> Duration {
        self.sweeper.sweep_interval()
    }

    /// Worker poll interval as a Duration
    pub fn poll_interval(&self) -> Duration {
        self.ingestion.poll_interval()
    }

    /// Database checkout timeout as a Duration
    pub fn checkout_timeout(&self) -> Duration {
        Duration::from_secs(self.database.checkout_timeout_seconds)
    }
}
