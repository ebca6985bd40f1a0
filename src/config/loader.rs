//! Configuration Loader
//!
//! Environment-aware configuration loading. Handles YAML file discovery,
//! environment detection, and overlay merging so one file can describe
//! development, test, and production with per-environment overrides.

use super::error::{ConfigResult, ConfigurationError};
use super::MdasConfig;
use serde_yaml::Value as YamlValue;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::{debug, info, warn};

const ENVIRONMENT_SECTIONS: [&str; 3] = ["development", "test", "production"];

/// Global configuration manager singleton
#[derive(Debug)]
pub struct ConfigManager {
    config: MdasConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment.
    /// Useful for tests that must not touch global environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            environment,
            directory = %config_directory.display(),
            "loading configuration"
        );

        let config = Self::load_and_merge_config(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment,
            database_host = %config.database.host,
            pool = config.database.pool,
            layout_version = %config.ingestion.layout_version,
            "configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &MdasConfig {
        &self.config
    }

    /// Get the current environment
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Get the configuration directory
    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Sanitized configuration for debugging that masks sensitive fields
    pub fn debug_config(&self) -> serde_json::Value {
        let mut config_json = serde_json::json!(self.config);
        let sensitive_patterns = ["password", "secret", "key", "token", "credential"];
        Self::sanitize_json_recursive(&mut config_json, &sensitive_patterns);
        config_json
    }

    fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    let is_sensitive = sensitive_patterns
                        .iter()
                        .any(|pattern| key_lower.contains(pattern));

                    if is_sensitive {
                        *val = serde_json::Value::String("[MASKED]".to_string());
                    } else {
                        Self::sanitize_json_recursive(val, sensitive_patterns);
                    }
                }
            }
            serde_json::Value::Array(arr) => {
                for item in arr.iter_mut() {
                    Self::sanitize_json_recursive(item, sensitive_patterns);
                }
            }
            _ => {}
        }
    }

    /// Detect current environment from environment variables.
    /// MDAS_ENV takes precedence, then APP_ENV, then 'development'.
    fn detect_environment() -> String {
        env::var("MDAS_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    /// Get default configuration directory relative to the project root
    fn default_config_directory() -> PathBuf {
        if let Ok(manifest_dir) = env::var("CARGO_MANIFEST_DIR") {
            let candidate = PathBuf::from(manifest_dir).join("config");
            if candidate.exists() {
                return candidate;
            }
        }

        let possible_dirs = [PathBuf::from("config"), PathBuf::from("../config")];
        for dir in possible_dirs {
            if dir.join("mdas-config.yaml").exists() {
                debug!(directory = %dir.display(), "found config directory");
                return dir;
            }
        }

        PathBuf::from("config")
    }

    /// Find the configuration file
    fn find_config_file(config_directory: &Path) -> ConfigResult<PathBuf> {
        let possible_names = ["mdas-config.yaml", "mdas-config.yml"];
        let mut searched_paths = Vec::new();

        for name in possible_names {
            let config_path = config_directory.join(name);
            searched_paths.push(config_path.clone());

            if config_path.exists() {
                debug!(path = %config_path.display(), "found configuration file");
                return Ok(config_path);
            }
        }

        Err(ConfigurationError::config_file_not_found(searched_paths))
    }

    /// Safely read a configuration file with a size limit
    fn read_config_file_safely(path: &Path) -> ConfigResult<String> {
        const MAX_CONFIG_FILE_SIZE: u64 = 10 * 1024 * 1024;

        let metadata = std::fs::metadata(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))?;

        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigurationError::invalid_value(
                "file_size",
                metadata.len().to_string(),
                format!(
                    "configuration file too large ({}MB > {}MB limit)",
                    metadata.len() / (1024 * 1024),
                    MAX_CONFIG_FILE_SIZE / (1024 * 1024)
                ),
            ));
        }

        if !metadata.is_file() {
            return Err(ConfigurationError::invalid_value(
                "file_type",
                "directory or special file".to_string(),
                "configuration path must point to a regular file",
            ));
        }

        std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))
    }

    /// Load and merge configuration with environment-specific overrides
    fn load_and_merge_config(
        config_directory: &Path,
        environment: &str,
    ) -> ConfigResult<MdasConfig> {
        let config_file = Self::find_config_file(config_directory)?;
        let yaml_content = Self::read_config_file_safely(&config_file)?;

        let mut yaml_data: YamlValue = serde_yaml::from_str(&yaml_content)
            .map_err(|e| ConfigurationError::invalid_yaml(config_file.display().to_string(), e))?;

        if let Some(env_overrides) = yaml_data.get(environment).cloned() {
            debug!(environment, "applying environment-specific overrides");
            Self::merge_yaml_values(&mut yaml_data, env_overrides);
        }

        // Remove environment sections so they cannot deserialize as config keys
        if let YamlValue::Mapping(ref mut map) = yaml_data {
            for section in ENVIRONMENT_SECTIONS {
                map.remove(section);
            }
        }

        let mut config: MdasConfig = serde_yaml::from_value(yaml_data).map_err(|e| {
            ConfigurationError::invalid_yaml(
                config_file.display().to_string(),
                format!("failed to deserialize configuration: {e}"),
            )
        })?;

        config.ingestion.environment = environment.to_string();

        Ok(config)
    }

    /// Recursively merge YAML values (environment overrides into base config)
    fn merge_yaml_values(base: &mut YamlValue, override_value: YamlValue) {
        match (&mut *base, override_value) {
            (YamlValue::Mapping(base_map), YamlValue::Mapping(override_map)) => {
                for (key, value) in override_map {
                    if let Some(existing_value) = base_map.get_mut(&key) {
                        Self::merge_yaml_values(existing_value, value);
                    } else {
                        base_map.insert(key, value);
                    }
                }
            }
            (base_ref, override_val) => {
                *base_ref = override_val;
            }
        }
    }
}

/// Global configuration singleton for easy access throughout the application
static GLOBAL_CONFIG: OnceLock<Arc<ConfigManager>> = OnceLock::new();
static CONFIG_LOCK: Mutex<()> = Mutex::new(());

impl ConfigManager {
    /// Get or initialize the global configuration instance.
    /// Falls back to built-in defaults when no file can be loaded so the
    /// process can still come up for diagnostics.
    pub fn global() -> Arc<ConfigManager> {
        GLOBAL_CONFIG
            .get_or_init(|| {
                let _lock = CONFIG_LOCK.lock().unwrap_or_else(|poisoned| {
                    warn!("configuration lock poisoned, continuing with recovery");
                    poisoned.into_inner()
                });
                ConfigManager::load().unwrap_or_else(|e| {
                    warn!(error = %e, "configuration loading failed, using built-in defaults");
                    Arc::new(ConfigManager {
                        config: MdasConfig::default(),
                        environment: Self::detect_environment(),
                        config_directory: PathBuf::from("config"),
                    })
                })
            })
            .clone()
    }

    /// Initialize global configuration with a specific directory (for testing)
    pub fn initialize_global(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let _lock = CONFIG_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let config_manager = ConfigManager::load_from_directory(config_dir)?;
        let _ = GLOBAL_CONFIG.set(config_manager.clone());

        Ok(config_manager)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn base_yaml() -> &'static str {
        r#"
database:
  host: "localhost"
  username: "mdas"
  password: "local_password"
  pool: 10

claims:
  ttl_minutes: 30
  heartbeat_interval_seconds: 60

sweeper:
  enabled: true
  sweep_interval_seconds: 300
  requeue_on_reclaim: false

ingestion:
  layout_version: "2022.2"
  max_transient_retries: 3
  poll_interval_seconds: 5

aggregation:
  weekly_threshold: 10000
  monthly_threshold: 100000
  quarterly_threshold: 1000000

storage:
  root: "var/uploads"

test:
  database:
    database: "mdas_test_db"
    pool: 2
  sweeper:
    sweep_interval_seconds: 5

production:
  claims:
    ttl_minutes: 45
"#
    }

    fn write_config(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("mdas-config.yaml");
        fs::write(&path, base_yaml()).expect("write test config");
        dir.path().to_path_buf()
    }

    #[test]
    fn test_load_base_configuration() {
        let dir = TempDir::new().unwrap();
        let config_dir = write_config(&dir);

        let manager =
            ConfigManager::load_from_directory_with_env(Some(config_dir), "development").unwrap();
        let config = manager.config();

        assert_eq!(manager.environment(), "development");
        assert_eq!(config.ingestion.environment, "development");
        assert_eq!(config.database.pool, 10);
        assert_eq!(config.claims.ttl_minutes, 30);
        assert!(config.database.database.is_none());
    }

    #[test]
    fn test_environment_overlay_merges_over_base() {
        let dir = TempDir::new().unwrap();
        let config_dir = write_config(&dir);

        let manager =
            ConfigManager::load_from_directory_with_env(Some(config_dir), "test").unwrap();
        let config = manager.config();

        // Overridden by the test overlay
        assert_eq!(config.database.database.as_deref(), Some("mdas_test_db"));
        assert_eq!(config.database.pool, 2);
        assert_eq!(config.sweeper.sweep_interval_seconds, 5);
        // Untouched base values survive the merge
        assert_eq!(config.database.host, "localhost");
        assert_eq!(config.claims.ttl_minutes, 30);
        assert!(config.is_test_environment());
    }

    #[test]
    fn test_production_overlay_only_touches_named_keys() {
        let dir = TempDir::new().unwrap();
        let config_dir = write_config(&dir);

        let manager =
            ConfigManager::load_from_directory_with_env(Some(config_dir), "production").unwrap();
        let config = manager.config();

        assert_eq!(config.claims.ttl_minutes, 45);
        assert_eq!(config.sweeper.sweep_interval_seconds, 300);
    }

    #[test]
    fn test_missing_config_file_lists_searched_paths() {
        let dir = TempDir::new().unwrap();
        let err = ConfigManager::load_from_directory_with_env(
            Some(dir.path().to_path_buf()),
            "development",
        )
        .unwrap_err();

        match err {
            ConfigurationError::ConfigFileNotFound { searched } => {
                assert_eq!(searched.len(), 2);
            }
            other => panic!("expected ConfigFileNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_values_rejected_at_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mdas-config.yaml");
        fs::write(&path, "claims:\n  ttl_minutes: 600\n").unwrap();

        let err = ConfigManager::load_from_directory_with_env(
            Some(dir.path().to_path_buf()),
            "development",
        )
        .unwrap_err();
        assert!(err.to_string().contains("ttl"));
    }

    #[test]
    fn test_debug_config_masks_password() {
        let dir = TempDir::new().unwrap();
        let config_dir = write_config(&dir);

        let manager =
            ConfigManager::load_from_directory_with_env(Some(config_dir), "development").unwrap();
        let debug = manager.debug_config();
        assert_eq!(debug["database"]["password"], "[MASKED]");
        assert_eq!(debug["database"]["host"], "localhost");
    }
}
