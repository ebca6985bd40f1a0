//! # MDAS Configuration Validator
//!
//! Command-line tool for validating MDAS configuration files across
//! environments. Catches configuration issues before starting workers
//! or the sweeper.

use clap::{Parser, Subcommand};
use mdas_core::codec::LayoutRegistry;
use mdas_core::config::{ConfigManager, MdasConfig};
use std::path::PathBuf;
use std::process;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate MDAS configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment to validate (development, test, production)
    #[arg(short, long, default_value = "development")]
    environment: String,

    /// Configuration directory path (default: config/)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Subcommands
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate all configuration sections
    All,

    /// Validate a specific configuration section
    Section {
        /// Section name (database, claims, sweeper, ingestion, aggregation, storage, events)
        name: String,
    },

    /// Show the merged configuration with sensitive fields masked
    Show,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = match &cli.command {
        Some(Commands::All) | None => validate_all_config(&cli),
        Some(Commands::Section { name }) => validate_section(&cli, name),
        Some(Commands::Show) => show_config(&cli),
    };

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {}", e);
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> Result<std::sync::Arc<ConfigManager>, Box<dyn std::error::Error>> {
    let manager =
        ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), &cli.environment)?;
    println!(
        "✅ Configuration loaded for environment '{}'",
        manager.environment()
    );
    Ok(manager)
}

fn validate_all_config(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔧 Validating MDAS Configuration");
    println!("Environment: {}", cli.environment);
    if let Some(config_dir) = &cli.config_dir {
        println!("Config Directory: {}", config_dir.display());
    }
    println!();

    let manager = load(cli)?;
    let config = manager.config();

    validate_database_config(config)?;
    validate_claims_config(config)?;
    validate_sweeper_config(config)?;
    validate_ingestion_config(config)?;
    validate_aggregation_config(config)?;
    validate_storage_config(config)?;
    validate_events_config(config)?;

    println!("\n🎉 All configuration validation checks passed!");
    Ok(())
}

fn validate_section(cli: &Cli, section_name: &str) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔧 Validating Section: {}", section_name);

    let manager = load(cli)?;
    let config = manager.config();

    match section_name.to_lowercase().as_str() {
        "database" => validate_database_config(config)?,
        "claims" => validate_claims_config(config)?,
        "sweeper" => validate_sweeper_config(config)?,
        "ingestion" => validate_ingestion_config(config)?,
        "aggregation" => validate_aggregation_config(config)?,
        "storage" => validate_storage_config(config)?,
        "events" => validate_events_config(config)?,
        _ => {
            return Err(format!("Unknown section: {}", section_name).into());
        }
    }

    println!("✅ Section '{}' validation passed!", section_name);
    Ok(())
}

fn show_config(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let manager = load(cli)?;
    println!("{}", serde_json::to_string_pretty(&manager.debug_config())?);
    Ok(())
}

fn validate_database_config(config: &MdasConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("\n📊 Database Configuration:");
    println!("  Host: {}", config.database.host);
    println!("  Pool Size: {}", config.database.pool);
    println!(
        "  Checkout Timeout: {}s",
        config.database.checkout_timeout_seconds
    );

    if config.database.url.is_none() && config.database.host.is_empty() {
        return Err("database.host is required when no explicit URL is set".into());
    }

    println!("  ✅ Database configuration valid");
    Ok(())
}

fn validate_claims_config(config: &MdasConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("\n🔒 Claims Configuration:");
    println!("  TTL: {} minutes", config.claims.ttl_minutes);
    println!(
        "  Heartbeat Interval: {}s",
        config.claims.heartbeat_interval_seconds
    );

    let ttl_seconds = config.claims.claim_ttl().as_secs();
    if config.claims.heartbeat_interval_seconds >= ttl_seconds {
        return Err(format!(
            "claims.heartbeat_interval_seconds must be shorter than the {}s TTL",
            ttl_seconds
        )
        .into());
    }

    println!("  ✅ Claims configuration valid");
    Ok(())
}

fn validate_sweeper_config(config: &MdasConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("\n🧹 Sweeper Configuration:");
    println!("  Enabled: {}", config.sweeper.enabled);
    println!(
        "  Sweep Interval: {}s",
        config.sweeper.sweep_interval_seconds
    );
    println!("  Requeue on Reclaim: {}", config.sweeper.requeue_on_reclaim);

    println!("  ✅ Sweeper configuration valid");
    Ok(())
}

fn validate_ingestion_config(config: &MdasConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("\n📥 Ingestion Configuration:");
    println!("  Layout Version: {}", config.ingestion.layout_version);
    println!(
        "  Max Transient Retries: {}",
        config.ingestion.max_transient_retries
    );
    println!(
        "  Poll Interval: {}s",
        config.ingestion.poll_interval_seconds
    );

    // The worker refuses to start with an unregistered layout; surface
    // that here instead of at boot time.
    let registry = LayoutRegistry::builtin()?;
    if registry.get(&config.ingestion.layout_version).is_err() {
        return Err(format!(
            "ingestion.layout_version '{}' is not registered (available: {})",
            config.ingestion.layout_version,
            registry.version_names().join(", ")
        )
        .into());
    }

    println!("  ✅ Ingestion configuration valid");
    Ok(())
}

fn validate_aggregation_config(config: &MdasConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("\n📈 Aggregation Configuration:");
    println!("  Weekly Threshold: {}", config.aggregation.weekly_threshold);
    println!(
        "  Monthly Threshold: {}",
        config.aggregation.monthly_threshold
    );
    println!(
        "  Quarterly Threshold: {}",
        config.aggregation.quarterly_threshold
    );

    if config.aggregation.weekly_threshold > config.aggregation.monthly_threshold
        || config.aggregation.monthly_threshold > config.aggregation.quarterly_threshold
    {
        return Err("aggregation thresholds must be ordered weekly <= monthly <= quarterly".into());
    }

    println!("  ✅ Aggregation configuration valid");
    Ok(())
}

fn validate_storage_config(config: &MdasConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("\n💾 Storage Configuration:");
    println!("  Root: {}", config.storage.root);

    if config.storage.root.is_empty() {
        return Err("storage.root must not be empty".into());
    }

    println!("  ✅ Storage configuration valid");
    Ok(())
}

fn validate_events_config(config: &MdasConfig) -> Result<(), Box<dyn std::error::Error>> {
    println!("\n📡 Events Configuration:");
    println!(
        "  Broadcast Buffer Size: {}",
        config.events.broadcast_buffer_size
    );

    if config.events.broadcast_buffer_size == 0 {
        return Err("events.broadcast_buffer_size must be greater than 0".into());
    }

    println!("  ✅ Events configuration valid");
    Ok(())
}
