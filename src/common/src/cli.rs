use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments of the partition maintenance binary
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct CommonArgs {
    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Enable quiet mode (minimal output)")]
    pub quiet: bool,

    #[arg(long, global = true, help = "Log planned DDL without executing it")]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Option<CommonCommands>,
}

#[derive(Subcommand, Debug, Clone, Default, PartialEq, Eq)]
pub enum CommonCommands {
    /// Reconcile partitions of every configured table (default behavior)
    #[default]
    Run,
    /// Print the DDL a run would execute, without touching the database schema
    Plan,
    /// Show current configuration and exit
    Config {
        #[arg(long, help = "Show configuration in JSON format")]
        json: bool,
    },
    /// Validate configuration and exit
    Validate,
    /// Show version information and exit
    Version,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::Configuration;
    use anyhow::{Context, Result};
    use tracing_subscriber::EnvFilter;

    /// Initialize logging based on CLI arguments. `RUST_LOG` takes precedence.
    pub fn init_logging(args: &CommonArgs) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(log_level(args)));

        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    pub fn log_level(args: &CommonArgs) -> &'static str {
        if args.quiet {
            "warn"
        } else if args.verbose {
            "debug"
        } else {
            "info"
        }
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        match config_path {
            Some(path) => {
                log::info!("Loading configuration from: {}", path.display());
                Configuration::load_from_path(path).context("Failed to load configuration")
            }
            None => Configuration::load().context("Failed to load configuration"),
        }
    }

    /// Display configuration in human-readable or JSON format
    pub fn display_config(config: &Configuration, json: bool) -> Result<()> {
        if json {
            let json = serde_json::to_string_pretty(config)
                .context("Failed to serialize configuration to JSON")?;
            println!("{json}");
        } else {
            println!("Partition Maintenance Configuration:");
            println!("====================================");
            println!("Database DSN: {}", redact_dsn(&config.database.dsn));
            println!("Timezone: {}", config.partitioning.timezone);
            println!("Partition key: {}", config.partitioning.partition_key);
            println!("Dry run: {}", config.partitioning.dry_run);

            for group in &config.partitioning.groups {
                println!(
                    "Group [{}]: retention={} look_ahead={} tables={}",
                    group.step,
                    group.retention,
                    group.look_ahead,
                    group.tables.join(", ")
                );
            }
        }
        Ok(())
    }

    /// Validate configuration and report any issues
    pub fn validate_config(config: &Configuration) -> Result<()> {
        log::info!("Validating configuration...");
        config.validate().context("Invalid configuration")?;
        log::info!("✅ Configuration validation passed");
        Ok(())
    }

    /// Hide the password component of a DSN for display.
    pub fn redact_dsn(dsn: &str) -> String {
        let Some((scheme, rest)) = dsn.split_once("://") else {
            return dsn.to_string();
        };
        let Some((credentials, host)) = rest.rsplit_once('@') else {
            return dsn.to_string();
        };
        match credentials.split_once(':') {
            Some((user, _)) => format!("{scheme}://{user}:****@{host}"),
            None => dsn.to_string(),
        }
    }

    /// Handle commands that don't require a database connection.
    ///
    /// Returns `true` when the command was fully handled.
    pub fn handle_common_command(command: &CommonCommands, config: &Configuration) -> Result<bool> {
        match command {
            CommonCommands::Config { json } => {
                display_config(config, *json)?;
                Ok(true)
            }
            CommonCommands::Validate => {
                validate_config(config)?;
                Ok(true)
            }
            CommonCommands::Run | CommonCommands::Plan | CommonCommands::Version => Ok(false),
        }
    }

    /// Standard version information for a binary
    pub fn version_info(name: &str, version: &str) -> String {
        format!("{name} {version} ({})", env!("CARGO_PKG_RUST_VERSION"))
    }
}
