//! partkeeper
//!
//! Keeps the time-range partitions of append-only MySQL tables (Zabbix history
//! and trends by default) inside a rolling retention window: expired
//! partitions are dropped, future partitions are pre-created and misaligned
//! boundaries are repaired. Meant to be run periodically, e.g. from cron.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use common::cli::{CommonArgs, CommonCommands, utils};
use partitioner::{MaintainerSettings, MaintenanceMetrics, MySqlBackend, PartitionMaintainer};
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let args = CommonArgs::parse();
    utils::init_logging(&args);

    let command = args.command.clone().unwrap_or_default();
    if command == CommonCommands::Version {
        println!(
            "{}",
            utils::version_info(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
        );
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = utils::load_config(args.config.as_ref())?;
    if args.dry_run {
        config.partitioning.dry_run = true;
    }

    if utils::handle_common_command(&command, &config)? {
        return Ok(ExitCode::SUCCESS);
    }

    let settings =
        MaintainerSettings::from_configuration(&config).context("Invalid configuration")?;

    let backend = Arc::new(
        MySqlBackend::connect(&config.database)
            .await
            .context("Failed to connect to database")?,
    );
    let metrics = MaintenanceMetrics::new();
    let maintainer =
        PartitionMaintainer::new(settings, backend.clone(), backend, metrics.clone());

    let now = Utc::now();

    if command == CommonCommands::Plan {
        let mut failed = false;
        for plan in maintainer.plan(now).await {
            match plan.outcome {
                Ok(statements) if statements.is_empty() => {
                    println!("-- {}: partitions are up to date", plan.table);
                }
                Ok(statements) => {
                    println!("-- {}", plan.table);
                    for statement in statements {
                        println!("{statement}");
                    }
                }
                Err(e) => {
                    failed = true;
                    log::error!("Cannot plan table {}: {e}", plan.table);
                }
            }
        }
        return Ok(if failed {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        });
    }

    let result = maintainer.run(now).await;
    metrics.summary().log();

    if result.has_failures() {
        for table in result.failures() {
            if let Err(e) = &table.outcome {
                log::error!("Table {} failed: {e}", table.table);
            }
        }
        return Ok(ExitCode::FAILURE);
    }

    log::info!("Partition maintenance run {} completed", result.run_id);
    Ok(ExitCode::SUCCESS)
}
