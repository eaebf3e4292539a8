//! Partition maintenance runs across every configured table.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use common::config::{ConfigError, Configuration};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::executor::{ChangeExecutor, DdlExecutor, ExecutionError, ExecutionReport};
use crate::inventory::{CatalogError, CatalogReader, InventoryError, PartitionInventory};
use crate::metrics::MaintenanceMetrics;
use crate::policy::{PolicyError, RetentionPolicy};
use crate::reconciler::{PartitionReconciler, PartitionWarning, ReconcileError, ReconcilePlan};

/// A managed table and the policy it is kept under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableTarget {
    pub table: String,
    pub policy: RetentionPolicy,
}

/// Resolved settings of a maintenance run.
#[derive(Debug, Clone)]
pub struct MaintainerSettings {
    pub timezone: Tz,
    pub partition_key: String,
    pub dry_run: bool,
    /// Tables in processing order.
    pub targets: Vec<TableTarget>,
}

impl MaintainerSettings {
    pub fn new(timezone: Tz, partition_key: impl Into<String>) -> Self {
        Self {
            timezone,
            partition_key: partition_key.into(),
            dry_run: false,
            targets: Vec::new(),
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_table(mut self, table: impl Into<String>, policy: RetentionPolicy) -> Self {
        self.targets.push(TableTarget {
            table: table.into(),
            policy,
        });
        self
    }

    /// Validate `config` and resolve it into settings.
    ///
    /// Groups are flattened in configuration order, tables in listed order.
    pub fn from_configuration(config: &Configuration) -> Result<Self, SettingsError> {
        config.validate()?;

        let partitioning = &config.partitioning;
        let mut settings = Self::new(config.timezone()?, partitioning.partition_key.as_str())
            .with_dry_run(partitioning.dry_run);

        for group in &partitioning.groups {
            let policy = RetentionPolicy::try_from(group)?;
            for table in &group.tables {
                settings = settings.with_table(table.as_str(), policy);
            }
        }

        Ok(settings)
    }
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

/// Why one table could not be brought into its window.
#[derive(Error, Debug)]
pub enum TableError {
    #[error("Table {0} does not exist")]
    TableNotFound(String),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error("Table {table} has no column {column} to partition by")]
    MissingPartitionKey { table: String, column: String },

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

/// Result of maintaining a single table
#[derive(Debug)]
pub struct TableResult {
    pub table: String,
    pub warnings: Vec<PartitionWarning>,
    pub outcome: Result<ExecutionReport, TableError>,
    pub duration_ms: u64,
}

impl TableResult {
    pub fn is_failure(&self) -> bool {
        self.outcome.is_err()
    }
}

/// Statements a run would submit for one table
#[derive(Debug)]
pub struct TablePlan {
    pub table: String,
    pub warnings: Vec<PartitionWarning>,
    pub outcome: Result<Vec<String>, TableError>,
}

/// Result of a complete maintenance run across all tables
#[derive(Debug)]
pub struct RunResult {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub dry_run: bool,
    pub tables: Vec<TableResult>,
}

impl RunResult {
    pub fn has_failures(&self) -> bool {
        self.tables.iter().any(TableResult::is_failure)
    }

    pub fn failures(&self) -> impl Iterator<Item = &TableResult> {
        self.tables.iter().filter(|t| t.is_failure())
    }
}

/// Keeps every configured table's partitions inside its window.
pub struct PartitionMaintainer {
    settings: MaintainerSettings,
    catalog: Arc<dyn CatalogReader>,
    ddl: Arc<dyn DdlExecutor>,
    metrics: MaintenanceMetrics,
}

impl PartitionMaintainer {
    pub fn new(
        settings: MaintainerSettings,
        catalog: Arc<dyn CatalogReader>,
        ddl: Arc<dyn DdlExecutor>,
        metrics: MaintenanceMetrics,
    ) -> Self {
        Self {
            settings,
            catalog,
            ddl,
            metrics,
        }
    }

    pub fn settings(&self) -> &MaintainerSettings {
        &self.settings
    }

    pub fn metrics(&self) -> &MaintenanceMetrics {
        &self.metrics
    }

    /// Reconcile and apply every table's plan at instant `now`.
    ///
    /// A failing table is reported and the run moves on to the next one.
    pub async fn run(&self, now: DateTime<Utc>) -> RunResult {
        let run_id = format!("partitions_{}", Utc::now().timestamp_millis());
        let started_at = Utc::now();

        info!(
            run_id = %run_id,
            tables = self.settings.targets.len(),
            timezone = %self.settings.timezone,
            dry_run = self.settings.dry_run,
            "Starting partition maintenance run"
        );

        let mut tables = Vec::with_capacity(self.settings.targets.len());
        for target in &self.settings.targets {
            let result = self.run_table(target, now).await;
            match &result.outcome {
                Ok(report) => info!(
                    table = %target.table,
                    changes = report.changes.len(),
                    warnings = result.warnings.len(),
                    duration_ms = result.duration_ms,
                    "Table partition maintenance completed"
                ),
                Err(e) => error!(
                    table = %target.table,
                    error = %e,
                    "Table partition maintenance failed"
                ),
            }
            tables.push(result);
        }

        let completed_at = Utc::now();
        let failed = tables.iter().filter(|t| t.is_failure()).count();

        info!(
            run_id = %run_id,
            tables_processed = tables.len(),
            tables_failed = failed,
            duration_ms = (completed_at - started_at).num_milliseconds(),
            "Partition maintenance run completed"
        );

        RunResult {
            run_id,
            started_at,
            completed_at,
            dry_run: self.settings.dry_run,
            tables,
        }
    }

    /// Evaluate every table's plan without executing anything.
    pub async fn plan(&self, now: DateTime<Utc>) -> Vec<TablePlan> {
        let mut plans = Vec::with_capacity(self.settings.targets.len());

        for target in &self.settings.targets {
            let plan = match self.prepare(target, now).await {
                Ok(plan) => TablePlan {
                    table: target.table.clone(),
                    outcome: Ok(self
                        .executor_for(target)
                        .render(&plan.ops)
                        .into_iter()
                        .flat_map(|change| change.statements)
                        .collect()),
                    warnings: plan.warnings,
                },
                Err(e) => TablePlan {
                    table: target.table.clone(),
                    warnings: Vec::new(),
                    outcome: Err(e),
                },
            };
            plans.push(plan);
        }

        plans
    }

    async fn run_table(&self, target: &TableTarget, now: DateTime<Utc>) -> TableResult {
        let started = Instant::now();

        let (warnings, outcome) = match self.prepare(target, now).await {
            Ok(plan) => {
                self.metrics.record_warnings(plan.warnings.len());
                let outcome = self
                    .executor_for(target)
                    .execute(&plan.ops, self.ddl.as_ref())
                    .await
                    .map_err(TableError::from);
                (plan.warnings, outcome)
            }
            Err(e) => (Vec::new(), Err(e)),
        };

        let duration = started.elapsed();
        self.metrics.record_table(outcome.is_err(), duration);

        TableResult {
            table: target.table.clone(),
            warnings,
            outcome,
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// Read the table's catalog state and compute its plan.
    async fn prepare(
        &self,
        target: &TableTarget,
        now: DateTime<Utc>,
    ) -> Result<ReconcilePlan, TableError> {
        let table = target.table.as_str();

        let rows = self.catalog.read_partitions(table).await?;
        if rows.is_empty() {
            return Err(TableError::TableNotFound(table.to_string()));
        }
        let inventory = PartitionInventory::from_catalog_rows(table, rows)?;

        let plan = PartitionReconciler::new(target.policy, self.settings.timezone)
            .reconcile(&inventory, now)?;

        for warning in &plan.warnings {
            error!(table, "{warning}");
        }

        if plan.bootstraps() {
            let key = self.settings.partition_key.as_str();
            let columns = self.catalog.read_columns(table).await?;
            if columns.is_empty() {
                return Err(TableError::TableNotFound(table.to_string()));
            }
            if !columns.iter().any(|c| c.eq_ignore_ascii_case(key)) {
                return Err(TableError::MissingPartitionKey {
                    table: table.to_string(),
                    column: key.to_string(),
                });
            }
            warn!(
                table,
                partitions = inventory.len(),
                "Table has no partitions inside the window and will be partitioned by {key}"
            );
        }

        Ok(plan)
    }

    fn executor_for(&self, target: &TableTarget) -> ChangeExecutor {
        ChangeExecutor::new(
            target.table.as_str(),
            self.settings.partition_key.as_str(),
            self.settings.dry_run,
        )
        .with_metrics(self.metrics.clone())
    }
}
