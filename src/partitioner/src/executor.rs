//! Applies planned partition changes to a table.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ddl;
use crate::metrics::MaintenanceMetrics;
use crate::reconciler::{ChangeOp, DropReason};

/// Submits DDL statements to the database.
#[async_trait]
pub trait DdlExecutor: Send + Sync {
    /// Execute one statement, returning the affected row count.
    async fn execute(&self, statement: &str) -> Result<u64, DdlError>;
}

#[derive(Error, Debug)]
pub enum DdlError {
    /// The engine refused the statement.
    #[error("Statement rejected: {message}")]
    Rejected { message: String },

    #[error("Database error: {0}")]
    Database(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// A planned change and the statements rendered for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedChange {
    pub op: ChangeOp,
    pub statements: Vec<String>,
    /// False in dry-run mode, where statements are only logged.
    pub executed: bool,
}

/// Outcome of applying a table's plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub table: String,
    pub changes: Vec<AppliedChange>,
    pub dry_run: bool,
}

impl ExecutionReport {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Every statement in submission order.
    pub fn statements(&self) -> impl Iterator<Item = &str> {
        self.changes
            .iter()
            .flat_map(|change| change.statements.iter().map(String::as_str))
    }
}

/// Applies changes to one table, strictly in order.
#[derive(Debug, Clone)]
pub struct ChangeExecutor {
    table: String,
    partition_key: String,
    dry_run: bool,
    metrics: Option<MaintenanceMetrics>,
}

impl ChangeExecutor {
    pub fn new(table: impl Into<String>, partition_key: impl Into<String>, dry_run: bool) -> Self {
        Self {
            table: table.into(),
            partition_key: partition_key.into(),
            dry_run,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MaintenanceMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Render every change without executing anything.
    pub fn render(&self, ops: &[ChangeOp]) -> Vec<AppliedChange> {
        ops.iter()
            .map(|op| AppliedChange {
                op: op.clone(),
                statements: ddl::render(op, &self.table, &self.partition_key),
                executed: false,
            })
            .collect()
    }

    /// Apply `ops` in order through `executor`.
    ///
    /// # Errors
    ///
    /// The first failing statement stops the run; changes applied before it
    /// stay applied.
    pub async fn execute(
        &self,
        ops: &[ChangeOp],
        executor: &dyn DdlExecutor,
    ) -> Result<ExecutionReport, ExecutionError> {
        let mut report = ExecutionReport {
            table: self.table.clone(),
            changes: Vec::with_capacity(ops.len()),
            dry_run: self.dry_run,
        };

        for mut change in self.render(ops) {
            for statement in &change.statements {
                if self.dry_run {
                    info!(table = %self.table, "[DRY RUN] Would execute: {statement}");
                    continue;
                }

                debug!(table = %self.table, op = change.op.kind(), "Executing: {statement}");
                executor
                    .execute(statement)
                    .await
                    .map_err(|source| ExecutionError {
                        table: self.table.clone(),
                        op: change.op.clone(),
                        statement: statement.clone(),
                        applied: report.changes.len(),
                        source,
                    })?;
            }

            change.executed = !self.dry_run;
            if change.executed {
                self.log_change(&change.op);
                if let Some(metrics) = &self.metrics {
                    metrics.record_change(&change.op, change.statements.len());
                }
            }
            report.changes.push(change);
        }

        Ok(report)
    }

    fn log_change(&self, op: &ChangeOp) {
        let table = self.table.as_str();
        let partition = op.partition();

        match op {
            ChangeOp::AppendPartition { upper_bound, .. } => warn!(
                table,
                partition,
                bound = upper_bound,
                "Partition {partition} does not exist and has been created"
            ),
            ChangeOp::SplitFromNext { current_bound, .. } => warn!(
                table,
                partition,
                bound = current_bound,
                "Partition {partition} does not exist and has been created"
            ),
            ChangeOp::MergeThenSplit { split_at, .. } => warn!(
                table,
                partition,
                bound = split_at,
                "Partition {partition} boundary adjusted by merge and split"
            ),
            ChangeOp::ResizeLastPartition { new_bound, .. } => warn!(
                table,
                partition,
                bound = new_bound,
                "Partition {partition} boundary adjusted"
            ),
            ChangeOp::SplitOffExcess { keep_bound, .. } => warn!(
                table,
                partition,
                bound = keep_bound,
                "Partition {partition} boundary adjusted, excess range removed"
            ),
            ChangeOp::CreateInitialPartitioning { upper_bound, .. } => warn!(
                table,
                partition,
                bound = upper_bound,
                "Table {table} was not partitioned, created initial partition {partition}"
            ),
            ChangeOp::DropPartition {
                reason: DropReason::BeyondHorizon,
                ..
            } => warn!(
                table,
                partition,
                "Partition {partition} exceeded the maximum partition advance creation time and has been deleted"
            ),
            ChangeOp::DropPartition {
                reason: DropReason::Expired,
                ..
            } => info!(
                table,
                partition,
                "Partition {partition} has expired and has been deleted"
            ),
        }
    }
}

/// A statement failed while applying a table's plan.
#[derive(Error, Debug)]
#[error("Failed to apply '{op}' on table {table} after {applied} completed changes: {source}")]
pub struct ExecutionError {
    pub table: String,
    pub op: ChangeOp,
    pub statement: String,
    /// Number of changes fully applied before the failure.
    pub applied: usize,
    #[source]
    pub source: DdlError,
}
