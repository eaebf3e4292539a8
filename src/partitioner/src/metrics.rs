//! Partition maintenance metrics tracking
//!
//! Thread-safe counters for one or more maintenance runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::reconciler::ChangeOp;

/// Thread-safe metrics for partition maintenance runs
#[derive(Debug, Clone)]
pub struct MaintenanceMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    tables_processed: AtomicUsize,
    tables_failed: AtomicUsize,
    partitions_created: AtomicUsize,
    partitions_reorganized: AtomicUsize,
    partitions_dropped: AtomicUsize,
    tables_bootstrapped: AtomicUsize,
    statements_executed: AtomicUsize,
    warnings_raised: AtomicUsize,
    total_duration_ms: AtomicU64,
}

impl Default for MaintenanceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MaintenanceMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                tables_processed: AtomicUsize::new(0),
                tables_failed: AtomicUsize::new(0),
                partitions_created: AtomicUsize::new(0),
                partitions_reorganized: AtomicUsize::new(0),
                partitions_dropped: AtomicUsize::new(0),
                tables_bootstrapped: AtomicUsize::new(0),
                statements_executed: AtomicUsize::new(0),
                warnings_raised: AtomicUsize::new(0),
                total_duration_ms: AtomicU64::new(0),
            }),
        }
    }

    /// Record a table whose run finished, successfully or not
    pub fn record_table(&self, failed: bool, duration: Duration) {
        self.inner.tables_processed.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.inner.tables_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.inner
            .total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    /// Record a change that was fully applied with `statements` statements
    pub fn record_change(&self, op: &ChangeOp, statements: usize) {
        let counter = match op {
            ChangeOp::CreateInitialPartitioning { .. } => {
                self.inner
                    .tables_bootstrapped
                    .fetch_add(1, Ordering::Relaxed);
                &self.inner.partitions_created
            }
            ChangeOp::AppendPartition { .. } | ChangeOp::SplitFromNext { .. } => {
                &self.inner.partitions_created
            }
            ChangeOp::MergeThenSplit { .. }
            | ChangeOp::ResizeLastPartition { .. }
            | ChangeOp::SplitOffExcess { .. } => &self.inner.partitions_reorganized,
            ChangeOp::DropPartition { .. } => &self.inner.partitions_dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.inner
            .statements_executed
            .fetch_add(statements, Ordering::Relaxed);
    }

    pub fn record_warnings(&self, count: usize) {
        self.inner
            .warnings_raised
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn tables_processed(&self) -> usize {
        self.inner.tables_processed.load(Ordering::Relaxed)
    }

    pub fn tables_failed(&self) -> usize {
        self.inner.tables_failed.load(Ordering::Relaxed)
    }

    pub fn partitions_created(&self) -> usize {
        self.inner.partitions_created.load(Ordering::Relaxed)
    }

    pub fn partitions_reorganized(&self) -> usize {
        self.inner.partitions_reorganized.load(Ordering::Relaxed)
    }

    pub fn partitions_dropped(&self) -> usize {
        self.inner.partitions_dropped.load(Ordering::Relaxed)
    }

    pub fn tables_bootstrapped(&self) -> usize {
        self.inner.tables_bootstrapped.load(Ordering::Relaxed)
    }

    pub fn statements_executed(&self) -> usize {
        self.inner.statements_executed.load(Ordering::Relaxed)
    }

    pub fn warnings_raised(&self) -> usize {
        self.inner.warnings_raised.load(Ordering::Relaxed)
    }

    /// Average time spent per table
    pub fn avg_table_duration_ms(&self) -> f64 {
        let total_ms = self.inner.total_duration_ms.load(Ordering::Relaxed) as f64;
        let tables = self.tables_processed() as f64;

        if tables > 0.0 { total_ms / tables } else { 0.0 }
    }

    /// Get a summary of all metrics
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            tables_processed: self.tables_processed(),
            tables_failed: self.tables_failed(),
            partitions_created: self.partitions_created(),
            partitions_reorganized: self.partitions_reorganized(),
            partitions_dropped: self.partitions_dropped(),
            tables_bootstrapped: self.tables_bootstrapped(),
            statements_executed: self.statements_executed(),
            warnings_raised: self.warnings_raised(),
            avg_table_duration_ms: self.avg_table_duration_ms(),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSummary {
    pub tables_processed: usize,
    pub tables_failed: usize,
    pub partitions_created: usize,
    pub partitions_reorganized: usize,
    pub partitions_dropped: usize,
    pub tables_bootstrapped: usize,
    pub statements_executed: usize,
    pub warnings_raised: usize,
    pub avg_table_duration_ms: f64,
}

impl MetricsSummary {
    /// Log the metrics summary
    pub fn log(&self) {
        tracing::info!("=== Partition Maintenance Summary ===");
        tracing::info!(
            "Tables: {} processed, {} failed, {} bootstrapped",
            self.tables_processed,
            self.tables_failed,
            self.tables_bootstrapped
        );
        tracing::info!(
            "Partitions: {} created, {} reorganized, {} dropped",
            self.partitions_created,
            self.partitions_reorganized,
            self.partitions_dropped
        );
        tracing::info!(
            "Statements executed: {}, warnings: {}",
            self.statements_executed,
            self.warnings_raised
        );
        tracing::info!(
            "Average table duration: {:.2}ms",
            self.avg_table_duration_ms
        );
    }
}
