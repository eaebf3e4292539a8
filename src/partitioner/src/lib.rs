//! Rolling time-range partition maintenance for append-only MySQL tables.
//!
//! Keeps a window of RANGE partitions covering a retention period in the
//! past and a look-ahead period in the future:
//! - `window`: calendar arithmetic mapping "now" and an offset to a partition slot
//! - `inventory`: snapshot of a table's existing partitions read from the catalog
//! - `reconciler`: computes the ordered structural changes for one table
//! - `executor`: renders changes to DDL and applies them in order
//! - `maintainer`: drives a full run across every configured table

pub mod ddl;
pub mod executor;
pub mod inventory;
pub mod maintainer;
pub mod metrics;
pub mod mysql;
pub mod policy;
pub mod reconciler;
pub mod window;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use common::StepUnit;
pub use executor::{
    AppliedChange, ChangeExecutor, DdlError, DdlExecutor, ExecutionError, ExecutionReport,
};
pub use inventory::{
    CatalogError, CatalogReader, CatalogRow, InventoryError, PartitionBound, PartitionDescriptor,
    PartitionInventory,
};
pub use maintainer::{
    MaintainerSettings, PartitionMaintainer, RunResult, SettingsError, TableError, TablePlan,
    TableResult, TableTarget,
};
pub use metrics::{MaintenanceMetrics, MetricsSummary};
pub use mysql::MySqlBackend;
pub use policy::{PolicyError, RetentionPolicy};
pub use reconciler::{
    ChangeOp, DropReason, PartitionReconciler, PartitionWarning, ReconcileError, ReconcilePlan,
};
pub use window::{LegalWindow, PartitionSlot, TimeWindow, WindowError};
