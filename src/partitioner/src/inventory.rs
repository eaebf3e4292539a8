//! Snapshot of a table's existing partitions.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// A partition row as read from `INFORMATION_SCHEMA.PARTITIONS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRow {
    pub name: Option<String>,
    /// Raw `PARTITION_DESCRIPTION`: the "values less than" bound.
    pub description: Option<String>,
    pub rows: Option<u64>,
}

impl CatalogRow {
    pub fn new(name: impl Into<String>, description: impl Into<String>, rows: u64) -> Self {
        Self {
            name: Some(name.into()),
            description: Some(description.into()),
            rows: Some(rows),
        }
    }
}

/// Exclusive upper bound of a RANGE partition.
///
/// `MaxValue` orders above every value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PartitionBound {
    Value(i64),
    MaxValue,
}

impl PartitionBound {
    /// Parse an engine-reported description (`1710547200` or `MAXVALUE`).
    pub fn parse(description: &str) -> Option<Self> {
        let description = description.trim();
        if description.eq_ignore_ascii_case("MAXVALUE") {
            return Some(PartitionBound::MaxValue);
        }
        description.parse().ok().map(PartitionBound::Value)
    }

    /// Whether a row with partition key `value` belongs below this bound.
    pub fn admits(&self, value: i64) -> bool {
        PartitionBound::Value(value) < *self
    }
}

impl fmt::Display for PartitionBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionBound::Value(value) => write!(f, "{value}"),
            PartitionBound::MaxValue => write!(f, "MAXVALUE"),
        }
    }
}

/// Observed state of an existing partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionDescriptor {
    pub name: String,
    pub upper_bound: PartitionBound,
    /// Engine-reported row statistic.
    ///
    /// InnoDB only estimates this figure, so it gates destructive drops on a
    /// best-effort basis; `None` means the engine reported nothing.
    pub row_count: Option<u64>,
}

impl PartitionDescriptor {
    /// True only when the engine positively reports zero rows.
    pub fn is_empty(&self) -> bool {
        self.row_count == Some(0)
    }
}

/// Existing partitions of one table, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionInventory {
    partitions: BTreeMap<String, PartitionDescriptor>,
}

impl PartitionInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an inventory from catalog rows.
    ///
    /// Rows without a name describe an unpartitioned table and are skipped.
    ///
    /// # Errors
    ///
    /// A named partition must carry a numeric or `MAXVALUE` bound and names
    /// must be unique.
    pub fn from_catalog_rows(
        table: &str,
        rows: impl IntoIterator<Item = CatalogRow>,
    ) -> Result<Self, InventoryError> {
        let mut inventory = Self::new();

        for row in rows {
            let Some(name) = row.name.filter(|n| !n.trim().is_empty()) else {
                continue;
            };

            let upper_bound = row
                .description
                .as_deref()
                .and_then(PartitionBound::parse)
                .ok_or_else(|| InventoryError::InvalidBoundary {
                    table: table.to_string(),
                    partition: name.clone(),
                    description: row.description.clone(),
                })?;

            let descriptor = PartitionDescriptor {
                name: name.clone(),
                upper_bound,
                row_count: row.rows,
            };
            if inventory.partitions.insert(name.clone(), descriptor).is_some() {
                return Err(InventoryError::DuplicatePartition {
                    table: table.to_string(),
                    partition: name,
                });
            }
        }

        Ok(inventory)
    }

    pub fn insert(&mut self, descriptor: PartitionDescriptor) {
        self.partitions.insert(descriptor.name.clone(), descriptor);
    }

    pub fn remove(&mut self, name: &str) -> Option<PartitionDescriptor> {
        self.partitions.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&PartitionDescriptor> {
        self.partitions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.partitions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Partitions in name order.
    pub fn iter(&self) -> impl Iterator<Item = &PartitionDescriptor> {
        self.partitions.values()
    }
}

impl FromIterator<PartitionDescriptor> for PartitionInventory {
    fn from_iter<I: IntoIterator<Item = PartitionDescriptor>>(iter: I) -> Self {
        let mut inventory = Self::new();
        for descriptor in iter {
            inventory.insert(descriptor);
        }
        inventory
    }
}

/// Read access to table metadata.
#[async_trait]
pub trait CatalogReader: Send + Sync {
    /// Partition rows of `table`, in partition order.
    async fn read_partitions(&self, table: &str) -> Result<Vec<CatalogRow>, CatalogError>;

    /// Column names of `table`; empty when the table does not exist.
    async fn read_columns(&self, table: &str) -> Result<Vec<String>, CatalogError>;
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Catalog query for table '{table}' failed: {source}")]
    Backend {
        table: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl CatalogError {
    pub fn backend(
        table: &str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        CatalogError::Backend {
            table: table.to_string(),
            source: source.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InventoryError {
    #[error("Partition {partition} of table {table} has no usable range bound ({description:?})")]
    InvalidBoundary {
        table: String,
        partition: String,
        description: Option<String>,
    },

    #[error("Partition {partition} of table {table} is reported more than once")]
    DuplicatePartition { table: String, partition: String },
}
