//! In-memory stand-in for a MySQL schema with RANGE partitioned tables.
//!
//! [`SimulatedDatabase`] implements both [`CatalogReader`] and
//! [`DdlExecutor`]. It understands the statement forms rendered by
//! [`crate::ddl`] and rejects the ones MySQL would reject, so a plan can be
//! applied, re-read and reconciled again without a server.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::executor::{DdlError, DdlExecutor};
use crate::inventory::{CatalogError, CatalogReader, CatalogRow, PartitionBound};

const DEFAULT_COLUMNS: [&str; 4] = ["itemid", "clock", "value", "ns"];

#[derive(Debug, Clone)]
struct SimPartition {
    name: String,
    bound: PartitionBound,
    rows: Vec<i64>,
}

/// Definition of a table to seed a [`SimulatedDatabase`] with.
#[derive(Debug, Clone)]
pub struct SimulatedTable {
    columns: Vec<String>,
    partitions: Option<Vec<SimPartition>>,
    unpartitioned_rows: Vec<i64>,
    unknown_row_counts: bool,
}

impl Default for SimulatedTable {
    fn default() -> Self {
        Self::unpartitioned()
    }
}

impl SimulatedTable {
    /// A Zabbix-like history table without partitioning.
    pub fn unpartitioned() -> Self {
        Self {
            columns: DEFAULT_COLUMNS.iter().map(|c| c.to_string()).collect(),
            partitions: None,
            unpartitioned_rows: Vec::new(),
            unknown_row_counts: false,
        }
    }

    pub fn with_columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Append an empty partition. The first call makes the table partitioned.
    pub fn with_partition(self, name: &str, upper_bound: i64) -> Self {
        self.push_partition(name, PartitionBound::Value(upper_bound))
    }

    pub fn with_maxvalue_partition(self, name: &str) -> Self {
        self.push_partition(name, PartitionBound::MaxValue)
    }

    /// Report `NULL` row statistics for every partition.
    pub fn with_unknown_row_counts(mut self) -> Self {
        self.unknown_row_counts = true;
        self
    }

    fn push_partition(mut self, name: &str, bound: PartitionBound) -> Self {
        self.partitions.get_or_insert_with(Vec::new).push(SimPartition {
            name: name.to_string(),
            bound,
            rows: Vec::new(),
        });
        self
    }
}

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<String, SimulatedTable>,
    statements: Vec<String>,
    fail_on: Option<usize>,
}

/// A schema of simulated tables plus a log of every submitted statement.
#[derive(Debug, Default)]
pub struct SimulatedDatabase {
    state: Mutex<State>,
}

impl SimulatedDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, name: &str, table: SimulatedTable) -> Self {
        self.lock().tables.insert(name.to_string(), table);
        self
    }

    /// Make the `n`-th submitted statement (1-based) fail without effect.
    pub fn fail_on_statement(&self, n: usize) {
        self.lock().fail_on = Some(n);
    }

    /// Insert a row with partition key `clock`.
    pub fn insert(&self, table: &str, clock: i64) -> Result<(), DdlError> {
        let mut state = self.lock();
        let table = state
            .tables
            .get_mut(table)
            .ok_or_else(|| rejected(format!("Table '{table}' doesn't exist")))?;

        match table.partitions.as_mut() {
            None => table.unpartitioned_rows.push(clock),
            Some(partitions) => {
                let target = partitions
                    .iter_mut()
                    .find(|p| p.bound.admits(clock))
                    .ok_or_else(|| rejected(format!("Table has no partition for value {clock}")))?;
                target.rows.push(clock);
            }
        }
        Ok(())
    }

    /// Every statement submitted so far, including failed ones.
    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    pub fn clear_statements(&self) {
        self.lock().statements.clear();
    }

    pub fn is_partitioned(&self, table: &str) -> bool {
        self.lock()
            .tables
            .get(table)
            .is_some_and(|t| t.partitions.is_some())
    }

    /// Partition names and bounds in partition order.
    pub fn partitions(&self, table: &str) -> Vec<(String, PartitionBound)> {
        self.lock()
            .tables
            .get(table)
            .and_then(|t| t.partitions.as_ref())
            .map(|parts| parts.iter().map(|p| (p.name.clone(), p.bound)).collect())
            .unwrap_or_default()
    }

    pub fn partition_names(&self, table: &str) -> Vec<String> {
        self.partitions(table)
            .into_iter()
            .map(|(name, _)| name)
            .collect()
    }

    /// Total rows currently stored in `table`.
    pub fn row_count(&self, table: &str) -> usize {
        self.lock().tables.get(table).map_or(0, |t| match &t.partitions {
            Some(parts) => parts.iter().map(|p| p.rows.len()).sum(),
            None => t.unpartitioned_rows.len(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CatalogReader for SimulatedDatabase {
    async fn read_partitions(&self, table: &str) -> Result<Vec<CatalogRow>, CatalogError> {
        let state = self.lock();
        let Some(table) = state.tables.get(table) else {
            return Ok(Vec::new());
        };

        let rows = match &table.partitions {
            None => vec![CatalogRow {
                name: None,
                description: None,
                rows: Some(table.unpartitioned_rows.len() as u64),
            }],
            Some(parts) => parts
                .iter()
                .map(|p| CatalogRow {
                    name: Some(p.name.clone()),
                    description: Some(p.bound.to_string()),
                    rows: (!table.unknown_row_counts).then_some(p.rows.len() as u64),
                })
                .collect(),
        };
        Ok(rows)
    }

    async fn read_columns(&self, table: &str) -> Result<Vec<String>, CatalogError> {
        Ok(self
            .lock()
            .tables
            .get(table)
            .map(|t| t.columns.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl DdlExecutor for SimulatedDatabase {
    async fn execute(&self, statement: &str) -> Result<u64, DdlError> {
        let mut state = self.lock();
        state.statements.push(statement.to_string());
        if state.fail_on == Some(state.statements.len()) {
            return Err(rejected(format!("Injected failure for: {statement}")));
        }

        let parsed = Statement::parse(statement)?;
        let table = state
            .tables
            .get_mut(parsed.table)
            .ok_or_else(|| rejected(format!("Table '{}' doesn't exist", parsed.table)))?;
        apply(table, parsed.action)?;
        Ok(0)
    }
}

type Definition = (String, PartitionBound);

enum Action {
    Add(Vec<Definition>),
    Drop(Vec<String>),
    Reorganize(Vec<String>, Vec<Definition>),
    PartitionBy(String, Vec<Definition>),
}

struct Statement<'a> {
    table: &'a str,
    action: Action,
}

impl<'a> Statement<'a> {
    fn parse(statement: &'a str) -> Result<Self, DdlError> {
        let syntax = || rejected(format!("You have an error in your SQL syntax: {statement}"));

        let body = statement
            .trim()
            .strip_prefix("ALTER TABLE ")
            .and_then(|s| s.strip_suffix(';'))
            .ok_or_else(syntax)?;
        let (table, rest) = body.split_once(' ').ok_or_else(syntax)?;
        let rest = rest.trim();

        let action = if let Some(defs) = rest.strip_prefix("ADD PARTITION ") {
            Action::Add(parse_definitions(defs).ok_or_else(syntax)?)
        } else if let Some(names) = rest.strip_prefix("DROP PARTITION ") {
            Action::Drop(parse_names(names))
        } else if let Some(rest) = rest.strip_prefix("REORGANIZE PARTITION ") {
            let (names, defs) = rest.split_once(" INTO ").ok_or_else(syntax)?;
            Action::Reorganize(
                parse_names(names),
                parse_definitions(defs).ok_or_else(syntax)?,
            )
        } else if let Some(rest) = rest.strip_prefix("PARTITION BY RANGE(") {
            let (key, defs) = rest.split_once(')').ok_or_else(syntax)?;
            Action::PartitionBy(
                key.trim().to_string(),
                parse_definitions(defs).ok_or_else(syntax)?,
            )
        } else {
            return Err(syntax());
        };

        Ok(Self { table, action })
    }
}

fn parse_names(names: &str) -> Vec<String> {
    names.split(',').map(|n| n.trim().to_string()).collect()
}

fn parse_definitions(text: &str) -> Option<Vec<Definition>> {
    let inner = text.trim().strip_prefix('(')?.strip_suffix(')')?;
    let defs = inner
        .split("PARTITION ")
        .map(|chunk| chunk.trim().trim_end_matches(',').trim())
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| {
            let (name, bound) = chunk.split_once(" VALUES LESS THAN ")?;
            let bound = bound.trim().strip_prefix('(')?.strip_suffix(')')?;
            Some((name.trim().to_string(), PartitionBound::parse(bound)?))
        })
        .collect::<Option<Vec<_>>>()?;
    (!defs.is_empty()).then_some(defs)
}

fn apply(table: &mut SimulatedTable, action: Action) -> Result<(), DdlError> {
    match action {
        Action::Add(defs) => {
            let partitions = partitions_mut(table)?;
            let mut last = partitions.last().map(|p| p.bound);
            for (name, bound) in &defs {
                if partitions.iter().any(|p| &p.name == name) {
                    return Err(rejected(format!("Duplicate partition name {name}")));
                }
                if last.is_some_and(|l| *bound <= l) {
                    return Err(rejected(
                        "VALUES LESS THAN value must be strictly increasing for each partition",
                    ));
                }
                last = Some(*bound);
            }
            partitions.extend(defs.into_iter().map(empty_partition));
        }
        Action::Drop(names) => {
            let partitions = partitions_mut(table)?;
            for name in &names {
                if !partitions.iter().any(|p| &p.name == name) {
                    return Err(rejected(format!("Error in list of partitions to DROP: {name}")));
                }
            }
            if names.len() >= partitions.len() {
                return Err(rejected(
                    "Cannot remove all partitions, use DROP TABLE instead",
                ));
            }
            partitions.retain(|p| !names.contains(&p.name));
        }
        Action::Reorganize(names, defs) => {
            let partitions = partitions_mut(table)?;
            let first = partitions
                .iter()
                .position(|p| p.name == names[0])
                .ok_or_else(|| rejected(format!("Error in list of partitions: {}", names[0])))?;
            let end = first + names.len();
            let consecutive = end <= partitions.len()
                && partitions[first..end]
                    .iter()
                    .zip(&names)
                    .all(|(p, name)| &p.name == name);
            if !consecutive {
                return Err(rejected(
                    "When reorganizing a set of partitions they must be in consecutive order",
                ));
            }

            let lower = first.checked_sub(1).map(|i| partitions[i].bound);
            check_increasing(lower, &defs)?;

            let old_last = partitions[end - 1].bound;
            let new_last = defs[defs.len() - 1].1;
            let touches_last = end == partitions.len();
            if (touches_last && new_last < old_last) || (!touches_last && new_last != old_last) {
                return Err(rejected(
                    "Reorganize of range partitions cannot change total ranges except \
                     for last partition where it can extend the range",
                ));
            }

            for (name, _) in &defs {
                let outside = partitions[..first]
                    .iter()
                    .chain(&partitions[end..])
                    .any(|p| &p.name == name);
                if outside {
                    return Err(rejected(format!("Duplicate partition name {name}")));
                }
            }

            let rows = partitions[first..end]
                .iter()
                .flat_map(|p| p.rows.iter().copied())
                .collect::<Vec<_>>();
            let replaced = distribute(defs, rows)?;
            let _ = partitions.splice(first..end, replaced);
        }
        Action::PartitionBy(key, defs) => {
            if !table.columns.contains(&key) {
                return Err(rejected(
                    "Field in list of fields for partition function not found in table",
                ));
            }
            check_increasing(None, &defs)?;

            let rows = match &table.partitions {
                Some(parts) => parts.iter().flat_map(|p| p.rows.iter().copied()).collect(),
                None => table.unpartitioned_rows.clone(),
            };
            table.partitions = Some(distribute(defs, rows)?);
            table.unpartitioned_rows.clear();
        }
    }
    Ok(())
}

fn partitions_mut(table: &mut SimulatedTable) -> Result<&mut Vec<SimPartition>, DdlError> {
    table.partitions.as_mut().ok_or_else(|| {
        rejected("Partition management on a not partitioned table is not possible")
    })
}

fn check_increasing(lower: Option<PartitionBound>, defs: &[Definition]) -> Result<(), DdlError> {
    let mut previous = lower;
    for (_, bound) in defs {
        if previous.is_some_and(|p| *bound <= p) {
            return Err(rejected(
                "VALUES LESS THAN value must be strictly increasing for each partition",
            ));
        }
        previous = Some(*bound);
    }
    Ok(())
}

fn distribute(defs: Vec<Definition>, rows: Vec<i64>) -> Result<Vec<SimPartition>, DdlError> {
    let mut partitions: Vec<SimPartition> = defs.into_iter().map(empty_partition).collect();
    for clock in rows {
        let target = partitions
            .iter_mut()
            .find(|p| p.bound.admits(clock))
            .ok_or_else(|| rejected(format!("Table has no partition for value {clock}")))?;
        target.rows.push(clock);
    }
    Ok(partitions)
}

fn empty_partition((name, bound): Definition) -> SimPartition {
    SimPartition {
        name,
        bound,
        rows: Vec::new(),
    }
}

fn rejected(message: impl Into<String>) -> DdlError {
    DdlError::Rejected {
        message: message.into(),
    }
}
