//! Partition window reconciliation.
//!
//! Given a table's inventory and its retention policy, computes the ordered
//! structural changes that bring the partitions into the canonical window:
//! expired partitions dropped, one partition per step from now up to the
//! look-ahead horizon, every boundary aligned. Nothing here touches the
//! database; the plan is applied by [`crate::executor::ChangeExecutor`].

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;
use tracing::debug;

use crate::inventory::{PartitionBound, PartitionInventory};
use crate::policy::RetentionPolicy;
use crate::window::{LegalWindow, TimeWindow, WindowError, name_format, parse_slot_name};

/// One structural change to a table's partitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOp {
    /// Partition an unpartitioned table with a single partition.
    CreateInitialPartitioning { name: String, upper_bound: i64 },
    /// Add a new final partition.
    AppendPartition { name: String, upper_bound: i64 },
    /// Carve `current` out of the low end of `next`.
    SplitFromNext {
        next: String,
        current: String,
        current_bound: i64,
        next_bound: i64,
    },
    /// Merge `current` into `next`, then split them again at `split_at`.
    MergeThenSplit {
        current: String,
        next: String,
        merged_bound: i64,
        split_at: i64,
    },
    /// Extend the final partition up to `new_bound`.
    ResizeLastPartition { name: String, new_bound: i64 },
    /// Shrink the final partition to `keep_bound`, moving the excess up to
    /// `excess_bound` into a temporary partition that is then dropped.
    SplitOffExcess {
        name: String,
        keep_bound: i64,
        excess_bound: PartitionBound,
    },
    DropPartition { name: String, reason: DropReason },
}

impl ChangeOp {
    /// The partition the change is reported under.
    pub fn partition(&self) -> &str {
        match self {
            ChangeOp::CreateInitialPartitioning { name, .. }
            | ChangeOp::AppendPartition { name, .. }
            | ChangeOp::ResizeLastPartition { name, .. }
            | ChangeOp::SplitOffExcess { name, .. }
            | ChangeOp::DropPartition { name, .. } => name,
            ChangeOp::SplitFromNext { current, .. } | ChangeOp::MergeThenSplit { current, .. } => {
                current
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChangeOp::CreateInitialPartitioning { .. } => "create_initial_partitioning",
            ChangeOp::AppendPartition { .. } => "append_partition",
            ChangeOp::SplitFromNext { .. } => "split_from_next",
            ChangeOp::MergeThenSplit { .. } => "merge_then_split",
            ChangeOp::ResizeLastPartition { .. } => "resize_last_partition",
            ChangeOp::SplitOffExcess { .. } => "split_off_excess",
            ChangeOp::DropPartition { .. } => "drop_partition",
        }
    }
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeOp::CreateInitialPartitioning { name, upper_bound } => {
                write!(f, "create initial partition {name} < {upper_bound}")
            }
            ChangeOp::AppendPartition { name, upper_bound } => {
                write!(f, "append partition {name} < {upper_bound}")
            }
            ChangeOp::SplitFromNext {
                next,
                current,
                current_bound,
                next_bound,
            } => write!(
                f,
                "split {next} into {current} < {current_bound}, {next} < {next_bound}"
            ),
            ChangeOp::MergeThenSplit {
                current,
                next,
                merged_bound,
                split_at,
            } => write!(
                f,
                "merge {current},{next} < {merged_bound} and split at {split_at}"
            ),
            ChangeOp::ResizeLastPartition { name, new_bound } => {
                write!(f, "resize last partition {name} to < {new_bound}")
            }
            ChangeOp::SplitOffExcess {
                name,
                keep_bound,
                excess_bound,
                ..
            } => write!(
                f,
                "shrink {name} to < {keep_bound}, discarding [{keep_bound}, {excess_bound})"
            ),
            ChangeOp::DropPartition { name, reason } => write!(f, "drop {name} ({reason})"),
        }
    }
}

/// Why a partition is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Older than the retention window.
    Expired,
    /// Empty partition beyond the look-ahead horizon.
    BeyondHorizon,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::Expired => write!(f, "expired"),
            DropReason::BeyondHorizon => write!(f, "beyond look-ahead horizon"),
        }
    }
}

/// Conditions that need an operator but do not stop the table's run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartitionWarning {
    /// A partition beyond the horizon still holds rows and was left untouched.
    OutOfWindowNonEmpty {
        name: String,
        boundary: i64,
        max: i64,
        row_count: Option<u64>,
    },
}

impl fmt::Display for PartitionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionWarning::OutOfWindowNonEmpty {
                name, row_count, ..
            } => {
                let rows = row_count.map_or_else(|| "unknown".to_string(), |r| r.to_string());
                write!(
                    f,
                    "Partition {name} exceeded the maximum partition advance creation time, \
                     but it is not empty ({rows} rows) and has been ignored"
                )
            }
        }
    }
}

/// Ordered changes for one table plus the warnings raised while planning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub window: LegalWindow,
    pub ops: Vec<ChangeOp>,
    pub warnings: Vec<PartitionWarning>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Whether the plan partitions the table with `PARTITION BY`.
    pub fn bootstraps(&self) -> bool {
        self.ops
            .iter()
            .any(|op| matches!(op, ChangeOp::CreateInitialPartitioning { .. }))
    }

    pub fn drops(&self) -> impl Iterator<Item = &str> {
        self.ops.iter().filter_map(|op| match op {
            ChangeOp::DropPartition { name, .. } => Some(name.as_str()),
            _ => None,
        })
    }
}

/// Reconciles tables that share one policy and timezone.
#[derive(Debug, Clone, Copy)]
pub struct PartitionReconciler {
    policy: RetentionPolicy,
    tz: Tz,
}

impl PartitionReconciler {
    pub fn new(policy: RetentionPolicy, tz: Tz) -> Self {
        Self { policy, tz }
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Compute the changes `inventory` needs at instant `now`.
    ///
    /// # Errors
    ///
    /// Fails without proposing anything when a partition name is not in the
    /// policy's format: its boundaries are unknown and it must be handled
    /// manually.
    pub fn reconcile(
        &self,
        inventory: &PartitionInventory,
        now: DateTime<Utc>,
    ) -> Result<ReconcilePlan, ReconcileError> {
        let step = self.policy.step();
        let window = TimeWindow::new(now, self.tz, step);
        let legal = window.legal_window(&self.policy)?;

        debug!(
            anchor = %window.anchor(),
            min = legal.min,
            max = legal.max,
            policy = %self.policy,
            "Computed legal partition window"
        );

        let mut drops = Vec::new();
        let mut warnings = Vec::new();
        let mut remaining = inventory.clone();

        for partition in inventory.iter() {
            let start = parse_slot_name(&partition.name, step).ok_or_else(|| {
                ReconcileError::UnparseablePartitionName {
                    name: partition.name.clone(),
                    format: name_format(step),
                }
            })?;
            let boundary = window.boundary_of(start)?;

            if boundary > legal.max {
                if partition.is_empty() {
                    drops.push((partition.name.clone(), DropReason::BeyondHorizon));
                    remaining.remove(&partition.name);
                } else {
                    warnings.push(PartitionWarning::OutOfWindowNonEmpty {
                        name: partition.name.clone(),
                        boundary,
                        max: legal.max,
                        row_count: partition.row_count,
                    });
                }
            } else if boundary < legal.min {
                drops.push((partition.name.clone(), DropReason::Expired));
                remaining.remove(&partition.name);
            }
        }

        // MySQL refuses to drop the last remaining partition, so when cleanup
        // would empty the table the newest expired partition is kept until
        // the window has been built above it.
        let mut held_back = None;
        let mut bootstrap = None;
        if remaining.is_empty() {
            let initial = window.slot_at(-1)?;
            if inventory.is_empty() {
                bootstrap = Some(ChangeOp::CreateInitialPartitioning {
                    name: initial.name,
                    upper_bound: initial.upper,
                });
            } else if let Some(pos) = drops
                .iter()
                .rposition(|(_, reason)| *reason == DropReason::Expired)
            {
                held_back = Some(drops.remove(pos));
                bootstrap = Some(ChangeOp::AppendPartition {
                    name: initial.name,
                    upper_bound: initial.upper,
                });
            } else {
                // Every partition is empty and beyond the horizon. Repartitioning
                // replaces them at once and is rejected if any of them holds rows.
                drops.clear();
                bootstrap = Some(ChangeOp::CreateInitialPartitioning {
                    name: initial.name,
                    upper_bound: initial.upper,
                });
            }
        }

        let mut ops: Vec<ChangeOp> = drops
            .into_iter()
            .map(|(name, reason)| ChangeOp::DropPartition { name, reason })
            .collect();
        ops.extend(bootstrap);

        // Walk from the horizon back towards now so every split or merge
        // finds its right-hand neighbour already correct.
        for offset in (0..i64::from(self.policy.look_ahead())).rev() {
            let current = window.slot_at(offset)?;
            let next = window.next_slot(&current)?;
            let is_last = current.lower == legal.max;

            let op = match remaining.get(&current.name) {
                Some(existing) => {
                    match existing.upper_bound.cmp(&PartitionBound::Value(current.upper)) {
                        Ordering::Equal => {
                            debug!(partition = %current.name, "Partition is correctly established");
                            continue;
                        }
                        Ordering::Less if is_last => ChangeOp::ResizeLastPartition {
                            name: current.name,
                            new_bound: current.upper,
                        },
                        Ordering::Greater if is_last => ChangeOp::SplitOffExcess {
                            name: current.name,
                            keep_bound: current.upper,
                            excess_bound: existing.upper_bound,
                        },
                        _ => ChangeOp::MergeThenSplit {
                            current: current.name,
                            next: next.name,
                            merged_bound: next.upper,
                            split_at: current.upper,
                        },
                    }
                }
                None if is_last => ChangeOp::AppendPartition {
                    name: current.name,
                    upper_bound: current.upper,
                },
                None => ChangeOp::SplitFromNext {
                    next: next.name,
                    current: current.name,
                    current_bound: current.upper,
                    next_bound: next.upper,
                },
            };

            debug!(offset, op = %op, "Planned partition change");
            ops.push(op);
        }

        if let Some((name, reason)) = held_back {
            ops.push(ChangeOp::DropPartition { name, reason });
        }

        Ok(ReconcilePlan {
            window: legal,
            ops,
            warnings,
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    #[error(
        "Partition {name} cannot be recognized as time format {format}, please handle it manually"
    )]
    UnparseablePartitionName { name: String, format: &'static str },

    #[error(transparent)]
    Window(#[from] WindowError),
}
