//! MySQL statements for partition changes.
//!
//! Identifiers are validated by configuration loading and partition names are
//! generated from dates, so statements are built by formatting.

use crate::reconciler::ChangeOp;

/// Name of the scratch partition used while shrinking the final partition.
pub const TEMP_PARTITION: &str = "ptmp";

/// Statements that apply `op` to `table`, in execution order.
pub fn render(op: &ChangeOp, table: &str, partition_key: &str) -> Vec<String> {
    match op {
        ChangeOp::CreateInitialPartitioning { name, upper_bound } => vec![format!(
            "ALTER TABLE {table} PARTITION BY RANGE( {partition_key} ) \
             (PARTITION {name} VALUES LESS THAN ({upper_bound}));"
        )],
        ChangeOp::AppendPartition { name, upper_bound } => vec![format!(
            "ALTER TABLE {table} ADD PARTITION \
             (PARTITION {name} VALUES LESS THAN ({upper_bound}));"
        )],
        ChangeOp::SplitFromNext {
            next,
            current,
            current_bound,
            next_bound,
        } => vec![split(table, next, current, *current_bound, *next_bound)],
        ChangeOp::MergeThenSplit {
            current,
            next,
            merged_bound,
            split_at,
        } => vec![
            format!(
                "ALTER TABLE {table} REORGANIZE PARTITION {current},{next} \
                 INTO (PARTITION {next} VALUES LESS THAN ({merged_bound}));"
            ),
            split(table, next, current, *split_at, *merged_bound),
        ],
        ChangeOp::ResizeLastPartition { name, new_bound } => vec![format!(
            "ALTER TABLE {table} REORGANIZE PARTITION {name} \
             INTO (PARTITION {name} VALUES LESS THAN ({new_bound}));"
        )],
        ChangeOp::SplitOffExcess {
            name,
            keep_bound,
            excess_bound,
        } => vec![
            format!(
                "ALTER TABLE {table} REORGANIZE PARTITION {name} \
                 INTO (PARTITION {name} VALUES LESS THAN ({keep_bound}), \
                 PARTITION {TEMP_PARTITION} VALUES LESS THAN ({excess_bound}));"
            ),
            format!("ALTER TABLE {table} DROP PARTITION {TEMP_PARTITION};"),
        ],
        ChangeOp::DropPartition { name, .. } => {
            vec![format!("ALTER TABLE {table} DROP PARTITION {name};")]
        }
    }
}

fn split(table: &str, next: &str, current: &str, current_bound: i64, next_bound: i64) -> String {
    format!(
        "ALTER TABLE {table} REORGANIZE PARTITION {next} \
         INTO (PARTITION {current} VALUES LESS THAN ({current_bound}), \
         PARTITION {next} VALUES LESS THAN ({next_bound}));"
    )
}
