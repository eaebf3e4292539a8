//! Full maintenance runs against the in-memory database.

use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;
use partitioner::testing::{SimulatedDatabase, SimulatedTable};
use partitioner::{
    ExecutionError, MaintainerSettings, MaintenanceMetrics, PartitionBound, PartitionMaintainer,
    ReconcileError, RetentionPolicy, StepUnit, TableError,
};
use std::sync::Arc;

fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

fn epoch(y: i32, m: u32, d: u32) -> i64 {
    utc(y, m, d).timestamp()
}

fn day_policy(retention: u32, look_ahead: u32) -> RetentionPolicy {
    RetentionPolicy::new(StepUnit::Day, retention, look_ahead).unwrap()
}

fn maintainer(db: &Arc<SimulatedDatabase>, settings: MaintainerSettings) -> PartitionMaintainer {
    PartitionMaintainer::new(settings, db.clone(), db.clone(), MaintenanceMetrics::new())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn test_bootstrap_then_idempotent() {
    init_tracing();
    let db = Arc::new(
        SimulatedDatabase::new().with_table("history", SimulatedTable::unpartitioned()),
    );
    db.insert("history", epoch(2024, 3, 15) - 3600).unwrap();
    let settings =
        MaintainerSettings::new(Tz::UTC, "clock").with_table("history", day_policy(30, 7));
    let maintainer = maintainer(&db, settings);

    let result = maintainer.run(utc(2024, 3, 15)).await;
    assert!(!result.has_failures(), "{:?}", result.tables);

    assert_eq!(
        db.partition_names("history"),
        (15..=22).map(|d| format!("p202403{d}")).collect::<Vec<_>>()
    );
    let bounds = db.partitions("history");
    assert_eq!(bounds[0].1, PartitionBound::Value(epoch(2024, 3, 16)));
    for pair in bounds.windows(2) {
        assert!(pair[0].1 < pair[1].1);
    }
    assert_eq!(bounds[7].1, PartitionBound::Value(epoch(2024, 3, 23)));
    assert_eq!(db.row_count("history"), 1);
    assert_eq!(maintainer.metrics().tables_bootstrapped(), 1);
    assert_eq!(maintainer.metrics().partitions_created(), 8);

    db.clear_statements();
    let again = maintainer.run(utc(2024, 3, 15) + Duration::hours(5)).await;
    assert!(!again.has_failures());
    assert!(db.statements().is_empty());
    assert!(again.tables[0].outcome.as_ref().unwrap().is_empty());
}

#[tokio::test]
async fn test_daily_runs_keep_a_rolling_window() {
    let db = Arc::new(
        SimulatedDatabase::new().with_table("history_uint", SimulatedTable::unpartitioned()),
    );
    let settings =
        MaintainerSettings::new(Tz::UTC, "clock").with_table("history_uint", day_policy(30, 7));
    let maintainer = maintainer(&db, settings);

    let start = utc(2024, 1, 20);
    for day in 0..45 {
        let now = start + Duration::days(day);
        let result = maintainer.run(now).await;
        assert!(!result.has_failures(), "day {day}: {:?}", result.tables);
        db.insert("history_uint", now.timestamp() + 600).unwrap();

        // A second run on the same day has nothing to do.
        db.clear_statements();
        maintainer.run(now).await;
        assert!(db.statements().is_empty(), "day {day}");
    }

    let names = db.partition_names("history_uint");
    assert_eq!(names.len(), 38);
    assert_eq!(names.first().unwrap(), "p20240203");
    assert_eq!(names.last().unwrap(), "p20240311");
    // Rows from the 31 most recent days survive.
    assert_eq!(db.row_count("history_uint"), 31);
}

#[tokio::test]
async fn test_monthly_table_rolls_over_the_year() {
    let db = Arc::new(
        SimulatedDatabase::new().with_table("trends", SimulatedTable::unpartitioned()),
    );
    let settings = MaintainerSettings::new(Tz::UTC, "clock").with_table(
        "trends",
        RetentionPolicy::new(StepUnit::Month, 12, 3).unwrap(),
    );
    let maintainer = maintainer(&db, settings);

    maintainer.run(utc(2024, 11, 3)).await;
    assert_eq!(
        db.partition_names("trends"),
        vec!["p202411", "p202412", "p202501", "p202502"]
    );

    let result = maintainer.run(utc(2025, 1, 31)).await;
    assert!(!result.has_failures());
    assert_eq!(
        db.partition_names("trends"),
        vec!["p202411", "p202412", "p202501", "p202502", "p202503", "p202504"]
    );
    assert_eq!(
        db.partitions("trends")[5].1,
        PartitionBound::Value(epoch(2025, 5, 1))
    );
}

#[tokio::test]
async fn test_misaligned_boundaries_are_repaired() {
    let db = Arc::new(
        SimulatedDatabase::new().with_table(
            "history",
            SimulatedTable::unpartitioned()
                .with_partition("p20240315", epoch(2024, 3, 16))
                .with_partition("p20240316", epoch(2024, 3, 16) + 7200)
                .with_partition("p20240317", epoch(2024, 3, 17) + 3600),
        ),
    );
    db.insert("history", epoch(2024, 3, 16) + 100).unwrap();
    db.insert("history", epoch(2024, 3, 16) + 7300).unwrap();
    let settings =
        MaintainerSettings::new(Tz::UTC, "clock").with_table("history", day_policy(30, 2));
    let maintainer = maintainer(&db, settings);

    let result = maintainer.run(utc(2024, 3, 15)).await;
    assert!(!result.has_failures(), "{:?}", result.tables);

    assert_eq!(
        db.partitions("history"),
        vec![
            ("p20240315".to_string(), PartitionBound::Value(epoch(2024, 3, 16))),
            ("p20240316".to_string(), PartitionBound::Value(epoch(2024, 3, 17))),
            ("p20240317".to_string(), PartitionBound::Value(epoch(2024, 3, 18))),
        ]
    );
    assert_eq!(db.row_count("history"), 2);
    assert_eq!(maintainer.metrics().partitions_reorganized(), 2);
}

#[tokio::test]
async fn test_table_with_only_expired_partitions_is_rebuilt() {
    let db = Arc::new(
        SimulatedDatabase::new().with_table(
            "history",
            SimulatedTable::unpartitioned()
                .with_partition("p20240101", epoch(2024, 1, 2))
                .with_partition("p20240102", epoch(2024, 1, 3)),
        ),
    );
    db.insert("history", epoch(2024, 1, 1) + 60).unwrap();
    db.insert("history", epoch(2024, 1, 2) + 60).unwrap();
    let settings =
        MaintainerSettings::new(Tz::UTC, "clock").with_table("history", day_policy(30, 7));
    let maintainer = maintainer(&db, settings);

    let result = maintainer.run(utc(2024, 3, 15)).await;
    assert!(!result.has_failures(), "{:?}", result.tables);

    assert_eq!(
        db.partition_names("history"),
        (15..=22).map(|d| format!("p202403{d}")).collect::<Vec<_>>()
    );
    assert_eq!(db.row_count("history"), 0);
    assert_eq!(
        db.statements().last().unwrap(),
        "ALTER TABLE history DROP PARTITION p20240102;"
    );
    assert_eq!(maintainer.metrics().partitions_dropped(), 2);
    assert_eq!(maintainer.metrics().tables_bootstrapped(), 0);

    // Data for today lands in the rebuilt window.
    db.insert("history", epoch(2024, 3, 15) + 600).unwrap();

    db.clear_statements();
    let again = maintainer.run(utc(2024, 3, 15) + Duration::hours(2)).await;
    assert!(!again.has_failures());
    assert!(db.statements().is_empty());
}

#[tokio::test]
async fn test_table_with_only_empty_future_partitions_is_repartitioned() {
    let db = Arc::new(
        SimulatedDatabase::new().with_table(
            "history",
            SimulatedTable::unpartitioned()
                .with_partition("p20250101", epoch(2025, 1, 2))
                .with_partition("p20250102", epoch(2025, 1, 3)),
        ),
    );
    let settings =
        MaintainerSettings::new(Tz::UTC, "clock").with_table("history", day_policy(30, 1));
    let maintainer = maintainer(&db, settings);

    let result = maintainer.run(utc(2024, 3, 15)).await;
    assert!(!result.has_failures(), "{:?}", result.tables);
    assert_eq!(db.partition_names("history"), vec!["p20240315", "p20240316"]);
}

#[tokio::test]
async fn test_maxvalue_catch_all_is_trimmed() {
    let db = Arc::new(
        SimulatedDatabase::new().with_table(
            "history",
            SimulatedTable::unpartitioned()
                .with_partition("p20240315", epoch(2024, 3, 16))
                .with_maxvalue_partition("p20240316"),
        ),
    );
    let settings =
        MaintainerSettings::new(Tz::UTC, "clock").with_table("history", day_policy(30, 1));
    let maintainer = maintainer(&db, settings);

    maintainer.run(utc(2024, 3, 15)).await;

    assert_eq!(
        db.statements().last().unwrap(),
        "ALTER TABLE history DROP PARTITION ptmp;"
    );
    assert_eq!(
        db.partitions("history")[1],
        ("p20240316".to_string(), PartitionBound::Value(epoch(2024, 3, 17)))
    );
}

#[tokio::test]
async fn test_statement_failure_stops_table_and_next_run_recovers() {
    let db = Arc::new(
        SimulatedDatabase::new().with_table("history", SimulatedTable::unpartitioned()),
    );
    db.fail_on_statement(3);
    let settings =
        MaintainerSettings::new(Tz::UTC, "clock").with_table("history", day_policy(30, 7));
    let maintainer = maintainer(&db, settings);

    let result = maintainer.run(utc(2024, 3, 15)).await;
    assert!(result.has_failures());
    match &result.tables[0].outcome {
        Err(TableError::Execution(ExecutionError { applied, op, .. })) => {
            assert_eq!(*applied, 2);
            assert_eq!(op.partition(), "p20240321");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(db.partition_names("history"), vec!["p20240315", "p20240322"]);

    let result = maintainer.run(utc(2024, 3, 15)).await;
    assert!(!result.has_failures(), "{:?}", result.tables);
    assert_eq!(db.partition_names("history").len(), 8);
}

#[tokio::test]
async fn test_foreign_partition_name_skips_only_that_table() {
    let db = Arc::new(
        SimulatedDatabase::new()
            .with_table(
                "history_str",
                SimulatedTable::unpartitioned()
                    .with_partition("p20240315", epoch(2024, 3, 16))
                    .with_maxvalue_partition("pmax"),
            )
            .with_table("history_text", SimulatedTable::unpartitioned()),
    );
    let settings = MaintainerSettings::new(Tz::UTC, "clock")
        .with_table("history_str", day_policy(30, 7))
        .with_table("history_text", day_policy(30, 7));
    let maintainer = maintainer(&db, settings);

    let result = maintainer.run(utc(2024, 3, 15)).await;

    assert!(result.has_failures());
    match &result.tables[0].outcome {
        Err(TableError::Reconcile(ReconcileError::UnparseablePartitionName { name, .. })) => {
            assert_eq!(name, "pmax")
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(result.tables[1].outcome.is_ok());
    assert_eq!(db.partition_names("history_str"), vec!["p20240315", "pmax"]);
    assert_eq!(db.partition_names("history_text").len(), 8);
    assert!(db.statements().iter().all(|s| !s.contains("history_str")));
}

#[tokio::test]
async fn test_dry_run_and_plan_leave_schema_untouched() {
    let db = Arc::new(
        SimulatedDatabase::new().with_table("history", SimulatedTable::unpartitioned()),
    );
    let settings = MaintainerSettings::new(Tz::UTC, "clock")
        .with_dry_run(true)
        .with_table("history", day_policy(30, 7));
    let maintainer = maintainer(&db, settings);

    let result = maintainer.run(utc(2024, 3, 15)).await;
    assert!(result.dry_run);
    let report = result.tables[0].outcome.as_ref().unwrap();
    assert_eq!(report.statements().count(), 8);
    assert!(db.statements().is_empty());
    assert!(!db.is_partitioned("history"));

    let plans = maintainer.plan(utc(2024, 3, 15)).await;
    let statements = plans[0].outcome.as_ref().unwrap();
    assert_eq!(statements.len(), 8);
    assert_eq!(
        statements[0],
        "ALTER TABLE history PARTITION BY RANGE( clock ) \
         (PARTITION p20240315 VALUES LESS THAN (1710547200));"
    );
    assert!(db.statements().is_empty());
}

#[tokio::test]
async fn test_missing_table_and_partition_key() {
    let db = Arc::new(SimulatedDatabase::new().with_table(
        "history_log",
        SimulatedTable::unpartitioned().with_columns(&["itemid", "ts", "value"]),
    ));
    let settings = MaintainerSettings::new(Tz::UTC, "clock")
        .with_table("history_bin", day_policy(30, 7))
        .with_table("history_log", day_policy(30, 7));
    let maintainer = maintainer(&db, settings);

    let result = maintainer.run(utc(2024, 3, 15)).await;

    assert!(matches!(
        &result.tables[0].outcome,
        Err(TableError::TableNotFound(table)) if table == "history_bin"
    ));
    assert!(matches!(
        &result.tables[1].outcome,
        Err(TableError::MissingPartitionKey { column, .. }) if column == "clock"
    ));
    assert!(db.statements().is_empty());
    assert_eq!(maintainer.metrics().tables_failed(), 2);
}

#[tokio::test]
async fn test_non_empty_partition_beyond_horizon_is_reported() {
    let db = Arc::new(
        SimulatedDatabase::new().with_table(
            "history",
            SimulatedTable::unpartitioned()
                .with_partition("p20240315", epoch(2024, 3, 16))
                .with_partition("p20240316", epoch(2024, 3, 17))
                .with_partition("p20240320", epoch(2024, 3, 21)),
        ),
    );
    db.insert("history", epoch(2024, 3, 20) + 5).unwrap();
    let settings =
        MaintainerSettings::new(Tz::UTC, "clock").with_table("history", day_policy(30, 1));
    let maintainer = maintainer(&db, settings);

    let result = maintainer.run(utc(2024, 3, 15)).await;

    assert!(!result.has_failures());
    assert_eq!(result.tables[0].warnings.len(), 1);
    assert_eq!(
        db.partition_names("history"),
        vec!["p20240315", "p20240316", "p20240320"]
    );
    assert_eq!(maintainer.metrics().warnings_raised(), 1);
}
