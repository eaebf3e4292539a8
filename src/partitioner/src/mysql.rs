//! MySQL catalog and DDL access through sqlx.

use async_trait::async_trait;
use common::cli::utils::redact_dsn;
use common::config::DatabaseConfig;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::{Row, query};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, error, info};

use crate::executor::{DdlError, DdlExecutor};
use crate::inventory::{CatalogError, CatalogReader, CatalogRow};

const PARTITIONS_QUERY: &str = "SELECT CAST(PARTITION_NAME AS CHAR) AS partition_name, \
     CAST(PARTITION_DESCRIPTION AS CHAR) AS partition_description, \
     CAST(TABLE_ROWS AS UNSIGNED) AS table_rows \
     FROM INFORMATION_SCHEMA.PARTITIONS \
     WHERE TABLE_SCHEMA = COALESCE(?, schema()) AND TABLE_NAME = ? \
     ORDER BY PARTITION_ORDINAL_POSITION";

const COLUMNS_QUERY: &str = "SELECT CAST(COLUMN_NAME AS CHAR) AS column_name \
     FROM INFORMATION_SCHEMA.COLUMNS \
     WHERE TABLE_SCHEMA = COALESCE(?, schema()) AND TABLE_NAME = ? \
     ORDER BY ORDINAL_POSITION";

/// MySQL connection used for both catalog reads and DDL.
#[derive(Debug)]
pub struct MySqlBackend {
    pool: MySqlPool,
    statement_seq: AtomicU64,
}

impl MySqlBackend {
    /// Open a single-connection pool.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        info!("Connecting to MySQL with DSN: {}", redact_dsn(&config.dsn));

        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .connect(&config.dsn)
            .await
            .map_err(|e| {
                error!("Failed to connect to MySQL: {e}");
                e
            })?;

        info!("Database connection established successfully");
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: MySqlPool) -> Self {
        Self {
            pool,
            statement_seq: AtomicU64::new(0),
        }
    }
}

/// Split an optionally schema-qualified table name.
fn split_table_name(table: &str) -> (Option<&str>, &str) {
    match table.split_once('.') {
        Some((schema, name)) => (Some(schema), name),
        None => (None, table),
    }
}

#[async_trait]
impl CatalogReader for MySqlBackend {
    async fn read_partitions(&self, table: &str) -> Result<Vec<CatalogRow>, CatalogError> {
        let (schema, name) = split_table_name(table);
        let rows = query(PARTITIONS_QUERY)
            .bind(schema)
            .bind(name)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CatalogError::backend(table, e))?;

        rows.iter()
            .map(|row| -> Result<CatalogRow, sqlx::Error> {
                Ok(CatalogRow {
                    name: row.try_get("partition_name")?,
                    description: row.try_get("partition_description")?,
                    rows: row.try_get("table_rows")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CatalogError::backend(table, e))
    }

    async fn read_columns(&self, table: &str) -> Result<Vec<String>, CatalogError> {
        let (schema, name) = split_table_name(table);
        let rows = query(COLUMNS_QUERY)
            .bind(schema)
            .bind(name)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CatalogError::backend(table, e))?;

        rows.iter()
            .map(|row| row.try_get("column_name"))
            .collect::<Result<Vec<String>, sqlx::Error>>()
            .map_err(|e| CatalogError::backend(table, e))
    }
}

#[async_trait]
impl DdlExecutor for MySqlBackend {
    async fn execute(&self, statement: &str) -> Result<u64, DdlError> {
        let op_id = self.statement_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let started = Instant::now();
        debug!(op_id, "Submitting statement: {statement}");

        let result = sqlx::raw_sql(statement)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) => DdlError::Rejected {
                    message: db.message().to_string(),
                },
                other => DdlError::Database(Box::new(other)),
            });

        debug!(
            op_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            success = result.is_ok(),
            "Statement finished"
        );
        Ok(result?.rows_affected())
    }
}
