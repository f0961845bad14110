use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use deadpool_postgres::{Object, Pool};
use std::time::Instant;
use tracing::info;

use super::query::parse_pg_rows;
use super::{
    build_pool, quote_ident, ColumnDetails, ConnectionConfig, Database, Dialect, ErrorCategory,
    ResultSet, StructuredError,
};

/// PostgreSQL database reached through a small client pool.
///
/// Every call checks a client out and hands it back on drop, so no
/// connection is held between two operations.
pub struct PgDatabase {
    pool: Pool,
    database: String,
}

impl PgDatabase {
    pub fn connect(config: &ConnectionConfig, database: &str) -> Result<Self> {
        let pool = build_pool(config, database)?;
        Ok(Self {
            pool,
            database: database.to_string(),
        })
    }

    /// Drop `database` if it exists and create it empty, through the
    /// maintenance database. A reload never sees the previous load's rows.
    pub async fn recreate_database(config: &ConnectionConfig, database: &str) -> Result<()> {
        if database == config.maintenance_database {
            bail!(
                "Refusing to replace the maintenance database {}",
                config.maintenance_database
            );
        }

        let admin = build_pool(config, &config.maintenance_database)?;
        let client = admin.get().await.with_context(|| {
            format!(
                "Failed to connect to {}",
                config.display_string(&config.maintenance_database)
            )
        })?;

        client
            .batch_execute(&format!("DROP DATABASE IF EXISTS {}", quote_ident(database)))
            .await
            .with_context(|| format!("Failed to drop database {}", database))?;
        client
            .batch_execute(&format!("CREATE DATABASE {}", quote_ident(database)))
            .await
            .with_context(|| format!("Failed to create database {}", database))?;
        info!(database, "database recreated");
        Ok(())
    }

    async fn client(&self) -> Result<Object> {
        self.pool
            .get()
            .await
            .with_context(|| format!("Failed to check out a connection to {}", self.database))
    }

    async fn checkout(&self) -> Result<Object, StructuredError> {
        self.client()
            .await
            .map_err(|e| StructuredError::new(ErrorCategory::Connection, format!("{:#}", e)))
    }
}

#[async_trait]
impl Database for PgDatabase {
    fn dialect(&self) -> Dialect {
        Dialect::PostgreSql
    }

    async fn current_database(&self) -> Result<Option<String>> {
        let client = self.client().await?;
        let row = client
            .query_one("SELECT current_database()::text AS name, current_schema()::text AS schema", &[])
            .await
            .context("Failed to read the current database")?;
        // current_schema() is NULL when no schema on the search_path exists
        let schema: Option<String> = row.get("schema");
        Ok(schema.and(row.get("name")))
    }

    async fn tables(&self) -> Result<Vec<String>> {
        let client = self.client().await?;
        let rows = client
            .query(
                r#"
                SELECT c.relname AS name
                FROM pg_catalog.pg_class c
                JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
                WHERE n.nspname = current_schema()
                  AND c.relkind IN ('r', 'p')
                ORDER BY c.relname
                "#,
                &[],
            )
            .await
            .context("Failed to list tables")?;

        Ok(rows.iter().map(|row| row.get("name")).collect())
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnDetails>> {
        let client = self.client().await?;
        let rows = client
            .query(
                r#"
                SELECT
                    c.column_name::text AS name,
                    c.data_type::text AS data_type,
                    c.is_nullable = 'YES' AS is_nullable,
                    EXISTS (
                        SELECT 1
                        FROM information_schema.key_column_usage kcu
                        JOIN information_schema.table_constraints tc
                            ON kcu.constraint_name = tc.constraint_name
                            AND kcu.table_schema = tc.table_schema
                        WHERE tc.constraint_type = 'PRIMARY KEY'
                          AND kcu.table_schema = c.table_schema
                          AND kcu.table_name = c.table_name
                          AND kcu.column_name = c.column_name
                    ) AS is_primary_key
                FROM information_schema.columns c
                WHERE c.table_schema = current_schema() AND c.table_name = $1
                ORDER BY c.ordinal_position
                "#,
                &[&table],
            )
            .await
            .with_context(|| format!("Failed to read columns of {}", table))?;

        let columns = rows
            .iter()
            .map(|row| ColumnDetails {
                name: row.get("name"),
                data_type: row.get("data_type"),
                is_nullable: row.get("is_nullable"),
                is_primary_key: row.get("is_primary_key"),
            })
            .collect();

        Ok(columns)
    }

    async fn query(&self, sql: &str) -> Result<ResultSet, StructuredError> {
        let client = self.checkout().await?;
        let start = Instant::now();

        let statement = client
            .prepare(sql)
            .await
            .map_err(|e| StructuredError::from_pg_error(&e, sql))?;

        if statement.columns().is_empty() {
            let affected = client
                .execute(&statement, &[])
                .await
                .map_err(|e| StructuredError::from_pg_error(&e, sql))?;
            return Ok(ResultSet::affected(affected, start.elapsed()));
        }

        let rows = client
            .query(&statement, &[])
            .await
            .map_err(|e| StructuredError::from_pg_error(&e, sql))?;

        parse_pg_rows(statement.columns(), &rows, start.elapsed())
    }

    async fn execute(&self, sql: &str) -> Result<u64, StructuredError> {
        let client = self.checkout().await?;
        client
            .execute(sql, &[])
            .await
            .map_err(|e| StructuredError::from_pg_error(&e, sql))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recreate_refuses_maintenance_database() {
        let config = ConnectionConfig::default();
        let err = PgDatabase::recreate_database(&config, "postgres")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("maintenance database"));
    }

    #[test]
    fn test_connect_is_lazy() {
        let config = ConnectionConfig {
            ssl_mode: crate::db::SslMode::Disable,
            ..ConnectionConfig::default()
        };
        let db = PgDatabase::connect(&config, "shop").unwrap();
        assert_eq!(db.dialect(), Dialect::PostgreSql);
    }
}
