use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::{Column, Executor, Row, Statement, TypeInfo, ValueRef};
use std::time::{Duration, Instant};
use tracing::info;

use super::query::decode_error;
use super::{
    CellValue, ColumnDetails, ColumnInfo, ConnectionConfig, Database, Dialect, ResultSet, SslMode,
    StructuredError,
};

const MAX_POOL_SIZE: u32 = 4;

const SYSTEM_SCHEMAS: &[&str] = &["mysql", "information_schema", "performance_schema", "sys"];

/// MySQL database reached through a lazily connecting sqlx pool.
///
/// Each call acquires one pooled connection and returns it on drop.
pub struct MySqlDatabase {
    pool: MySqlPool,
}

impl MySqlDatabase {
    /// Must be called inside a tokio runtime; no connection is opened yet.
    pub fn connect(config: &ConnectionConfig, database: &str) -> Result<Self> {
        Ok(Self {
            pool: build_mysql_pool(config, Some(database)),
        })
    }

    /// Drop `database` if it exists and create it empty.
    pub async fn recreate_database(config: &ConnectionConfig, database: &str) -> Result<()> {
        if SYSTEM_SCHEMAS.iter().any(|s| s.eq_ignore_ascii_case(database)) {
            bail!("Refusing to replace the system schema {}", database);
        }

        let admin = build_mysql_pool(config, None);
        let mut conn = admin
            .acquire()
            .await
            .with_context(|| format!("Failed to connect to {}", config.display_string("")))?;

        let name = quote_mysql_ident(database);
        (&mut *conn)
            .execute(format!("DROP DATABASE IF EXISTS {}", name).as_str())
            .await
            .with_context(|| format!("Failed to drop database {}", database))?;
        (&mut *conn)
            .execute(format!("CREATE DATABASE {}", name).as_str())
            .await
            .with_context(|| format!("Failed to create database {}", database))?;

        drop(conn);
        admin.close().await;
        info!(database, "database recreated");
        Ok(())
    }
}

fn connect_options(config: &ConnectionConfig, database: Option<&str>) -> MySqlConnectOptions {
    let mut options = MySqlConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.username)
        .ssl_mode(match config.ssl_mode {
            SslMode::Disable => MySqlSslMode::Disabled,
            SslMode::Prefer => MySqlSslMode::Preferred,
            SslMode::Require => MySqlSslMode::Required,
            SslMode::VerifyCa => MySqlSslMode::VerifyCa,
            SslMode::VerifyFull => MySqlSslMode::VerifyIdentity,
        });
    if !config.password.is_empty() {
        options = options.password(&config.password);
    }
    if let Some(ca) = &config.ca_cert_path {
        options = options.ssl_ca(ca);
    }
    if let Some(database) = database {
        options = options.database(database);
    }
    options
}

fn build_mysql_pool(config: &ConnectionConfig, database: Option<&str>) -> MySqlPool {
    MySqlPoolOptions::new()
        .max_connections(MAX_POOL_SIZE)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect_lazy_with(connect_options(config, database))
}

fn quote_mysql_ident(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

/// How a MySQL column type is read into a [`CellValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Bool,
    Signed,
    Unsigned,
    Float,
    Double,
    Decimal,
    Date,
    Time,
    DateTime,
    Timestamp,
    Json,
    Text,
    Bytes,
}

fn value_kind(type_name: &str) -> Option<ValueKind> {
    let upper = type_name.to_ascii_uppercase();
    let kind = match upper.as_str() {
        "BOOLEAN" => ValueKind::Bool,
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => ValueKind::Signed,
        t if t.ends_with(" UNSIGNED") || t == "BIT" => ValueKind::Unsigned,
        "FLOAT" => ValueKind::Float,
        "DOUBLE" => ValueKind::Double,
        "DECIMAL" => ValueKind::Decimal,
        "DATE" => ValueKind::Date,
        "TIME" => ValueKind::Time,
        "DATETIME" => ValueKind::DateTime,
        "TIMESTAMP" => ValueKind::Timestamp,
        "JSON" => ValueKind::Json,
        "CHAR" | "VARCHAR" | "TINYTEXT" | "TEXT" | "MEDIUMTEXT" | "LONGTEXT" | "ENUM" | "SET" => {
            ValueKind::Text
        }
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
            ValueKind::Bytes
        }
        _ => return None,
    };
    Some(kind)
}

fn decode_mysql_row(row: &MySqlRow) -> Result<Vec<CellValue>, StructuredError> {
    let mut values = Vec::with_capacity(row.columns().len());

    for (i, column) in row.columns().iter().enumerate() {
        let type_name = column.type_info().name();
        let fail = |e: sqlx::Error| decode_error(column.name(), &type_name, &e);

        if row.try_get_raw(i).map_err(fail)?.is_null() {
            values.push(CellValue::Null);
            continue;
        }

        let Some(kind) = value_kind(type_name) else {
            return Err(StructuredError::new(
                super::ErrorCategory::Unknown,
                format!("cannot decode column {}: no decoder for type {}", column.name(), type_name),
            ));
        };

        let value = match kind {
            ValueKind::Bool => CellValue::Bool(row.try_get_unchecked::<bool, _>(i).map_err(fail)?),
            ValueKind::Signed => CellValue::Int64(row.try_get_unchecked::<i64, _>(i).map_err(fail)?),
            ValueKind::Unsigned => {
                let n = row.try_get_unchecked::<u64, _>(i).map_err(fail)?;
                match i64::try_from(n) {
                    Ok(n) => CellValue::Int64(n),
                    Err(_) => CellValue::Decimal(Decimal::from(n)),
                }
            }
            ValueKind::Float => CellValue::Float32(row.try_get_unchecked::<f32, _>(i).map_err(fail)?),
            ValueKind::Double => CellValue::Float64(row.try_get_unchecked::<f64, _>(i).map_err(fail)?),
            ValueKind::Decimal => {
                CellValue::Decimal(row.try_get_unchecked::<Decimal, _>(i).map_err(fail)?)
            }
            ValueKind::Date => CellValue::Date(row.try_get_unchecked::<NaiveDate, _>(i).map_err(fail)?),
            ValueKind::Time => CellValue::Time(row.try_get_unchecked::<NaiveTime, _>(i).map_err(fail)?),
            ValueKind::DateTime => {
                CellValue::DateTime(row.try_get_unchecked::<NaiveDateTime, _>(i).map_err(fail)?)
            }
            ValueKind::Timestamp => {
                CellValue::TimestampTz(row.try_get_unchecked::<DateTime<Utc>, _>(i).map_err(fail)?)
            }
            ValueKind::Json => {
                CellValue::Json(row.try_get_unchecked::<serde_json::Value, _>(i).map_err(fail)?)
            }
            ValueKind::Text => CellValue::Text(row.try_get_unchecked::<String, _>(i).map_err(fail)?),
            // binary collations report text columns as VARBINARY
            ValueKind::Bytes => {
                let bytes = row.try_get_unchecked::<Vec<u8>, _>(i).map_err(fail)?;
                match String::from_utf8(bytes) {
                    Ok(text) => CellValue::Text(text),
                    Err(e) => CellValue::Bytes(e.into_bytes()),
                }
            }
        };
        values.push(value);
    }

    Ok(values)
}

#[async_trait]
impl Database for MySqlDatabase {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    async fn current_database(&self) -> Result<Option<String>> {
        let row = sqlx::query("SELECT CAST(DATABASE() AS CHAR) AS name")
            .fetch_one(&self.pool)
            .await
            .context("Failed to read the current database")?;
        Ok(row.try_get::<Option<String>, _>("name")?)
    }

    async fn tables(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT CAST(table_name AS CHAR) AS name
            FROM information_schema.tables
            WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE'
            ORDER BY table_name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list tables")?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("name").context("Failed to decode table name"))
            .collect()
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnDetails>> {
        let rows = sqlx::query(
            r#"
            SELECT
                CAST(column_name AS CHAR) AS name,
                CAST(column_type AS CHAR) AS data_type,
                CAST(is_nullable = 'YES' AS SIGNED) AS is_nullable,
                CAST(column_key = 'PRI' AS SIGNED) AS is_primary_key
            FROM information_schema.columns
            WHERE table_schema = DATABASE() AND table_name = ?
            ORDER BY ordinal_position
            "#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to read columns of {}", table))?;

        rows.iter()
            .map(|row| {
                Ok(ColumnDetails {
                    name: row.try_get("name")?,
                    data_type: row.try_get("data_type")?,
                    is_nullable: row.try_get::<i64, _>("is_nullable")? != 0,
                    is_primary_key: row.try_get::<i64, _>("is_primary_key")? != 0,
                })
            })
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
            .with_context(|| format!("Failed to decode columns of {}", table))
    }

    async fn query(&self, sql: &str) -> Result<ResultSet, StructuredError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StructuredError::from_mysql_error(&e))?;
        let start = Instant::now();

        let statement = (&mut *conn)
            .prepare(sql)
            .await
            .map_err(|e| StructuredError::from_mysql_error(&e))?;

        if statement.columns().is_empty() {
            let done = (&mut *conn)
                .execute(sql)
                .await
                .map_err(|e| StructuredError::from_mysql_error(&e))?;
            return Ok(ResultSet::affected(done.rows_affected(), start.elapsed()));
        }

        let columns: Vec<ColumnInfo> = statement
            .columns()
            .iter()
            .map(|c| ColumnInfo::new(c.name(), c.type_info().name().to_ascii_lowercase()))
            .collect();

        let rows = (&mut *conn)
            .fetch_all(sql)
            .await
            .map_err(|e| StructuredError::from_mysql_error(&e))?;

        let mut result_rows = Vec::with_capacity(rows.len());
        for row in &rows {
            result_rows.push(decode_mysql_row(row)?);
        }

        Ok(ResultSet::new(columns, result_rows, start.elapsed()))
    }

    async fn execute(&self, sql: &str) -> Result<u64, StructuredError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StructuredError::from_mysql_error(&e))?;
        // text protocol: dump statements such as LOCK TABLES cannot be prepared
        let done = (&mut *conn)
            .execute(sql)
            .await
            .map_err(|e| StructuredError::from_mysql_error(&e))?;
        Ok(done.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_mysql_ident() {
        assert_eq!(quote_mysql_ident("shop"), "`shop`");
        assert_eq!(quote_mysql_ident("we`ird"), "`we``ird`");
    }

    #[test]
    fn test_value_kinds() {
        assert_eq!(value_kind("BIGINT"), Some(ValueKind::Signed));
        assert_eq!(value_kind("INT UNSIGNED"), Some(ValueKind::Unsigned));
        assert_eq!(value_kind("BOOLEAN"), Some(ValueKind::Bool));
        assert_eq!(value_kind("DECIMAL"), Some(ValueKind::Decimal));
        assert_eq!(value_kind("VARCHAR"), Some(ValueKind::Text));
        assert_eq!(value_kind("ENUM"), Some(ValueKind::Text));
        assert_eq!(value_kind("VARBINARY"), Some(ValueKind::Bytes));
        assert_eq!(value_kind("TIMESTAMP"), Some(ValueKind::Timestamp));
        assert_eq!(value_kind("GEOMETRY"), None);
    }

    #[tokio::test]
    async fn test_recreate_refuses_system_schemas() {
        let config = ConnectionConfig {
            engine: crate::db::Engine::MySql,
            ..ConnectionConfig::default()
        };
        let err = MySqlDatabase::recreate_database(&config, "MySQL")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("system schema"));
    }

    #[tokio::test]
    async fn test_connect_is_lazy() {
        let config = ConnectionConfig {
            engine: crate::db::Engine::MySql,
            port: 3306,
            username: "root".to_string(),
            ssl_mode: SslMode::Disable,
            ..ConnectionConfig::default()
        };
        let db = MySqlDatabase::connect(&config, "shop").unwrap();
        assert_eq!(db.dialect(), Dialect::MySql);
    }
}
