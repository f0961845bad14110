use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use super::query::sqlite_value;
use super::{CellValue, ColumnDetails, ColumnInfo, Database, Dialect, ResultSet, StructuredError};

/// SQLite-backed database, either a file or in-memory.
///
/// rusqlite is synchronous, so every call runs on the blocking pool and
/// holds the connection lock only while it runs.
pub struct SqliteDatabase {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDatabase {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database {}", path.display()))?;
        Ok(Self::from_connection(conn))
    }

    /// Open `path` as a new, empty database, discarding any previous file.
    pub fn create(path: &Path) -> Result<Self> {
        for suffix in ["", "-journal", "-wal", "-shm"] {
            let mut name = path.as_os_str().to_owned();
            name.push(suffix);
            match std::fs::remove_file(&name) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to remove {}", Path::new(&name).display())
                    })
                }
            }
        }
        Self::open(path)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite")?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> T + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || -> Result<T> {
            let guard = conn
                .lock()
                .map_err(|_| anyhow!("SQLite connection lock poisoned"))?;
            Ok(f(&guard))
        })
        .await
        .context("SQLite task failed")?
    }

    fn run_query(conn: &Connection, sql: &str) -> rusqlite::Result<ResultSet> {
        let start = Instant::now();
        let mut stmt = conn.prepare(sql)?;

        if stmt.column_count() == 0 {
            let affected = stmt.execute([])?;
            return Ok(ResultSet::affected(affected as u64, start.elapsed()));
        }

        let columns: Vec<ColumnInfo> = stmt
            .columns()
            .iter()
            .map(|c| ColumnInfo::new(c.name(), c.decl_type().unwrap_or("").to_ascii_lowercase()))
            .collect();
        let width = columns.len();

        let mut rows = stmt.query([])?;
        let mut result_rows: Vec<Vec<CellValue>> = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(sqlite_value(row.get_ref(i)?));
            }
            result_rows.push(values);
        }

        Ok(ResultSet::new(columns, result_rows, start.elapsed()))
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn current_database(&self) -> Result<Option<String>> {
        // SQLite always has its main schema selected
        Ok(Some("main".to_string()))
    }

    async fn tables(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| -> Result<Vec<String>> {
            let mut stmt = conn
                .prepare(
                    "SELECT name FROM sqlite_schema
                     WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
                     ORDER BY name",
                )
                .context("failed to prepare sqlite_schema introspection query")?;
            let names = stmt
                .query_map([], |row| row.get::<usize, String>(0))
                .context("failed to execute sqlite_schema introspection query")?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("failed to decode sqlite_schema row")?;
            Ok(names)
        })
        .await?
    }

    async fn columns(&self, table: &str) -> Result<Vec<ColumnDetails>> {
        let table = table.to_string();
        self.with_conn(move |conn| -> Result<Vec<ColumnDetails>> {
            let mut stmt = conn
                .prepare(
                    "SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1) ORDER BY cid",
                )
                .context("failed to prepare table_info query")?;
            let columns = stmt
                .query_map([&table], |row| {
                    Ok(ColumnDetails {
                        name: row.get(0)?,
                        data_type: row.get::<usize, String>(1)?.to_ascii_lowercase(),
                        is_nullable: row.get::<usize, i64>(2)? == 0,
                        is_primary_key: row.get::<usize, i64>(3)? > 0,
                    })
                })
                .with_context(|| format!("failed to read columns of {}", table))?
                .collect::<rusqlite::Result<Vec<_>>>()
                .with_context(|| format!("failed to decode columns of {}", table))?;
            Ok(columns)
        })
        .await?
    }

    async fn query(&self, sql: &str) -> Result<ResultSet, StructuredError> {
        let sql = sql.to_string();
        self.with_conn(move |conn| {
            Self::run_query(conn, &sql).map_err(|e| StructuredError::from_sqlite_error(&e))
        })
        .await
        .map_err(|e| StructuredError::from_string(e.to_string()))?
    }

    async fn execute(&self, sql: &str) -> Result<u64, StructuredError> {
        let sql = sql.to_string();
        self.with_conn(move |conn| -> Result<u64, StructuredError> {
            conn.execute_batch(&sql)
                .map_err(|e| StructuredError::from_sqlite_error(&e))?;
            Ok(conn.changes() as u64)
        })
        .await
        .map_err(|e| StructuredError::from_string(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ErrorCategory;

    #[tokio::test]
    async fn test_query_materializes_rows() {
        let db = SqliteDatabase::in_memory().unwrap();
        db.execute("CREATE TABLE t (id integer, label text)").await.unwrap();
        db.execute("INSERT INTO t VALUES (1, 'a'), (2, NULL)").await.unwrap();

        let result = db.query("SELECT id, label FROM t ORDER BY id").await.unwrap();
        assert_eq!(result.column_names(), vec!["id", "label"]);
        assert_eq!(result.columns[0].type_name, "integer");
        assert_eq!(result.rows[0], vec![CellValue::Int64(1), CellValue::Text("a".into())]);
        assert_eq!(result.rows[1][1], CellValue::Null);
    }

    #[tokio::test]
    async fn test_declared_types_are_lowercased() {
        let db = SqliteDatabase::in_memory().unwrap();
        db.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, price DECIMAL(10,2))")
            .await
            .unwrap();

        let columns = db.columns("t").await.unwrap();
        assert_eq!(columns[0].data_type, "integer");
        assert_eq!(columns[1].data_type, "decimal(10,2)");

        let result = db.query("SELECT id, price FROM t").await.unwrap();
        assert_eq!(result.columns[0].type_name, "integer");
        assert_eq!(result.columns[1].type_name, "decimal(10,2)");
    }

    #[tokio::test]
    async fn test_zero_rows_keep_columns() {
        let db = SqliteDatabase::in_memory().unwrap();
        db.execute("CREATE TABLE t (id integer)").await.unwrap();

        let result = db.query("SELECT id FROM t").await.unwrap();
        assert!(result.is_empty());
        assert_eq!(result.column_names(), vec!["id"]);
    }

    #[tokio::test]
    async fn test_statement_without_columns_reports_affected_rows() {
        let db = SqliteDatabase::in_memory().unwrap();
        db.execute("CREATE TABLE t (id integer)").await.unwrap();
        db.execute("INSERT INTO t VALUES (1), (2), (3)").await.unwrap();

        let result = db.query("DELETE FROM t WHERE id > 1").await.unwrap();
        assert_eq!(result.affected_rows, Some(2));
    }

    #[tokio::test]
    async fn test_unknown_table_is_semantic() {
        let db = SqliteDatabase::in_memory().unwrap();
        let err = db.query("SELECT * FROM ghost_table").await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::Semantic);
        assert!(err.message.contains("ghost_table"));
    }

    #[tokio::test]
    async fn test_bad_grammar_is_syntax() {
        let db = SqliteDatabase::in_memory().unwrap();
        let err = db.query("SELEC 1").await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::Syntax);
    }

    #[tokio::test]
    async fn test_columns_report_keys_and_nullability() {
        let db = SqliteDatabase::in_memory().unwrap();
        db.execute("CREATE TABLE t (id integer primary key, name text not null)")
            .await
            .unwrap();

        let columns = db.columns("t").await.unwrap();
        assert!(columns[0].is_primary_key);
        assert!(!columns[1].is_nullable);
        assert!(!columns[1].is_primary_key);
    }

    #[tokio::test]
    async fn test_create_discards_existing_file() {
        let dir = std::env::temp_dir().join(format!("askdb-create-{}", std::process::id()));
        let path = dir.join("shop.db");

        let first = SqliteDatabase::create(&path).unwrap();
        first.execute("CREATE TABLE t (id integer)").await.unwrap();
        drop(first);

        let reopened = SqliteDatabase::open(&path).unwrap();
        assert_eq!(reopened.tables().await.unwrap(), vec!["t"]);
        drop(reopened);

        let fresh = SqliteDatabase::create(&path).unwrap();
        assert!(fresh.tables().await.unwrap().is_empty());

        drop(fresh);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_long_query_yields_to_other_tasks() {
        let db = SqliteDatabase::in_memory().unwrap();
        let slow = db.query(
            "WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < 3000000)
             SELECT count(*) FROM n",
        );

        tokio::select! {
            biased;
            _ = slow => panic!("query finished before the timer"),
            _ = tokio::time::sleep(std::time::Duration::from_millis(1)) => {}
        }
    }
}
