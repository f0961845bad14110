mod connection;
mod mysql;
mod postgres;
mod query;
mod schema;
mod sqlite;

pub use connection::*;
pub use mysql::*;
pub use postgres::*;
pub use query::*;
pub use schema::*;
pub use sqlite::*;

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    MySql,
    PostgreSql,
    Sqlite,
}

impl Dialect {
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::MySql => "MySQL",
            Dialect::PostgreSql => "PostgreSQL",
            Dialect::Sqlite => "SQLite",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A live, populated database the pipeline can introspect and query.
///
/// Implementations acquire their underlying connection per call and
/// release it before returning. Callers sharing one handle across tasks
/// must serialize questions themselves.
#[async_trait]
pub trait Database: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Name of the database currently selected, if the backend has one.
    async fn current_database(&self) -> Result<Option<String>>;

    /// Base tables visible in the current database, ordered by name.
    async fn tables(&self) -> Result<Vec<String>>;

    /// Columns of `table` in their declared order.
    async fn columns(&self, table: &str) -> Result<Vec<ColumnDetails>>;

    /// Run a statement and materialize every row it returns.
    async fn query(&self, sql: &str) -> std::result::Result<ResultSet, StructuredError>;

    /// Run a statement for its side effects, returning the affected row count.
    async fn execute(&self, sql: &str) -> std::result::Result<u64, StructuredError>;
}
