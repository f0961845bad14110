use tracing::{debug, warn};

use crate::db::{Database, ResultSet};
use crate::error::AskError;
use crate::statement::count_statements;

/// Result of running one generated statement. Never both.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Success(ResultSet),
    Failure(AskError),
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success(_))
    }

    pub fn result_set(&self) -> Option<&ResultSet> {
        match self {
            ExecutionOutcome::Success(rs) => Some(rs),
            ExecutionOutcome::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&AskError> {
        match self {
            ExecutionOutcome::Success(_) => None,
            ExecutionOutcome::Failure(e) => Some(e),
        }
    }
}

/// Run a sanitized statement exactly as issued and materialize every row.
///
/// No row cap is added. Empty or multi-statement text is refused without
/// touching the database.
pub async fn execute(db: &dyn Database, query: &str) -> ExecutionOutcome {
    if query.trim().is_empty() {
        return ExecutionOutcome::Failure(AskError::SyntaxOrSemantic(
            "generated query is empty after sanitization".to_string(),
        ));
    }

    let statements = count_statements(query, db.dialect());
    if statements != 1 {
        return ExecutionOutcome::Failure(AskError::SyntaxOrSemantic(format!(
            "expected exactly one SQL statement, found {}",
            statements
        )));
    }

    match db.query(query).await {
        Ok(result) => {
            debug!(
                rows = result.row_count(),
                elapsed_ms = result.execution_time.as_millis() as u64,
                "query executed"
            );
            ExecutionOutcome::Success(result)
        }
        Err(err) => {
            warn!(category = %err.category, code = %err.code, "query failed: {}", err.message);
            ExecutionOutcome::Failure(err.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CellValue, SqliteDatabase};
    use crate::error::ErrorKind;

    async fn users_db() -> SqliteDatabase {
        let db = SqliteDatabase::in_memory().unwrap();
        db.execute("CREATE TABLE users (id integer, name text)").await.unwrap();
        for (id, name) in [(1, "ada"), (2, "bob"), (3, "cy"), (4, "di"), (5, "ed")] {
            db.execute(&format!("INSERT INTO users VALUES ({}, '{}')", id, name))
                .await
                .unwrap();
        }
        db
    }

    #[tokio::test]
    async fn test_count_query_succeeds() {
        let db = users_db().await;
        let outcome = execute(&db, "SELECT COUNT(*) FROM users;").await;

        let rs = outcome.result_set().expect("success");
        assert_eq!(rs.row_count(), 1);
        assert_eq!(rs.columns.len(), 1);
        assert_eq!(rs.rows[0][0], CellValue::Int64(5));
    }

    #[tokio::test]
    async fn test_unknown_table_is_rejection() {
        let db = users_db().await;
        let outcome = execute(&db, "SELECT * FROM ghost_table;").await;

        let err = outcome.error().expect("failure");
        assert_eq!(err.kind(), ErrorKind::SyntaxOrSemanticError);
        assert!(err.message().contains("ghost_table"));
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        let db = users_db().await;
        let outcome = execute(&db, "  \n").await;
        assert_eq!(
            outcome.error().map(|e| e.kind()),
            Some(ErrorKind::SyntaxOrSemanticError)
        );
    }

    #[tokio::test]
    async fn test_multiple_statements_are_refused() {
        let db = users_db().await;
        let outcome = execute(&db, "SELECT 1; DELETE FROM users;").await;
        assert_eq!(
            outcome.error().map(|e| e.kind()),
            Some(ErrorKind::SyntaxOrSemanticError)
        );

        // nothing was deleted
        let count = execute(&db, "SELECT COUNT(*) AS n FROM users").await;
        assert_eq!(count.result_set().unwrap().get(0, "n"), Some(&CellValue::Int64(5)));
    }

    #[tokio::test]
    async fn test_no_row_cap_is_added() {
        let db = users_db().await;
        let outcome = execute(&db, "SELECT id FROM users ORDER BY id").await;
        assert_eq!(outcome.result_set().unwrap().row_count(), 5);
    }

    #[tokio::test]
    async fn test_zero_rows_is_success() {
        let db = users_db().await;
        let outcome = execute(&db, "SELECT * FROM users WHERE id > 100").await;
        assert!(outcome.is_success());
        assert!(outcome.result_set().unwrap().is_empty());
    }
}
