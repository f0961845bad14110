use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;
use tokio_postgres::types::{FromSql, Kind, Type};
use tokio_postgres::Row;

use crate::error::AskError;

/// Categorized error types for statement failures reported by a backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ErrorCategory {
    /// Malformed grammar
    Syntax,
    /// Missing table/column, ambiguous reference
    Semantic,
    /// The statement was understood but its data was rejected
    /// (type mismatch, division by zero, constraint violation)
    Execution,
    /// Transaction state errors (aborted transaction, busy/locked database)
    Transaction,
    /// Connection/communication errors
    Connection,
    /// Server-side resource exhaustion, cancellation or internal faults
    Server,
    /// Unknown or unclassified errors
    Unknown,
}

impl ErrorCategory {
    /// Whether the database rejected the statement itself. These are the
    /// failures a user can fix by rephrasing the question.
    pub fn is_statement_rejection(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Syntax | ErrorCategory::Semantic | ErrorCategory::Execution
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Syntax => write!(f, "Syntax Error"),
            ErrorCategory::Semantic => write!(f, "Semantic Error"),
            ErrorCategory::Execution => write!(f, "Execution Error"),
            ErrorCategory::Transaction => write!(f, "Transaction Error"),
            ErrorCategory::Connection => write!(f, "Connection Error"),
            ErrorCategory::Server => write!(f, "Server Error"),
            ErrorCategory::Unknown => write!(f, "Error"),
        }
    }
}

/// Structured error with the context a backend reports for a failed statement.
#[derive(Debug, Clone)]
pub struct StructuredError {
    pub category: ErrorCategory,
    /// SQLSTATE for PostgreSQL and MySQL, `SQLITE_<extended code>` for SQLite
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    /// Character position in the query where the error occurred (1-based)
    pub position: Option<u32>,
    pub table: Option<String>,
    pub column: Option<String>,
    /// Computed from `position`, both 1-based
    pub line: Option<usize>,
    pub col: Option<usize>,
}

impl StructuredError {
    /// Create a StructuredError from a tokio_postgres error, using the query text
    /// to compute line/column from the reported position.
    pub fn from_pg_error(err: &tokio_postgres::Error, query: &str) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let code_str = db_err.code().code().to_string();
            let category = categorize_sqlstate(&code_str);
            let position = db_err.position().and_then(|p| match p {
                tokio_postgres::error::ErrorPosition::Original(pos) => Some(*pos),
                tokio_postgres::error::ErrorPosition::Internal { .. } => None,
            });

            let (line, col) = match position {
                Some(pos) => byte_offset_to_line_col(query, pos as usize),
                None => (None, None),
            };

            StructuredError {
                category,
                code: code_str,
                message: db_err.message().to_string(),
                detail: db_err.detail().map(|s| s.to_string()),
                hint: db_err.hint().map(|s| s.to_string()),
                position,
                table: db_err.table().map(|s| s.to_string()),
                column: db_err.column().map(|s| s.to_string()),
                line,
                col,
            }
        } else {
            // Non-database error (connection, protocol, etc.)
            let category = if err.source().is_some() || err.is_closed() {
                ErrorCategory::Connection
            } else {
                ErrorCategory::Unknown
            };
            let mut structured = StructuredError::new(category, err.to_string());
            structured.detail = err.source().map(|e| e.to_string());
            structured
        }
    }

    pub fn from_sqlite_error(err: &rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(failure, message) => {
                let message = message
                    .clone()
                    .unwrap_or_else(|| failure.to_string());
                let category = categorize_sqlite(failure.code, &message);
                let mut structured = StructuredError::new(category, message);
                structured.code = format!("SQLITE_{}", failure.extended_code);
                structured
            }
            // Prepare-time failures carry the offset of the offending token
            rusqlite::Error::SqlInputError {
                error,
                msg,
                sql,
                offset,
            } => {
                let mut structured =
                    StructuredError::new(categorize_sqlite(error.code, msg), msg.clone());
                structured.code = format!("SQLITE_{}", error.extended_code);
                if *offset >= 0 {
                    let pos = *offset as usize + 1;
                    structured.position = Some(pos as u32);
                    let (line, col) = byte_offset_to_line_col(sql, pos);
                    structured.line = line;
                    structured.col = col;
                }
                structured
            }
            rusqlite::Error::MultipleStatement => {
                StructuredError::new(ErrorCategory::Syntax, err.to_string())
            }
            rusqlite::Error::InvalidColumnType(..) | rusqlite::Error::IntegralValueOutOfRange(..) => {
                StructuredError::new(ErrorCategory::Execution, err.to_string())
            }
            other => StructuredError::new(ErrorCategory::Unknown, other.to_string()),
        }
    }

    pub fn from_mysql_error(err: &sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let sqlstate = db_err.code().map(|c| c.into_owned()).unwrap_or_default();
                let number = db_err
                    .try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>()
                    .map(|e| e.number());
                let category = match number {
                    Some(number) => categorize_mysql(number, &sqlstate),
                    None => categorize_sqlstate(&sqlstate),
                };
                let mut structured = StructuredError::new(category, db_err.message());
                structured.code = match number {
                    Some(number) => format!("{} ({})", sqlstate, number),
                    None => sqlstate,
                };
                structured
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => {
                StructuredError::new(ErrorCategory::Connection, err.to_string())
            }
            other => StructuredError::new(ErrorCategory::Unknown, other.to_string()),
        }
    }

    /// Create a simple error from a plain message.
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        StructuredError {
            category,
            code: String::new(),
            message: message.into(),
            detail: None,
            hint: None,
            position: None,
            table: None,
            column: None,
            line: None,
            col: None,
        }
    }

    pub fn from_string(msg: String) -> Self {
        Self::new(ErrorCategory::Unknown, msg)
    }

    /// Format as a rich multi-line string for the caller.
    pub fn display_full(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("{}: {}", self.category, self.message));

        if let (Some(line), Some(col)) = (self.line, self.col) {
            lines.push(format!("  at line {}, column {}", line, col));
        }

        if !self.code.is_empty() {
            lines.push(format!("  Code: {}", self.code));
        }

        if let Some(detail) = &self.detail {
            lines.push(format!("  Detail: {}", detail));
        }

        if let Some(hint) = &self.hint {
            lines.push(format!("  Hint: {}", hint));
        }

        match (&self.table, &self.column) {
            (Some(table), Some(column)) => lines.push(format!("  Object: {}.{}", table, column)),
            (Some(table), None) => lines.push(format!("  Table: {}", table)),
            _ => {}
        }

        lines.join("\n")
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<StructuredError> for AskError {
    fn from(err: StructuredError) -> Self {
        if err.category.is_statement_rejection() {
            AskError::SyntaxOrSemantic(err.display_full())
        } else {
            AskError::Unexpected(err.display_full())
        }
    }
}

/// Convert a 1-based byte offset in a query string to (line, column) both 1-based.
fn byte_offset_to_line_col(query: &str, byte_pos: usize) -> (Option<usize>, Option<usize>) {
    if byte_pos == 0 || query.is_empty() {
        return (Some(1), Some(1));
    }
    let target = (byte_pos - 1).min(query.len());
    let mut line = 1usize;
    let mut col = 1usize;
    for (i, ch) in query.char_indices() {
        if i >= target {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (Some(line), Some(col))
}

/// Categorize a SQLSTATE code into an ErrorCategory.
fn categorize_sqlstate(code: &str) -> ErrorCategory {
    if code.len() < 2 {
        return ErrorCategory::Unknown;
    }
    match &code[..2] {
        // Class 42: Syntax Error or Access Rule Violation
        "42" => {
            if code == "42601" || code == "42000" {
                ErrorCategory::Syntax
            } else {
                // 42P01 = undefined_table, 42703 = undefined_column, etc.
                ErrorCategory::Semantic
            }
        }
        // 21 cardinality, 22 data exception, 23 integrity, 0A unsupported, 54 too complex
        "21" | "22" | "23" | "0A" | "54" => ErrorCategory::Execution,
        "25" | "40" => ErrorCategory::Transaction,
        "08" => ErrorCategory::Connection,
        // 53 insufficient resources, 57 operator intervention (includes statement timeout)
        "53" | "57" | "58" | "XX" => ErrorCategory::Server,
        _ => ErrorCategory::Unknown,
    }
}

/// MySQL server error numbers first; anything unlisted falls back to the SQLSTATE class.
fn categorize_mysql(number: u16, sqlstate: &str) -> ErrorCategory {
    match number {
        // parse error, syntax error
        1064 | 1149 => ErrorCategory::Syntax,
        // unknown column/table/database/function, ambiguous column, bad GROUP BY
        1054 | 1146 | 1049 | 1051 | 1052 | 1109 | 1305 | 1055 | 1056 => ErrorCategory::Semantic,
        // NULL into NOT NULL, duplicate key, out of range, bad value, foreign keys, division by zero
        1048 | 1062 | 1264 | 1265 | 1292 | 1366 | 1365 | 1451 | 1452 => ErrorCategory::Execution,
        // lock wait timeout, deadlock
        1205 | 1213 => ErrorCategory::Transaction,
        // lost or refused connection
        2002 | 2003 | 2006 | 2013 | 1040 | 1053 => ErrorCategory::Connection,
        // query interrupted, out of memory, disk full
        1317 | 3024 | 1037 | 1038 | 1021 => ErrorCategory::Server,
        _ => categorize_sqlstate(sqlstate),
    }
}

fn categorize_sqlite(code: rusqlite::ErrorCode, message: &str) -> ErrorCategory {
    use rusqlite::ErrorCode;

    match code {
        ErrorCode::Unknown => {
            if message.contains("syntax error") || message.starts_with("near ") {
                ErrorCategory::Syntax
            } else {
                ErrorCategory::Semantic
            }
        }
        ErrorCode::ConstraintViolation
        | ErrorCode::TypeMismatch
        | ErrorCode::TooBig
        | ErrorCode::AuthorizationForStatementDenied
        | ErrorCode::ReadOnly => ErrorCategory::Execution,
        ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => ErrorCategory::Transaction,
        ErrorCode::CannotOpen
        | ErrorCode::SystemIoFailure
        | ErrorCode::DatabaseCorrupt
        | ErrorCode::NotADatabase => ErrorCategory::Connection,
        ErrorCode::OutOfMemory | ErrorCode::DiskFull | ErrorCode::OperationInterrupted => {
            ErrorCategory::Server
        }
        _ => ErrorCategory::Unknown,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub type_name: String,
    pub max_width: usize,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        let name = name.into();
        let max_width = unicode_width::UnicodeWidthStr::width(name.as_str());
        Self {
            name,
            type_name: type_name.into(),
            max_width,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Json(serde_json::Value),
}

impl CellValue {
    pub fn display(&self) -> String {
        match self {
            CellValue::Null => "NULL".to_string(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Int16(i) => i.to_string(),
            CellValue::Int32(i) => i.to_string(),
            CellValue::Int64(i) => i.to_string(),
            CellValue::Float32(f) => f.to_string(),
            CellValue::Float64(f) => f.to_string(),
            CellValue::Decimal(d) => d.to_string(),
            CellValue::Text(s) => s.clone(),
            CellValue::Bytes(b) => format!("[{} bytes]", b.len()),
            CellValue::Date(d) => d.to_string(),
            CellValue::Time(t) => t.to_string(),
            CellValue::DateTime(dt) => dt.to_string(),
            CellValue::TimestampTz(dt) => dt.to_string(),
            CellValue::Json(j) => j.to_string(),
        }
    }

    pub fn display_width(&self) -> usize {
        unicode_width::UnicodeWidthStr::width(self.display().as_str())
    }
}

/// Rows materialized from one executed statement.
///
/// Column order follows the statement's projection. An empty `rows` is a
/// valid result, not an error.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<CellValue>>,
    pub execution_time: Duration,
    /// Set for statements that return no columns (INSERT, UPDATE, ...)
    pub affected_rows: Option<u64>,
}

impl ResultSet {
    pub fn empty() -> Self {
        Self {
            columns: vec![],
            rows: vec![],
            execution_time: Duration::ZERO,
            affected_rows: None,
        }
    }

    pub fn new(columns: Vec<ColumnInfo>, rows: Vec<Vec<CellValue>>, execution_time: Duration) -> Self {
        let mut columns = columns;
        for row in &rows {
            for (i, cell) in row.iter().enumerate() {
                if let Some(column) = columns.get_mut(i) {
                    column.max_width = column.max_width.max(cell.display_width());
                }
            }
        }

        Self {
            columns,
            rows,
            execution_time,
            affected_rows: None,
        }
    }

    pub fn affected(affected_rows: u64, execution_time: Duration) -> Self {
        Self {
            affected_rows: Some(affected_rows),
            execution_time,
            ..Self::empty()
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Look up a cell by row index and column name.
    pub fn get(&self, row: usize, column: &str) -> Option<&CellValue> {
        let idx = self.columns.iter().position(|c| c.name == column)?;
        self.rows.get(row)?.get(idx)
    }

    /// Each row as (column name, value) pairs in projection order.
    pub fn records(&self) -> impl Iterator<Item = Vec<(&str, &CellValue)>> + '_ {
        self.rows.iter().map(move |row| {
            self.columns
                .iter()
                .map(|c| c.name.as_str())
                .zip(row.iter())
                .collect()
        })
    }
}

pub(crate) fn parse_pg_rows(
    columns: &[tokio_postgres::Column],
    rows: &[Row],
    execution_time: Duration,
) -> Result<ResultSet, StructuredError> {
    let columns_info: Vec<ColumnInfo> = columns
        .iter()
        .map(|col| ColumnInfo::new(col.name(), col.type_().name()))
        .collect();

    let mut result_rows = Vec::with_capacity(rows.len());
    for row in rows {
        let mut values = Vec::with_capacity(columns.len());
        for (i, col) in row.columns().iter().enumerate() {
            let raw = row
                .try_get::<_, RawValue>(i)
                .map_err(|e| decode_error(col.name(), col.type_(), &e))?;
            let value = decode_pg_value(col.type_(), raw.0)
                .map_err(|e| decode_error(col.name(), col.type_(), e.as_ref()))?;
            values.push(value);
        }
        result_rows.push(values);
    }

    Ok(ResultSet::new(columns_info, result_rows, execution_time))
}

pub(crate) fn decode_error(column: &str, ty: &impl fmt::Display, err: &dyn StdError) -> StructuredError {
    StructuredError::new(
        ErrorCategory::Unknown,
        format!("cannot decode column {} of type {}: {}", column, ty, err),
    )
}

/// Undecoded wire bytes of one field; `None` for SQL NULL.
struct RawValue<'a>(Option<&'a [u8]>);

impl<'a> FromSql<'a> for RawValue<'a> {
    fn from_sql(_: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        Ok(RawValue(Some(raw)))
    }

    fn from_sql_null(_: &Type) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        Ok(RawValue(None))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

/// Decode one binary-format PostgreSQL field.
///
/// Types without a mapping are an error rather than NULL.
fn decode_pg_value(
    ty: &Type,
    raw: Option<&[u8]>,
) -> Result<CellValue, Box<dyn StdError + Sync + Send>> {
    let Some(raw) = raw else {
        return Ok(CellValue::Null);
    };

    let value = match *ty {
        Type::BOOL => CellValue::Bool(bool::from_sql(ty, raw)?),
        Type::INT2 => CellValue::Int16(i16::from_sql(ty, raw)?),
        Type::INT4 => CellValue::Int32(i32::from_sql(ty, raw)?),
        Type::INT8 => CellValue::Int64(i64::from_sql(ty, raw)?),
        Type::OID => CellValue::Int64(i64::from(u32::from_sql(ty, raw)?)),
        Type::FLOAT4 => CellValue::Float32(f32::from_sql(ty, raw)?),
        Type::FLOAT8 => CellValue::Float64(f64::from_sql(ty, raw)?),
        Type::NUMERIC => CellValue::Decimal(Decimal::from_sql(ty, raw)?),
        Type::BYTEA => CellValue::Bytes(Vec::<u8>::from_sql(ty, raw)?),
        Type::DATE => CellValue::Date(NaiveDate::from_sql(ty, raw)?),
        Type::TIME => CellValue::Time(NaiveTime::from_sql(ty, raw)?),
        Type::TIMESTAMP => CellValue::DateTime(NaiveDateTime::from_sql(ty, raw)?),
        Type::TIMESTAMPTZ => CellValue::TimestampTz(DateTime::<Utc>::from_sql(ty, raw)?),
        Type::JSON | Type::JSONB => CellValue::Json(serde_json::Value::from_sql(ty, raw)?),
        _ if <String as FromSql>::accepts(ty) => CellValue::Text(String::from_sql(ty, raw)?),
        // enum labels travel as plain text
        _ if matches!(ty.kind(), Kind::Enum(_)) => {
            CellValue::Text(std::str::from_utf8(raw)?.to_string())
        }
        _ => return Err(format!("no decoder for type {}", ty.name()).into()),
    };

    Ok(value)
}

pub(crate) fn sqlite_value(value: rusqlite::types::ValueRef<'_>) -> CellValue {
    use rusqlite::types::ValueRef;

    match value {
        ValueRef::Null => CellValue::Null,
        ValueRef::Integer(i) => CellValue::Int64(i),
        ValueRef::Real(f) => CellValue::Float64(f),
        ValueRef::Text(t) => CellValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => CellValue::Bytes(b.to_vec()),
    }
}
