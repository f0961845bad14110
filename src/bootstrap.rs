use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::{ConnectionConfig, Database, Engine, MySqlDatabase, PgDatabase, SqliteDatabase};
use crate::statement::split_statements;

/// Characters of a failed statement kept in warnings and reports.
const PREVIEW_CHARS: usize = 50;

/// Where a dump gets loaded.
#[derive(Debug, Clone)]
pub enum Target {
    /// A saved server connection; its `engine` picks the backend
    Server(ConnectionConfig),
    /// One `<name>.db` file per database under `dir`
    SqliteDir(PathBuf),
    SqliteMemory,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedStatement {
    pub preview: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub executed: usize,
    pub skipped: Vec<SkippedStatement>,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// A loaded database, replaced wholesale by the next load.
pub struct Session {
    pub name: String,
    pub database: Arc<dyn Database>,
    pub report: LoadReport,
}

/// Find the database a dump targets.
///
/// The first `USE <name>` wins; otherwise the last `CREATE DATABASE` is used.
pub fn detect_database_name(script: &str) -> Option<String> {
    let mut name = None;

    for line in script.lines() {
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            [first, db, ..] if first.eq_ignore_ascii_case("USE") => {
                return clean_identifier(db);
            }
            [create, database, rest @ ..]
                if create.eq_ignore_ascii_case("CREATE")
                    && database.eq_ignore_ascii_case("DATABASE") =>
            {
                let candidate = match rest {
                    [if_, not, exists, db, ..]
                        if if_.eq_ignore_ascii_case("IF")
                            && not.eq_ignore_ascii_case("NOT")
                            && exists.eq_ignore_ascii_case("EXISTS") =>
                    {
                        Some(*db)
                    }
                    [db, ..] => Some(*db),
                    [] => None,
                };
                if let Some(found) = candidate.and_then(clean_identifier) {
                    name = Some(found);
                }
            }
            _ => {}
        }
    }

    name
}

fn clean_identifier(raw: &str) -> Option<String> {
    let name = raw
        .trim_end_matches(';')
        .trim_matches(|c| c == '`' || c == '"' || c == '\'');
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn is_database_directive(line: &str) -> bool {
    let upper = line.trim_start().to_ascii_uppercase();
    upper.starts_with("USE ") || upper.starts_with("CREATE DATABASE")
}

/// Database names become file names and server identifiers, so only
/// ASCII letters, digits and `_` are accepted.
pub fn check_database_name(name: &str) -> Result<()> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        bail!(
            "Invalid database name {:?}: only letters, digits and underscores are allowed",
            name
        );
    }
    Ok(())
}

/// Drop `CREATE DATABASE` and `USE` lines; the loader selects the database itself.
pub fn strip_database_directives(script: &str) -> String {
    script
        .lines()
        .filter(|line| !is_database_directive(line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Open the database a dump targets as a new, empty database.
///
/// Whatever an earlier load left under the same name is dropped first.
pub async fn open_target(target: &Target, name: &str) -> Result<Arc<dyn Database>> {
    check_database_name(name)?;

    let database: Arc<dyn Database> = match target {
        Target::Server(config) => match config.engine {
            Engine::Postgres => {
                PgDatabase::recreate_database(config, name).await?;
                Arc::new(PgDatabase::connect(config, name)?)
            }
            Engine::MySql => {
                MySqlDatabase::recreate_database(config, name).await?;
                Arc::new(MySqlDatabase::connect(config, name)?)
            }
        },
        Target::SqliteDir(dir) => {
            Arc::new(SqliteDatabase::create(&dir.join(format!("{}.db", name)))?)
        }
        Target::SqliteMemory => Arc::new(SqliteDatabase::in_memory()?),
    };
    Ok(database)
}

/// Run every statement of a dump, logging and skipping the ones that fail.
pub async fn run_script(db: &dyn Database, script: &str) -> LoadReport {
    let mut report = LoadReport::default();

    for statement in split_statements(script, db.dialect()) {
        match db.execute(statement).await {
            Ok(_) => report.executed += 1,
            Err(err) => {
                let preview: String = statement.chars().take(PREVIEW_CHARS).collect();
                warn!("Skipped statement: {}... ({})", preview, err.message);
                report.skipped.push(SkippedStatement {
                    preview,
                    error: err.message,
                });
            }
        }
    }

    report
}

/// Load a SQL dump into a fresh session.
///
/// A partially applied dump still yields a session; inspect
/// [`LoadReport::skipped`] to see what did not load.
pub async fn load_dump(target: &Target, script: &str) -> Result<Session> {
    let Some(name) = detect_database_name(script) else {
        bail!("Could not detect database name from SQL file (missing USE or CREATE DATABASE)");
    };

    let database = open_target(target, &name)
        .await
        .with_context(|| format!("Failed to open database {}", name))?;

    let body = strip_database_directives(script);
    let report = run_script(database.as_ref(), &body).await;

    info!(
        database = %name,
        executed = report.executed,
        skipped = report.skipped.len(),
        "dump loaded"
    );

    Ok(Session {
        name,
        database,
        report,
    })
}
