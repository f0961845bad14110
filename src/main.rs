use anyhow::{bail, Context, Result};
use askdb::bootstrap::{load_dump, Session, Target};
use askdb::config::{password_var, Settings, API_KEY_VAR};
use askdb::db::{describe, SchemaDescription};
use askdb::export::{render, OutputFormat};
use askdb::llm::{GeminiClient, ModelId, Synthesizer};
use askdb::{Answer, Pipeline};
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Ask questions about a SQL dump in plain language
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// SQL dump to load (must contain USE or CREATE DATABASE)
    dump: PathBuf,

    /// Questions to answer; read from stdin when none are given
    questions: Vec<String>,

    /// Load into a saved PostgreSQL or MySQL connection by name
    #[arg(long = "connect", conflicts_with_all = ["sqlite_dir", "memory"])]
    connect: Option<String>,

    /// Directory for SQLite database files
    #[arg(long = "sqlite-dir", conflicts_with = "memory")]
    sqlite_dir: Option<PathBuf>,

    /// Load into an in-memory SQLite database
    #[arg(long)]
    memory: bool,

    /// Model to generate queries with
    #[arg(long, value_enum)]
    model: Option<ModelId>,

    /// Result output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let settings = Settings::load()?;

    let target = resolve_target(&cli, &settings)?;

    let api_key = std::env::var(API_KEY_VAR)
        .ok()
        .filter(|k| !k.trim().is_empty())
        .with_context(|| format!("{} is not set", API_KEY_VAR))?;
    let client = GeminiClient::new(settings.gemini_config(api_key))?;
    let model = cli.model.unwrap_or(settings.model);
    let pipeline = Pipeline::new(Synthesizer::new(Arc::new(client), model));

    let script = std::fs::read_to_string(&cli.dump)
        .with_context(|| format!("Failed to read {}", cli.dump.display()))?;
    let session = load_dump(&target, &script).await?;
    print_load_summary(&session);

    let schema = describe(session.database.as_ref())
        .await
        .map_err(|e| anyhow::anyhow!("{} failed: {}", e.stage(), e.message()))?;
    if schema.is_empty() {
        eprintln!("warning: {} has no tables", session.name);
    }

    if cli.questions.is_empty() {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let question = line?;
            if question.trim().is_empty() {
                continue;
            }
            ask(&pipeline, &session, &schema, &question, cli.format).await?;
        }
    } else {
        for question in &cli.questions {
            ask(&pipeline, &session, &schema, question, cli.format).await?;
        }
    }

    Ok(())
}

fn resolve_target(cli: &Cli, settings: &Settings) -> Result<Target> {
    if let Some(ref name) = cli.connect {
        let Some(saved) = settings.find_connection(name) else {
            let known: Vec<&str> = settings.connections.iter().map(|c| c.name.as_str()).collect();
            bail!(
                "no saved connection named {:?} (saved: {})",
                name,
                if known.is_empty() { "none".to_string() } else { known.join(", ") }
            );
        };
        let mut config = saved.clone();

        // PGPASSWORD or MYSQL_PWD first, then an interactive prompt
        if config.password.is_empty() {
            if let Ok(pw) = std::env::var(password_var(config.engine)) {
                config.password = pw;
            } else {
                let prompt = format!(
                    "Password for {}: ",
                    config.display_string(&config.maintenance_database)
                );
                config.password = rpassword::read_password_from_tty(Some(&prompt))?;
            }
        }
        return Ok(Target::Server(config));
    }

    if cli.memory {
        return Ok(Target::SqliteMemory);
    }

    Ok(Target::SqliteDir(
        cli.sqlite_dir.clone().unwrap_or_else(|| settings.sqlite_dir()),
    ))
}

fn print_load_summary(session: &Session) {
    let report = &session.report;
    eprintln!(
        "Loaded {} ({} statements executed, {} skipped)",
        session.name,
        report.executed,
        report.skipped.len()
    );
    if report.is_complete() {
        return;
    }
    for skipped in &report.skipped {
        eprintln!("  warning: skipped {}... ({})", skipped.preview, skipped.error);
    }
}

async fn ask(
    pipeline: &Pipeline,
    session: &Session,
    schema: &SchemaDescription,
    question: &str,
    format: OutputFormat,
) -> Result<()> {
    let answer = pipeline
        .answer_with_schema(session.database.as_ref(), schema, question)
        .await;
    print_answer(&mut io::stdout().lock(), &answer, format).context("Failed to write answer")
}

fn print_answer(out: &mut impl Write, answer: &Answer, format: OutputFormat) -> io::Result<()> {
    if let Some(ref query) = answer.query {
        writeln!(out, "{}", query)?;
        writeln!(out)?;
    }

    if let Some(rows) = answer.rows() {
        write!(out, "{}", render(rows, format))?;
    } else if let Some(err) = answer.error() {
        writeln!(out, "{} during {}: {}", err.kind(), err.stage(), err.message())?;
    }
    writeln!(out)?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use askdb::{AskError, ExecutionOutcome};

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn failed_answer() -> Answer {
        Answer {
            query: Some("SELECT * FROM ghost".to_string()),
            outcome: ExecutionOutcome::Failure(AskError::SyntaxOrSemantic(
                "no such table: ghost".to_string(),
            )),
        }
    }

    #[test]
    fn test_print_answer_writes_query_and_error() {
        let mut out = Vec::new();
        print_answer(&mut out, &failed_answer(), OutputFormat::Table).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("SELECT * FROM ghost\n\n"));
        assert!(text.contains("no such table: ghost"));
    }

    #[test]
    fn test_print_answer_reports_write_errors() {
        let err = print_answer(&mut BrokenPipe, &failed_answer(), OutputFormat::Table).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
