use tracing::{debug, warn};

use crate::db::{describe, Database, ResultSet, SchemaDescription};
use crate::error::AskError;
use crate::executor::{execute, ExecutionOutcome};
use crate::llm::Synthesizer;
use crate::sanitize::sanitize;

/// What the caller gets back for one question.
///
/// `query` is present whenever synthesis succeeded, including when
/// execution then failed, so the attempted SQL can be shown with the error.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub query: Option<String>,
    pub outcome: ExecutionOutcome,
}

impl Answer {
    fn failed_before_synthesis(err: AskError) -> Self {
        Self {
            query: None,
            outcome: ExecutionOutcome::Failure(err),
        }
    }

    pub fn rows(&self) -> Option<&ResultSet> {
        self.outcome.result_set()
    }

    pub fn error(&self) -> Option<&AskError> {
        self.outcome.error()
    }
}

/// Introspect, synthesize, sanitize, execute.
///
/// Holds only the synthesizer; the database handle and any cached schema
/// are passed in per call.
pub struct Pipeline {
    synthesizer: Synthesizer,
}

impl Pipeline {
    pub fn new(synthesizer: Synthesizer) -> Self {
        Self { synthesizer }
    }

    /// Answer a question against a freshly read schema.
    pub async fn answer(&self, db: &dyn Database, question: &str) -> Answer {
        if let Err(err) = check_question(question) {
            return Answer::failed_before_synthesis(err);
        }

        let schema = match describe(db).await {
            Ok(schema) => schema,
            Err(err) => {
                warn!("schema introspection failed: {}", err.message());
                return Answer::failed_before_synthesis(err);
            }
        };

        self.answer_with_schema(db, &schema, question).await
    }

    /// Answer a question against a schema the caller already holds.
    #[tracing::instrument(skip_all)]
    pub async fn answer_with_schema(
        &self,
        db: &dyn Database,
        schema: &SchemaDescription,
        question: &str,
    ) -> Answer {
        if let Err(err) = check_question(question) {
            return Answer::failed_before_synthesis(err);
        }

        let raw = match self
            .synthesizer
            .synthesize(question, db.dialect(), schema)
            .await
        {
            Ok(raw) => raw,
            Err(err) => {
                warn!("query synthesis failed: {}", err.message());
                return Answer::failed_before_synthesis(err);
            }
        };

        let query = sanitize(&raw);
        debug!(sql = %query, "generated query");

        let outcome = execute(db, &query).await;
        Answer {
            query: Some(query),
            outcome,
        }
    }
}

fn check_question(question: &str) -> Result<(), AskError> {
    if question.trim().is_empty() {
        return Err(AskError::Generation(
            "question is empty; nothing to ask the model".to_string(),
        ));
    }
    Ok(())
}
