use std::sync::Arc;
use tracing::debug;

use super::{render_prompt, LanguageModel, ModelId};
use crate::db::{Dialect, SchemaDescription};
use crate::error::AskError;

/// Turns a question plus a schema into raw model output, one model call per question.
#[derive(Clone)]
pub struct Synthesizer {
    model: Arc<dyn LanguageModel>,
    model_id: ModelId,
}

impl Synthesizer {
    pub fn new(model: Arc<dyn LanguageModel>, model_id: ModelId) -> Self {
        Self { model, model_id }
    }

    /// Returns the model's text unmodified. SQL validity is left to execution.
    #[tracing::instrument(skip(self, schema), fields(model = %self.model_id))]
    pub async fn synthesize(
        &self,
        question: &str,
        dialect: Dialect,
        schema: &SchemaDescription,
    ) -> Result<String, AskError> {
        if question.trim().is_empty() {
            return Err(AskError::Generation("question is empty".to_string()));
        }

        let prompt = render_prompt(dialect, &schema.render(), question);
        debug!(prompt = %prompt, "rendered prompt");

        let text = self
            .model
            .complete(self.model_id, &prompt)
            .await
            .map_err(|e| AskError::Generation(format!("{:#}", e)))?;

        if text.trim().is_empty() {
            return Err(AskError::Generation(
                "model returned an empty response".to_string(),
            ));
        }

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ColumnDetails, TableDescription};
    use crate::error::ErrorKind;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingModel {
        reply: anyhow::Result<String>,
        prompts: Mutex<Vec<(ModelId, String)>>,
    }

    impl RecordingModel {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for RecordingModel {
        async fn complete(&self, model: ModelId, prompt: &str) -> anyhow::Result<String> {
            self.prompts.lock().unwrap().push((model, prompt.to_string()));
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(anyhow::anyhow!("{}", e)),
            }
        }
    }

    fn users_schema() -> SchemaDescription {
        SchemaDescription {
            tables: vec![TableDescription {
                name: "users".to_string(),
                columns: vec![ColumnDetails::new("id", "int"), ColumnDetails::new("name", "text")],
            }],
        }
    }

    #[tokio::test]
    async fn test_single_call_with_rendered_prompt() {
        let model = Arc::new(RecordingModel::replying("SELECT COUNT(*) FROM users;"));
        let synth = Synthesizer::new(model.clone(), ModelId::Gemini15Flash);

        let sql = synth
            .synthesize("how many users?", Dialect::Sqlite, &users_schema())
            .await
            .unwrap();

        assert_eq!(sql, "SELECT COUNT(*) FROM users;");
        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].0, ModelId::Gemini15Flash);
        assert!(prompts[0].1.contains("CREATE TABLE users"));
        assert!(prompts[0].1.contains("how many users?"));
    }

    #[tokio::test]
    async fn test_blank_question_skips_model() {
        let model = Arc::new(RecordingModel::replying("SELECT 1"));
        let synth = Synthesizer::new(model.clone(), ModelId::default());

        let err = synth
            .synthesize("   \n", Dialect::Sqlite, &users_schema())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::GenerationError);
        assert!(model.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_model_output_is_generation_error() {
        let model = Arc::new(RecordingModel::replying("  "));
        let synth = Synthesizer::new(model, ModelId::default());

        let err = synth
            .synthesize("list users", Dialect::Sqlite, &users_schema())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::GenerationError);
    }

    #[tokio::test]
    async fn test_model_failure_is_generation_error() {
        let model = Arc::new(RecordingModel {
            reply: Err(anyhow::anyhow!("HTTP 429: quota exhausted")),
            prompts: Mutex::new(Vec::new()),
        });
        let synth = Synthesizer::new(model, ModelId::default());

        let err = synth
            .synthesize("list users", Dialect::Sqlite, &users_schema())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::GenerationError);
        assert!(err.message().contains("quota exhausted"));
    }
}
