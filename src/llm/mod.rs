mod gemini;
mod prompt;
mod synthesizer;

pub use gemini::{GeminiClient, GeminiConfig, DEFAULT_ENDPOINT};
pub use prompt::render_prompt;
pub use synthesizer::Synthesizer;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Models the synthesizer may be pointed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
pub enum ModelId {
    #[default]
    #[serde(rename = "gemini-2.5-flash")]
    #[value(name = "gemini-2.5-flash")]
    Gemini25Flash,
    #[serde(rename = "gemini-1.5-flash")]
    #[value(name = "gemini-1.5-flash")]
    Gemini15Flash,
}

impl ModelId {
    pub const ALL: [ModelId; 2] = [ModelId::Gemini25Flash, ModelId::Gemini15Flash];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelId::Gemini25Flash => "gemini-2.5-flash",
            ModelId::Gemini15Flash => "gemini-1.5-flash",
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        ModelId::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                let known: Vec<&str> = ModelId::ALL.iter().map(|m| m.as_str()).collect();
                anyhow::anyhow!("unknown model {:?} (expected one of: {})", s, known.join(", "))
            })
    }
}

/// Opaque text-completion function: one rendered prompt in, generated text out.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, model: ModelId, prompt: &str) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_id_round_trip() {
        for model in ModelId::ALL {
            assert_eq!(model.as_str().parse::<ModelId>().unwrap(), model);
        }
        assert_eq!(ModelId::default(), ModelId::Gemini25Flash);
    }

    #[test]
    fn test_unknown_model_is_rejected() {
        let err = "gpt-4".parse::<ModelId>().unwrap_err();
        assert!(err.to_string().contains("gemini-2.5-flash"));
    }

    #[test]
    fn test_model_id_serde() {
        let json = serde_json::to_string(&ModelId::Gemini15Flash).unwrap();
        assert_eq!(json, "\"gemini-1.5-flash\"");
    }
}
