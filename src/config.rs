use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::db::{ConnectionConfig, Engine};
use crate::llm::{GeminiConfig, ModelId, DEFAULT_ENDPOINT};

pub const API_KEY_VAR: &str = "GOOGLE_API_KEY";
pub const PG_PASSWORD_VAR: &str = "PGPASSWORD";
pub const MYSQL_PASSWORD_VAR: &str = "MYSQL_PWD";

/// Environment variable the server's own client tools read a password from.
pub fn password_var(engine: Engine) -> &'static str {
    match engine {
        Engine::Postgres => PG_PASSWORD_VAR,
        Engine::MySql => MYSQL_PASSWORD_VAR,
    }
}

/// Settings read from `config.toml`. Every field is optional on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub model: ModelId,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Model request timeout; unset means no timeout
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    /// Where SQLite databases are created when no server is chosen
    #[serde(default)]
    pub sqlite_dir: Option<PathBuf>,
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: ModelId::default(),
            endpoint: default_endpoint(),
            request_timeout_secs: None,
            sqlite_dir: None,
            connections: Vec::new(),
        }
    }
}

impl Settings {
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("askdb")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load from the default location; a missing file yields defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Default directory for SQLite databases created from dumps.
    pub fn sqlite_dir(&self) -> PathBuf {
        self.sqlite_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("askdb")
        })
    }

    pub fn find_connection(&self, name: &str) -> Option<&ConnectionConfig> {
        self.connections
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn gemini_config(&self, api_key: String) -> GeminiConfig {
        GeminiConfig {
            api_key,
            endpoint: self.endpoint.clone(),
            timeout: self.request_timeout_secs.map(Duration::from_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SslMode;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.model, ModelId::Gemini25Flash);
        assert_eq!(settings.endpoint, DEFAULT_ENDPOINT);
        assert!(settings.request_timeout_secs.is_none());
        assert!(settings.connections.is_empty());
    }

    #[test]
    fn test_parse_full_file() {
        let settings: Settings = toml::from_str(
            r#"
            model = "gemini-1.5-flash"
            request_timeout_secs = 30
            sqlite_dir = "/tmp/askdb"

            [[connections]]
            name = "Local"
            host = "localhost"
            port = 5432
            username = "postgres"
            ssl_mode = "disable"
            "#,
        )
        .unwrap();

        assert_eq!(settings.model, ModelId::Gemini15Flash);
        assert_eq!(settings.sqlite_dir(), PathBuf::from("/tmp/askdb"));
        let local = settings.find_connection("local").unwrap();
        assert_eq!(local.ssl_mode, SslMode::Disable);

        let gemini = settings.gemini_config("k".to_string());
        assert_eq!(gemini.timeout, Some(Duration::from_secs(30)));
        assert_eq!(gemini.endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("askdb-no-such-dir").join("config.toml");
        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.model, ModelId::default());
    }

    #[test]
    fn test_password_var_follows_engine() {
        assert_eq!(password_var(Engine::Postgres), "PGPASSWORD");
        assert_eq!(password_var(Engine::MySql), "MYSQL_PWD");
    }
}
