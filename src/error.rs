use std::fmt;
use thiserror::Error;

/// Failure kinds surfaced by the question-answering pipeline.
///
/// Each variant carries the message of the stage that produced it. The
/// pipeline never converts one kind into another.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AskError {
    #[error("schema introspection failed: {0}")]
    Introspection(String),

    #[error("query generation failed: {0}")]
    Generation(String),

    #[error("query rejected by the database: {0}")]
    SyntaxOrSemantic(String),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    IntrospectionError,
    GenerationError,
    SyntaxOrSemanticError,
    UnexpectedError,
}

/// Pipeline stage a failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Introspection,
    Synthesis,
    Execution,
}

impl AskError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AskError::Introspection(_) => ErrorKind::IntrospectionError,
            AskError::Generation(_) => ErrorKind::GenerationError,
            AskError::SyntaxOrSemantic(_) => ErrorKind::SyntaxOrSemanticError,
            AskError::Unexpected(_) => ErrorKind::UnexpectedError,
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            AskError::Introspection(_) => Stage::Introspection,
            AskError::Generation(_) => Stage::Synthesis,
            AskError::SyntaxOrSemantic(_) | AskError::Unexpected(_) => Stage::Execution,
        }
    }

    /// The stage-specific message without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            AskError::Introspection(m)
            | AskError::Generation(m)
            | AskError::SyntaxOrSemantic(m)
            | AskError::Unexpected(m) => m,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::IntrospectionError => write!(f, "IntrospectionError"),
            ErrorKind::GenerationError => write!(f, "GenerationError"),
            ErrorKind::SyntaxOrSemanticError => write!(f, "SyntaxOrSemanticError"),
            ErrorKind::UnexpectedError => write!(f, "UnexpectedError"),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Introspection => write!(f, "introspection"),
            Stage::Synthesis => write!(f, "synthesis"),
            Stage::Execution => write!(f, "execution"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_stage() {
        let err = AskError::Generation("empty response".into());
        assert_eq!(err.kind(), ErrorKind::GenerationError);
        assert_eq!(err.stage(), Stage::Synthesis);

        let err = AskError::Unexpected("connection reset".into());
        assert_eq!(err.kind(), ErrorKind::UnexpectedError);
        assert_eq!(err.stage(), Stage::Execution);

        let err = AskError::Introspection("permission denied".into());
        assert_eq!(err.stage(), Stage::Introspection);
    }

    #[test]
    fn test_message_is_preserved() {
        let err = AskError::SyntaxOrSemantic("no such table: ghost".into());
        assert_eq!(err.message(), "no such table: ghost");
        assert_eq!(
            err.to_string(),
            "query rejected by the database: no such table: ghost"
        );
    }
}
