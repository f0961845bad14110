pub mod bootstrap;
pub mod config;
pub mod db;
pub mod error;
pub mod executor;
pub mod export;
pub mod llm;
pub mod pipeline;
pub mod sanitize;
pub mod statement;

pub use error::{AskError, ErrorKind, Stage};
pub use executor::ExecutionOutcome;
pub use pipeline::{Answer, Pipeline};
