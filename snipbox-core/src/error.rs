//! Error taxonomy for snippet evaluation
//!
//! None of these are ever returned to a caller of `evaluate()`. Each one is
//! recovered where it originates and rendered into `ExecutionResult::error`,
//! so the calling UI always receives something it can display.

use thiserror::Error;

/// Failures that end up inside an [`ExecutionResult`](crate::protocol::ExecutionResult).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// The requested language has no native evaluator.
    #[error("language not supported: {0}")]
    UnsupportedLanguage(String),

    /// The snippet threw. Carries the `"<ErrorKind>: <message>"` description.
    #[error("{0}")]
    Runtime(String),

    /// No result arrived within the caller's budget.
    #[error("timed out after {0}ms")]
    Timeout(u64),

    /// The isolated context could not be built or never signalled readiness.
    #[error("execution context unavailable: {0}")]
    ContextUnavailable(String),

    /// A return value could not be JSON round-tripped. Non-fatal: the value
    /// degrades to its string form and the call still succeeds.
    #[error("return value is not JSON-serializable: {0}")]
    Serialization(String),
}

/// Reasons the context manager could not hand out a ready context.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("failed to launch boundary: {0}")]
    Launch(String),

    #[error("boundary failed during startup: {0}")]
    Startup(String),

    #[error("boundary not ready after {0}ms")]
    ReadyTimeout(u64),

    #[error("boundary exited before signalling readiness")]
    Vanished,
}

impl From<ContextError> for ExecutionError {
    fn from(err: ContextError) -> Self {
        ExecutionError::ContextUnavailable(err.to_string())
    }
}

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: &'static str, value: String },
}
