//! Error taxonomy for the reelcheck harness.

use std::path::PathBuf;

use crate::stage::Stage;

/// Errors that abort a harness execution.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// A required external tool or environment directory is missing.
    #[error("environment not ready: {0}")]
    EnvironmentNotReady(String),

    /// The pipeline configuration path does not exist.
    #[error("config not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The pipeline configuration is not a valid document.
    #[error("invalid config {}: {message}", path.display())]
    ConfigParse { path: PathBuf, message: String },

    /// The readiness check exited non-zero.
    #[error("preflight failed with exit code {exit_code}")]
    PreflightFailed { exit_code: i32 },

    /// A pipeline invocation exited non-zero.
    #[error("{stage} failed with exit code {exit_code}")]
    RunFailed { stage: Stage, exit_code: i32 },

    /// The comparator reported divergent outputs.
    #[error("validation failed with exit code {exit_code}")]
    ValidationFailed { exit_code: i32 },

    /// A subprocess exceeded its time budget and was killed.
    #[error("{stage} timed out after {secs} seconds")]
    TimedOut { stage: Stage, secs: u64 },

    /// A subprocess could not be started.
    #[error("{stage}: failed to start `{program}`: {source}")]
    Spawn {
        stage: Stage,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;
