use std::path::PathBuf;
use thiserror::Error;

/// Conditions that abort a run before any task executes.
///
/// Task-level failures never surface here; they are recorded in the
/// task's [`crate::ExecutionResult`] instead.
#[derive(Debug, Error)]
pub enum SourceCheckError {
    #[error("unsupported_platform: no profile for host platform '{0}'")]
    UnsupportedPlatform(String),

    #[error("corpus_missing: recipes directory not found at {}", .0.display())]
    CorpusMissing(PathBuf),

    #[error("config_malformed: {}: {reason}", .path.display())]
    ConfigMalformed { path: PathBuf, reason: String },

    #[error("configless_layout_violation: expected build logic at {}", .0.display())]
    ConfiglessLayoutViolation(PathBuf),

    #[error("duplicate_task: {recipe}/{version} enumerated more than once")]
    DuplicateTask { recipe: String, version: String },

    #[error("worker_pool: {0}")]
    WorkerPool(String),

    #[error("result_count_mismatch: expected {expected} results, got {actual}")]
    ResultCountMismatch { expected: usize, actual: usize },

    #[error("io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SourceCheckError {
    /// Short machine-readable code used in JSON error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            SourceCheckError::UnsupportedPlatform(_) => "unsupported_platform",
            SourceCheckError::CorpusMissing(_) => "corpus_missing",
            SourceCheckError::ConfigMalformed { .. } => "config_malformed",
            SourceCheckError::ConfiglessLayoutViolation(_) => "configless_layout_violation",
            SourceCheckError::DuplicateTask { .. } => "duplicate_task",
            SourceCheckError::WorkerPool(_) => "worker_pool",
            SourceCheckError::ResultCountMismatch { .. } => "result_count_mismatch",
            SourceCheckError::Io { .. } => "io_error",
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SourceCheckError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = SourceCheckError> = std::result::Result<T, E>;
