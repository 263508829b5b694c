//! Typed error hierarchy for the mentor orchestrator.
//!
//! Four layers cover the subsystems:
//! - `StageError` / `StageCause` - a single stage invocation failing
//! - `PipelineError` - a sequential pipeline run aborted by a stage
//! - `CompositionError` - build-time key-dependency defects, never recoverable at runtime
//! - `WorkerError` / `ToolError` - leaf failures surfaced to stages as results
//! - `RouterError` - submission-level failures reported to callers

use crate::state::keys::SessionKey;
use thiserror::Error;

/// Structured cause attached to every stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageCause {
    AnalysisFailure,
    ValidationFailure,
    Timeout,
    WorkerUnavailable,
    Cancelled,
}

impl std::fmt::Display for StageCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StageCause::AnalysisFailure => "analysis_failure",
            StageCause::ValidationFailure => "validation_failure",
            StageCause::Timeout => "timeout",
            StageCause::WorkerUnavailable => "worker_unavailable",
            StageCause::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// A stage reporting failure. Carried as data through the composer,
/// never raised across the orchestration boundary.
#[derive(Debug, Clone, Error)]
#[error("{cause}: {message}")]
pub struct StageError {
    pub cause: StageCause,
    pub message: String,
}

impl StageError {
    pub fn new(cause: StageCause, message: impl Into<String>) -> Self {
        Self {
            cause,
            message: message.into(),
        }
    }

    pub fn analysis(message: impl Into<String>) -> Self {
        Self::new(StageCause::AnalysisFailure, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StageCause::ValidationFailure, message)
    }

    pub fn timeout() -> Self {
        Self::new(StageCause::Timeout, "stage exceeded its configured timeout")
    }

    pub fn cancelled() -> Self {
        Self::new(StageCause::Cancelled, "pipeline cancelled before stage start")
    }

    pub fn worker_unavailable(message: impl Into<String>) -> Self {
        Self::new(StageCause::WorkerUnavailable, message)
    }
}

/// A sequential pipeline run aborted at the named stage.
#[derive(Debug, Clone, Error)]
#[error("stage '{failing_stage}' failed: {cause}")]
pub struct PipelineError {
    pub failing_stage: String,
    pub cause: StageError,
}

impl PipelineError {
    pub fn new(failing_stage: impl Into<String>, cause: StageError) -> Self {
        Self {
            failing_stage: failing_stage.into(),
            cause,
        }
    }
}

/// Key-dependency defects detected when a pipeline is composed.
/// Fatal at build time: the router refuses construction before any
/// submission is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompositionError {
    #[error("stage '{stage}' reads '{key}' which no earlier stage writes")]
    MissingDependency { stage: String, key: SessionKey },

    #[error("stage '{stage}' reads '{key}' which only later stage '{provider}' writes")]
    CyclicDependency {
        stage: String,
        key: SessionKey,
        provider: String,
    },
}

/// Failures from the opaque worker capability provider.
#[derive(Debug, Clone, Error)]
pub enum WorkerError {
    #[error("worker unavailable: {0}")]
    Unavailable(String),

    #[error("worker call timed out")]
    Timeout,

    #[error("worker returned malformed output: {0}")]
    Malformed(String),

    #[error("worker task failed: {0}")]
    Task(String),
}

/// Failures from a tool invocation, reported to the invoking stage as a
/// result. The gateway never retries and never masks these.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("tool '{tool}' failed: {message}")]
    Backend { tool: String, message: String },

    #[error("tool '{tool}' timed out")]
    Timeout { tool: String },

    #[error("tool '{tool}' called with invalid arguments: {message}")]
    InvalidArguments { tool: String, message: String },
}

impl ToolError {
    pub fn backend(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn invalid_arguments(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Submission-level failures reported to callers of the root router.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("unknown session '{0}'")]
    UnknownSession(String),

    #[error("fix pipeline not offered for session '{0}'")]
    FixNotOffered(String),

    #[error("submission rejected: {0}")]
    SubmissionRejected(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_error_carries_cause_and_message() {
        let err = StageError::analysis("bad parse");
        assert_eq!(err.cause, StageCause::AnalysisFailure);
        assert!(err.to_string().contains("bad parse"));
        assert!(err.to_string().contains("analysis_failure"));
    }

    #[test]
    fn stage_error_timeout_is_matchable() {
        let err = StageError::timeout();
        assert_eq!(err.cause, StageCause::Timeout);
    }

    #[test]
    fn pipeline_error_names_failing_stage() {
        let err = PipelineError::new("style_check", StageError::worker_unavailable("gone"));
        assert_eq!(err.failing_stage, "style_check");
        assert!(err.to_string().contains("style_check"));
        assert!(err.to_string().contains("worker_unavailable"));
    }

    #[test]
    fn composition_error_variants_are_distinct() {
        let missing = CompositionError::MissingDependency {
            stage: "feedback".into(),
            key: SessionKey::TestResults,
        };
        let cyclic = CompositionError::CyclicDependency {
            stage: "feedback".into(),
            key: SessionKey::TestResults,
            provider: "test_run".into(),
        };
        assert!(matches!(missing, CompositionError::MissingDependency { .. }));
        assert!(matches!(cyclic, CompositionError::CyclicDependency { .. }));
        assert!(missing.to_string().contains("test_results"));
    }

    #[test]
    fn router_error_wraps_pipeline_error() {
        let inner = PipelineError::new("analysis", StageError::timeout());
        let err: RouterError = inner.into();
        match &err {
            RouterError::Pipeline(p) => assert_eq!(p.failing_stage, "analysis"),
            _ => panic!("Expected RouterError::Pipeline"),
        }
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&StageError::timeout());
        assert_std_error(&PipelineError::new("s", StageError::timeout()));
        assert_std_error(&WorkerError::Timeout);
        assert_std_error(&ToolError::Timeout {
            tool: "store_artifact".into(),
        });
        assert_std_error(&RouterError::UnknownSession("x".into()));
    }
}
