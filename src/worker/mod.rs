//! Opaque worker capability interface.
//!
//! Every piece of reasoning the pipelines need - structural analysis,
//! style judgment, test execution, fix generation - is delegated through
//! one polymorphic interface with a closed set of task kinds. The
//! orchestrator only routes structured data in and out.

pub mod process;
pub mod scripted;

pub use process::ProcessWorker;
pub use scripted::{ScriptedResponse, ScriptedWorker};

use crate::errors::WorkerError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed set of tasks a worker can be asked to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    StructuralAnalysis,
    StyleCheck,
    TestRun,
    FeedbackSynthesis,
    FixGeneration,
    FixValidation,
    FixAssessment,
    FixReport,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::StructuralAnalysis => "structural_analysis",
            TaskKind::StyleCheck => "style_check",
            TaskKind::TestRun => "test_run",
            TaskKind::FeedbackSynthesis => "feedback_synthesis",
            TaskKind::FixGeneration => "fix_generation",
            TaskKind::FixValidation => "fix_validation",
            TaskKind::FixAssessment => "fix_assessment",
            TaskKind::FixReport => "fix_report",
        }
    }

    /// Synthesis tasks run on the critic model; everything else on the
    /// worker model.
    pub fn uses_critic_model(&self) -> bool {
        matches!(self, TaskKind::FeedbackSynthesis | TaskKind::FixReport)
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Opaque reasoning provider consumed by stages.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Evaluate one task and return its structured result.
    async fn evaluate(&self, task: TaskKind, input: Value) -> Result<Value, WorkerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_kind_as_str_matches_serde() {
        let json = serde_json::to_string(&TaskKind::FixAssessment).unwrap();
        assert_eq!(json, "\"fix_assessment\"");
        assert_eq!(TaskKind::FixAssessment.as_str(), "fix_assessment");
    }

    #[test]
    fn test_model_selection() {
        assert!(TaskKind::FeedbackSynthesis.uses_critic_model());
        assert!(TaskKind::FixReport.uses_critic_model());
        assert!(!TaskKind::StyleCheck.uses_critic_model());
    }
}
