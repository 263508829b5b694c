//! Concrete pipeline stages.
//!
//! Review pipeline: code analysis → style check → test run → feedback
//! synthesis. Fix pipeline: fix generation → fix validation → fix
//! assessment (looped), then a fix report stage that always runs.
//!
//! Every stage delegates its reasoning to the worker capability
//! interface and only routes structured data between session state, the
//! tool gateway, and the worker.

mod analyzer;
mod feedback;
mod fix_assessor;
mod fix_reporter;
mod fix_validator;
mod fixer;
mod style;
mod test_run;

pub use analyzer::AnalyzerStage;
pub use feedback::FeedbackStage;
pub use fix_assessor::FixAssessorStage;
pub use fix_reporter::FixReporterStage;
pub use fix_validator::FixValidatorStage;
pub use fixer::FixerStage;
pub use style::StyleStage;
pub use test_run::TestRunStage;

use crate::errors::{StageCause, StageError, WorkerError};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Map a worker failure onto the stage error taxonomy. Timeouts and
/// unavailability keep their own causes; everything else takes the
/// stage's domain cause.
pub(crate) fn from_worker_error(err: WorkerError, fallback: StageCause) -> StageError {
    match err {
        WorkerError::Timeout => StageError::new(StageCause::Timeout, "worker call timed out"),
        WorkerError::Unavailable(msg) => StageError::worker_unavailable(msg),
        WorkerError::Malformed(msg) | WorkerError::Task(msg) => StageError::new(fallback, msg),
    }
}

/// Deserialize a worker response into the stage's expected shape.
pub(crate) fn parse_response<T: DeserializeOwned>(
    value: Value,
    fallback: StageCause,
) -> Result<T, StageError> {
    serde_json::from_value(value)
        .map_err(|e| StageError::new(fallback, format!("unexpected worker response: {}", e)))
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::session::SessionRecord;
    use crate::state::store::StateStore;
    use crate::tools::{MemoryArtifactStore, StoreHistoryIndex, ToolContext, ToolGateway};
    use std::sync::Arc;
    use std::time::Duration;

    pub(crate) struct Fixture {
        pub store: Arc<StateStore>,
        pub artifacts: Arc<MemoryArtifactStore>,
        pub gateway: Arc<ToolGateway>,
        pub session: SessionRecord,
    }

    impl Fixture {
        pub(crate) fn new() -> Self {
            let store = Arc::new(StateStore::new());
            let artifacts = Arc::new(MemoryArtifactStore::new());
            let gateway = Arc::new(ToolGateway::new(
                Arc::clone(&artifacts) as Arc<dyn crate::tools::ArtifactSink>,
                Arc::new(StoreHistoryIndex::new(Arc::clone(&store))),
                Duration::from_secs(5),
            ));
            Self {
                store,
                artifacts,
                gateway,
                session: SessionRecord::new("s-1", "dev-1"),
            }
        }

        pub(crate) fn context(&self) -> ToolContext {
            ToolContext::new(
                self.session.clone(),
                Arc::clone(&self.store),
                Arc::clone(&self.gateway),
            )
        }
    }
}
