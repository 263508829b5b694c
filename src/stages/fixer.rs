//! Fix generation stage: first stage of each fix-loop iteration.

use crate::errors::{StageCause, StageError};
use crate::pipeline::stage::{Stage, StageResult, StateView};
use crate::stages::{from_worker_error, parse_response};
use crate::state::keys::SessionKey;
use crate::tools::ToolContext;
use crate::worker::{TaskKind, Worker};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

pub struct FixerStage {
    worker: Arc<dyn Worker>,
}

impl FixerStage {
    pub fn new(worker: Arc<dyn Worker>) -> Self {
        Self { worker }
    }
}

#[derive(Debug, Deserialize)]
struct FixResponse {
    fixed_code: String,
    #[serde(default)]
    fixes_applied: Vec<Value>,
}

const READS: &[SessionKey] = &[
    SessionKey::SubmittedCode,
    SessionKey::StructuralAnalysis,
    SessionKey::StyleScore,
    SessionKey::StyleIssues,
    SessionKey::TestResults,
    SessionKey::FixAttempts,
    SessionKey::FixedCode,
];
const WRITES: &[SessionKey] = &[SessionKey::FixedCode, SessionKey::FixAttempts];

#[async_trait]
impl Stage for FixerStage {
    fn name(&self) -> &'static str {
        "fix_generation"
    }

    fn reads(&self) -> &'static [SessionKey] {
        READS
    }

    fn writes(&self) -> &'static [SessionKey] {
        WRITES
    }

    async fn run(&self, view: &StateView, _ctx: &mut ToolContext) -> StageResult {
        let Some(code) = view.str_value(SessionKey::SubmittedCode) else {
            return StageResult::error(StageError::validation("no submitted code in session state"));
        };
        // Later iterations refine the previous attempt rather than
        // starting over; the loop never resets session state.
        let attempt = view.u64_value(SessionKey::FixAttempts).unwrap_or(0) + 1;
        let previous = view
            .str_value(SessionKey::FixedCode)
            .map(|s| json!(s))
            .unwrap_or(Value::Null);

        let payload = json!({
            "code": code,
            "previous_attempt": previous,
            "attempt": attempt,
            "analysis": view.get(SessionKey::StructuralAnalysis).cloned().unwrap_or(Value::Null),
            "style_score": view.u64_value(SessionKey::StyleScore),
            "style_issues": view.get(SessionKey::StyleIssues).cloned().unwrap_or(json!([])),
            "test_results": view.get(SessionKey::TestResults).cloned().unwrap_or(Value::Null),
        });

        let response = match self.worker.evaluate(TaskKind::FixGeneration, payload).await {
            Ok(response) => response,
            Err(e) => {
                return StageResult::error(from_worker_error(e, StageCause::ValidationFailure));
            }
        };
        let parsed: FixResponse = match parse_response(response, StageCause::ValidationFailure) {
            Ok(parsed) => parsed,
            Err(e) => return StageResult::error(e),
        };

        info!(attempt, fixes = parsed.fixes_applied.len(), "fix candidate generated");

        StageResult::ok()
            .emit(SessionKey::FixedCode, json!(parsed.fixed_code))
            .emit(SessionKey::FixAttempts, json!(attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support::Fixture;
    use crate::worker::ScriptedWorker;

    #[tokio::test]
    async fn test_first_attempt_counts_from_one() {
        let worker = Arc::new(ScriptedWorker::new());
        worker.respond(
            TaskKind::FixGeneration,
            json!({"fixed_code": "def add(a, b):\n    return a + b\n"}),
        );
        let stage = FixerStage::new(worker.clone());
        let fixture = Fixture::new();
        let view = StateView::from_entries(vec![(SessionKey::SubmittedCode, json!("def add(a,b): return a+b"))]);

        let result = stage.run(&view, &mut fixture.context()).await;
        assert!(result.is_ok());
        let (_, attempts) = result
            .emitted
            .iter()
            .find(|(k, _)| *k == SessionKey::FixAttempts)
            .unwrap();
        assert_eq!(attempts, &json!(1));

        // First attempt carries no previous candidate.
        let calls = worker.calls();
        assert!(calls[0].1["previous_attempt"].is_null());
    }

    #[tokio::test]
    async fn test_later_attempt_sees_previous_candidate() {
        let worker = Arc::new(ScriptedWorker::new());
        worker.respond(TaskKind::FixGeneration, json!({"fixed_code": "v2"}));
        let stage = FixerStage::new(worker.clone());
        let fixture = Fixture::new();
        let view = StateView::from_entries(vec![
            (SessionKey::SubmittedCode, json!("original")),
            (SessionKey::FixedCode, json!("v1")),
            (SessionKey::FixAttempts, json!(1)),
        ]);

        let result = stage.run(&view, &mut fixture.context()).await;
        let (_, attempts) = result
            .emitted
            .iter()
            .find(|(k, _)| *k == SessionKey::FixAttempts)
            .unwrap();
        assert_eq!(attempts, &json!(2));
        assert_eq!(worker.calls()[0].1["previous_attempt"], "v1");
    }
}
