//! Fix validation stage: re-runs the test suite against the candidate.

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

pub struct FixValidatorStage {
    worker: Arc<dyn Worker>,
}

impl FixValidatorStage {
    pub fn new(worker: Arc<dyn Worker>) -> Self {
        Self { worker }
    }
}

#[derive(Debug, Deserialize)]
struct ValidationResponse {
    passed: u64,
    failed: u64,
    total: u64,
    #[serde(default)]
    pass_rate: Option<f64>,
    #[serde(default)]
    comparison: Option<Value>,
}

const READS: &[SessionKey] = &[SessionKey::FixedCode, SessionKey::TestResults];
const WRITES: &[SessionKey] = &[SessionKey::FixTestResults];

#[async_trait]
impl Stage for FixValidatorStage {
    fn name(&self) -> &'static str {
        "fix_validation"
    }

    fn reads(&self) -> &'static [SessionKey] {
        READS
    }

    fn writes(&self) -> &'static [SessionKey] {
        WRITES
    }

    async fn run(&self, view: &StateView, _ctx: &mut ToolContext) -> StageResult {
        let Some(fixed_code) = view.str_value(SessionKey::FixedCode) else {
            return StageResult::error(StageError::validation("no fix candidate to validate"));
        };
        let original = view
            .get(SessionKey::TestResults)
            .cloned()
            .unwrap_or(Value::Null);

        let response = match self
            .worker
            .evaluate(
                TaskKind::FixValidation,
                json!({"fixed_code": fixed_code, "original_test_results": original}),
            )
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return StageResult::error(from_worker_error(e, StageCause::ValidationFailure));
            }
        };
        let parsed: ValidationResponse =
            match parse_response(response, StageCause::ValidationFailure) {
                Ok(parsed) => parsed,
                Err(e) => return StageResult::error(e),
            };

        let pass_rate = parsed.pass_rate.unwrap_or_else(|| {
            if parsed.total == 0 {
                100.0
            } else {
                parsed.passed as f64 / parsed.total as f64 * 100.0
            }
        });
        let comparison = parsed.comparison.unwrap_or_else(|| {
            let original_rate = original
                .get("pass_rate")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0);
            json!({
                "original_pass_rate": original_rate,
                "new_pass_rate": pass_rate,
                "improvement": pass_rate - original_rate,
            })
        });

        info!(
            passed = parsed.passed,
            failed = parsed.failed,
            "fix candidate validated"
        );

        StageResult::ok().emit(
            SessionKey::FixTestResults,
            json!({
                "passed": parsed.passed,
                "failed": parsed.failed,
                "total": parsed.total,
                "pass_rate": pass_rate,
                "comparison": comparison,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stage::StageStatus;
    use crate::stages::test_support::Fixture;
    use crate::worker::ScriptedWorker;

    #[tokio::test]
    async fn test_missing_candidate_is_validation_failure() {
        let stage = FixValidatorStage::new(Arc::new(ScriptedWorker::new()));
        let fixture = Fixture::new();
        let result = stage
            .run(&StateView::from_entries(vec![]), &mut fixture.context())
            .await;
        match &result.status {
            StageStatus::Error(e) => assert_eq!(e.cause, StageCause::ValidationFailure),
            _ => panic!("Expected error"),
        }
    }

    #[tokio::test]
    async fn test_comparison_computed_when_worker_omits_it() {
        let worker = Arc::new(ScriptedWorker::new());
        worker.respond(
            TaskKind::FixValidation,
            json!({"passed": 18, "failed": 0, "total": 18}),
        );
        let stage = FixValidatorStage::new(worker);
        let fixture = Fixture::new();
        let view = StateView::from_entries(vec![
            (SessionKey::FixedCode, json!("fixed")),
            (
                SessionKey::TestResults,
                json!({"passed": 16, "failed": 2, "total": 18, "pass_rate": 88.9}),
            ),
        ]);

        let result = stage.run(&view, &mut fixture.context()).await;
        let (_, results) = result
            .emitted
            .iter()
            .find(|(k, _)| *k == SessionKey::FixTestResults)
            .unwrap();
        let improvement = results["comparison"]["improvement"].as_f64().unwrap();
        assert!((improvement - 11.1).abs() < 0.01);
    }
}
