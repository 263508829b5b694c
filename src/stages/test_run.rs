//! Test generation/execution stage: third stage of the review pipeline.
//!
//! The worker generates and executes tests in its own sandbox; this
//! stage only normalizes the counts it reports.

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

pub struct TestRunStage {
    worker: Arc<dyn Worker>,
}

impl TestRunStage {
    pub fn new(worker: Arc<dyn Worker>) -> Self {
        Self { worker }
    }
}

#[derive(Debug, Deserialize)]
struct TestResponse {
    passed: u64,
    failed: u64,
    total: u64,
    #[serde(default)]
    pass_rate: Option<f64>,
    #[serde(default)]
    details: Vec<Value>,
}

const READS: &[SessionKey] = &[SessionKey::SubmittedCode, SessionKey::StructuralAnalysis];
const WRITES: &[SessionKey] = &[SessionKey::TestResults];

#[async_trait]
impl Stage for TestRunStage {
    fn name(&self) -> &'static str {
        "test_run"
    }

    fn reads(&self) -> &'static [SessionKey] {
        READS
    }

    fn writes(&self) -> &'static [SessionKey] {
        WRITES
    }

    async fn run(&self, view: &StateView, _ctx: &mut ToolContext) -> StageResult {
        let Some(code) = view.str_value(SessionKey::SubmittedCode) else {
            return StageResult::error(StageError::analysis("no submitted code in session state"));
        };
        let analysis = view
            .get(SessionKey::StructuralAnalysis)
            .cloned()
            .unwrap_or(Value::Null);

        let response = match self
            .worker
            .evaluate(TaskKind::TestRun, json!({"code": code, "analysis": analysis}))
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return StageResult::error(from_worker_error(e, StageCause::ValidationFailure));
            }
        };

        let parsed: TestResponse = match parse_response(response, StageCause::ValidationFailure) {
            Ok(parsed) => parsed,
            Err(e) => return StageResult::error(e),
        };

        // No testable functions counts as a clean pass.
        let pass_rate = parsed.pass_rate.unwrap_or_else(|| {
            if parsed.total == 0 {
                100.0
            } else {
                parsed.passed as f64 / parsed.total as f64 * 100.0
            }
        });
        info!(
            passed = parsed.passed,
            failed = parsed.failed,
            total = parsed.total,
            "test execution complete"
        );

        StageResult::ok().emit(
            SessionKey::TestResults,
            json!({
                "passed": parsed.passed,
                "failed": parsed.failed,
                "total": parsed.total,
                "pass_rate": pass_rate,
                "details": parsed.details,
            }),
        )
    }
}
