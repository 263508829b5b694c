//! Fix assessment stage: declares the iteration verdict and raises the
//! loop's exit signal when the fix is confirmed.
//!
//! The verdict heuristic itself belongs to the worker; this stage only
//! translates the declared verdict into control data.

use crate::errors::{StageCause, StageError};
use crate::pipeline::stage::{Stage, StageResult, StateView, Verdict};
use crate::stages::{from_worker_error, parse_response};
use crate::state::keys::SessionKey;
use crate::tools::{ToolContext, ToolName};
use crate::worker::{TaskKind, Worker};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};

pub struct FixAssessorStage {
    worker: Arc<dyn Worker>,
}

impl FixAssessorStage {
    pub fn new(worker: Arc<dyn Worker>) -> Self {
        Self { worker }
    }
}

#[derive(Debug, Deserialize)]
struct AssessResponse {
    verdict: String,
    #[serde(default)]
    reasoning: Option<String>,
}

const READS: &[SessionKey] = &[
    SessionKey::FixTestResults,
    SessionKey::TestResults,
    SessionKey::StyleScore,
    SessionKey::FixAttempts,
];
const WRITES: &[SessionKey] = &[SessionKey::FixStatus];

#[async_trait]
impl Stage for FixAssessorStage {
    fn name(&self) -> &'static str {
        "fix_assessment"
    }

    fn reads(&self) -> &'static [SessionKey] {
        READS
    }

    fn writes(&self) -> &'static [SessionKey] {
        WRITES
    }

    async fn run(&self, view: &StateView, ctx: &mut ToolContext) -> StageResult {
        let payload = json!({
            "fix_test_results": view.get(SessionKey::FixTestResults).cloned().unwrap_or(Value::Null),
            "original_test_results": view.get(SessionKey::TestResults).cloned().unwrap_or(Value::Null),
            "style_score": view.u64_value(SessionKey::StyleScore),
            "attempt": view.u64_value(SessionKey::FixAttempts),
        });

        let response = match self.worker.evaluate(TaskKind::FixAssessment, payload).await {
            Ok(response) => response,
            Err(e) => {
                return StageResult::error(from_worker_error(e, StageCause::ValidationFailure));
            }
        };
        let parsed: AssessResponse = match parse_response(response, StageCause::ValidationFailure) {
            Ok(parsed) => parsed,
            Err(e) => return StageResult::error(e),
        };

        let verdict: Verdict = match parsed.verdict.parse() {
            Ok(verdict) => verdict,
            Err(e) => return StageResult::error(StageError::validation(e)),
        };

        if verdict == Verdict::Successful {
            let reason = parsed
                .reasoning
                .unwrap_or_else(|| "fix verified by assessment".to_string());
            // The reserved exit call is the loop's only success exit.
            if let Err(e) = ctx
                .invoke(ToolName::SignalExit, json!({"reason": reason}))
                .await
            {
                warn!(error = %e, "exit signal failed");
            }
        }
        info!(%verdict, "fix assessed");

        StageResult::ok()
            .emit(SessionKey::FixStatus, json!(verdict.as_str()))
            .with_verdict(verdict)
    }
}
