//! Fix report stage: closes the fix pipeline with a before/after
//! summary. Runs regardless of how the fix loop terminated, so the
//! payload tolerates absent candidates.

use crate::errors::StageCause;
use crate::pipeline::stage::{Stage, StageResult, StateView};
use crate::stages::{from_worker_error, parse_response};
use crate::state::keys::SessionKey;
use crate::tools::{ToolContext, ToolName};
use crate::worker::{TaskKind, Worker};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};

pub struct FixReporterStage {
    worker: Arc<dyn Worker>,
}

impl FixReporterStage {
    pub fn new(worker: Arc<dyn Worker>) -> Self {
        Self { worker }
    }
}

#[derive(Debug, Deserialize)]
struct ReportResponse {
    report: String,
}

const READS: &[SessionKey] = &[
    SessionKey::SubmittedCode,
    SessionKey::FixedCode,
    SessionKey::FixStatus,
    SessionKey::FixTestResults,
    SessionKey::TestResults,
    SessionKey::FixAttempts,
];
const WRITES: &[SessionKey] = &[SessionKey::FixReport];

#[async_trait]
impl Stage for FixReporterStage {
    fn name(&self) -> &'static str {
        "fix_report"
    }

    fn reads(&self) -> &'static [SessionKey] {
        READS
    }

    fn writes(&self) -> &'static [SessionKey] {
        WRITES
    }

    async fn run(&self, view: &StateView, ctx: &mut ToolContext) -> StageResult {
        let payload = json!({
            "original_code": view.str_value(SessionKey::SubmittedCode),
            "fixed_code": view.str_value(SessionKey::FixedCode),
            "fix_status": view.str_value(SessionKey::FixStatus),
            "attempts": view.u64_value(SessionKey::FixAttempts).unwrap_or(0),
            "original_test_results": view.get(SessionKey::TestResults).cloned().unwrap_or(Value::Null),
            "fix_test_results": view.get(SessionKey::FixTestResults).cloned().unwrap_or(Value::Null),
        });

        let response = match self.worker.evaluate(TaskKind::FixReport, payload).await {
            Ok(response) => response,
            Err(e) => {
                return StageResult::error(from_worker_error(e, StageCause::ValidationFailure));
            }
        };
        let parsed: ReportResponse = match parse_response(response, StageCause::ValidationFailure) {
            Ok(parsed) => parsed,
            Err(e) => return StageResult::error(e),
        };

        if let Err(e) = ctx
            .invoke(
                ToolName::StoreArtifact,
                json!({"name": "fix_report", "content": parsed.report}),
            )
            .await
        {
            warn!(error = %e, "fix report archive failed");
        }
        info!("fix report synthesized");

        StageResult::ok().emit(SessionKey::FixReport, json!(parsed.report))
    }
}
