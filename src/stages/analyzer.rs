//! Structural analysis stage: first stage of the review pipeline.

use crate::errors::{StageCause, StageError};
use crate::pipeline::stage::{Stage, StageResult, StateView};
use crate::stages::from_worker_error;
use crate::state::keys::SessionKey;
use crate::tools::ToolContext;
use crate::worker::{TaskKind, Worker};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

pub struct AnalyzerStage {
    worker: Arc<dyn Worker>,
}

impl AnalyzerStage {
    pub fn new(worker: Arc<dyn Worker>) -> Self {
        Self { worker }
    }
}

const READS: &[SessionKey] = &[SessionKey::SubmittedCode];
const WRITES: &[SessionKey] = &[
    SessionKey::StructuralAnalysis,
    SessionKey::CodeLineCount,
    SessionKey::SyntaxError,
];

#[async_trait]
impl Stage for AnalyzerStage {
    fn name(&self) -> &'static str {
        "code_analysis"
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
        let line_count = code.lines().count();
        debug!(line_count, "analyzing submitted code");

        let response = match self
            .worker
            .evaluate(TaskKind::StructuralAnalysis, json!({"code": code}))
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return StageResult::error(from_worker_error(e, StageCause::AnalysisFailure));
            }
        };

        // A worker-reported syntax error short-circuits the review; the
        // error detail stays in state for the diagnostics snapshot.
        if let Some(syntax_error) = response.get("syntax_error").filter(|v| !v.is_null()) {
            let message = syntax_error
                .as_str()
                .map(|s| s.to_string())
                .unwrap_or_else(|| syntax_error.to_string());
            return StageResult::error(StageError::analysis(format!(
                "syntax error: {}",
                message
            )))
            .emit(SessionKey::SyntaxError, syntax_error.clone())
            .emit(SessionKey::CodeLineCount, json!(line_count));
        }

        let analysis = response.get("analysis").cloned().unwrap_or(response);
        info!("structural analysis complete");

        StageResult::ok()
            .emit(SessionKey::StructuralAnalysis, analysis)
            .emit(SessionKey::CodeLineCount, json!(line_count))
    }
}
