//! Style evaluation stage: second stage of the review pipeline.

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

pub struct StyleStage {
    worker: Arc<dyn Worker>,
    max_issues_shown: usize,
}

impl StyleStage {
    pub fn new(worker: Arc<dyn Worker>, max_issues_shown: usize) -> Self {
        Self {
            worker,
            max_issues_shown,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StyleResponse {
    score: u64,
    #[serde(default)]
    issues: Vec<Value>,
}

const READS: &[SessionKey] = &[SessionKey::SubmittedCode];
const WRITES: &[SessionKey] = &[SessionKey::StyleScore, SessionKey::StyleIssues];

#[async_trait]
impl Stage for StyleStage {
    fn name(&self) -> &'static str {
        "style_check"
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

        let response = match self
            .worker
            .evaluate(TaskKind::StyleCheck, json!({"code": code}))
            .await
        {
            Ok(response) => response,
            Err(e) => return StageResult::error(from_worker_error(e, StageCause::AnalysisFailure)),
        };

        let parsed: StyleResponse = match parse_response(response, StageCause::AnalysisFailure) {
            Ok(parsed) => parsed,
            Err(e) => return StageResult::error(e),
        };

        let score = parsed.score.min(100);
        let mut issues = parsed.issues;
        issues.truncate(self.max_issues_shown);
        info!(score, issue_count = issues.len(), "style check complete");

        StageResult::ok()
            .emit(SessionKey::StyleScore, json!(score))
            .emit(SessionKey::StyleIssues, Value::Array(issues))
    }
}
