//! Feedback synthesis stage: final stage of the review pipeline.
//!
//! Pulls the submitter's past feedback, asks the critic worker to
//! synthesize feedback over all upstream results, accumulates the user
//! record, decides fix-worthiness, and archives a grading report.

use crate::errors::{StageCause, StageError};
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

pub struct FeedbackStage {
    worker: Arc<dyn Worker>,
    style_pass_threshold: u64,
    style_weight: f64,
    test_weight: f64,
    structure_weight: f64,
}

impl FeedbackStage {
    pub fn new(
        worker: Arc<dyn Worker>,
        style_pass_threshold: u64,
        weights: (f64, f64, f64),
    ) -> Self {
        Self {
            worker,
            style_pass_threshold,
            style_weight: weights.0,
            test_weight: weights.1,
            structure_weight: weights.2,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FeedbackResponse {
    feedback: String,
    #[serde(default)]
    grade: Option<f64>,
}

const READS: &[SessionKey] = &[
    SessionKey::StructuralAnalysis,
    SessionKey::StyleScore,
    SessionKey::StyleIssues,
    SessionKey::TestResults,
    SessionKey::CodeLineCount,
    SessionKey::GradingAttempts,
];
const WRITES: &[SessionKey] = &[
    SessionKey::FinalFeedback,
    SessionKey::FinalGrade,
    SessionKey::FixWorthy,
    SessionKey::ScoreImprovement,
    SessionKey::GradingAttempts,
];

#[async_trait]
impl Stage for FeedbackStage {
    fn name(&self) -> &'static str {
        "feedback_synthesis"
    }

    fn reads(&self) -> &'static [SessionKey] {
        READS
    }

    fn writes(&self) -> &'static [SessionKey] {
        WRITES
    }

    async fn run(&self, view: &StateView, ctx: &mut ToolContext) -> StageResult {
        let style_score = view.u64_value(SessionKey::StyleScore).unwrap_or(0);
        let test_results = view
            .get(SessionKey::TestResults)
            .cloned()
            .unwrap_or(Value::Null);
        let failed_tests = test_results
            .get("failed")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let pass_rate = test_results
            .get("pass_rate")
            .and_then(|v| v.as_f64())
            .unwrap_or(100.0);
        let attempt = view.u64_value(SessionKey::GradingAttempts).unwrap_or(0) + 1;

        // Past feedback is context, not a prerequisite; a failed lookup
        // degrades to the first-submission path.
        let past_feedback = match ctx
            .invoke(ToolName::SearchHistory, json!({"query": "code review feedback"}))
            .await
        {
            Ok(result) => result.get("records").cloned().unwrap_or(json!([])),
            Err(e) => {
                warn!(error = %e, "past feedback lookup failed");
                json!([])
            }
        };

        let payload = json!({
            "analysis": view.get(SessionKey::StructuralAnalysis).cloned().unwrap_or(Value::Null),
            "line_count": view.u64_value(SessionKey::CodeLineCount),
            "style": {
                "score": style_score,
                "issues": view.get(SessionKey::StyleIssues).cloned().unwrap_or(json!([])),
            },
            "tests": test_results,
            "past_feedback": past_feedback,
            "attempt": attempt,
            "weights": {
                "style": self.style_weight,
                "test": self.test_weight,
                "structure": self.structure_weight,
            },
        });

        let response = match self.worker.evaluate(TaskKind::FeedbackSynthesis, payload).await {
            Ok(response) => response,
            Err(e) => return StageResult::error(from_worker_error(e, StageCause::AnalysisFailure)),
        };
        let parsed: FeedbackResponse = match parse_response(response, StageCause::AnalysisFailure) {
            Ok(parsed) => parsed,
            Err(e) => return StageResult::error(e),
        };

        let fix_worthy = style_score < self.style_pass_threshold || failed_tests > 0;
        let summary: String = parsed.feedback.lines().next().unwrap_or("").chars().take(120).collect();

        // Accumulate the user record; append-only history entry included.
        let score_improvement = match ctx
            .invoke(
                ToolName::RecordProgress,
                json!({
                    "style_score": style_score,
                    "test_pass_rate": pass_rate,
                    "summary": summary,
                }),
            )
            .await
        {
            Ok(progress) => progress
                .get("score_improvement")
                .and_then(|v| v.as_i64())
                .unwrap_or(0),
            Err(e) => {
                warn!(error = %e, "progress accumulation failed");
                0
            }
        };

        let report = json!({
            "attempt": attempt,
            "style": {"score": style_score},
            "tests": test_results,
            "score_improvement": score_improvement,
            "fix_worthy": fix_worthy,
            "feedback": parsed.feedback,
        });
        if let Err(e) = ctx
            .invoke(
                ToolName::StoreArtifact,
                json!({"name": "grading_report", "content": report.to_string()}),
            )
            .await
        {
            // A missing archive never fails the review itself.
            warn!(error = %e, "grading report archive failed");
        }

        info!(style_score, failed_tests, fix_worthy, "feedback synthesized");

        let mut result = StageResult::ok()
            .emit(SessionKey::FinalFeedback, json!(parsed.feedback))
            .emit(SessionKey::FixWorthy, json!(fix_worthy))
            .emit(SessionKey::ScoreImprovement, json!(score_improvement))
            .emit(SessionKey::GradingAttempts, json!(attempt));
        if let Some(grade) = parsed.grade {
            result = result.emit(SessionKey::FinalGrade, json!(grade));
        }
        result
    }
}
