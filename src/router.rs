//! Top-level entry point: session lifecycle and pipeline selection.
//!
//! The router accepts submissions, runs the review pipeline, inspects
//! the fix-worthiness signal, and on acceptance runs the fix pipeline -
//! a bounded loop over three stages followed by a closing report stage
//! that always runs. It is the only component that switches a session's
//! phase field, and it holds a per-session run lock so the review and
//! fix pipelines never overlap for one session while different sessions
//! run fully concurrently.

use crate::config::MentorConfig;
use crate::errors::{CompositionError, RouterError};
use crate::pipeline::composer::SequentialComposer;
use crate::pipeline::events::{EventSender, PipelineEvent};
use crate::pipeline::loop_ctrl::{IterationOutcome, LoopController, LoopState};
use crate::pipeline::stage::{Stage, StageReport};
use crate::session::{SessionPhase, SessionRecord, Submission};
use crate::state::keys::SessionKey;
use crate::state::store::StateStore;
use crate::tools::{ArtifactSink, StoreHistoryIndex, ToolGateway};
use crate::stages::{
    AnalyzerStage, FeedbackStage, FixAssessorStage, FixReporterStage, FixValidatorStage,
    FixerStage, StyleStage, TestRunStage,
};
use crate::worker::Worker;
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

/// Terminal result of a review pass.
#[derive(Debug, Clone)]
pub struct ReviewOutcome {
    pub session_id: String,
    pub feedback: String,
    pub fix_worthy: bool,
    pub style_score: Option<u64>,
    pub score_improvement: Option<i64>,
    pub reports: Vec<StageReport>,
}

/// Terminal result of a fix pass, including the before/after payload.
#[derive(Debug, Clone)]
pub struct FixOutcome {
    pub session_id: String,
    pub terminal: LoopState,
    pub iterations: Vec<IterationOutcome>,
    pub original_code: Option<String>,
    pub fixed_code: Option<String>,
    pub report: Option<String>,
}

pub struct RootRouter {
    config: MentorConfig,
    store: Arc<StateStore>,
    gateway: Arc<ToolGateway>,
    review: SequentialComposer,
    fix_loop: LoopController,
    fix_closing: SequentialComposer,
    records: DashMap<String, SessionRecord>,
    run_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl RootRouter {
    /// Wire up both pipelines. Composition is checked here, once; a
    /// defective stage graph refuses to start before any submission is
    /// accepted.
    pub fn new(
        config: MentorConfig,
        worker: Arc<dyn Worker>,
        artifacts: Arc<dyn ArtifactSink>,
    ) -> Result<Self, CompositionError> {
        let store = Arc::new(StateStore::new());
        let history = Arc::new(StoreHistoryIndex::new(Arc::clone(&store)));
        let gateway = Arc::new(ToolGateway::new(
            artifacts,
            history,
            Duration::from_secs(config.tool_timeout_secs),
        ));
        let stage_timeout = Duration::from_secs(config.stage_timeout_secs);

        let review_stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(AnalyzerStage::new(Arc::clone(&worker))),
            Arc::new(StyleStage::new(
                Arc::clone(&worker),
                config.max_style_issues_shown,
            )),
            Arc::new(TestRunStage::new(Arc::clone(&worker))),
            Arc::new(FeedbackStage::new(
                Arc::clone(&worker),
                config.style_pass_threshold,
                config.weights(),
            )),
        ];
        let review =
            SequentialComposer::new(review_stages, &[SessionKey::SubmittedCode], stage_timeout)?;

        let fix_stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(FixerStage::new(Arc::clone(&worker))),
            Arc::new(FixValidatorStage::new(Arc::clone(&worker))),
            Arc::new(FixAssessorStage::new(Arc::clone(&worker))),
        ];
        let fix_inner = SequentialComposer::new(fix_stages, &review.produces(), stage_timeout)?;
        let fix_loop = LoopController::new(fix_inner, config.max_fix_iterations);

        let closing_stages: Vec<Arc<dyn Stage>> =
            vec![Arc::new(FixReporterStage::new(Arc::clone(&worker)))];
        let fix_closing =
            SequentialComposer::new(closing_stages, &fix_loop.produces(), stage_timeout)?;

        Ok(Self {
            config,
            store,
            gateway,
            review,
            fix_loop,
            fix_closing,
            records: DashMap::new(),
            run_locks: DashMap::new(),
        })
    }

    pub fn store(&self) -> Arc<StateStore> {
        Arc::clone(&self.store)
    }

    /// Current record for a session, if one exists.
    pub fn session(&self, session_id: &str) -> Option<SessionRecord> {
        self.records.get(session_id).map(|r| r.clone())
    }

    fn run_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.run_locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn set_phase(&self, session_id: &str, phase: SessionPhase) {
        if let Some(mut record) = self.records.get_mut(session_id) {
            record.phase = phase;
        }
    }

    /// Accept one submission and run the review pipeline to a terminal
    /// result. Session state is reset for the new pass; the user record
    /// persists across passes.
    pub async fn submit(
        &self,
        submission: Submission,
        events: EventSender,
        cancel: CancellationToken,
    ) -> Result<ReviewOutcome, RouterError> {
        if submission.code.trim().is_empty() {
            return Err(RouterError::SubmissionRejected(
                "no code in submission".into(),
            ));
        }
        if submission.code.len() > self.config.max_code_length {
            return Err(RouterError::SubmissionRejected(format!(
                "code exceeds maximum length of {} characters",
                self.config.max_code_length
            )));
        }

        let session_id = submission
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        {
            let record = self
                .records
                .entry(session_id.clone())
                .or_insert_with(|| SessionRecord::new(&session_id, &submission.user_id));
            if record.user_id != submission.user_id {
                return Err(RouterError::SubmissionRejected(format!(
                    "session '{}' belongs to a different submitter",
                    session_id
                )));
            }
        }

        let lock = self.run_lock(&session_id);
        let _guard = lock.lock().await;

        info!(session = %session_id, user = %submission.user_id, "review pass starting");
        self.set_phase(&session_id, SessionPhase::Review);
        self.store.session_clear(&session_id);
        self.store.session_set(
            &session_id,
            SessionKey::SubmittedCode,
            json!(submission.code),
        );

        events
            .emit(PipelineEvent::PipelineStarted {
                pipeline: "review".into(),
                session_id: session_id.clone(),
            })
            .await;

        let record = self
            .session(&session_id)
            .ok_or_else(|| RouterError::UnknownSession(session_id.clone()))?;
        let run = self
            .review
            .run(&self.store, &record, &self.gateway, &cancel, &events, "review")
            .await;

        self.set_phase(&session_id, SessionPhase::Idle);

        if let Some(error) = run.error {
            return Err(error.into());
        }

        let feedback = self
            .store
            .session_get(&session_id, SessionKey::FinalFeedback)
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .unwrap_or_default();
        let fix_worthy = self
            .store
            .session_get(&session_id, SessionKey::FixWorthy)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        events
            .emit(PipelineEvent::ReviewCompleted {
                session_id: session_id.clone(),
                fix_worthy,
            })
            .await;

        Ok(ReviewOutcome {
            session_id: session_id.clone(),
            feedback,
            fix_worthy,
            style_score: self
                .store
                .session_get(&session_id, SessionKey::StyleScore)
                .and_then(|v| v.as_u64()),
            score_improvement: self
                .store
                .session_get(&session_id, SessionKey::ScoreImprovement)
                .and_then(|v| v.as_i64()),
            reports: run.reports,
        })
    }

    /// Run the fix pipeline for a session whose review signalled
    /// fix-worthiness. The closing report stage runs regardless of the
    /// loop's terminal state.
    pub async fn run_fix(
        &self,
        session_id: &str,
        events: EventSender,
        cancel: CancellationToken,
    ) -> Result<FixOutcome, RouterError> {
        let record = self
            .session(session_id)
            .ok_or_else(|| RouterError::UnknownSession(session_id.to_string()))?;

        let lock = self.run_lock(session_id);
        let _guard = lock.lock().await;

        let fix_worthy = self
            .store
            .session_get(session_id, SessionKey::FixWorthy)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !fix_worthy {
            return Err(RouterError::FixNotOffered(session_id.to_string()));
        }

        info!(session = %session_id, "fix pass starting");
        self.set_phase(session_id, SessionPhase::Fix);
        events
            .emit(PipelineEvent::PipelineStarted {
                pipeline: "fix".into(),
                session_id: session_id.to_string(),
            })
            .await;

        let loop_run = self
            .fix_loop
            .run(&self.store, &record, &self.gateway, &cancel, &events, "fix")
            .await;

        let closing = self
            .fix_closing
            .run(&self.store, &record, &self.gateway, &cancel, &events, "fix")
            .await;

        self.set_phase(session_id, SessionPhase::Idle);
        events
            .emit(PipelineEvent::FixCompleted {
                session_id: session_id.to_string(),
                terminal: loop_run.terminal.to_string(),
            })
            .await;

        if let Some(error) = closing.error {
            return Err(error.into());
        }

        Ok(FixOutcome {
            session_id: session_id.to_string(),
            terminal: loop_run.terminal,
            iterations: loop_run.iterations,
            original_code: self
                .store
                .session_get(session_id, SessionKey::SubmittedCode)
                .and_then(|v| v.as_str().map(|s| s.to_string())),
            fixed_code: self
                .store
                .session_get(session_id, SessionKey::FixedCode)
                .and_then(|v| v.as_str().map(|s| s.to_string())),
            report: self
                .store
                .session_get(session_id, SessionKey::FixReport)
                .and_then(|v| v.as_str().map(|s| s.to_string())),
        })
    }
}
