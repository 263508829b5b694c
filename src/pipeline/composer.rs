//! Sequential composition of stages.
//!
//! The composer runs its stages strictly in order. Each stage's read view
//! is captured after every prior stage's writes were committed, so stage
//! N sees exactly the pre-run keys plus the writes of stages 1..N-1.
//! Execution stops at the first stage error; state written by prior
//! stages is retained for diagnostics. The key-dependency check runs
//! once, at composition time, never per run.

use crate::errors::{CompositionError, PipelineError, StageError};
use crate::pipeline::events::{EventSender, PipelineEvent};
use crate::pipeline::stage::{Stage, StageReport, StageResult, StageStatus, StateView, Verdict};
use crate::session::SessionRecord;
use crate::state::keys::SessionKey;
use crate::state::store::StateStore;
use crate::tools::{ToolContext, ToolGateway};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Outcome of one composer run. Control flow is data: an aborted run
/// carries its `PipelineError` here instead of unwinding.
#[derive(Debug, Clone, Default)]
pub struct PipelineRun {
    pub reports: Vec<StageReport>,
    /// Exit signal raised by some stage via `signal_exit`.
    pub escalation: Option<String>,
    /// Last verdict any stage declared.
    pub verdict: Option<Verdict>,
    pub error: Option<PipelineError>,
}

impl PipelineRun {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

pub struct SequentialComposer {
    stages: Vec<Arc<dyn Stage>>,
    initial_keys: Vec<SessionKey>,
    stage_timeout: Duration,
}

impl std::fmt::Debug for SequentialComposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequentialComposer")
            .field("stages", &self.stages.len())
            .field("initial_keys", &self.initial_keys)
            .field("stage_timeout", &self.stage_timeout)
            .finish()
    }
}

impl SequentialComposer {
    /// Compose an ordered stage list, checking every declared read
    /// against the keys available at that point in the sequence. A stage
    /// may read its own writes (read-modify-write across runs); any
    /// other unsatisfied read is fatal here, before any run starts.
    pub fn new(
        stages: Vec<Arc<dyn Stage>>,
        initial_keys: &[SessionKey],
        stage_timeout: Duration,
    ) -> Result<Self, CompositionError> {
        let mut available: HashSet<SessionKey> = initial_keys.iter().copied().collect();

        for (index, stage) in stages.iter().enumerate() {
            for &key in stage.reads() {
                if available.contains(&key) || stage.writes().contains(&key) {
                    continue;
                }
                let later_writer = stages[index + 1..]
                    .iter()
                    .find(|later| later.writes().contains(&key));
                return Err(match later_writer {
                    Some(later) => CompositionError::CyclicDependency {
                        stage: stage.name().to_string(),
                        key,
                        provider: later.name().to_string(),
                    },
                    None => CompositionError::MissingDependency {
                        stage: stage.name().to_string(),
                        key,
                    },
                });
            }
            available.extend(stage.writes().iter().copied());
        }

        Ok(Self {
            stages,
            initial_keys: initial_keys.to_vec(),
            stage_timeout,
        })
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Every key a run of this composer may leave in session state:
    /// the initial keys plus all declared writes. Used to seed the
    /// composition check of downstream pipelines.
    pub fn produces(&self) -> Vec<SessionKey> {
        let mut keys: HashSet<SessionKey> = self.initial_keys.iter().copied().collect();
        for stage in &self.stages {
            keys.extend(stage.writes().iter().copied());
        }
        keys.into_iter().collect()
    }

    /// Run all stages in order. The cancellation token is checked before
    /// each stage; a running stage is allowed to finish (or hit its
    /// timeout) once started.
    pub async fn run(
        &self,
        store: &Arc<StateStore>,
        session: &SessionRecord,
        gateway: &Arc<ToolGateway>,
        cancel: &CancellationToken,
        events: &EventSender,
        pipeline: &str,
    ) -> PipelineRun {
        let mut run = PipelineRun::default();

        for stage in &self.stages {
            if cancel.is_cancelled() {
                warn!(pipeline, stage = stage.name(), "cancelled before stage start");
                let error = StageError::cancelled();
                run.reports.push(StageReport {
                    stage: stage.name().to_string(),
                    ok: false,
                    error: Some(error.to_string()),
                    emitted: Vec::new(),
                    duration_ms: 0,
                });
                run.error = Some(PipelineError::new(stage.name(), error));
                return run;
            }

            events
                .emit(PipelineEvent::StageStarted {
                    pipeline: pipeline.to_string(),
                    stage: stage.name().to_string(),
                })
                .await;

            let view = StateView::capture(store, session);
            let mut ctx = ToolContext::new(session.clone(), Arc::clone(store), Arc::clone(gateway));

            let start = Instant::now();
            let mut result = match timeout(self.stage_timeout, stage.run(&view, &mut ctx)).await {
                Ok(result) => result,
                Err(_) => StageResult::error(StageError::timeout()),
            };
            let duration = start.elapsed();

            // Escalation raised through the gateway travels up as data.
            if let Some(reason) = ctx.take_exit_signal()
                && result.escalation.is_none()
            {
                result.escalation = Some(reason);
            }

            // Commit the stage's writes as one batch, success or not:
            // partial progress stays visible for diagnostics.
            store.session_commit(&session.session_id, result.emitted.clone());

            let report = StageReport {
                stage: stage.name().to_string(),
                ok: result.is_ok(),
                error: match &result.status {
                    StageStatus::Error(e) => Some(e.to_string()),
                    StageStatus::Ok => None,
                },
                emitted: result.emitted_keys(),
                duration_ms: duration.as_millis() as u64,
            };

            events
                .emit(PipelineEvent::StageCompleted {
                    pipeline: pipeline.to_string(),
                    stage: stage.name().to_string(),
                    ok: report.ok,
                    error: report.error.clone(),
                })
                .await;

            run.reports.push(report);

            if let Some(verdict) = result.verdict {
                run.verdict = Some(verdict);
            }
            if result.escalation.is_some() {
                run.escalation = result.escalation.clone();
            }

            match result.status {
                StageStatus::Ok => {
                    info!(
                        pipeline,
                        stage = stage.name(),
                        elapsed_ms = duration.as_millis() as u64,
                        "stage completed"
                    );
                }
                StageStatus::Error(error) => {
                    warn!(pipeline, stage = stage.name(), %error, "stage failed");
                    run.error = Some(PipelineError::new(stage.name(), error));
                    return run;
                }
            }
        }

        run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StageCause;
    use crate::tools::{MemoryArtifactStore, StoreHistoryIndex, ToolName};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::Mutex;

    /// Emits fixed key/value pairs; records the view keys it saw.
    struct EmitStage {
        name: &'static str,
        reads: &'static [SessionKey],
        writes: &'static [SessionKey],
        value: Value,
        seen: Mutex<Vec<Vec<SessionKey>>>,
    }

    impl EmitStage {
        fn new(
            name: &'static str,
            reads: &'static [SessionKey],
            writes: &'static [SessionKey],
        ) -> Self {
            Self {
                name,
                reads,
                writes,
                value: json!("x"),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Stage for EmitStage {
        fn name(&self) -> &'static str {
            self.name
        }
        fn reads(&self) -> &'static [SessionKey] {
            self.reads
        }
        fn writes(&self) -> &'static [SessionKey] {
            self.writes
        }
        async fn run(&self, view: &StateView, _ctx: &mut ToolContext) -> StageResult {
            let mut keys = view.keys();
            keys.sort_by_key(|k| k.as_str());
            self.seen.lock().unwrap().push(keys);
            let mut result = StageResult::ok();
            for &key in self.writes {
                result = result.emit(key, self.value.clone());
            }
            result
        }
    }

    struct FailStage;

    #[async_trait]
    impl Stage for FailStage {
        fn name(&self) -> &'static str {
            "fail"
        }
        fn reads(&self) -> &'static [SessionKey] {
            &[]
        }
        fn writes(&self) -> &'static [SessionKey] {
            &[SessionKey::SyntaxError]
        }
        async fn run(&self, _view: &StateView, _ctx: &mut ToolContext) -> StageResult {
            StageResult::error(StageError::analysis("broken"))
                .emit(SessionKey::SyntaxError, json!("line 3"))
        }
    }

    struct SlowStage;

    #[async_trait]
    impl Stage for SlowStage {
        fn name(&self) -> &'static str {
            "slow"
        }
        fn reads(&self) -> &'static [SessionKey] {
            &[]
        }
        fn writes(&self) -> &'static [SessionKey] {
            &[]
        }
        async fn run(&self, _view: &StateView, _ctx: &mut ToolContext) -> StageResult {
            tokio::time::sleep(Duration::from_secs(10)).await;
            StageResult::ok()
        }
    }

    struct ExitStage;

    #[async_trait]
    impl Stage for ExitStage {
        fn name(&self) -> &'static str {
            "exit"
        }
        fn reads(&self) -> &'static [SessionKey] {
            &[]
        }
        fn writes(&self) -> &'static [SessionKey] {
            &[]
        }
        async fn run(&self, _view: &StateView, ctx: &mut ToolContext) -> StageResult {
            ctx.invoke(ToolName::SignalExit, json!({"reason": "done"}))
                .await
                .unwrap();
            StageResult::ok()
        }
    }

    fn fixture() -> (Arc<StateStore>, SessionRecord, Arc<ToolGateway>) {
        let store = Arc::new(StateStore::new());
        let gateway = Arc::new(ToolGateway::new(
            Arc::new(MemoryArtifactStore::new()),
            Arc::new(StoreHistoryIndex::new(Arc::clone(&store))),
            Duration::from_secs(5),
        ));
        (store, SessionRecord::new("s-1", "dev-1"), gateway)
    }

    fn compose(
        stages: Vec<Arc<dyn Stage>>,
        initial: &[SessionKey],
    ) -> Result<SequentialComposer, CompositionError> {
        SequentialComposer::new(stages, initial, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_stage_sees_union_of_prior_writes_and_initial_keys() {
        let first = Arc::new(EmitStage::new(
            "first",
            &[SessionKey::SubmittedCode],
            &[SessionKey::StyleScore],
        ));
        let second = Arc::new(EmitStage::new(
            "second",
            &[SessionKey::StyleScore],
            &[SessionKey::TestResults],
        ));
        let composer = compose(
            vec![first.clone(), second.clone()],
            &[SessionKey::SubmittedCode],
        )
        .unwrap();

        let (store, session, gateway) = fixture();
        store.session_set("s-1", SessionKey::SubmittedCode, json!("code"));

        let run = composer
            .run(
                &store,
                &session,
                &gateway,
                &CancellationToken::new(),
                &EventSender::none(),
                "review",
            )
            .await;
        assert!(run.is_ok());

        // First stage sees only the pre-run key.
        assert_eq!(
            first.seen.lock().unwrap()[0],
            vec![SessionKey::SubmittedCode]
        );
        // Second stage sees the pre-run key plus the first stage's write.
        let mut expected = vec![SessionKey::StyleScore, SessionKey::SubmittedCode];
        expected.sort_by_key(|k| k.as_str());
        assert_eq!(second.seen.lock().unwrap()[0], expected);
    }

    #[tokio::test]
    async fn test_first_error_stops_run_and_keeps_prior_state() {
        let first = Arc::new(EmitStage::new("first", &[], &[SessionKey::StyleScore]));
        let after = Arc::new(EmitStage::new("after", &[], &[SessionKey::TestResults]));
        let composer = compose(vec![first, Arc::new(FailStage), after.clone()], &[]).unwrap();

        let (store, session, gateway) = fixture();
        let run = composer
            .run(
                &store,
                &session,
                &gateway,
                &CancellationToken::new(),
                &EventSender::none(),
                "review",
            )
            .await;

        let error = run.error.unwrap();
        assert_eq!(error.failing_stage, "fail");
        assert_eq!(error.cause.cause, StageCause::AnalysisFailure);
        // Prior stage's write survives; failing stage's batch committed too.
        assert_eq!(
            store.session_get("s-1", SessionKey::StyleScore),
            Some(json!("x"))
        );
        assert_eq!(
            store.session_get("s-1", SessionKey::SyntaxError),
            Some(json!("line 3"))
        );
        // Stage after the failure never ran.
        assert!(after.seen.lock().unwrap().is_empty());
        assert!(store.session_get("s-1", SessionKey::TestResults).is_none());
    }

    #[tokio::test]
    async fn test_stage_timeout_becomes_timeout_error() {
        let composer =
            SequentialComposer::new(vec![Arc::new(SlowStage)], &[], Duration::from_millis(50))
                .unwrap();
        let (store, session, gateway) = fixture();
        let run = composer
            .run(
                &store,
                &session,
                &gateway,
                &CancellationToken::new(),
                &EventSender::none(),
                "review",
            )
            .await;
        let error = run.error.unwrap();
        assert_eq!(error.cause.cause, StageCause::Timeout);
    }

    #[tokio::test]
    async fn test_cancellation_checked_before_next_stage() {
        let first = Arc::new(EmitStage::new("first", &[], &[SessionKey::StyleScore]));
        let composer = compose(vec![first, Arc::new(EmitStage::new("second", &[], &[]))], &[])
            .unwrap();
        let (store, session, gateway) = fixture();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let run = composer
            .run(
                &store,
                &session,
                &gateway,
                &cancel,
                &EventSender::none(),
                "review",
            )
            .await;
        let error = run.error.unwrap();
        assert_eq!(error.cause.cause, StageCause::Cancelled);
        assert_eq!(error.failing_stage, "first");
    }

    #[tokio::test]
    async fn test_exit_signal_surfaces_as_escalation() {
        let composer = compose(vec![Arc::new(ExitStage)], &[]).unwrap();
        let (store, session, gateway) = fixture();
        let run = composer
            .run(
                &store,
                &session,
                &gateway,
                &CancellationToken::new(),
                &EventSender::none(),
                "fix",
            )
            .await;
        assert!(run.is_ok());
        assert_eq!(run.escalation.as_deref(), Some("done"));
    }

    #[test]
    fn test_composition_missing_dependency() {
        let feedback = Arc::new(EmitStage::new(
            "feedback",
            &[SessionKey::TestResults],
            &[SessionKey::FinalFeedback],
        ));
        let err = compose(vec![feedback], &[]).unwrap_err();
        assert_eq!(
            err,
            CompositionError::MissingDependency {
                stage: "feedback".into(),
                key: SessionKey::TestResults,
            }
        );
    }

    #[test]
    fn test_composition_cyclic_dependency_names_provider() {
        let early = Arc::new(EmitStage::new("early", &[SessionKey::TestResults], &[]));
        let late = Arc::new(EmitStage::new("late", &[], &[SessionKey::TestResults]));
        let err = compose(vec![early, late], &[]).unwrap_err();
        assert_eq!(
            err,
            CompositionError::CyclicDependency {
                stage: "early".into(),
                key: SessionKey::TestResults,
                provider: "late".into(),
            }
        );
    }

    #[test]
    fn test_composition_allows_read_modify_write() {
        let counter = Arc::new(EmitStage::new(
            "counter",
            &[SessionKey::GradingAttempts],
            &[SessionKey::GradingAttempts],
        ));
        assert!(compose(vec![counter], &[]).is_ok());
    }

    #[test]
    fn test_produces_is_initial_plus_writes() {
        let stage = Arc::new(EmitStage::new("s", &[], &[SessionKey::StyleScore]));
        let composer = compose(vec![stage], &[SessionKey::SubmittedCode]).unwrap();
        let mut produced = composer.produces();
        produced.sort_by_key(|k| k.as_str());
        assert_eq!(
            produced,
            vec![SessionKey::SubmittedCode, SessionKey::StyleScore]
        );
    }
}
