//! Bounded refinement loop over a stage sequence.
//!
//! State machine: `Running(i)` for i in [0, max) with three terminal
//! states. The escalation signal is the only success exit; reaching the
//! iteration bound is always a non-success terminal state, so the loop
//! can neither run unbounded nor look successful when the inner work
//! never explicitly confirmed success. Session state carries forward
//! between iterations - later iterations see cumulative progress.

use crate::pipeline::composer::SequentialComposer;
use crate::pipeline::events::{EventSender, PipelineEvent};
use crate::pipeline::stage::{StageReport, Verdict};
use crate::session::SessionRecord;
use crate::state::keys::SessionKey;
use crate::state::store::StateStore;
use crate::tools::ToolGateway;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Loop controller state. All non-`Running` states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Running(u32),
    Succeeded,
    ExhaustedPartial,
    ExhaustedFailed,
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LoopState::Running(_))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, LoopState::Succeeded)
    }
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopState::Running(i) => write!(f, "running({})", i),
            LoopState::Succeeded => write!(f, "succeeded"),
            LoopState::ExhaustedPartial => write!(f, "exhausted_partial"),
            LoopState::ExhaustedFailed => write!(f, "exhausted_failed"),
        }
    }
}

/// Aggregated record of one loop pass.
#[derive(Debug, Clone, Serialize)]
pub struct IterationOutcome {
    /// Ordinal index, zero-based.
    pub index: u32,
    pub reports: Vec<StageReport>,
    pub verdict: Verdict,
    pub escalated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_reason: Option<String>,
}

/// Result of driving the loop to a terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct LoopRun {
    pub terminal: LoopState,
    pub iterations: Vec<IterationOutcome>,
}

pub struct LoopController {
    composer: SequentialComposer,
    max_iterations: u32,
}

impl LoopController {
    /// Wrap a composed stage sequence. `max_iterations` is clamped to at
    /// least one so the machine always has a `Running(0)` state.
    pub fn new(composer: SequentialComposer, max_iterations: u32) -> Self {
        Self {
            composer,
            max_iterations: max_iterations.max(1),
        }
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Keys a full loop run may leave in session state.
    pub fn produces(&self) -> Vec<SessionKey> {
        self.composer.produces()
    }

    /// Drive the state machine to a terminal state. An inner pipeline
    /// error is that iteration's `Failed` verdict, not a loop abort -
    /// transient worker failures must not forfeit remaining attempts.
    pub async fn run(
        &self,
        store: &Arc<StateStore>,
        session: &SessionRecord,
        gateway: &Arc<ToolGateway>,
        cancel: &CancellationToken,
        events: &EventSender,
        pipeline: &str,
    ) -> LoopRun {
        let mut state = LoopState::Running(0);
        let mut iterations = Vec::new();

        loop {
            let LoopState::Running(index) = state else {
                break;
            };

            events
                .emit(PipelineEvent::IterationStarted {
                    index,
                    max: self.max_iterations,
                })
                .await;

            let run = self
                .composer
                .run(store, session, gateway, cancel, events, pipeline)
                .await;

            // Escalation only counts from a clean iteration: if a stage
            // errored after raising the signal, the error wins.
            let escalated = run.error.is_none() && run.escalation.is_some();
            let verdict = if run.error.is_some() {
                Verdict::Failed
            } else if escalated {
                run.verdict.unwrap_or(Verdict::Successful)
            } else {
                // An iteration that never declares a verdict cannot be
                // silently successful.
                run.verdict.unwrap_or(Verdict::Failed)
            };

            let outcome = IterationOutcome {
                index,
                reports: run.reports,
                verdict,
                escalated,
                exit_reason: run.escalation,
            };

            events
                .emit(PipelineEvent::IterationCompleted {
                    index,
                    verdict,
                    escalated,
                })
                .await;
            info!(
                pipeline,
                iteration = index,
                %verdict,
                escalated,
                "iteration finished"
            );

            iterations.push(outcome);

            state = if escalated {
                LoopState::Succeeded
            } else if index + 1 == self.max_iterations {
                if verdict == Verdict::Partial {
                    LoopState::ExhaustedPartial
                } else {
                    LoopState::ExhaustedFailed
                }
            } else {
                LoopState::Running(index + 1)
            };
        }

        LoopRun {
            terminal: state,
            iterations,
        }
    }
}
