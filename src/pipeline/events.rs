//! Events emitted while pipelines run.

use crate::pipeline::stage::Verdict;
use serde::Serialize;
use tokio::sync::mpsc;

/// Progress events streamed to the submitting caller.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    PipelineStarted {
        pipeline: String,
        session_id: String,
    },
    StageStarted {
        pipeline: String,
        stage: String,
    },
    StageCompleted {
        pipeline: String,
        stage: String,
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    IterationStarted {
        index: u32,
        max: u32,
    },
    IterationCompleted {
        index: u32,
        verdict: Verdict,
        escalated: bool,
    },
    ReviewCompleted {
        session_id: String,
        fix_worthy: bool,
    },
    FixCompleted {
        session_id: String,
        terminal: String,
    },
}

/// Optional event channel; sends are fire-and-forget so a slow or
/// dropped consumer never stalls a pipeline.
#[derive(Clone, Default)]
pub struct EventSender {
    tx: Option<mpsc::Sender<PipelineEvent>>,
}

impl EventSender {
    pub fn new(tx: mpsc::Sender<PipelineEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn none() -> Self {
        Self { tx: None }
    }

    pub async fn emit(&self, event: PipelineEvent) {
        if let Some(ref tx) = self.tx {
            tx.send(event).await.ok();
        }
    }
}
