//! Tool invocation gateway.
//!
//! Every side-effecting action a stage performs goes through
//! `ToolGateway::invoke` as a named tool call carrying a context with the
//! current session record and scoped state access. The gateway applies a
//! per-call timeout and never retries; failures come back to the invoking
//! stage as results, and the stage decides whether they are fatal.
//!
//! The reserved `signal_exit` call is the only way a stage inside a loop
//! controller can end the loop early: the reason is recorded on the
//! context and folded into the stage's result by the composer, so the
//! escalation travels up the chain as data.

pub mod artifacts;
pub mod history;

pub use artifacts::{ArtifactRef, ArtifactSink, FsArtifactStore, MemoryArtifactStore};
pub use history::{FeedbackRecord, HistoryIndex, StoreHistoryIndex};

use crate::errors::ToolError;
use crate::session::SessionRecord;
use crate::state::keys::UserKey;
use crate::state::store::StateStore;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// The closed set of tool calls stages may invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    /// Persist an artifact to the sink; args `{name, content}`.
    StoreArtifact,
    /// Search the submitter's past feedback; args `{query}`.
    SearchHistory,
    /// Accumulate per-user progress counters and append a history
    /// record; args `{style_score?, test_pass_rate?, summary?}`.
    RecordProgress,
    /// Reserved: request early loop termination; args `{reason}`.
    SignalExit,
}

impl ToolName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::StoreArtifact => "store_artifact",
            ToolName::SearchHistory => "search_history",
            ToolName::RecordProgress => "record_progress",
            ToolName::SignalExit => "signal_exit",
        }
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-stage invocation context: the session record plus scoped access to
/// the state store and the gateway.
pub struct ToolContext {
    pub session: SessionRecord,
    store: Arc<StateStore>,
    gateway: Arc<ToolGateway>,
    exit_signal: Option<String>,
}

impl ToolContext {
    pub fn new(
        session: SessionRecord,
        store: Arc<StateStore>,
        gateway: Arc<ToolGateway>,
    ) -> Self {
        Self {
            session,
            store,
            gateway,
            exit_signal: None,
        }
    }

    /// Invoke a named tool through the gateway.
    pub async fn invoke(&mut self, tool: ToolName, args: Value) -> Result<Value, ToolError> {
        let gateway = Arc::clone(&self.gateway);
        gateway.invoke(tool, args, self).await
    }

    /// Consume the recorded exit signal, if any.
    pub fn take_exit_signal(&mut self) -> Option<String> {
        self.exit_signal.take()
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }
}

/// Uniform dispatch for side-effecting tool calls.
pub struct ToolGateway {
    artifacts: Arc<dyn ArtifactSink>,
    history: Arc<dyn HistoryIndex>,
    call_timeout: Duration,
}

impl ToolGateway {
    pub fn new(
        artifacts: Arc<dyn ArtifactSink>,
        history: Arc<dyn HistoryIndex>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            artifacts,
            history,
            call_timeout,
        }
    }

    /// Invoke one tool call. No automatic retry; retry policy belongs to
    /// the invoking stage.
    pub async fn invoke(
        &self,
        tool: ToolName,
        args: Value,
        ctx: &mut ToolContext,
    ) -> Result<Value, ToolError> {
        debug!(tool = %tool, session = %ctx.session.session_id, "tool call");
        match tokio::time::timeout(self.call_timeout, self.dispatch(tool, args, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout {
                tool: tool.as_str().to_string(),
            }),
        }
    }

    async fn dispatch(
        &self,
        tool: ToolName,
        args: Value,
        ctx: &mut ToolContext,
    ) -> Result<Value, ToolError> {
        match tool {
            ToolName::SignalExit => {
                let reason = args
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unspecified")
                    .to_string();
                ctx.exit_signal = Some(reason.clone());
                Ok(json!({"status": "ok", "reason": reason}))
            }
            ToolName::StoreArtifact => {
                let name = args
                    .get("name")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| ToolError::invalid_arguments(tool.as_str(), "missing 'name'"))?;
                let content = args.get("content").and_then(|v| v.as_str()).ok_or_else(|| {
                    ToolError::invalid_arguments(tool.as_str(), "missing 'content'")
                })?;
                let artifact = self.artifacts.store(name, content).await?;
                Ok(json!({
                    "name": artifact.name,
                    "version": artifact.version,
                    "digest": artifact.digest,
                }))
            }
            ToolName::SearchHistory => {
                let query = args.get("query").and_then(|v| v.as_str()).unwrap_or("");
                let records = self.history.search(&ctx.session.user_id, query).await?;
                Ok(json!({
                    "count": records.len(),
                    "records": records,
                }))
            }
            ToolName::RecordProgress => Ok(record_progress(ctx, &args)),
        }
    }
}

/// Accumulate per-user counters under the user scope's entry lock and
/// append one condensed history record. Append-only: nothing here
/// deletes or renumbers past entries.
fn record_progress(ctx: &ToolContext, args: &Value) -> Value {
    let style_score = args.get("style_score").and_then(|v| v.as_u64());
    let pass_rate = args.get("test_pass_rate").and_then(|v| v.as_f64());
    let summary = args.get("summary").and_then(|v| v.as_str());
    let now = Utc::now().to_rfc3339();

    let mut total_submissions = 0u64;
    let mut score_improvement = 0i64;

    ctx.store.user_update(&ctx.session.user_id, |map| {
        total_submissions = map
            .get(&UserKey::TotalSubmissions)
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
            + 1;
        map.insert(UserKey::TotalSubmissions, json!(total_submissions));
        map.insert(UserKey::LastSubmissionTime, json!(now));

        if let Some(score) = style_score {
            let last = map
                .get(&UserKey::LastStyleScore)
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            score_improvement = score as i64 - last as i64;
            map.insert(UserKey::LastStyleScore, json!(score));
        }
        if let Some(rate) = pass_rate {
            map.insert(UserKey::LastTestPassRate, json!(rate));
        }
        if let Some(summary) = summary {
            let record = json!({
                "timestamp": now,
                "summary": summary,
                "style_score": style_score,
                "test_pass_rate": pass_rate,
            });
            let slot = map
                .entry(UserKey::FeedbackHistory)
                .or_insert_with(|| Value::Array(Vec::new()));
            match slot {
                Value::Array(items) => items.push(record),
                other => *other = Value::Array(vec![record]),
            }
        }
    });

    json!({
        "total_submissions": total_submissions,
        "score_improvement": score_improvement,
    })
}
