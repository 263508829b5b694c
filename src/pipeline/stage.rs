//! The stage abstraction: one orchestrated unit of work with declared
//! state dependencies.
//!
//! A stage consumes an immutable view of session and user state captured
//! at invocation time, may invoke tool calls through its context, and
//! returns a `StageResult`. Control decisions are data: a stage never
//! raises across the orchestration boundary.

use crate::errors::StageError;
use crate::session::SessionRecord;
use crate::state::keys::{SessionKey, UserKey};
use crate::state::store::StateStore;
use crate::tools::ToolContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Tri-state iteration verdict declared by an assessment stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Successful,
    Partial,
    Failed,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Successful => "successful",
            Verdict::Partial => "partial",
            Verdict::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "successful" => Ok(Verdict::Successful),
            "partial" => Ok(Verdict::Partial),
            "failed" => Ok(Verdict::Failed),
            other => Err(format!("unknown verdict '{}'", other)),
        }
    }
}

/// Immutable read view over session and user state, captured once per
/// stage invocation.
#[derive(Debug, Clone, Default)]
pub struct StateView {
    session: HashMap<SessionKey, Value>,
    user: HashMap<UserKey, Value>,
}

impl StateView {
    pub fn capture(store: &StateStore, session: &SessionRecord) -> Self {
        Self {
            session: store.session_snapshot(&session.session_id),
            user: store.user_snapshot(&session.user_id),
        }
    }

    #[cfg(test)]
    pub fn from_entries(entries: Vec<(SessionKey, Value)>) -> Self {
        Self {
            session: entries.into_iter().collect(),
            user: HashMap::new(),
        }
    }

    /// Read a session key; absent keys yield `None`, never an error.
    pub fn get(&self, key: SessionKey) -> Option<&Value> {
        self.session.get(&key)
    }

    pub fn get_user(&self, key: UserKey) -> Option<&Value> {
        self.user.get(&key)
    }

    pub fn str_value(&self, key: SessionKey) -> Option<&str> {
        self.get(key).and_then(|v| v.as_str())
    }

    pub fn u64_value(&self, key: SessionKey) -> Option<u64> {
        self.get(key).and_then(|v| v.as_u64())
    }

    pub fn f64_value(&self, key: SessionKey) -> Option<f64> {
        self.get(key).and_then(|v| v.as_f64())
    }

    pub fn bool_value(&self, key: SessionKey) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    /// All session keys present in this view.
    pub fn keys(&self) -> Vec<SessionKey> {
        self.session.keys().copied().collect()
    }
}

/// Outcome status of one stage invocation.
#[derive(Debug, Clone)]
pub enum StageStatus {
    Ok,
    Error(StageError),
}

/// What a stage hands back to the composer: status, the write batch to
/// commit, and optional verdict/escalation control data.
#[derive(Debug, Clone)]
pub struct StageResult {
    pub status: StageStatus,
    pub emitted: Vec<(SessionKey, Value)>,
    pub verdict: Option<Verdict>,
    pub escalation: Option<String>,
}

impl StageResult {
    pub fn ok() -> Self {
        Self {
            status: StageStatus::Ok,
            emitted: Vec::new(),
            verdict: None,
            escalation: None,
        }
    }

    pub fn error(error: StageError) -> Self {
        Self {
            status: StageStatus::Error(error),
            emitted: Vec::new(),
            verdict: None,
            escalation: None,
        }
    }

    pub fn emit(mut self, key: SessionKey, value: Value) -> Self {
        self.emitted.push((key, value));
        self
    }

    pub fn with_verdict(mut self, verdict: Verdict) -> Self {
        self.verdict = Some(verdict);
        self
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.status, StageStatus::Ok)
    }

    pub fn emitted_keys(&self) -> Vec<SessionKey> {
        self.emitted.iter().map(|(key, _)| *key).collect()
    }
}

/// Per-stage execution record aggregated into pipeline and iteration
/// outcomes.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub emitted: Vec<SessionKey>,
    pub duration_ms: u64,
}

/// One orchestrated unit of work.
///
/// `reads()` and `writes()` declare the stage's state dependencies; the
/// composer checks them structurally once at composition time. A stage
/// may declare a key in both sets (read-modify-write); the read sees the
/// absent sentinel on the first pass.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    fn reads(&self) -> &'static [SessionKey];

    fn writes(&self) -> &'static [SessionKey];

    async fn run(&self, view: &StateView, ctx: &mut ToolContext) -> StageResult;
}
