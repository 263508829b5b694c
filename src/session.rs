//! Session records: one per review conversation.
//!
//! A `SessionRecord` is owned exclusively by the root router; only the
//! router switches its phase field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which pipeline, if any, is currently running for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Review,
    Fix,
    #[default]
    Idle,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPhase::Review => write!(f, "review"),
            SessionPhase::Fix => write!(f, "fix"),
            SessionPhase::Idle => write!(f, "idle"),
        }
    }
}

/// Identifies one review conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub phase: SessionPhase,
}

impl SessionRecord {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            created_at: Utc::now(),
            phase: SessionPhase::Idle,
        }
    }

    /// Check whether a pipeline is currently running for this session.
    pub fn is_busy(&self) -> bool {
        self.phase != SessionPhase::Idle
    }
}

/// One inbound code submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub user_id: String,
    /// Resume an existing session when set; a fresh session is created otherwise.
    #[serde(default)]
    pub session_id: Option<String>,
    pub code: String,
}

impl Submission {
    pub fn new(user_id: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: None,
            code: code.into(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}
