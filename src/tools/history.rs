//! History index: read-only search over a submitter's past feedback.

use crate::errors::ToolError;
use crate::state::keys::UserKey;
use crate::state::store::StateStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One condensed feedback record from a past review pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub timestamp: String,
    pub summary: String,
    #[serde(default)]
    pub style_score: Option<u64>,
    #[serde(default)]
    pub test_pass_rate: Option<f64>,
}

/// Read-only lookup of past feedback, consumed through the tool gateway.
#[async_trait]
pub trait HistoryIndex: Send + Sync {
    /// Search a submitter's history. Records come back oldest-first
    /// (append order). An empty query matches everything.
    async fn search(&self, user_id: &str, query: &str) -> Result<Vec<FeedbackRecord>, ToolError>;
}

/// History index over the state store's user scope. The feedback stage
/// appends one record per review pass, so append order is time order.
pub struct StoreHistoryIndex {
    store: Arc<StateStore>,
}

impl StoreHistoryIndex {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HistoryIndex for StoreHistoryIndex {
    async fn search(&self, user_id: &str, query: &str) -> Result<Vec<FeedbackRecord>, ToolError> {
        let Some(history) = self.store.user_get(user_id, UserKey::FeedbackHistory) else {
            return Ok(Vec::new());
        };
        let items = history
            .as_array()
            .cloned()
            .unwrap_or_default();

        let needle = query.to_lowercase();
        let records = items
            .into_iter()
            .filter_map(|item| serde_json::from_value::<FeedbackRecord>(item).ok())
            .filter(|record| needle.is_empty() || record.summary.to_lowercase().contains(&needle))
            .collect();
        Ok(records)
    }
}
