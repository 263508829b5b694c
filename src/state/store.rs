//! Tiered key/value store backing pipeline state.
//!
//! Two scopes: session (one review conversation) and user (one submitter
//! across all conversations). Reads of an absent key return `None`, never
//! an error. Writes within a pipeline run are last-writer-wins; a stage's
//! writes are committed as one batch so no stage observes another stage's
//! partial writes. Each scope owner maps to one entry in a sharded map,
//! giving per-scope serialization without a global lock.

use crate::state::keys::{SessionKey, UserKey};
use anyhow::{Context, Result};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Default)]
pub struct StateStore {
    sessions: DashMap<String, HashMap<SessionKey, Value>>,
    users: DashMap<String, HashMap<UserKey, Value>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a session-scoped value. Absent keys yield `None`.
    pub fn session_get(&self, session_id: &str, key: SessionKey) -> Option<Value> {
        self.sessions
            .get(session_id)
            .and_then(|map| map.get(&key).cloned())
    }

    /// Write a single session-scoped value (last-writer-wins).
    pub fn session_set(&self, session_id: &str, key: SessionKey, value: Value) {
        self.sessions
            .entry(session_id.to_string())
            .or_default()
            .insert(key, value);
    }

    /// Commit a stage's emitted writes as one atomic batch.
    pub fn session_commit(&self, session_id: &str, writes: Vec<(SessionKey, Value)>) {
        if writes.is_empty() {
            return;
        }
        let mut entry = self.sessions.entry(session_id.to_string()).or_default();
        for (key, value) in writes {
            entry.insert(key, value);
        }
    }

    /// Snapshot the full session scope.
    pub fn session_snapshot(&self, session_id: &str) -> HashMap<SessionKey, Value> {
        self.sessions
            .get(session_id)
            .map(|map| map.clone())
            .unwrap_or_default()
    }

    /// Reset a session's state when a new submission starts a review pass.
    pub fn session_clear(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    /// Read a user-scoped value. Absent keys yield `None`.
    pub fn user_get(&self, user_id: &str, key: UserKey) -> Option<Value> {
        self.users
            .get(user_id)
            .and_then(|map| map.get(&key).cloned())
    }

    /// Write a single user-scoped value.
    pub fn user_set(&self, user_id: &str, key: UserKey, value: Value) {
        self.users
            .entry(user_id.to_string())
            .or_default()
            .insert(key, value);
    }

    /// Snapshot the full user scope.
    pub fn user_snapshot(&self, user_id: &str) -> HashMap<UserKey, Value> {
        self.users
            .get(user_id)
            .map(|map| map.clone())
            .unwrap_or_default()
    }

    /// Append one item to a user-scoped history list. Atomic: the push
    /// happens under the scope entry's lock, so concurrent submissions
    /// by the same user never lose entries. Non-array existing values
    /// are replaced by a fresh list holding the item.
    pub fn user_append(&self, user_id: &str, key: UserKey, item: Value) {
        let mut entry = self.users.entry(user_id.to_string()).or_default();
        let slot = entry.entry(key).or_insert_with(|| Value::Array(Vec::new()));
        match slot {
            Value::Array(items) => items.push(item),
            other => *other = Value::Array(vec![item]),
        }
    }

    /// Run a read-modify-write mutation over a user's whole scope map
    /// under its entry lock.
    pub fn user_update<F>(&self, user_id: &str, mutate: F)
    where
        F: FnOnce(&mut HashMap<UserKey, Value>),
    {
        let mut entry = self.users.entry(user_id.to_string()).or_default();
        mutate(&mut entry);
    }

    /// Persist the user scope to disk as JSON. Session state is
    /// deliberately not persisted; it belongs to one conversation.
    pub fn save_users(&self, path: &Path) -> Result<()> {
        let snapshot: HashMap<String, HashMap<UserKey, Value>> = self
            .users
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create state directory")?;
        }
        let json =
            serde_json::to_string_pretty(&snapshot).context("Failed to serialize user state")?;
        std::fs::write(path, json).context("Failed to write user state file")?;
        Ok(())
    }

    /// Load previously persisted user records, merging over the current
    /// contents. Missing file is not an error.
    pub fn load_users(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }
        let content = std::fs::read_to_string(path).context("Failed to read user state file")?;
        let snapshot: HashMap<String, HashMap<UserKey, Value>> =
            serde_json::from_str(&content).context("Failed to parse user state file")?;
        for (user_id, map) in snapshot {
            self.users.insert(user_id, map);
        }
        Ok(())
    }

    /// All user ids with any recorded state.
    pub fn user_ids(&self) -> Vec<String> {
        self.users.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_absent_key_returns_none() {
        let store = StateStore::new();
        assert!(store.session_get("s-1", SessionKey::StyleScore).is_none());
        assert!(store.user_get("dev-1", UserKey::TotalSubmissions).is_none());
    }

    #[test]
    fn test_set_then_get_roundtrip() {
        let store = StateStore::new();
        store.session_set("s-1", SessionKey::StyleScore, json!(88));
        assert_eq!(
            store.session_get("s-1", SessionKey::StyleScore),
            Some(json!(88))
        );
    }

    #[test]
    fn test_session_isolation() {
        let store = StateStore::new();
        store.session_set("s-1", SessionKey::StyleScore, json!(88));
        assert!(store.session_get("s-2", SessionKey::StyleScore).is_none());
    }

    #[test]
    fn test_last_writer_wins() {
        let store = StateStore::new();
        store.session_set("s-1", SessionKey::StyleScore, json!(50));
        store.session_set("s-1", SessionKey::StyleScore, json!(90));
        assert_eq!(
            store.session_get("s-1", SessionKey::StyleScore),
            Some(json!(90))
        );
    }

    #[test]
    fn test_commit_applies_whole_batch() {
        let store = StateStore::new();
        store.session_commit(
            "s-1",
            vec![
                (SessionKey::StyleScore, json!(70)),
                (SessionKey::StyleIssues, json!(["E225"])),
            ],
        );
        let snapshot = store.session_snapshot("s-1");
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[&SessionKey::StyleScore], json!(70));
    }

    #[test]
    fn test_clear_resets_session_scope_only() {
        let store = StateStore::new();
        store.session_set("s-1", SessionKey::StyleScore, json!(70));
        store.user_set("dev-1", UserKey::TotalSubmissions, json!(3));
        store.session_clear("s-1");
        assert!(store.session_snapshot("s-1").is_empty());
        assert_eq!(
            store.user_get("dev-1", UserKey::TotalSubmissions),
            Some(json!(3))
        );
    }

    #[test]
    fn test_user_append_is_monotonic() {
        let store = StateStore::new();
        store.user_append("dev-1", UserKey::FeedbackHistory, json!("first"));
        store.user_append("dev-1", UserKey::FeedbackHistory, json!("second"));
        let history = store.user_get("dev-1", UserKey::FeedbackHistory).unwrap();
        assert_eq!(history, json!(["first", "second"]));
    }

    #[test]
    fn test_user_update_runs_under_entry_lock() {
        let store = StateStore::new();
        store.user_update("dev-1", |map| {
            let count = map
                .get(&UserKey::TotalSubmissions)
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            map.insert(UserKey::TotalSubmissions, json!(count + 1));
        });
        assert_eq!(
            store.user_get("dev-1", UserKey::TotalSubmissions),
            Some(json!(1))
        );
    }

    #[tokio::test]
    async fn test_concurrent_appends_lose_nothing() {
        let store = Arc::new(StateStore::new());
        let mut handles = Vec::new();
        for i in 0..32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.user_append("dev-1", UserKey::FeedbackHistory, json!(i));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let history = store.user_get("dev-1", UserKey::FeedbackHistory).unwrap();
        assert_eq!(history.as_array().unwrap().len(), 32);
    }

    #[test]
    fn test_save_and_load_users() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/users.json");

        let store = StateStore::new();
        store.user_set("dev-1", UserKey::TotalSubmissions, json!(5));
        store.user_append("dev-1", UserKey::FeedbackHistory, json!("note"));
        store.save_users(&path).unwrap();

        let restored = StateStore::new();
        restored.load_users(&path).unwrap();
        assert_eq!(
            restored.user_get("dev-1", UserKey::TotalSubmissions),
            Some(json!(5))
        );
        assert_eq!(restored.user_ids(), vec!["dev-1".to_string()]);
    }

    #[test]
    fn test_load_users_missing_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new();
        store.load_users(&dir.path().join("absent.json")).unwrap();
    }
}
