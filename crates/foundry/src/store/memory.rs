//! In-memory storage backends.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{MessageStore, NewMessage, StepStore, StorageResult, StoredMessage};

/// Message store held entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    projects: RwLock<HashMap<String, Vec<StoredMessage>>>,
}

impl InMemoryMessageStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an already-built message, keeping its id and timestamp.
    pub async fn insert(&self, message: StoredMessage) {
        let mut projects = self.projects.write().await;
        projects
            .entry(message.project_id.clone())
            .or_default()
            .push(message);
    }

    /// All messages of a project in insertion order.
    pub async fn all(&self, project_id: &str) -> Vec<StoredMessage> {
        let projects = self.projects.read().await;
        projects.get(project_id).cloned().unwrap_or_default()
    }
}

/// Newest-first window over messages kept in insertion order.
///
/// The sort is stable, so messages sharing a timestamp keep insertion order
/// and the later insert counts as newer.
pub(super) fn recent_window(messages: &[StoredMessage], limit: usize) -> Vec<StoredMessage> {
    let mut sorted: Vec<&StoredMessage> = messages.iter().collect();
    sorted.sort_by_key(|m| m.created_at);
    sorted.into_iter().rev().take(limit).cloned().collect()
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn find_recent(
        &self,
        project_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<StoredMessage>> {
        let projects = self.projects.read().await;
        Ok(projects
            .get(project_id)
            .map(|messages| recent_window(messages, limit))
            .unwrap_or_default())
    }

    async fn append_message(
        &self,
        project_id: &str,
        message: NewMessage,
    ) -> StorageResult<StoredMessage> {
        let stored = StoredMessage::from_new(project_id, message);
        self.insert(stored.clone()).await;
        Ok(stored)
    }
}

/// Step memo table held entirely in memory.
#[derive(Debug, Default)]
pub struct InMemoryStepStore {
    steps: RwLock<HashMap<(String, String), serde_json::Value>>,
}

impl InMemoryStepStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded steps across all runs.
    pub async fn len(&self) -> usize {
        self.steps.read().await.len()
    }

    /// Whether no step has been recorded.
    pub async fn is_empty(&self) -> bool {
        self.steps.read().await.is_empty()
    }

    /// Names of the steps recorded for one run, sorted.
    pub async fn step_names(&self, run_id: &str) -> Vec<String> {
        let steps = self.steps.read().await;
        let mut names: Vec<String> = steps
            .keys()
            .filter(|(run, _)| run == run_id)
            .map(|(_, step)| step.clone())
            .collect();
        names.sort();
        names
    }
}

#[async_trait]
impl StepStore for InMemoryStepStore {
    async fn load(&self, run_id: &str, step: &str) -> StorageResult<Option<serde_json::Value>> {
        let steps = self.steps.read().await;
        Ok(steps.get(&(run_id.to_string(), step.to_string())).cloned())
    }

    async fn save(
        &self,
        run_id: &str,
        step: &str,
        output: &serde_json::Value,
    ) -> StorageResult<()> {
        let mut steps = self.steps.write().await;
        steps.insert((run_id.to_string(), step.to_string()), output.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::MessageRole;

    #[tokio::test]
    async fn test_find_recent_is_newest_first_and_bounded() {
        let store = InMemoryMessageStore::new();
        for i in 0..10 {
            store
                .append_message("p1", NewMessage::user(format!("message {i}")))
                .await
                .unwrap();
        }

        let recent = store.find_recent("p1", 6).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();

        assert_eq!(
            contents,
            vec![
                "message 9",
                "message 8",
                "message 7",
                "message 6",
                "message 5",
                "message 4"
            ]
        );
    }

    #[tokio::test]
    async fn test_projects_are_isolated() {
        let store = InMemoryMessageStore::new();
        store
            .append_message("p1", NewMessage::user("hello"))
            .await
            .unwrap();

        assert!(store.find_recent("p2", 6).await.unwrap().is_empty());
        let stored = store.find_recent("p1", 6).await.unwrap();
        assert_eq!(stored[0].role, MessageRole::User);
        assert_eq!(stored[0].project_id, "p1");
    }

    #[tokio::test]
    async fn test_step_store_scopes_by_run() {
        let store = InMemoryStepStore::new();
        store
            .save("run-a", "terminal:1:0", &serde_json::json!("ok"))
            .await
            .unwrap();

        assert_eq!(
            store.load("run-a", "terminal:1:0").await.unwrap(),
            Some(serde_json::json!("ok"))
        );
        assert!(store.load("run-b", "terminal:1:0").await.unwrap().is_none());
        assert_eq!(store.step_names("run-a").await, vec!["terminal:1:0"]);
    }
}
