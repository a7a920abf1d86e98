//! Result persistence.

use std::fmt;

use tracing::{info, warn};

use crate::sandbox::{SandboxError, SandboxProvider};
use crate::state::AgentState;
use crate::step::{StepError, StepExecutor};
use crate::store::{Fragment, MessageStore, NewMessage, StoredMessage};

/// Body of the message persisted for a failed run.
pub const ERROR_MESSAGE: &str = "Something went wrong";

/// A run failed unless it produced both a summary and at least one file.
pub fn is_error(state: &AgentState) -> bool {
    state.summary.is_empty() || state.files.is_empty()
}

/// What was written for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedResult {
    /// The assistant message.
    pub message: StoredMessage,
    /// Public URL of the app, for successful runs.
    pub sandbox_url: Option<String>,
}

/// Writes a run's outcome as an assistant message.
pub struct ResultPersister<'a> {
    messages: &'a dyn MessageStore,
    sandboxes: &'a dyn SandboxProvider,
    app_port: u16,
}

impl fmt::Debug for ResultPersister<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultPersister")
            .field("app_port", &self.app_port)
            .finish_non_exhaustive()
    }
}

impl<'a> ResultPersister<'a> {
    /// Create a persister. `app_port` is where the generated app listens.
    pub fn new(
        messages: &'a dyn MessageStore,
        sandboxes: &'a dyn SandboxProvider,
        app_port: u16,
    ) -> Self {
        Self {
            messages,
            sandboxes,
            app_port,
        }
    }

    /// Persist the fixed error message. No fragment is created.
    pub async fn save_error(
        &self,
        steps: &StepExecutor,
        project_id: &str,
    ) -> Result<PersistedResult, StepError> {
        let message = steps
            .run("save-result", || {
                self.messages
                    .append_message(project_id, NewMessage::assistant_error(ERROR_MESSAGE))
            })
            .await?;
        info!(project_id, message_id = %message.id, "persisted error result");
        Ok(PersistedResult {
            message,
            sandbox_url: None,
        })
    }

    /// Resolve the app URL and persist the reply with its fragment.
    ///
    /// The host is looked up now rather than at sandbox creation, since the
    /// app inside only starts serving once the agent has built it. If the
    /// session is gone by then there is nothing to link to, and the run is
    /// persisted as an error instead.
    pub async fn save_result(
        &self,
        steps: &StepExecutor,
        project_id: &str,
        sandbox_id: &str,
        state: &AgentState,
        title: String,
        response: String,
    ) -> Result<PersistedResult, StepError> {
        let sandbox_url: Option<String> = steps
            .run("get-sandbox-url", || async {
                match self.resolve_url(sandbox_id).await {
                    Ok(url) => Ok(Some(url)),
                    Err(SandboxError::Unavailable(reason)) => {
                        warn!(sandbox_id, %reason, "sandbox gone before its url was resolved");
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            })
            .await?;
        let Some(sandbox_url) = sandbox_url else {
            return self.save_error(steps, project_id).await;
        };

        let fragment = Fragment {
            sandbox_url: sandbox_url.clone(),
            title,
            files: state.files.clone(),
        };
        let message = steps
            .run("save-result", || {
                self.messages
                    .append_message(project_id, NewMessage::assistant_result(response, fragment))
            })
            .await?;
        info!(project_id, message_id = %message.id, url = %sandbox_url, "persisted result");

        Ok(PersistedResult {
            message,
            sandbox_url: Some(sandbox_url),
        })
    }

    async fn resolve_url(&self, sandbox_id: &str) -> Result<String, SandboxError> {
        let sandbox = self.sandboxes.connect(sandbox_id).await?;
        let host = sandbox.get_host(self.app_port).await?;
        Ok(format!("http://{host}"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use super::*;
    use crate::sandbox::MemorySandboxProvider;
    use crate::store::{InMemoryMessageStore, InMemoryStepStore, MessageType};

    fn state(summary: &str, files: &[(&str, &str)]) -> AgentState {
        AgentState {
            summary: summary.to_string(),
            files: files
                .iter()
                .map(|(p, c)| (p.to_string(), c.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn test_classification() {
        assert!(is_error(&state("", &[("app/page.tsx", "x")])));
        assert!(is_error(&state("Built a counter", &[])));
        assert!(is_error(&state("", &[])));
        assert!(!is_error(&state("Built a counter", &[("app/page.tsx", "x")])));
    }

    #[tokio::test]
    async fn test_save_error() {
        let messages = InMemoryMessageStore::new();
        let sandboxes = MemorySandboxProvider::new();
        let steps = StepExecutor::new("run-1", Arc::new(InMemoryStepStore::new()));

        let persisted = ResultPersister::new(&messages, &sandboxes, 3000)
            .save_error(&steps, "p1")
            .await
            .unwrap();

        assert_eq!(persisted.message.content, ERROR_MESSAGE);
        assert_eq!(persisted.message.message_type, MessageType::Error);
        assert!(persisted.message.fragment.is_none());
        assert!(persisted.sandbox_url.is_none());
    }

    #[tokio::test]
    async fn test_save_result_attaches_fragment() {
        let messages = InMemoryMessageStore::new();
        let sandboxes = MemorySandboxProvider::new();
        let session = sandboxes.create("caffeine").await.unwrap();
        let steps = StepExecutor::new("run-1", Arc::new(InMemoryStepStore::new()));
        let persister = ResultPersister::new(&messages, &sandboxes, 3000);
        let final_state = state("Built a counter", &[("app/page.tsx", "page")]);

        let persisted = persister
            .save_result(
                &steps,
                "p1",
                &session.id,
                &final_state,
                "Counter".to_string(),
                "Here you go".to_string(),
            )
            .await
            .unwrap();

        let expected_url = format!("http://3000-{}.sandbox.local", session.id);
        assert_eq!(persisted.sandbox_url.as_deref(), Some(expected_url.as_str()));
        let fragment = persisted.message.fragment.unwrap();
        assert_eq!(fragment.sandbox_url, expected_url);
        assert_eq!(fragment.title, "Counter");
        assert_eq!(fragment.files, final_state.files);
        assert_eq!(persisted.message.message_type, MessageType::Result);

        // A replayed save does not write a second message
        persister
            .save_result(
                &steps,
                "p1",
                &session.id,
                &final_state,
                "Counter".to_string(),
                "Here you go".to_string(),
            )
            .await
            .unwrap();
        assert_eq!(messages.all("p1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_expired_sandbox_is_persisted_as_error() {
        let messages = InMemoryMessageStore::new();
        let sandboxes = MemorySandboxProvider::new();
        let session = sandboxes.create("caffeine").await.unwrap();
        sandboxes.expire(&session.id);
        let store = Arc::new(InMemoryStepStore::new());
        let steps = StepExecutor::new("run-1", store.clone());

        let persisted = ResultPersister::new(&messages, &sandboxes, 3000)
            .save_result(
                &steps,
                "p1",
                &session.id,
                &state("done", &[("app/page.tsx", "page")]),
                "T".to_string(),
                "R".to_string(),
            )
            .await
            .unwrap();

        assert_eq!(persisted.message.message_type, MessageType::Error);
        assert_eq!(persisted.message.content, ERROR_MESSAGE);
        assert!(persisted.message.fragment.is_none());
        assert!(persisted.sandbox_url.is_none());
        assert_eq!(messages.all("p1").await.len(), 1);
        assert_eq!(
            store.step_names("run-1").await,
            vec!["get-sandbox-url", "save-result"]
        );
    }
}
