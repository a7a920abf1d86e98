//! Persistent storage contracts.
//!
//! Two narrow stores sit behind the engine:
//!
//! - [`MessageStore`] - project conversation messages, with the generated
//!   [`Fragment`] attached to successful assistant replies
//! - [`StepStore`] - memoized step results, keyed by run id and step name
//!
//! Both have an in-memory backend (tests, dry runs) and a file backend
//! (the CLI).

mod error;
mod file;
mod memory;

pub use error::{StorageError, StorageResult};
pub use file::{FileMessageStore, FileStepStore};
pub use memory::{InMemoryMessageStore, InMemoryStepStore};

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who authored a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageRole {
    /// The end user.
    User,
    /// The engine, on behalf of the coding agent.
    Assistant,
}

/// Classification of a persisted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Ordinary content (user prompts and successful results).
    Result,
    /// A user-visible failure notice.
    Error,
}

/// The persisted bundle of generated files plus the sandbox's public URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    /// Externally reachable URL of the running app.
    pub sandbox_url: String,
    /// Short display title.
    pub title: String,
    /// Every file the agent wrote, keyed by relative path.
    pub files: BTreeMap<String, String>,
}

/// A message to be appended to a project's conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    /// Author.
    pub role: MessageRole,
    /// Message body.
    pub content: String,
    /// Classification.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Artifact attached to the message, created in the same write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment: Option<Fragment>,
}

impl NewMessage {
    /// A user prompt.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            message_type: MessageType::Result,
            fragment: None,
        }
    }

    /// A successful assistant reply carrying the generated fragment.
    pub fn assistant_result(content: impl Into<String>, fragment: Fragment) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            message_type: MessageType::Result,
            fragment: Some(fragment),
        }
    }

    /// An assistant failure notice.
    pub fn assistant_error(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            message_type: MessageType::Error,
            fragment: None,
        }
    }
}

/// A message as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Unique message id.
    pub id: String,
    /// Owning project.
    pub project_id: String,
    /// Author.
    pub role: MessageRole,
    /// Message body.
    pub content: String,
    /// Classification.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Creation time; the ordering key for history windows.
    pub created_at: DateTime<Utc>,
    /// Attached artifact, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment: Option<Fragment>,
}

impl StoredMessage {
    pub(crate) fn from_new(project_id: &str, message: NewMessage) -> Self {
        Self {
            id: ulid::Ulid::new().to_string().to_lowercase(),
            project_id: project_id.to_string(),
            role: message.role,
            content: message.content,
            message_type: message.message_type,
            created_at: Utc::now(),
            fragment: message.fragment,
        }
    }
}

/// Storage interface for project conversations.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Return up to `limit` messages of a project, newest first.
    async fn find_recent(&self, project_id: &str, limit: usize)
    -> StorageResult<Vec<StoredMessage>>;

    /// Append a message to a project's conversation.
    ///
    /// The fragment, if any, is written atomically with the message.
    async fn append_message(
        &self,
        project_id: &str,
        message: NewMessage,
    ) -> StorageResult<StoredMessage>;
}

/// Storage interface for memoized step results.
///
/// Entries are keyed by `(run_id, step)` and never overwritten by the
/// engine: a step is saved once, after its work succeeded.
#[async_trait]
pub trait StepStore: Send + Sync {
    /// Load the recorded output of a step, or `None` if it has not completed.
    async fn load(&self, run_id: &str, step: &str) -> StorageResult<Option<serde_json::Value>>;

    /// Record the output of a completed step.
    async fn save(&self, run_id: &str, step: &str, output: &serde_json::Value)
    -> StorageResult<()>;
}

/// Reject ids that cannot be used as a single path component.
pub(crate) fn validate_id(entity_type: &'static str, id: &str) -> StorageResult<()> {
    let valid = !id.is_empty()
        && id != "."
        && id != ".."
        && !id.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(StorageError::invalid_id(entity_type, id))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_wire_format() {
        let message = NewMessage::assistant_error("Something went wrong");
        let json = serde_json::to_value(&message).unwrap();

        assert_eq!(json["role"], "ASSISTANT");
        assert_eq!(json["type"], "ERROR");
        assert!(json.get("fragment").is_none());
    }

    #[test]
    fn test_validate_id() {
        assert!(validate_id("project", "p1").is_ok());
        assert!(validate_id("project", "").is_err());
        assert!(validate_id("project", "..").is_err());
        assert!(validate_id("project", "a/b").is_err());
    }
}
