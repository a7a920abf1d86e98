//! The `code-agent/run` trigger event.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::{MessageStore, NewMessage, StorageResult, StoredMessage};

/// Name of the event that starts a job run.
pub const CODE_AGENT_RUN: &str = "code-agent/run";

/// Longest accepted request, in characters.
pub const MAX_REQUEST_CHARS: usize = 10_000;

/// Errors from decoding or validating a trigger.
#[derive(Debug, Error)]
pub enum TriggerError {
    /// The event is not valid JSON or has the wrong shape.
    #[error("malformed trigger event: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The event name is not [`CODE_AGENT_RUN`].
    #[error("unexpected event '{0}'")]
    UnexpectedEvent(String),

    /// The request text is empty.
    #[error("request text is required")]
    EmptyRequest,

    /// The request text is too long.
    #[error("request text is {len} characters, limit is {max}")]
    RequestTooLong {
        /// Length of the rejected request.
        len: usize,
        /// Maximum length.
        max: usize,
    },

    /// The project id is empty.
    #[error("project id is required")]
    EmptyProject,
}

/// Wire form of the trigger event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Event name.
    pub name: String,
    /// Payload.
    pub data: TriggerData,
}

/// Payload of a `code-agent/run` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerData {
    /// The user's request.
    pub value: String,
    /// Project the request belongs to.
    pub project_id: String,
}

impl TriggerEvent {
    /// Build a `code-agent/run` event.
    pub fn code_agent_run(value: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            name: CODE_AGENT_RUN.to_string(),
            data: TriggerData {
                value: value.into(),
                project_id: project_id.into(),
            },
        }
    }

    /// Decode an event from JSON.
    pub fn from_json(json: &str) -> Result<Self, TriggerError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Check the event name and payload.
    pub fn into_trigger(self) -> Result<JobTrigger, TriggerError> {
        if self.name != CODE_AGENT_RUN {
            return Err(TriggerError::UnexpectedEvent(self.name));
        }
        JobTrigger::new(self.data.value, self.data.project_id)
    }
}

/// Validated input of one job run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTrigger {
    request_text: String,
    project_id: String,
}

impl JobTrigger {
    /// Validate and build a trigger.
    pub fn new(
        request_text: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Result<Self, TriggerError> {
        let request_text = request_text.into();
        let project_id = project_id.into();

        let len = request_text.chars().count();
        if len == 0 {
            return Err(TriggerError::EmptyRequest);
        }
        if len > MAX_REQUEST_CHARS {
            return Err(TriggerError::RequestTooLong {
                len,
                max: MAX_REQUEST_CHARS,
            });
        }
        if project_id.trim().is_empty() {
            return Err(TriggerError::EmptyProject);
        }

        Ok(Self {
            request_text,
            project_id,
        })
    }

    /// The user's request.
    pub fn request_text(&self) -> &str {
        &self.request_text
    }

    /// Project the request belongs to.
    pub fn project_id(&self) -> &str {
        &self.project_id
    }
}

/// Record the user's request in its project's conversation and build the
/// event that starts the job for it.
pub async fn submit_request(
    store: &dyn MessageStore,
    trigger: &JobTrigger,
) -> StorageResult<(StoredMessage, TriggerEvent)> {
    let message = store
        .append_message(trigger.project_id(), NewMessage::user(trigger.request_text()))
        .await?;
    let event = TriggerEvent::code_agent_run(trigger.request_text(), trigger.project_id());
    Ok((message, event))
}
