//! The coding agent.
//!
//! One [`CodingAgent::turn`] is one model call plus every tool call the
//! model asked for, applied in the order it issued them. The model call and
//! each tool call are separate durable steps, so a resumed run replays the
//! same replies and therefore derives the same tool step names.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::llm::{AssistantReply, ChatModel, ChatRequest, Message};
use crate::prompt::CODING_PROMPT;
use crate::step::{StepError, StepExecutor};
use crate::tools::{ToolContext, ToolRegistry};

/// Result of one agent turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentTurn {
    /// Text of the model's reply, if it had any.
    pub text: Option<String>,
    /// Files written during the turn, last write per path wins.
    pub files: BTreeMap<String, String>,
    /// Number of tool calls executed.
    pub tool_calls: usize,
}

/// Model, prompt and tools of the coding agent.
pub struct CodingAgent {
    model: Arc<dyn ChatModel>,
    model_name: String,
    temperature: Option<f32>,
    system_prompt: String,
    tools: ToolRegistry,
}

impl fmt::Debug for CodingAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodingAgent")
            .field("model_name", &self.model_name)
            .field("temperature", &self.temperature)
            .field("tools", &self.tools)
            .finish_non_exhaustive()
    }
}

impl CodingAgent {
    /// Create an agent using the built-in prompt and tools.
    pub fn new(model: Arc<dyn ChatModel>, model_name: impl Into<String>) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            temperature: None,
            system_prompt: CODING_PROMPT.to_string(),
            tools: ToolRegistry::builtin(),
        }
    }

    /// Set the sampling temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Replace the system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Replace the tool set.
    #[must_use]
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Run turn number `turn` (1-based).
    ///
    /// The reply and every tool observation are appended to `conversation`.
    /// Tool failures are observations; only step failures are errors.
    pub async fn turn(
        &self,
        turn: u32,
        steps: &StepExecutor,
        ctx: &ToolContext<'_>,
        conversation: &mut Vec<Message>,
    ) -> Result<AgentTurn, StepError> {
        let mut messages = Vec::with_capacity(conversation.len() + 1);
        messages.push(Message::system(&self.system_prompt));
        messages.extend(conversation.iter().cloned());
        let request = ChatRequest::new(&self.model_name, messages, self.temperature)
            .with_tools(self.tools.definitions());

        let reply: AssistantReply = steps
            .run(&format!("code-agent:inference:{turn}"), move || {
                self.model.chat(request)
            })
            .await?;
        conversation.push(reply.to_message());

        let mut files = BTreeMap::new();
        for (index, call) in reply.tool_calls.iter().enumerate() {
            let step = format!("{}:{turn}:{index}", call.function.name);
            let output = self.tools.invoke(steps, &step, call, ctx).await?;
            debug!(turn, step = %step, written = output.files.len(), "tool call applied");
            conversation.push(Message::tool_result(&call.id, output.result.observation()));
            files.extend(output.files);
        }

        Ok(AgentTurn {
            text: reply.text_content(),
            files,
            tool_calls: reply.tool_calls.len(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::limits::JobLimits;
    use crate::llm::{Role, ScriptedModel, ToolCall};
    use crate::sandbox::{MemorySandboxProvider, SandboxProvider};
    use crate::store::{InMemoryStepStore, StepStore};

    #[tokio::test]
    async fn test_turn_applies_tool_calls_in_order() {
        let model = Arc::new(ScriptedModel::new([AssistantReply {
            content: None,
            tool_calls: vec![
                ToolCall::new(
                    "call_1",
                    "createOrUpdateFile",
                    json!({"files": [{"path": "app/page.tsx", "content": "v1"}]}),
                ),
                ToolCall::new(
                    "call_2",
                    "createOrUpdateFile",
                    json!({"files": [{"path": "app/page.tsx", "content": "v2"}]}),
                ),
                ToolCall::new("call_3", "readFiles", json!({"files": ["app/page.tsx"]})),
            ],
        }]));
        let agent = CodingAgent::new(model.clone(), "test-model").with_temperature(0.1);
        let provider = MemorySandboxProvider::new();
        let session = provider.create("caffeine").await.unwrap();
        let store = Arc::new(InMemoryStepStore::new());
        let steps = StepExecutor::new("run-1", store.clone() as Arc<dyn StepStore>);
        let limits = JobLimits::default();
        let ctx = ToolContext {
            sandboxes: &provider,
            sandbox_id: &session.id,
            limits: &limits,
        };
        let mut conversation = vec![Message::user("build a counter")];

        let turn = agent.turn(1, &steps, &ctx, &mut conversation).await.unwrap();

        assert_eq!(turn.tool_calls, 3);
        assert_eq!(turn.text, None);
        assert_eq!(turn.files["app/page.tsx"], "v2");
        // user, assistant, three tool results
        assert_eq!(conversation.len(), 5);
        assert_eq!(conversation[4].role, Role::Tool);
        assert!(conversation[4].content_str().contains("v2"));
        assert_eq!(
            store.step_names("run-1").await,
            vec![
                "code-agent:inference:1",
                "createOrUpdateFile:1:0",
                "createOrUpdateFile:1:1",
                "readFiles:1:2"
            ]
        );

        let request = &model.requests()[0];
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.temperature, Some(0.1));
        assert_eq!(request.tools.as_ref().map(Vec::len), Some(3));
    }

    #[tokio::test]
    async fn test_model_failure_is_a_step_error() {
        let agent = CodingAgent::new(Arc::new(ScriptedModel::new(Vec::new())), "test-model");
        let provider = MemorySandboxProvider::new();
        let session = provider.create("caffeine").await.unwrap();
        let steps = StepExecutor::new("run-1", Arc::new(InMemoryStepStore::new()));
        let limits = JobLimits::default();
        let ctx = ToolContext {
            sandboxes: &provider,
            sandbox_id: &session.id,
            limits: &limits,
        };

        let result = agent.turn(1, &steps, &ctx, &mut Vec::new()).await;
        assert!(matches!(
            result,
            Err(StepError::Failed { ref step, .. }) if step == "code-agent:inference:1"
        ));
    }
}
