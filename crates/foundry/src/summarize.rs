//! Post-run summarizers.
//!
//! Two single-shot agents turn the task summary into a display title and a
//! reply for the user. Each call is a durable step. When the model answers
//! without usable text the fixed fallback is used instead.

use std::fmt;
use std::sync::Arc;

use crate::llm::{AssistantReply, ChatModel, ChatRequest, LlmError, Message};
use crate::prompt::{FRAGMENT_TITLE_PROMPT, RESPONSE_PROMPT};
use crate::step::{StepError, StepExecutor};

/// Title used when the title summarizer returns no text.
pub const DEFAULT_TITLE: &str = "Fragment";
/// Reply used when the response summarizer returns no text.
pub const DEFAULT_RESPONSE: &str = "Here is what I built for you.";

/// A stateless single-turn agent with a fallback answer.
pub struct Summarizer {
    model: Arc<dyn ChatModel>,
    model_name: String,
    system_prompt: String,
    step: &'static str,
    fallback: &'static str,
}

impl fmt::Debug for Summarizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Summarizer")
            .field("model_name", &self.model_name)
            .field("step", &self.step)
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}

impl Summarizer {
    /// The fragment title generator.
    pub fn title(model: Arc<dyn ChatModel>, model_name: impl Into<String>) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            system_prompt: FRAGMENT_TITLE_PROMPT.to_string(),
            step: "generate-fragment-title",
            fallback: DEFAULT_TITLE,
        }
    }

    /// The user-facing response generator.
    pub fn response(model: Arc<dyn ChatModel>, model_name: impl Into<String>) -> Self {
        Self {
            model,
            model_name: model_name.into(),
            system_prompt: RESPONSE_PROMPT.to_string(),
            step: "generate-response",
            fallback: DEFAULT_RESPONSE,
        }
    }

    /// Step name this summarizer records under.
    pub fn step(&self) -> &'static str {
        self.step
    }

    /// Summarize `summary`.
    pub async fn run(&self, steps: &StepExecutor, summary: &str) -> Result<String, StepError> {
        let request = ChatRequest::new(
            &self.model_name,
            vec![
                Message::system(&self.system_prompt),
                Message::user(summary),
            ],
            None,
        );
        steps
            .run(self.step, || async {
                let reply = self.model.chat(request).await?;
                Ok::<_, LlmError>(text_or(&reply, self.fallback))
            })
            .await
    }
}

/// The reply's text, or `fallback` when it has none.
///
/// List-shaped content is joined with a single space.
pub fn text_or(reply: &AssistantReply, fallback: &str) -> String {
    match reply.text_content() {
        Some(text) if !text.trim().is_empty() => text.trim().to_string(),
        _ => fallback.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::llm::{ContentPart, MessageContent, ScriptedModel, ToolCall};
    use crate::store::InMemoryStepStore;

    fn steps() -> StepExecutor {
        StepExecutor::new("run-1", Arc::new(InMemoryStepStore::new()))
    }

    #[test]
    fn test_text_or() {
        assert_eq!(text_or(&AssistantReply::text("Counter App"), DEFAULT_TITLE), "Counter App");
        assert_eq!(
            text_or(
                &AssistantReply {
                    content: Some(MessageContent::Parts(vec![
                        ContentPart::text("Counter"),
                        ContentPart::text("App"),
                    ])),
                    tool_calls: Vec::new(),
                },
                DEFAULT_TITLE
            ),
            "Counter App"
        );
        let tool_only =
            AssistantReply::tool_calls(vec![ToolCall::new("c", "terminal", serde_json::json!({}))]);
        assert_eq!(text_or(&tool_only, DEFAULT_TITLE), "Fragment");
        assert_eq!(text_or(&AssistantReply::text("   "), DEFAULT_RESPONSE), DEFAULT_RESPONSE);
    }

    #[tokio::test]
    async fn test_summarizers_send_summary_and_record_steps() {
        let model = Arc::new(ScriptedModel::new([
            AssistantReply::text("Counter App"),
            AssistantReply::default(),
        ]));
        let steps = steps();

        let title = Summarizer::title(model.clone(), "small")
            .run(&steps, "Built a counter")
            .await
            .unwrap();
        let response = Summarizer::response(model.clone(), "small")
            .run(&steps, "Built a counter")
            .await
            .unwrap();

        assert_eq!(title, "Counter App");
        assert_eq!(response, DEFAULT_RESPONSE);
        let requests = model.requests();
        assert_eq!(requests[0].messages[1].content_str(), "Built a counter");
        assert!(requests[0].tools.is_none());

        // Replayed from the step record, not asked again
        let again = Summarizer::title(model.clone(), "small")
            .run(&steps, "Built a counter")
            .await
            .unwrap();
        assert_eq!(again, "Counter App");
        assert_eq!(model.calls(), 2);
    }
}
