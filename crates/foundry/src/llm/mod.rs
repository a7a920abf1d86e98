//! Chat model boundary.

mod error;
mod openai;
mod scripted;
mod types;

pub use error::LlmError;
pub use openai::{DEFAULT_BASE_URL, OpenAiCompatibleModel};
pub use scripted::ScriptedModel;
pub use types::{
    AssistantReply, ChatRequest, ChatResponse, Choice, ContentPart, FunctionCall,
    FunctionDefinition, Message, MessageContent, ResponseMessage, Role, ToolCall, ToolDefinition,
};

use async_trait::async_trait;

/// A model that answers chat completion requests.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send one request and return the first choice.
    async fn chat(&self, request: ChatRequest) -> Result<AssistantReply, LlmError>;
}
