//! Tools the coding agent can call.
//!
//! Every tool is a thin adapter from a model-issued call to [`Sandbox`]
//! operations. Sandbox failures never escape a tool: they come back as a
//! [`ToolResult::Error`] whose text the agent reads as its observation.
//! Tools do not touch the agent's state directly; files they write are
//! returned in [`ToolOutput::files`] and merged by the caller.
//!
//! [`Sandbox`]: crate::sandbox::Sandbox

mod files;
mod terminal;

pub use files::{CreateOrUpdateFile, ReadFiles};
pub use terminal::Terminal;

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::limits::JobLimits;
use crate::llm::{ToolCall, ToolDefinition};
use crate::sandbox::{Sandbox, SandboxError, SandboxProvider};
use crate::step::{StepError, StepExecutor};

/// Outcome of a tool call as the agent sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolResult {
    /// Tool completed successfully with a JSON value.
    Success(serde_json::Value),
    /// Tool failed; the message describes what went wrong.
    Error(String),
}

impl ToolResult {
    /// Create a successful result.
    pub fn success(value: serde_json::Value) -> Self {
        Self::Success(value)
    }

    /// Create an error result.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    /// Check if this is a successful result.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Text fed back to the model.
    ///
    /// Strings are passed through as-is; other values are JSON-encoded.
    pub fn observation(&self) -> String {
        match self {
            Self::Success(serde_json::Value::String(text)) => text.clone(),
            Self::Success(value) => value.to_string(),
            Self::Error(message) => message.clone(),
        }
    }
}

impl From<Result<serde_json::Value, String>> for ToolResult {
    fn from(result: Result<serde_json::Value, String>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(error) => Self::Error(error),
        }
    }
}

/// Result of one tool call plus the files it wrote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// What the agent observes.
    pub result: ToolResult,
    /// Files written by this call, keyed by the path the agent used.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub files: BTreeMap<String, String>,
}

impl ToolOutput {
    /// A successful call returning `text`.
    pub fn text(text: impl Into<String>) -> Self {
        Self::from(ToolResult::success(serde_json::Value::String(text.into())))
    }

    /// A failed call.
    pub fn error(message: impl Into<String>) -> Self {
        Self::from(ToolResult::error(message))
    }

    /// Attach written files.
    #[must_use]
    pub fn with_files(mut self, files: BTreeMap<String, String>) -> Self {
        self.files = files;
        self
    }
}

impl From<ToolResult> for ToolOutput {
    fn from(result: ToolResult) -> Self {
        Self {
            result,
            files: BTreeMap::new(),
        }
    }
}

/// Everything a tool needs to reach the job's sandbox.
#[derive(Clone, Copy)]
pub struct ToolContext<'a> {
    /// Provider the session was created with.
    pub sandboxes: &'a dyn SandboxProvider,
    /// Session shared by every tool call of the run.
    pub sandbox_id: &'a str,
    /// Bounds for this run.
    pub limits: &'a JobLimits,
}

impl fmt::Debug for ToolContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolContext")
            .field("sandbox_id", &self.sandbox_id)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl ToolContext<'_> {
    /// Look the session up again. Called once per tool invocation.
    pub async fn connect(&self) -> Result<Arc<dyn Sandbox>, SandboxError> {
        self.sandboxes.connect(self.sandbox_id).await
    }
}

/// A capability exposed to the coding agent.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name and parameter schema advertised to the model.
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool. Never fails; failures are reported in the output.
    async fn call(&self, ctx: &ToolContext<'_>, params: serde_json::Value) -> ToolOutput;
}

/// Decode tool parameters, turning a mismatch into an error observation.
pub(crate) fn parse_params<T: DeserializeOwned>(
    tool: &str,
    params: serde_json::Value,
) -> Result<T, ToolOutput> {
    serde_json::from_value(params)
        .map_err(|e| ToolOutput::error(format!("Error: invalid arguments for {tool}: {e}")))
}

/// The fixed set of tools offered to the agent.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .tools
            .iter()
            .map(|t| t.definition().function.name)
            .collect();
        f.debug_struct("ToolRegistry").field("tools", &names).finish()
    }
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// `terminal`, `createOrUpdateFile` and `readFiles`.
    pub fn builtin() -> Self {
        Self::new()
            .with_tool(Terminal)
            .with_tool(CreateOrUpdateFile)
            .with_tool(ReadFiles)
    }

    /// Add a tool.
    #[must_use]
    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.push(Box::new(tool));
        self
    }

    /// Definitions of every registered tool, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// Find a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.definition().function.name == name)
            .map(Box::as_ref)
    }

    /// Run `call` as the durable step `step`.
    ///
    /// Unknown tools and malformed arguments become error observations.
    /// Only failures of the step machinery itself are returned as `Err`.
    pub async fn invoke(
        &self,
        steps: &StepExecutor,
        step: &str,
        call: &ToolCall,
        ctx: &ToolContext<'_>,
    ) -> Result<ToolOutput, StepError> {
        let name = call.function.name.as_str();
        steps
            .run(step, || async {
                info!(tool = name, step, "invoking tool");
                let output = match self.get(name) {
                    None => ToolOutput::error(format!("Error: unknown tool '{name}'")),
                    Some(tool) => match parse_arguments(&call.function.arguments) {
                        Ok(params) => tool.call(ctx, params).await,
                        Err(e) => ToolOutput::error(format!(
                            "Error: arguments for {name} are not valid JSON: {e}"
                        )),
                    },
                };
                if let ToolResult::Error(ref message) = output.result {
                    warn!(tool = name, step, error = %message, "tool reported failure");
                }
                Ok::<_, Infallible>(output)
            })
            .await
    }
}

fn parse_arguments(arguments: &str) -> Result<serde_json::Value, serde_json::Error> {
    if arguments.trim().is_empty() {
        return Ok(serde_json::Value::Object(serde_json::Map::new()));
    }
    serde_json::from_str(arguments)
}
