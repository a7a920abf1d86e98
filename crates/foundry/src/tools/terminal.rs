use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{Tool, ToolContext, ToolOutput, parse_params};
use crate::llm::ToolDefinition;
use crate::sandbox::OutputCapture;

#[derive(Debug, Deserialize)]
struct TerminalParams {
    command: String,
}

/// Runs a shell command in the sandbox.
///
/// Returns stdout on success. On failure the observation carries the error
/// and both output buffers as captured up to the failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct Terminal;

#[async_trait]
impl Tool for Terminal {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            "terminal",
            "Use the terminal to run commands",
            json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "Shell command to run" }
                },
                "required": ["command"]
            }),
        )
    }

    async fn call(&self, ctx: &ToolContext<'_>, params: serde_json::Value) -> ToolOutput {
        let params: TerminalParams = match parse_params("terminal", params) {
            Ok(params) => params,
            Err(output) => return output,
        };

        let capture = OutputCapture::new(ctx.limits.max_output_bytes);
        let result = match ctx.connect().await {
            Ok(sandbox) => sandbox.run_command(&params.command, &capture).await,
            Err(e) => Err(e),
        };

        if capture.was_truncated() {
            tracing::warn!(
                command = %params.command,
                limit = ctx.limits.max_output_bytes,
                "command output truncated"
            );
        }

        match result {
            Ok(output) => ToolOutput::text(output.stdout),
            Err(e) => {
                tracing::debug!(command = %params.command, error = %e, "command failed");
                ToolOutput::error(format!(
                    "Command failed: {e} \nstdout: {} \nstderr: {}",
                    capture.stdout(),
                    capture.stderr()
                ))
            }
        }
    }
}
