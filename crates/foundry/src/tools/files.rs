//! File tools: `createOrUpdateFile` and `readFiles`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{Tool, ToolContext, ToolOutput, ToolResult, parse_params};
use crate::llm::ToolDefinition;

#[derive(Debug, Deserialize)]
struct FileEntry {
    path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct WriteParams {
    files: Vec<FileEntry>,
}

#[derive(Debug, Deserialize)]
struct ReadParams {
    files: Vec<String>,
}

#[derive(Debug, Serialize)]
struct FileContent {
    path: String,
    content: String,
}

/// Writes files into the sandbox.
///
/// Entries are written in order. If one write fails the call reports an
/// error, but the files written before it are still returned so the caller
/// records them.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateOrUpdateFile;

#[async_trait]
impl Tool for CreateOrUpdateFile {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            "createOrUpdateFile",
            "Create or update files in the sandbox",
            json!({
                "type": "object",
                "properties": {
                    "files": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "path": {
                                    "type": "string",
                                    "description": "Relative file path, e.g. app/page.tsx"
                                },
                                "content": {
                                    "type": "string",
                                    "description": "Complete file content"
                                }
                            },
                            "required": ["path", "content"]
                        }
                    }
                },
                "required": ["files"]
            }),
        )
    }

    async fn call(&self, ctx: &ToolContext<'_>, params: serde_json::Value) -> ToolOutput {
        let params: WriteParams = match parse_params("createOrUpdateFile", params) {
            Ok(params) => params,
            Err(output) => return output,
        };

        let sandbox = match ctx.connect().await {
            Ok(sandbox) => sandbox,
            Err(e) => return ToolOutput::error(format!("Error: {e}")),
        };

        let mut written = BTreeMap::new();
        for file in params.files {
            if let Err(e) = sandbox.write_file(&file.path, &file.content).await {
                return ToolOutput::error(format!("Error: failed to write {}: {e}", file.path))
                    .with_files(written);
            }
            written.insert(file.path, file.content);
        }

        let paths: Vec<&str> = written.keys().map(String::as_str).collect();
        let summary = format!("Updated {} file(s): {}", paths.len(), paths.join(", "));
        ToolOutput::text(summary).with_files(written)
    }
}

/// Reads files from the sandbox.
///
/// Returns a JSON list of `{path, content}`. Any failed read fails the
/// whole call; no partial list is returned.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadFiles;

#[async_trait]
impl Tool for ReadFiles {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            "readFiles",
            "Read files from the sandbox",
            json!({
                "type": "object",
                "properties": {
                    "files": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Relative paths of the files to read"
                    }
                },
                "required": ["files"]
            }),
        )
    }

    async fn call(&self, ctx: &ToolContext<'_>, params: serde_json::Value) -> ToolOutput {
        let params: ReadParams = match parse_params("readFiles", params) {
            Ok(params) => params,
            Err(output) => return output,
        };

        let sandbox = match ctx.connect().await {
            Ok(sandbox) => sandbox,
            Err(e) => return ToolOutput::error(format!("Error: {e}")),
        };

        let mut contents = Vec::with_capacity(params.files.len());
        for path in params.files {
            match sandbox.read_file(&path).await {
                Ok(content) => contents.push(FileContent { path, content }),
                Err(e) => return ToolOutput::error(format!("Error: failed to read {path}: {e}")),
            }
        }

        match serde_json::to_value(&contents) {
            Ok(value) => ToolOutput::from(ToolResult::success(value)),
            Err(e) => ToolOutput::error(format!("Error: {e}")),
        }
    }
}
