//! Isolated execution environments.
//!
//! A [`SandboxProvider`] provisions sessions and hands out [`Sandbox`]
//! handles by id, so every tool invocation of a job run addresses the same
//! remote environment. Sessions expire on their own after the configured
//! timeout; the engine never tears them down explicitly.
//!
//! Backends:
//!
//! - [`LocalSandboxProvider`] - one directory per session, commands run
//!   under `sh -c` on the host
//! - [`MemorySandboxProvider`] - in-memory filesystem with scripted commands

mod local;
mod memory;

pub use local::LocalSandboxProvider;
pub use memory::{MemorySandbox, MemorySandboxProvider, ScriptedCommand};

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::limits::LimitedBuffer;

/// Errors from sandbox operations.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The session does not exist, has expired, or cannot be reached.
    #[error("sandbox unavailable: {0}")]
    Unavailable(String),

    /// The command ran and exited unsuccessfully.
    #[error("command exited with code {0}")]
    CommandExit(i32),

    /// The command did not finish in time and was killed.
    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    /// A file path escapes the sandbox or is otherwise unusable.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The requested file does not exist.
    #[error("file not found: {0}")]
    NotFound(String),

    /// The template the session should start from does not exist.
    #[error("unknown template: {0}")]
    UnknownTemplate(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A provisioned session, as returned by [`SandboxProvider::create`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxSession {
    /// Identifier used to look the session up again.
    pub id: String,
    /// Template the session was created from.
    pub template: String,
}

/// Output of a command that exited successfully.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Exit code (always zero for a successful command).
    pub exit_code: i32,
    /// Everything written to stdout.
    pub stdout: String,
    /// Everything written to stderr.
    pub stderr: String,
}

/// Accumulating stdout/stderr buffers for one command.
///
/// The caller owns the capture, so whatever a command printed before it
/// failed or timed out is still available for the failure report.
#[derive(Debug)]
pub struct OutputCapture {
    stdout: Mutex<LimitedBuffer>,
    stderr: Mutex<LimitedBuffer>,
}

impl OutputCapture {
    /// Create a capture holding at most `limit` bytes per stream.
    pub fn new(limit: usize) -> Self {
        Self {
            stdout: Mutex::new(LimitedBuffer::new(limit)),
            stderr: Mutex::new(LimitedBuffer::new(limit)),
        }
    }

    /// Append a chunk of stdout.
    pub fn push_stdout(&self, data: &[u8]) {
        self.stdout
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write(data);
    }

    /// Append a chunk of stderr.
    pub fn push_stderr(&self, data: &[u8]) {
        self.stderr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write(data);
    }

    /// Stdout captured so far.
    pub fn stdout(&self) -> String {
        self.stdout
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .to_string_lossy()
    }

    /// Stderr captured so far.
    pub fn stderr(&self) -> String {
        self.stderr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .to_string_lossy()
    }

    /// Whether either stream went over the limit.
    pub fn was_truncated(&self) -> bool {
        let truncated = |buffer: &Mutex<LimitedBuffer>| {
            buffer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .was_truncated()
        };
        truncated(&self.stdout) || truncated(&self.stderr)
    }

    /// Snapshot of both buffers as a successful output.
    pub fn to_output(&self, exit_code: i32) -> CommandOutput {
        CommandOutput {
            exit_code,
            stdout: self.stdout(),
            stderr: self.stderr(),
        }
    }
}

/// Handle to one live sandbox session.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Session id.
    fn id(&self) -> &str;

    /// Run a shell command, streaming its output into `capture`.
    ///
    /// A non-zero exit is reported as [`SandboxError::CommandExit`]; the
    /// output printed up to that point stays in `capture`.
    async fn run_command(
        &self,
        command: &str,
        capture: &OutputCapture,
    ) -> Result<CommandOutput, SandboxError>;

    /// Write `content` to `path`, creating parent directories.
    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError>;

    /// Read the file at `path`.
    async fn read_file(&self, path: &str) -> Result<String, SandboxError>;

    /// Externally reachable host (without scheme) for a service on `port`.
    async fn get_host(&self, port: u16) -> Result<String, SandboxError>;
}

/// Provisions sandbox sessions and resolves them by id.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Provision a new session from `template`.
    async fn create(&self, template: &str) -> Result<SandboxSession, SandboxError>;

    /// Set the session to expire `timeout` from now.
    async fn set_timeout(&self, id: &str, timeout: Duration) -> Result<(), SandboxError>;

    /// Look up a live session.
    ///
    /// Fails with [`SandboxError::Unavailable`] for unknown or expired ids.
    async fn connect(&self, id: &str) -> Result<Arc<dyn Sandbox>, SandboxError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_keeps_partial_output() {
        let capture = OutputCapture::new(1024);
        capture.push_stdout(b"building...\n");
        capture.push_stderr(b"error: missing module\n");

        let output = capture.to_output(1);
        assert_eq!(output.stdout, "building...\n");
        assert_eq!(output.stderr, "error: missing module\n");
        assert_eq!(output.exit_code, 1);
    }

    #[test]
    fn test_capture_respects_limit() {
        let capture = OutputCapture::new(4);
        capture.push_stdout(b"0123456789");

        assert!(capture.stdout().starts_with("0123"));
        assert!(capture.stdout().contains("truncated"));
        assert!(capture.was_truncated());
    }

    #[test]
    fn test_capture_under_limit_is_not_truncated() {
        let capture = OutputCapture::new(1024);
        capture.push_stdout(b"ok\n");
        capture.push_stderr(b"warn\n");

        assert!(!capture.was_truncated());
    }
}
