//! In-memory sandbox backend with scripted commands.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{CommandOutput, OutputCapture, Sandbox, SandboxError, SandboxProvider, SandboxSession};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Canned result for a command run in a [`MemorySandbox`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptedCommand {
    /// Exit code; non-zero makes the command fail.
    pub exit_code: i32,
    /// Text written to stdout.
    pub stdout: String,
    /// Text written to stderr.
    pub stderr: String,
}

impl ScriptedCommand {
    /// A command that succeeds with `stdout`.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A command that exits with `exit_code` after printing both streams.
    pub fn fail(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }
}

#[derive(Debug, Default)]
struct ProviderState {
    sessions: HashMap<String, Arc<MemorySandbox>>,
    next_id: u64,
    failing_timeouts: usize,
}

/// Sandbox provider whose sessions live entirely in memory.
///
/// Commands are not executed; each one is looked up in a script table
/// shared by every session. Unknown commands fail with exit code 127.
#[derive(Debug, Clone, Default)]
pub struct MemorySandboxProvider {
    state: Arc<Mutex<ProviderState>>,
    commands: Arc<Mutex<HashMap<String, ScriptedCommand>>>,
    failing_writes: Arc<Mutex<HashSet<String>>>,
}

impl MemorySandboxProvider {
    /// Create a provider with no sessions and no scripted commands.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the result of `command`.
    pub fn with_command(self, command: impl Into<String>, result: ScriptedCommand) -> Self {
        lock(&self.commands).insert(command.into(), result);
        self
    }

    /// Make every write to `path` fail, in every session.
    pub fn with_failing_write(self, path: impl Into<String>) -> Self {
        lock(&self.failing_writes).insert(path.into());
        self
    }

    /// Make the next `count` calls to `set_timeout` fail.
    pub fn with_failing_timeouts(self, count: usize) -> Self {
        lock(&self.state).failing_timeouts = count;
        self
    }

    /// Number of sessions created so far.
    pub fn created_count(&self) -> usize {
        lock(&self.state).sessions.len()
    }

    /// Session by id, including expired ones.
    pub fn session(&self, id: &str) -> Option<Arc<MemorySandbox>> {
        lock(&self.state).sessions.get(id).cloned()
    }

    /// Expire a session immediately.
    pub fn expire(&self, id: &str) {
        if let Some(session) = self.session(id) {
            session.expired.store(true, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl SandboxProvider for MemorySandboxProvider {
    async fn create(&self, template: &str) -> Result<SandboxSession, SandboxError> {
        let mut state = lock(&self.state);
        state.next_id += 1;
        let id = format!("mem-{}", state.next_id);
        let sandbox = Arc::new(MemorySandbox {
            id: id.clone(),
            files: Mutex::new(BTreeMap::new()),
            commands: Arc::clone(&self.commands),
            failing_writes: Arc::clone(&self.failing_writes),
            history: Mutex::new(Vec::new()),
            timeout: Mutex::new(None),
            expired: AtomicBool::new(false),
        });
        state.sessions.insert(id.clone(), sandbox);
        Ok(SandboxSession {
            id,
            template: template.to_string(),
        })
    }

    async fn set_timeout(&self, id: &str, timeout: Duration) -> Result<(), SandboxError> {
        {
            let mut state = lock(&self.state);
            if state.failing_timeouts > 0 {
                state.failing_timeouts -= 1;
                return Err(SandboxError::Io(std::io::Error::other(
                    "sandbox api rejected the timeout",
                )));
            }
        }
        let session = self.connect_inner(id)?;
        *lock(&session.timeout) = Some(timeout);
        Ok(())
    }

    async fn connect(&self, id: &str) -> Result<Arc<dyn Sandbox>, SandboxError> {
        Ok(self.connect_inner(id)?)
    }
}

impl MemorySandboxProvider {
    fn connect_inner(&self, id: &str) -> Result<Arc<MemorySandbox>, SandboxError> {
        let session = self
            .session(id)
            .ok_or_else(|| SandboxError::Unavailable(format!("no session {id}")))?;
        session.ensure_live()?;
        Ok(session)
    }
}

/// One in-memory session.
#[derive(Debug)]
pub struct MemorySandbox {
    id: String,
    files: Mutex<BTreeMap<String, String>>,
    commands: Arc<Mutex<HashMap<String, ScriptedCommand>>>,
    failing_writes: Arc<Mutex<HashSet<String>>>,
    history: Mutex<Vec<String>>,
    timeout: Mutex<Option<Duration>>,
    expired: AtomicBool,
}

impl MemorySandbox {
    /// Snapshot of the session's filesystem.
    pub fn files(&self) -> BTreeMap<String, String> {
        lock(&self.files).clone()
    }

    /// Commands run so far, in order.
    pub fn commands_run(&self) -> Vec<String> {
        lock(&self.history).clone()
    }

    /// Timeout set through [`SandboxProvider::set_timeout`].
    pub fn timeout(&self) -> Option<Duration> {
        *lock(&self.timeout)
    }

    fn ensure_live(&self) -> Result<(), SandboxError> {
        if self.expired.load(Ordering::SeqCst) {
            return Err(SandboxError::Unavailable(format!(
                "session {} expired",
                self.id
            )));
        }
        Ok(())
    }

    fn normalize(path: &str) -> Result<String, SandboxError> {
        let trimmed = path
            .strip_prefix("/home/user/")
            .unwrap_or(path)
            .trim_start_matches("./");
        let valid = !trimmed.is_empty()
            && !trimmed.starts_with('/')
            && trimmed.split('/').all(|part| part != "..");
        if valid {
            Ok(trimmed.to_string())
        } else {
            Err(SandboxError::InvalidPath(path.to_string()))
        }
    }
}

#[async_trait]
impl Sandbox for MemorySandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run_command(
        &self,
        command: &str,
        capture: &OutputCapture,
    ) -> Result<CommandOutput, SandboxError> {
        self.ensure_live()?;
        lock(&self.history).push(command.to_string());

        let scripted = lock(&self.commands).get(command).cloned().unwrap_or_else(|| {
            ScriptedCommand::fail(127, "", format!("sh: 1: {command}: not found\n"))
        });

        capture.push_stdout(scripted.stdout.as_bytes());
        capture.push_stderr(scripted.stderr.as_bytes());
        if scripted.exit_code != 0 {
            return Err(SandboxError::CommandExit(scripted.exit_code));
        }
        Ok(capture.to_output(0))
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        self.ensure_live()?;
        let path = Self::normalize(path)?;
        if lock(&self.failing_writes).contains(&path) {
            return Err(SandboxError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("cannot write {path}"),
            )));
        }
        lock(&self.files).insert(path, content.to_string());
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<String, SandboxError> {
        self.ensure_live()?;
        let normalized = Self::normalize(path)?;
        lock(&self.files)
            .get(&normalized)
            .cloned()
            .ok_or_else(|| SandboxError::NotFound(path.to_string()))
    }

    async fn get_host(&self, port: u16) -> Result<String, SandboxError> {
        self.ensure_live()?;
        Ok(format!("{port}-{}.sandbox.local", self.id))
    }
}
