//! Host-directory sandbox backend.
//!
//! Directory structure:
//! ```text
//! {root}/
//!   {session_id}/        # Working directory of the session
//!   {session_id}.json    # Session metadata (template, expiry)
//! ```
//!
//! Metadata lives on disk so a process resuming a job run can still look
//! up its session and still honours the expiry set at creation.

use std::path::{Component, Path, PathBuf};
use std::pin::pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::debug;

use super::{CommandOutput, OutputCapture, Sandbox, SandboxError, SandboxProvider, SandboxSession};

/// Working directory the coding agent is told about; absolute paths under
/// it are accepted and mapped onto the session directory.
const AGENT_WORKDIR: &str = "/home/user";

/// How long output is still collected after the shell has exited.
const OUTPUT_GRACE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionMeta {
    id: String,
    template: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

impl SessionMeta {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() >= at)
    }
}

/// Sandbox provider backed by host directories.
#[derive(Debug, Clone)]
pub struct LocalSandboxProvider {
    root: PathBuf,
    templates: Option<PathBuf>,
    command_timeout: Duration,
    host: String,
}

impl LocalSandboxProvider {
    /// Create a provider keeping sessions under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            templates: None,
            command_timeout: Duration::from_secs(5 * 60),
            host: "localhost".to_string(),
        }
    }

    /// Resolve template ids as directories under `templates`.
    ///
    /// Without a templates root every template starts from an empty directory.
    pub fn with_templates(mut self, templates: impl Into<PathBuf>) -> Self {
        self.templates = Some(templates.into());
        self
    }

    /// Set the per-command wall-clock timeout.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the host name reported by [`Sandbox::get_host`].
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    fn session_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    fn meta_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }

    async fn load_meta(&self, id: &str) -> Result<SessionMeta, SandboxError> {
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(SandboxError::Unavailable(format!("invalid session id {id:?}")));
        }
        let path = self.meta_path(id);
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SandboxError::Unavailable(format!("no session {id}")));
            }
            Err(e) => return Err(SandboxError::Io(e)),
        };
        let meta: SessionMeta = serde_json::from_str(&contents)
            .map_err(|e| SandboxError::Unavailable(format!("corrupt session {id}: {e}")))?;
        if meta.is_expired() {
            return Err(SandboxError::Unavailable(format!("session {id} expired")));
        }
        Ok(meta)
    }

    async fn save_meta(&self, meta: &SessionMeta) -> Result<(), SandboxError> {
        let json = serde_json::to_string_pretty(meta)
            .map_err(|e| SandboxError::Io(std::io::Error::other(e)))?;
        let path = self.meta_path(&meta.id);
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, json.as_bytes()).await?;
        fs::rename(&temp_path, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl SandboxProvider for LocalSandboxProvider {
    async fn create(&self, template: &str) -> Result<SandboxSession, SandboxError> {
        let source = match &self.templates {
            Some(templates) => {
                let dir = templates.join(template);
                let is_dir = matches!(fs::metadata(&dir).await, Ok(meta) if meta.is_dir());
                if template.contains(['/', '\\']) || !is_dir {
                    return Err(SandboxError::UnknownTemplate(template.to_string()));
                }
                Some(dir)
            }
            None => None,
        };

        let id = ulid::Ulid::new().to_string().to_lowercase();
        let dir = self.session_dir(&id);
        fs::create_dir_all(&dir).await?;
        if let Some(source) = source {
            copy_dir(&source, &dir).await?;
        }

        self.save_meta(&SessionMeta {
            id: id.clone(),
            template: template.to_string(),
            created_at: Utc::now(),
            expires_at: None,
        })
        .await?;

        debug!(sandbox_id = %id, template, "created local sandbox");
        Ok(SandboxSession {
            id,
            template: template.to_string(),
        })
    }

    async fn set_timeout(&self, id: &str, timeout: Duration) -> Result<(), SandboxError> {
        let mut meta = self.load_meta(id).await?;
        let timeout = chrono::Duration::from_std(timeout)
            .map_err(|e| SandboxError::Io(std::io::Error::other(e)))?;
        meta.expires_at = Some(Utc::now() + timeout);
        self.save_meta(&meta).await
    }

    async fn connect(&self, id: &str) -> Result<Arc<dyn Sandbox>, SandboxError> {
        let meta = self.load_meta(id).await?;
        Ok(Arc::new(LocalSandbox {
            dir: self.session_dir(id),
            meta,
            command_timeout: self.command_timeout,
            host: self.host.clone(),
        }))
    }
}

/// Handle to one host-directory session.
#[derive(Debug)]
struct LocalSandbox {
    dir: PathBuf,
    meta: SessionMeta,
    command_timeout: Duration,
    host: String,
}

impl LocalSandbox {
    fn ensure_live(&self) -> Result<(), SandboxError> {
        if self.meta.is_expired() {
            return Err(SandboxError::Unavailable(format!(
                "session {} expired",
                self.meta.id
            )));
        }
        Ok(())
    }

    /// Map an agent-supplied path onto the session directory.
    fn resolve(&self, path: &str) -> Result<PathBuf, SandboxError> {
        let relative = match path.strip_prefix(AGENT_WORKDIR) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
            _ => path,
        };

        let mut resolved = self.dir.clone();
        let mut depth = 0usize;
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(SandboxError::InvalidPath(path.to_string()));
                }
            }
        }
        if depth == 0 {
            return Err(SandboxError::InvalidPath(path.to_string()));
        }
        Ok(resolved)
    }
}

async fn pump<R>(mut reader: R, mut sink: impl FnMut(&[u8])) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        sink(&chunk[..n]);
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: killpg only sends a signal. A group that is already gone
    // makes it fail with ESRCH, which is fine here.
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

#[async_trait]
impl Sandbox for LocalSandbox {
    fn id(&self) -> &str {
        &self.meta.id
    }

    async fn run_command(
        &self,
        command_text: &str,
        capture: &OutputCapture,
    ) -> Result<CommandOutput, SandboxError> {
        self.ensure_live()?;

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(command_text)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a timeout also stops anything the command
        // started in the background.
        #[cfg(unix)]
        command.process_group(0);
        let mut child = command.spawn()?;
        let pid = child.id();

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Io(std::io::Error::other("stdout not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SandboxError::Io(std::io::Error::other("stderr not captured")))?;

        let mut pumps = pin!(async {
            futures::try_join!(
                pump(stdout, |data| capture.push_stdout(data)),
                pump(stderr, |data| capture.push_stderr(data)),
            )
        });
        let mut drained = false;

        // The shell's exit ends the command. Background processes may keep
        // the pipes open long after that.
        let waited = tokio::time::timeout(self.command_timeout, async {
            loop {
                tokio::select! {
                    status = child.wait() => return status,
                    result = &mut pumps, if !drained => {
                        result?;
                        drained = true;
                    }
                }
            }
        })
        .await;

        let status = match waited {
            Ok(status) => status?,
            Err(_) => {
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                return Err(SandboxError::Timeout(self.command_timeout));
            }
        };

        if !drained {
            match tokio::time::timeout(OUTPUT_GRACE, &mut pumps).await {
                Ok(result) => {
                    result?;
                }
                Err(_) => {
                    debug!(command = command_text, "background process holds output open");
                }
            }
        }

        // Returns -1 if killed by signal
        let exit_code = status.code().unwrap_or(-1);
        if exit_code != 0 {
            return Err(SandboxError::CommandExit(exit_code));
        }
        Ok(capture.to_output(exit_code))
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        self.ensure_live()?;
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&target, content.as_bytes()).await?;
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<String, SandboxError> {
        self.ensure_live()?;
        let target = self.resolve(path)?;
        match fs::read(&target).await {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SandboxError::NotFound(path.to_string()))
            }
            Err(e) => Err(SandboxError::Io(e)),
        }
    }

    async fn get_host(&self, port: u16) -> Result<String, SandboxError> {
        self.ensure_live()?;
        Ok(format!("{}:{port}", self.host))
    }
}

/// Copy the contents of `from` into `to`, recursively.
async fn copy_dir(from: &Path, to: &Path) -> Result<(), SandboxError> {
    let mut pending = vec![(from.to_path_buf(), to.to_path_buf())];
    while let Some((src, dst)) = pending.pop() {
        fs::create_dir_all(&dst).await?;
        let mut entries = fs::read_dir(&src).await?;
        while let Some(entry) = entries.next_entry().await? {
            let target = dst.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                pending.push((entry.path(), target));
            } else {
                fs::copy(entry.path(), &target).await?;
            }
        }
    }
    Ok(())
}
