//! File-based storage backends.
//!
//! Directory structure:
//! ```text
//! {root}/
//!   messages/
//!     {project_id}.jsonl   # Append-only conversation log
//!   steps/
//!     {run_id}.json        # Step memo table, rewritten atomically
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::memory::recent_window;
use super::{
    MessageStore, NewMessage, StepStore, StorageError, StorageResult, StoredMessage, validate_id,
};

async fn ensure_dir(dir: &Path) -> StorageResult<()> {
    fs::create_dir_all(dir)
        .await
        .map_err(|e| StorageError::file_io(dir, e))
}

async fn read_optional(path: &Path) -> StorageResult<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::file_io(path, e)),
    }
}

/// File-based implementation of [`MessageStore`].
///
/// Each project is one JSON-lines file; messages are only ever appended.
#[derive(Debug)]
pub struct FileMessageStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileMessageStore {
    /// Create a store rooted at `root`. Directories are created on first write.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            dir: root.as_ref().join("messages"),
            write_lock: Mutex::new(()),
        }
    }

    fn project_path(&self, project_id: &str) -> StorageResult<PathBuf> {
        validate_id("project", project_id)?;
        Ok(self.dir.join(format!("{project_id}.jsonl")))
    }

    async fn load_all(&self, project_id: &str) -> StorageResult<Vec<StoredMessage>> {
        let path = self.project_path(project_id)?;
        let Some(contents) = read_optional(&path).await? else {
            return Ok(Vec::new());
        };

        let mut messages = Vec::new();
        for line in contents.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            // Skip a torn final line left by a crash mid-append
            let Ok(message) = serde_json::from_str::<StoredMessage>(trimmed) else {
                tracing::warn!(path = %path.display(), "skipping malformed message line");
                continue;
            };
            messages.push(message);
        }
        Ok(messages)
    }
}

#[async_trait]
impl MessageStore for FileMessageStore {
    async fn find_recent(
        &self,
        project_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<StoredMessage>> {
        let messages = self.load_all(project_id).await?;
        Ok(recent_window(&messages, limit))
    }

    async fn append_message(
        &self,
        project_id: &str,
        message: NewMessage,
    ) -> StorageResult<StoredMessage> {
        let path = self.project_path(project_id)?;
        let stored = StoredMessage::from_new(project_id, message);
        let mut line = serde_json::to_string(&stored)
            .map_err(|e| StorageError::serialization(e.to_string()))?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        ensure_dir(&self.dir).await?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| StorageError::file_io(&path, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| StorageError::file_io(&path, e))?;
        file.sync_all()
            .await
            .map_err(|e| StorageError::file_io(&path, e))?;

        Ok(stored)
    }
}

/// File-based implementation of [`StepStore`].
///
/// One JSON document per run maps step names to their recorded output.
/// Writes go through a temp file and an atomic rename so a crash never
/// leaves a half-written memo table behind.
#[derive(Debug)]
pub struct FileStepStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStepStore {
    /// Create a store rooted at `root`. Directories are created on first write.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            dir: root.as_ref().join("steps"),
            write_lock: Mutex::new(()),
        }
    }

    fn run_path(&self, run_id: &str) -> StorageResult<PathBuf> {
        validate_id("run", run_id)?;
        Ok(self.dir.join(format!("{run_id}.json")))
    }

    async fn load_run(&self, path: &Path) -> StorageResult<BTreeMap<String, serde_json::Value>> {
        match read_optional(path).await? {
            Some(contents) => serde_json::from_str(&contents)
                .map_err(|e| StorageError::file_deserialization(path, e.to_string())),
            None => Ok(BTreeMap::new()),
        }
    }
}

#[async_trait]
impl StepStore for FileStepStore {
    async fn load(&self, run_id: &str, step: &str) -> StorageResult<Option<serde_json::Value>> {
        let path = self.run_path(run_id)?;
        let mut steps = self.load_run(&path).await?;
        Ok(steps.remove(step))
    }

    async fn save(
        &self,
        run_id: &str,
        step: &str,
        output: &serde_json::Value,
    ) -> StorageResult<()> {
        let path = self.run_path(run_id)?;

        let _guard = self.write_lock.lock().await;
        let mut steps = self.load_run(&path).await?;
        steps.insert(step.to_string(), output.clone());

        let json = serde_json::to_string_pretty(&steps)
            .map_err(|e| StorageError::serialization(e.to_string()))?;

        ensure_dir(&self.dir).await?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, json.as_bytes())
            .await
            .map_err(|e| StorageError::file_io(&temp_path, e))?;
        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| StorageError::file_io(&path, e))?;

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::store::{Fragment, MessageType};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_messages_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        let store = FileMessageStore::new(tmp.path());
        store
            .append_message("p1", NewMessage::user("build a counter"))
            .await
            .unwrap();
        let fragment = Fragment {
            sandbox_url: "http://localhost:3000".to_string(),
            title: "Counter".to_string(),
            files: BTreeMap::from([("app/page.tsx".to_string(), "export {}".to_string())]),
        };
        store
            .append_message("p1", NewMessage::assistant_result("Done", fragment.clone()))
            .await
            .unwrap();

        let reopened = FileMessageStore::new(tmp.path());
        let recent = reopened.find_recent("p1", 6).await.unwrap();

        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "Done");
        assert_eq!(recent[0].message_type, MessageType::Result);
        assert_eq!(recent[0].fragment.as_ref(), Some(&fragment));
        assert_eq!(recent[1].content, "build a counter");
    }

    #[tokio::test]
    async fn test_missing_project_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = FileMessageStore::new(tmp.path());

        assert!(store.find_recent("nobody", 6).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_path_like_project_id() {
        let tmp = TempDir::new().unwrap();
        let store = FileMessageStore::new(tmp.path());

        let result = store
            .append_message("../escape", NewMessage::user("x"))
            .await;
        assert!(matches!(result, Err(StorageError::InvalidId { .. })));
    }

    #[tokio::test]
    async fn test_steps_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        let store = FileStepStore::new(tmp.path());
        store
            .save("run-1", "get-sandbox-id", &serde_json::json!("sbx-1"))
            .await
            .unwrap();
        store
            .save("run-1", "terminal:1:0", &serde_json::json!({"ok": true}))
            .await
            .unwrap();

        let reopened = FileStepStore::new(tmp.path());
        assert_eq!(
            reopened.load("run-1", "get-sandbox-id").await.unwrap(),
            Some(serde_json::json!("sbx-1"))
        );
        assert_eq!(
            reopened.load("run-1", "terminal:1:0").await.unwrap(),
            Some(serde_json::json!({"ok": true}))
        );
        assert!(reopened.load("run-2", "get-sandbox-id").await.unwrap().is_none());
    }
}
